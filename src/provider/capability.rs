//! 能力后端抽象
//!
//! 每种能力（摘要、翻译、语言检测、写作、改写、通用语言模型）由宿主提供一个
//! [`CapabilityBackend`]，负责报告可用性并创建 [`Session`]。会话只有一个释放入口。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::progress::ProgressSink;
use crate::error::ProviderError;

/// 能力种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Summarizer,
    Translator,
    Writer,
    Rewriter,
    LanguageDetector,
    LanguageModel,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Summarizer,
        Capability::Translator,
        Capability::Writer,
        Capability::Rewriter,
        Capability::LanguageDetector,
        Capability::LanguageModel,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Capability::Summarizer => "summarizer",
            Capability::Translator => "translator",
            Capability::Writer => "writer",
            Capability::Rewriter => "rewriter",
            Capability::LanguageDetector => "language-detector",
            Capability::LanguageModel => "language-model",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Capability::Summarizer => "Summarizer",
            Capability::Translator => "Translator",
            Capability::Writer => "Writer",
            Capability::Rewriter => "Rewriter",
            Capability::LanguageDetector => "Language Detector",
            Capability::LanguageModel => "Language Model",
        }
    }

    /// 模型状态中是否算作必需
    pub fn required(&self) -> bool {
        matches!(
            self,
            Capability::Summarizer | Capability::Translator | Capability::Rewriter
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// 可用性状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Ready,
    Downloadable,
    Unavailable,
    Unsupported,
    Unknown,
}

impl Availability {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Availability::Unavailable | Availability::Unsupported)
    }
}

/// 摘要类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryKind {
    #[default]
    KeyPoints,
    Headline,
    Tldr,
}

impl SummaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryKind::KeyPoints => "key-points",
            SummaryKind::Headline => "headline",
            SummaryKind::Tldr => "tldr",
        }
    }

    /// 未知类型回退到 key-points
    pub fn parse(value: &str) -> Self {
        match value {
            "headline" => SummaryKind::Headline,
            "tldr" => SummaryKind::Tldr,
            _ => SummaryKind::KeyPoints,
        }
    }
}

/// 创建会话的参数；`key` 同时是会话缓存键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub capability: Capability,
    pub key: String,
    pub output_language: Option<String>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub summary_kind: Option<SummaryKind>,
    pub tone: Option<String>,
    pub format: Option<String>,
    pub expects_image: bool,
}

impl SessionOptions {
    fn base(capability: Capability, key: String) -> Self {
        Self {
            capability,
            key,
            output_language: None,
            source_language: None,
            target_language: None,
            summary_kind: None,
            tone: None,
            format: None,
            expects_image: false,
        }
    }

    pub fn language_detector() -> Self {
        Self::base(Capability::LanguageDetector, "languageDetector".to_string())
    }

    pub fn translator(source: Option<&str>, target: &str) -> Self {
        let key = format!("translator:{}>{}", source.unwrap_or("auto"), target);
        Self {
            source_language: source.map(str::to_string),
            target_language: Some(target.to_string()),
            ..Self::base(Capability::Translator, key)
        }
    }

    pub fn summarizer(kind: SummaryKind, output_language: &str) -> Self {
        let key = format!("summarizer:{}:{}", kind.as_str(), output_language);
        Self {
            summary_kind: Some(kind),
            output_language: Some(output_language.to_string()),
            ..Self::base(Capability::Summarizer, key)
        }
    }

    pub fn writer() -> Self {
        Self {
            tone: Some("neutral".to_string()),
            format: Some("plain-text".to_string()),
            ..Self::base(Capability::Writer, "writer:neutral:plain-text".to_string())
        }
    }

    pub fn rewriter() -> Self {
        Self {
            tone: Some("as-is".to_string()),
            format: Some("plain-text".to_string()),
            ..Self::base(Capability::Rewriter, "rewriter:as-is:plain-text".to_string())
        }
    }

    pub fn language_model(output_language: &str) -> Self {
        Self {
            output_language: Some(output_language.to_string()),
            ..Self::base(
                Capability::LanguageModel,
                format!("languageModel:{}", output_language),
            )
        }
    }

    pub fn image_prompt(output_language: &str) -> Self {
        Self {
            output_language: Some(output_language.to_string()),
            expects_image: true,
            ..Self::base(Capability::LanguageModel, format!("image:{}", output_language))
        }
    }
}

/// 图片数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub bytes: Arc<Vec<u8>>,
}

/// 传给图片描述会话的图片：已加载的数据，或无法加载时的原始地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInput {
    Payload(ImagePayload),
    Url(String),
}

/// 会话调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    DetectLanguage { text: String },
    Translate { text: String },
    Summarize { text: String },
    Write { prompt: String, context: Option<String> },
    Rewrite { text: String, context: Option<String> },
    Prompt { text: String },
    DescribeImage { instructions: String, image: ImageInput },
}

/// 会话调用结果
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    Text(String),
    Detection { language: String, confidence: f32 },
}

impl SessionOutput {
    /// 去掉首尾空白后的非空文本
    pub fn into_text(self) -> Option<String> {
        match self {
            SessionOutput::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            SessionOutput::Detection { .. } => None,
        }
    }
}

/// 模型会话
#[async_trait]
pub trait Session: Send + Sync {
    async fn invoke(&self, invocation: &Invocation) -> Result<SessionOutput, ProviderError>;

    /// 释放会话占用的资源
    async fn release(&self);
}

/// 能力后端
#[async_trait]
pub trait CapabilityBackend: Send + Sync {
    async fn availability(&self, options: &SessionOptions) -> Availability;

    async fn create(
        &self,
        options: &SessionOptions,
        progress: ProgressSink,
    ) -> Result<Arc<dyn Session>, ProviderError>;
}

/// 宿主提供的能力集合；缺失的能力视为不受支持
#[derive(Clone, Default)]
pub struct CapabilitySet {
    backends: HashMap<Capability, Arc<dyn CapabilityBackend>>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability, backend: Arc<dyn CapabilityBackend>) -> Self {
        self.backends.insert(capability, backend);
        self
    }

    pub fn insert(&mut self, capability: Capability, backend: Arc<dyn CapabilityBackend>) {
        self.backends.insert(capability, backend);
    }

    pub fn get(&self, capability: Capability) -> Option<&Arc<dyn CapabilityBackend>> {
        self.backends.get(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.backends.keys().map(|cap| cap.id()).collect();
        names.sort_unstable();
        f.debug_struct("CapabilitySet").field("backends", &names).finish()
    }
}
