//! 建议提供者
//!
//! 对宿主提供的能力后端做一层统一封装：会话缓存、激活门控、下载进度广播、
//! 摘要分块与配额退避、改写回退链。除激活错误外，所有失败都在这里降级为确定性的回退文本，
//! 调用方拿到的总是可用的字符串。

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;
use regex::Regex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use super::capability::{
    Availability, Capability, CapabilitySet, ImageInput, ImagePayload, Invocation, Session,
    SessionOptions, SessionOutput, SummaryKind,
};
use super::chunk::{chunk_text, summary_fallback};
use super::language::{language_label, normalize_output_language, LanguageDetection};
use super::progress::{
    ActivationEvent, ActivationInfo, ActivationTracker, DownloadProgress, ProgressSink,
};
use super::session_cache::{SessionCache, SessionCacheStats};
use crate::activation::ActivationMonitor;
use crate::config::constants::TARGET_ALT_LENGTH;
use crate::config::AuditConfig;
use crate::error::ProviderError;
use crate::html::text::{cached_regex, truncate_chars};

/// 语言检测时送给模型的最大字符数
const DETECTION_INPUT_CHARS: usize = 5000;
const PROGRESS_CHANNEL_CAPACITY: usize = 128;
const DEFAULT_REWRITE_INSTRUCTION: &str = "Rewrite the following text for clarity.";

static REPEATED_BANG: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_RUN: OnceLock<Regex> = OnceLock::new();
static SHOUTED_CLICK_HERE: OnceLock<Regex> = OnceLock::new();

/// 宿主提供的图片加载钩子
#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// 加载失败返回 `None`，失败结果同样会被缓存
    async fn load(&self, url: &Url) -> Option<ImagePayload>;
}

/// 单个能力的状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatusItem {
    pub id: &'static str,
    pub label: &'static str,
    pub status: Availability,
    pub available: bool,
    pub required: bool,
}

/// 本地模型状态汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    /// 所有必需能力都可用
    pub ready: bool,
    pub items: Vec<ModelStatusItem>,
    pub checked_at: i64,
}

#[derive(Debug, Clone)]
struct ProviderSettings {
    default_locale: String,
    extended_models_allowed: bool,
    chunk_limit: usize,
    min_chunk_limit: usize,
    model_status_ttl: Duration,
}

pub struct SuggestionProvider {
    capabilities: CapabilitySet,
    sessions: Arc<SessionCache>,
    activation: Arc<ActivationMonitor>,
    activation_state: ActivationTracker,
    progress: broadcast::Sender<DownloadProgress>,
    image_loader: Option<Arc<dyn ImageLoader>>,
    image_cache: Mutex<LruCache<String, Option<ImagePayload>>>,
    model_status: Mutex<Option<(Instant, ModelStatus)>>,
    settings: ProviderSettings,
}

impl SuggestionProvider {
    pub fn new(
        capabilities: CapabilitySet,
        activation: Arc<ActivationMonitor>,
        config: &AuditConfig,
    ) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        let cache_size = NonZeroUsize::new(config.image_cache_size).unwrap_or(NonZeroUsize::MIN);

        Self {
            capabilities,
            sessions: Arc::new(SessionCache::new(config.model_idle(), config.model_sweep_min())),
            activation,
            activation_state: ActivationTracker::new(),
            progress,
            image_loader: None,
            image_cache: Mutex::new(LruCache::new(cache_size)),
            model_status: Mutex::new(None),
            settings: ProviderSettings {
                default_locale: config.default_locale.clone(),
                extended_models_allowed: config.extended_models_allowed,
                chunk_limit: config.chunk_limit,
                min_chunk_limit: config.min_chunk_limit,
                model_status_ttl: config.model_status_ttl(),
            },
        }
    }

    /// 没有任何能力后端的提供者，所有建议都来自回退逻辑
    pub fn heuristic(config: &AuditConfig) -> Self {
        Self::new(
            CapabilitySet::new(),
            Arc::new(ActivationMonitor::new()),
            config,
        )
    }

    pub fn with_image_loader(mut self, loader: Arc<dyn ImageLoader>) -> Self {
        self.image_loader = Some(loader);
        self
    }

    pub fn default_locale(&self) -> &str {
        &self.settings.default_locale
    }

    pub fn activation_monitor(&self) -> &Arc<ActivationMonitor> {
        &self.activation
    }

    // ---- 会话 ----

    /// 取得或创建会话
    ///
    /// 可下载但尚未下载的能力需要用户激活才能创建。激活标志一旦置位，
    /// 只有 [`clear_activation`](Self::clear_activation) 能清除。
    pub async fn ensure_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Arc<dyn Session>, ProviderError> {
        if let Some(session) = self.sessions.get(&options.key) {
            return Ok(session);
        }

        let capability = options.capability;
        let backend = self
            .capabilities
            .get(capability)
            .ok_or_else(|| ProviderError::Unavailable(capability.id().to_string()))?;

        let availability = backend.availability(options).await;
        if availability.is_unavailable() {
            return Err(ProviderError::Unavailable(format!(
                "{} ({:?})",
                capability.id(),
                availability
            )));
        }

        let needs_activation = availability == Availability::Downloadable;
        if needs_activation && !self.activation.has_activation() {
            self.activation_state.set_required(true);
            return Err(ProviderError::ActivationRequired);
        }

        let sink = ProgressSink::new(capability, options.key.clone(), self.progress.clone());
        match backend.create(options, sink).await {
            Ok(session) => {
                tracing::debug!("创建模型会话: {}", options.key);
                self.sessions.insert(options.key.clone(), session.clone());
                Ok(session)
            }
            Err(error) if needs_activation || error.is_activation() => {
                self.activation_state.set_required(true);
                Err(ProviderError::ActivationRequired)
            }
            Err(error) => Err(error),
        }
    }

    /// 在后台启动空闲会话清理任务
    pub fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        tokio::spawn(self.sessions.clone().run_sweeper())
    }

    /// 释放全部缓存会话
    pub async fn flush_sessions(&self) {
        self.sessions.flush().await;
    }

    pub fn session_stats(&self) -> SessionCacheStats {
        self.sessions.stats()
    }

    // ---- 语言 ----

    /// 检测文本语言；任何失败都回退到默认语言，置信度为 0
    pub async fn detect_language(&self, text: &str) -> LanguageDetection {
        let fallback = || LanguageDetection::fallback(&self.settings.default_locale);
        if text.trim().is_empty() {
            return fallback();
        }

        let session = match self.ensure_session(&SessionOptions::language_detector()).await {
            Ok(session) => session,
            Err(error) => {
                tracing::debug!("语言检测不可用，使用默认语言: {}", error);
                return fallback();
            }
        };

        let invocation = Invocation::DetectLanguage {
            text: truncate_chars(text, DETECTION_INPUT_CHARS),
        };
        match session.invoke(&invocation).await {
            Ok(SessionOutput::Detection {
                language,
                confidence,
            }) if !language.trim().is_empty() => LanguageDetection {
                language: language.trim().to_string(),
                confidence,
            },
            Ok(_) => fallback(),
            Err(error) => {
                tracing::warn!("语言检测失败，使用默认语言: {}", error);
                fallback()
            }
        }
    }

    /// 翻译文本；失败时原样返回
    pub async fn translate(&self, text: &str, target: &str, source: Option<&str>) -> String {
        if text.trim().is_empty() || target.trim().is_empty() {
            return text.to_string();
        }

        let options = SessionOptions::translator(source, target);
        let session = match self.ensure_session(&options).await {
            Ok(session) => session,
            Err(error) => {
                tracing::debug!("翻译不可用: {}", error);
                return text.to_string();
            }
        };

        match session
            .invoke(&Invocation::Translate {
                text: text.to_string(),
            })
            .await
        {
            Ok(output) => output.into_text().unwrap_or_else(|| text.to_string()),
            Err(error) => {
                tracing::warn!("翻译失败，返回原文: {}", error);
                text.to_string()
            }
        }
    }

    // ---- 图片描述 ----

    /// 用多模态语言模型描述图片；任何失败都返回 `None`
    pub async fn describe_image(
        &self,
        src: &str,
        base_url: Option<&Url>,
        language: Option<&str>,
    ) -> Option<String> {
        if src.trim().is_empty() || self.capabilities.get(Capability::LanguageModel).is_none() {
            return None;
        }

        let output_language = normalize_output_language(language);
        let options = SessionOptions::image_prompt(output_language);
        let session = match self.ensure_session(&options).await {
            Ok(session) => session,
            Err(error) => {
                tracing::debug!("图片描述会话不可用: {}", error);
                return None;
            }
        };

        let image = self.load_image(src.trim(), base_url).await;
        let invocation = Invocation::DescribeImage {
            instructions: image_instructions(output_language),
            image,
        };

        match session.invoke(&invocation).await {
            Ok(output) => output.into_text(),
            Err(error) => {
                tracing::debug!("图片描述失败，丢弃会话: {}", error);
                self.sessions.evict(&options.key).await;
                None
            }
        }
    }

    async fn load_image(&self, src: &str, base_url: Option<&Url>) -> ImageInput {
        let resolved = match base_url {
            Some(base) => base.join(src),
            None => Url::parse(src),
        };
        let Ok(url) = resolved else {
            return ImageInput::Url(src.to_string());
        };
        let key = url.to_string();

        let cached = self
            .image_cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(&key).cloned());
        if let Some(entry) = cached {
            return entry.map_or(ImageInput::Url(key), ImageInput::Payload);
        }

        let Some(loader) = &self.image_loader else {
            return ImageInput::Url(key);
        };
        let payload = loader.load(&url).await.filter(|payload| !payload.bytes.is_empty());
        if let Ok(mut cache) = self.image_cache.lock() {
            cache.put(key.clone(), payload.clone());
        }
        payload.map_or(ImageInput::Url(key), ImageInput::Payload)
    }

    // ---- 摘要 ----

    /// 使用默认分块上限生成摘要
    pub async fn summarize(&self, text: &str, kind: SummaryKind, language: Option<&str>) -> String {
        self.summarize_with_limit(text, kind, language, self.settings.chunk_limit)
            .await
    }

    /// 分块摘要；遇到配额错误时分块上限减半重来，低于下限后使用回退摘要
    pub async fn summarize_with_limit(
        &self,
        text: &str,
        kind: SummaryKind,
        language: Option<&str>,
        limit: usize,
    ) -> String {
        if text.trim().is_empty() {
            return String::new();
        }

        let options = SessionOptions::summarizer(kind, normalize_output_language(language));
        let mut limit = limit;

        while limit >= self.settings.min_chunk_limit {
            let session = match self.ensure_session(&options).await {
                Ok(session) => session,
                Err(error) => {
                    tracing::debug!("摘要不可用，使用回退摘要: {}", error);
                    return summary_fallback(text);
                }
            };

            match summarize_chunks(session.as_ref(), text, limit).await {
                Ok(summary) => return summary,
                Err(ProviderError::QuotaExceeded) => {
                    tracing::debug!("摘要超出配额，分块上限 {} 减半", limit);
                    limit /= 2;
                }
                Err(error) => {
                    tracing::warn!("摘要失败，使用回退摘要: {}", error);
                    return summary_fallback(text);
                }
            }
        }

        summary_fallback(text)
    }

    // ---- 改写 ----

    /// 改写回退链：writer，其次（允许扩展模型时）rewriter 与通用语言模型
    ///
    /// 激活错误立即返回确定性回退；其他错误继续尝试下一个能力。
    pub async fn rewrite(
        &self,
        original: &str,
        instructions: Option<&str>,
        language: Option<&str>,
    ) -> String {
        let instruction = instructions.map(str::trim).filter(|text| !text.is_empty());
        let prompt_language = language
            .and_then(|lang| lang.split([',', ';']).next())
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .unwrap_or(&self.settings.default_locale)
            .to_string();

        let mut chain = vec![SessionOptions::writer()];
        if self.settings.extended_models_allowed {
            chain.push(SessionOptions::rewriter());
            chain.push(SessionOptions::language_model(normalize_output_language(
                Some(&prompt_language),
            )));
        }

        for options in chain {
            let session = match self.ensure_session(&options).await {
                Ok(session) => session,
                Err(ProviderError::ActivationRequired) => {
                    tracing::debug!("改写需要用户激活，使用回退文本");
                    return rewrite_fallback(original, instruction);
                }
                Err(error) => {
                    tracing::debug!("跳过 {}: {}", options.capability, error);
                    continue;
                }
            };

            let invocation = rewrite_invocation(
                options.capability,
                original,
                instruction,
                &prompt_language,
            );
            match session.invoke(&invocation).await {
                Ok(output) => {
                    return output
                        .into_text()
                        .unwrap_or_else(|| rewrite_fallback(original, instruction));
                }
                Err(error) => {
                    tracing::warn!("{} 改写失败，尝试下一个能力: {}", options.capability, error);
                }
            }
        }

        rewrite_fallback(original, instruction)
    }

    // ---- 模型状态 ----

    /// 查询全部能力的可用性，结果缓存一段时间
    pub async fn model_status(&self, force: bool) -> ModelStatus {
        if !force {
            let cached = self.model_status.lock().ok().and_then(|cached| {
                cached
                    .as_ref()
                    .filter(|(at, _)| at.elapsed() < self.settings.model_status_ttl)
                    .map(|(_, status)| status.clone())
            });
            if let Some(status) = cached {
                return status;
            }
        }

        let mut items = Vec::with_capacity(Capability::ALL.len());
        for capability in Capability::ALL {
            let status = match self.capabilities.get(capability) {
                Some(backend) => backend.availability(&self.status_options(capability)).await,
                None => Availability::Unsupported,
            };
            items.push(ModelStatusItem {
                id: capability.id(),
                label: capability.label(),
                status,
                available: !status.is_unavailable(),
                required: capability.required(),
            });
        }

        let status = ModelStatus {
            ready: items
                .iter()
                .filter(|item| item.required)
                .all(|item| item.available),
            items,
            checked_at: Utc::now().timestamp_millis(),
        };

        if let Ok(mut cached) = self.model_status.lock() {
            *cached = Some((Instant::now(), status.clone()));
        }
        status
    }

    fn status_options(&self, capability: Capability) -> SessionOptions {
        let language = normalize_output_language(Some(&self.settings.default_locale));
        match capability {
            Capability::Summarizer => SessionOptions::summarizer(SummaryKind::KeyPoints, language),
            Capability::Translator => SessionOptions::translator(None, language),
            Capability::Writer => SessionOptions::writer(),
            Capability::Rewriter => SessionOptions::rewriter(),
            Capability::LanguageDetector => SessionOptions::language_detector(),
            Capability::LanguageModel => SessionOptions::language_model(language),
        }
    }

    // ---- 激活 ----

    pub fn activation_required(&self) -> bool {
        self.activation_state.is_required()
    }

    pub fn activation_info(&self) -> ActivationInfo {
        self.activation_state.snapshot()
    }

    pub fn request_activation(&self) {
        self.activation_state.request();
    }

    pub fn clear_activation(&self) {
        self.activation_state.set_required(false);
    }

    pub fn subscribe_activation(&self) -> broadcast::Receiver<ActivationEvent> {
        self.activation_state.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<DownloadProgress> {
        self.progress.subscribe()
    }
}

async fn summarize_chunks(
    session: &dyn Session,
    text: &str,
    limit: usize,
) -> Result<String, ProviderError> {
    let mut summaries = Vec::new();
    for chunk in chunk_text(text, limit) {
        let output = session
            .invoke(&Invocation::Summarize { text: chunk })
            .await?;
        summaries.push(
            output
                .into_text()
                .unwrap_or_else(|| summary_fallback(text)),
        );
    }
    Ok(summaries.join(" "))
}

fn rewrite_invocation(
    capability: Capability,
    original: &str,
    instruction: Option<&str>,
    language: &str,
) -> Invocation {
    let lead = instruction.unwrap_or(DEFAULT_REWRITE_INSTRUCTION);
    match capability {
        Capability::Writer => Invocation::Write {
            prompt: format!("{}\n\nOriginal ({}):\n{}", lead, language, original),
            context: instruction.map(str::to_string),
        },
        Capability::Rewriter => Invocation::Rewrite {
            text: original.to_string(),
            context: instruction.map(str::to_string),
        },
        _ => Invocation::Prompt {
            text: format!("{}\n\nOriginal ({}):\n{}\n\nImproved:", lead, language, original),
        },
    }
}

fn image_instructions(output_language: &str) -> String {
    let hint = match language_label(output_language) {
        Some(label) if output_language != "en" => format!(
            "Describe this image in {} under {} characters.",
            label, TARGET_ALT_LENGTH
        ),
        _ => format!("Describe this image in under {} characters.", TARGET_ALT_LENGTH),
    };
    format!(
        "{} Focus on what is clearly visible. Use plain, factual language, avoid metaphors, \
         symbolism, or marketing language, and do not infer intent beyond the scene. \
         Avoid starting with \"Image of\".",
        hint
    )
}

/// 确定性改写：没有指令时只去掉首尾空白
pub fn rewrite_fallback(original: &str, instructions: Option<&str>) -> String {
    let trimmed = original.trim();
    if trimmed.is_empty() || instructions.is_none() {
        return trimmed.to_string();
    }

    let collapsed = cached_regex(&REPEATED_BANG, r"!{2,}").replace_all(trimmed, "!");
    let collapsed = cached_regex(&WHITESPACE_RUN, r"\s+").replace_all(&collapsed, " ");
    cached_regex(&SHOUTED_CLICK_HERE, r"(?i)\bCLICK HERE\b")
        .replace_all(&collapsed, "Click here")
        .trim()
        .to_string()
}
