//! 审计发现的问题

use std::fmt;

use chrono::Utc;
use markup5ever_rcdom::Handle;
use serde::{Deserialize, Serialize};

use crate::html::NodeRef;

/// 问题类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Link,
    Heading,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Image, Category::Link, Category::Heading];

    /// 问题 id 前缀
    pub fn prefix(&self) -> &'static str {
        match self {
            Category::Image => "img",
            Category::Link => "lnk",
            Category::Heading => "hdg",
        }
    }

    /// 面板分组名称
    pub fn section_label(&self) -> &'static str {
        match self {
            Category::Image => "Images",
            Category::Link => "Links",
            Category::Heading => "Headings",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Category::Image => "Image alt",
            Category::Link => "Link text",
            Category::Heading => "Heading text",
        }
    }

    /// 对应的元素名
    pub fn element_names(&self) -> &'static [&'static str] {
        match self {
            Category::Image => &["img"],
            Category::Link => &["a"],
            Category::Heading => crate::html::dom::HEADING_ELEMENTS,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section_label())
    }
}

/// 应用修复时执行的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixKind {
    /// `alt=""` 加 `aria-hidden="true"`
    MarkDecorative,
    SetAlt,
    LinkLabel,
    HeadingText,
}

/// 流水线产出、尚未登记的问题
#[derive(Debug, Clone)]
pub struct IssueDraft {
    pub category: Category,
    pub element: Handle,
    pub reason: String,
    pub suggestion: String,
    pub translated_suggestion: Option<String>,
    pub language: String,
    pub context: String,
    pub fix: FixKind,
}

/// 已登记的问题
#[derive(Debug, Clone)]
pub struct Issue {
    pub id: String,
    pub category: Category,
    pub element: NodeRef,
    pub reason: String,
    pub suggestion: String,
    pub translated_suggestion: Option<String>,
    pub language: String,
    pub safe: bool,
    pub can_replace_text: bool,
    pub context: String,
    pub fix: FixKind,
}

impl Issue {
    pub fn from_draft(id: String, draft: IssueDraft) -> Self {
        Self {
            id,
            category: draft.category,
            element: NodeRef::new(&draft.element),
            reason: draft.reason,
            suggestion: draft.suggestion,
            translated_suggestion: draft.translated_suggestion,
            language: draft.language,
            safe: draft.category == Category::Image,
            can_replace_text: draft.category != Category::Image,
            context: draft.context,
            fix: draft.fix,
        }
    }

    /// 写入替代文本时优先使用译文
    pub fn alt_text(&self) -> String {
        self.translated_suggestion
            .as_deref()
            .unwrap_or(&self.suggestion)
            .trim()
            .to_string()
    }
}

/// 问题 id 生成器，格式为 `{前缀}-{毫秒时间戳}-{序号}`
#[derive(Debug, Default)]
pub struct IssueIdGenerator {
    counter: u64,
}

impl IssueIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self, category: Category) -> String {
        self.counter += 1;
        format!(
            "{}-{}-{}",
            category.prefix(),
            Utc::now().timestamp_millis(),
            self.counter
        )
    }
}
