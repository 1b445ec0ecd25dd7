//! 审计引擎
//!
//! 扫描、分类、生成建议、登记问题并执行修复。入口是 [`AuditEngine::run`]。

pub mod classifier;
pub mod context;
pub mod counts;
pub mod engine;
pub mod issue;
pub mod pass;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod scanner;

use markup5ever_rcdom::Handle;
use serde::{Deserialize, Serialize};

use crate::html::SelectionRange;

pub use counts::{Counts, LifetimeMetrics};
pub use engine::{AuditEngine, AuditRequest, EngineSnapshot, EngineState};
pub use issue::{Category, FixKind, Issue, IssueDraft};
pub use registry::{ApplyOptions, ApplyOrigin, IssueRegistry, IssueStatus};
pub use report::{to_markdown, ExportedIssue, Report, ReportMeta};
pub use scanner::Budget;

/// 审计范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Page,
    Selection,
}

/// 单次审计的有效参数（预算已按设置换算）
#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub scope: Scope,
    pub range: Option<SelectionRange>,
    pub hint_nodes: Option<Vec<Handle>>,
    pub budget: Budget,
}
