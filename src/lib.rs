//! # Altspark Library
//!
//! 无障碍文案审计引擎：扫描页面中的图片替代文本、链接文字和标题，生成修复建议，
//! 支持应用、撤销和自动模式。建议优先来自端侧模型能力，不可用时回退到启发式规则。
//!
//! ## 模块组织
//!
//! - `activation` - 用户激活监视
//! - `audit` - 扫描、分类、建议流水线、问题登记和审计引擎
//! - `config` - 审计配置、用户设置与站点偏好
//! - `env` - 环境变量
//! - `error` - 错误类型
//! - `html` - DOM 工具、选区与序列化
//! - `page` - 被审计的页面
//! - `provider` - 能力提供者、会话缓存与回退链
//! - `scheduler` - 自动审计调度

pub mod activation;
pub mod audit;
pub mod config;
pub mod env;
pub mod error;
pub mod html;
pub mod page;
pub mod provider;
pub mod scheduler;

// Re-export commonly used items for convenience
pub use activation::ActivationMonitor;
pub use audit::{AuditEngine, AuditRequest, Report};
pub use config::{AuditConfig, ConfigManager, Settings};
pub use error::{AuditError, AuditResult, ProviderError};
pub use page::Page;
pub use provider::SuggestionProvider;
pub use scheduler::Scheduler;
