//! 审计引擎统一错误处理
//!
//! 提供结构化错误类型和错误处理机制。能力提供者的错误在建议流水线边界处被吞掉，
//! 只有激活相关的错误会穿过引擎边界。

use std::fmt;

use thiserror::Error;

/// 能力提供者错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 创建会话需要用户手势
    #[error("需要用户激活")]
    ActivationRequired,

    /// 能力不可用或不受支持
    #[error("能力不可用: {0}")]
    Unavailable(String),

    /// 输入超出模型配额
    #[error("超出配额")]
    QuotaExceeded,

    /// 调用失败
    #[error("调用失败: {0}")]
    Failed(String),
}

impl ProviderError {
    /// 是否为激活错误
    pub fn is_activation(&self) -> bool {
        matches!(self, ProviderError::ActivationRequired)
    }
}

/// 审计错误类型
#[derive(Error, Debug, Clone)]
pub enum AuditError {
    /// 需要用户激活
    #[error("需要用户激活才能继续")]
    ActivationRequired,

    /// 能力不可用
    #[error("能力不可用: {0}")]
    ProviderUnavailable(String),

    /// 超出配额
    #[error("输入超出模型配额")]
    QuotaExceeded,

    /// DOM 变更失败
    #[error("DOM 变更失败: {0}")]
    MutationFailed(String),

    /// 等待激活超时
    #[error("等待用户激活超时")]
    AuditTimeout,

    /// 扩展已暂停
    #[error("扩展已暂停")]
    ExtensionPaused,

    /// 审计结果已被更新的审计取代
    #[error("审计 {0} 已被取代")]
    Superseded(String),

    /// 问题不存在
    #[error("问题不存在: {0}")]
    IssueNotFound(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 解析错误
    #[error("解析错误: {0}")]
    ParseError(String),

    /// IO 错误
    #[error("IO错误: {0}")]
    IoError(String),
}

impl AuditError {
    /// 检查错误是否可恢复（调度器可稍后重试）
    pub fn is_recoverable(&self) -> bool {
        match self {
            AuditError::ActivationRequired => true,
            AuditError::ProviderUnavailable(_) => true,
            AuditError::QuotaExceeded => true,
            AuditError::MutationFailed(_) => true,
            AuditError::AuditTimeout => true,
            AuditError::ExtensionPaused => false,
            AuditError::Superseded(_) => true,
            AuditError::IssueNotFound(_) => false,
            AuditError::ConfigError(_) => false,
            AuditError::ParseError(_) => false,
            AuditError::IoError(_) => false,
        }
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AuditError::ActivationRequired => ErrorSeverity::Info,
            AuditError::ProviderUnavailable(_) => ErrorSeverity::Warning,
            AuditError::QuotaExceeded => ErrorSeverity::Warning,
            AuditError::MutationFailed(_) => ErrorSeverity::Warning,
            AuditError::AuditTimeout => ErrorSeverity::Warning,
            AuditError::ExtensionPaused => ErrorSeverity::Info,
            AuditError::Superseded(_) => ErrorSeverity::Info,
            AuditError::IssueNotFound(_) => ErrorSeverity::Warning,
            AuditError::ConfigError(_) => ErrorSeverity::Critical,
            AuditError::ParseError(_) => ErrorSeverity::Error,
            AuditError::IoError(_) => ErrorSeverity::Error,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            AuditError::ActivationRequired | AuditError::AuditTimeout => ErrorCategory::Activation,
            AuditError::ProviderUnavailable(_) | AuditError::QuotaExceeded => {
                ErrorCategory::Provider
            }
            AuditError::MutationFailed(_) | AuditError::IssueNotFound(_) => ErrorCategory::Mutation,
            AuditError::ExtensionPaused | AuditError::Superseded(_) => ErrorCategory::Lifecycle,
            AuditError::ConfigError(_) => ErrorCategory::Configuration,
            AuditError::ParseError(_) => ErrorCategory::Parsing,
            AuditError::IoError(_) => ErrorCategory::Io,
        }
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Activation,
    Provider,
    Mutation,
    Lifecycle,
    Configuration,
    Parsing,
    Io,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Activation => "activation",
            ErrorCategory::Provider => "provider",
            ErrorCategory::Mutation => "mutation",
            ErrorCategory::Lifecycle => "lifecycle",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Io => "io",
        };
        f.write_str(name)
    }
}

impl From<ProviderError> for AuditError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::ActivationRequired => AuditError::ActivationRequired,
            ProviderError::Unavailable(msg) => AuditError::ProviderUnavailable(msg),
            ProviderError::QuotaExceeded => AuditError::QuotaExceeded,
            ProviderError::Failed(msg) => AuditError::ProviderUnavailable(msg),
        }
    }
}

impl From<std::io::Error> for AuditError {
    fn from(error: std::io::Error) -> Self {
        AuditError::IoError(error.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(error: serde_json::Error) -> Self {
        AuditError::ParseError(format!("JSON解析错误: {}", error))
    }
}

impl From<toml::de::Error> for AuditError {
    fn from(error: toml::de::Error) -> Self {
        AuditError::ParseError(format!("TOML解析错误: {}", error))
    }
}

impl From<toml::ser::Error> for AuditError {
    fn from(error: toml::ser::Error) -> Self {
        AuditError::ConfigError(format!("TOML序列化错误: {}", error))
    }
}

impl From<tokio::time::error::Elapsed> for AuditError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AuditError::AuditTimeout
    }
}

/// 错误结果类型别名
pub type AuditResult<T> = Result<T, AuditError>;

/// 错误处理助手函数
pub mod helpers {
    use super::*;

    /// 按严重程度记录错误
    pub fn log_error(context: &str, error: &AuditError) {
        match error.severity() {
            ErrorSeverity::Info => tracing::info!("{}: {}", context, error),
            ErrorSeverity::Warning => tracing::warn!("{}: {}", context, error),
            ErrorSeverity::Error => tracing::error!("{}: {}", context, error),
            ErrorSeverity::Critical => tracing::error!("{} (严重): {}", context, error),
        }
    }

    /// 记录并返回错误
    pub fn log_and_fail<T>(context: &str, error: AuditError) -> AuditResult<T> {
        log_error(context, &error);
        Err(error)
    }
}
