//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量访问，配置管理器在加载文件后用它们覆盖配置值。

use std::env;
use std::fmt;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    fn get() -> EnvResult<T> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value),
            Err(_) => match Self::DEFAULT {
                Some(default) => Ok(default),
                None => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Required environment variable not set".to_string(),
                }),
            },
        }
    }

    /// 仅在变量被显式设置时返回值
    fn get_set() -> Option<EnvResult<T>> {
        env::var(Self::NAME).ok().map(|value| Self::parse(&value))
    }

    fn get_or_default(default: T) -> T {
        Self::get().unwrap_or(default)
    }
}

/// 核心环境变量定义
pub mod core {
    use super::*;

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "ALTSPARK_LOG_LEVEL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("warn".to_string()),
            }
        }

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!(
                        "Invalid log level '{}'. Use: trace, debug, info, warn, error",
                        value
                    ),
                }),
            }
        }
    }

    /// 默认界面语言
    pub struct DefaultLocale;
    impl EnvVar<String> for DefaultLocale {
        const NAME: &'static str = "ALTSPARK_DEFAULT_LOCALE";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Fallback locale used when no language can be detected";

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("en".to_string()),
            }
        }

        fn parse(value: &str) -> EnvResult<String> {
            let tag = value.trim();
            if tag.is_empty() || tag.len() > 35 {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Locale must be a non-empty language tag of at most 35 characters"
                        .to_string(),
                });
            }
            Ok(tag.to_string())
        }
    }
}

/// 审计相关环境变量
pub mod audit {
    use super::*;

    /// 允许扩展模型（rewriter 与通用语言模型）
    pub struct ExtendedModels;
    impl EnvVar<bool> for ExtendedModels {
        const NAME: &'static str = "ALTSPARK_EXTENDED_MODELS";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Allow the rewriter and language model in the rewrite chain";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }

    /// 摘要分块上限
    pub struct ChunkLimit;
    impl EnvVar<usize> for ChunkLimit {
        const NAME: &'static str = "ALTSPARK_CHUNK_LIMIT";
        const DEFAULT: Option<usize> = Some(9000);
        const DESCRIPTION: &'static str = "Maximum characters per summarization chunk";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 500, 100_000)
        }
    }

    /// 自动模式下每次增量审计的预算
    pub struct AutoMutationBudget;
    impl EnvVar<usize> for AutoMutationBudget {
        const NAME: &'static str = "ALTSPARK_AUTO_MUTATION_BUDGET";
        const DEFAULT: Option<usize> = Some(80);
        const DESCRIPTION: &'static str = "Candidate budget for incremental automatic audits";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 10_000)
        }
    }

    /// 自动审计最小间隔
    pub struct AutoAuditInterval;
    impl EnvVar<Duration> for AutoAuditInterval {
        const NAME: &'static str = "ALTSPARK_AUTO_AUDIT_INTERVAL";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(60));
        const DESCRIPTION: &'static str = "Minimum seconds between automatic audits";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_seconds(value, Self::NAME, 1, 3600)
        }
    }

    /// 等待用户激活的超时
    pub struct ActivationTimeout;
    impl EnvVar<Duration> for ActivationTimeout {
        const NAME: &'static str = "ALTSPARK_ACTIVATION_TIMEOUT";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(15));
        const DESCRIPTION: &'static str = "Seconds to wait for a user gesture before giving up";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_seconds(value, Self::NAME, 1, 300)
        }
    }
}

fn parse_bool(value: &str, var_name: &str) -> EnvResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disabled" => Ok(false),
        _ => Err(EnvError {
            variable: var_name.to_string(),
            message: format!(
                "Invalid boolean value '{}'. Use: true/false, 1/0, yes/no, on/off, enabled/disabled",
                value
            ),
        }),
    }
}

fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid positive number".to_string(),
    })?;

    if num < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is below minimum {}", num, min),
        });
    }

    if num > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} exceeds maximum {}", num, max),
        });
    }

    Ok(num)
}

fn parse_seconds(value: &str, var_name: &str, min: u64, max: u64) -> EnvResult<Duration> {
    let seconds = parse_positive_usize(value, var_name, min as usize, max as usize)?;
    Ok(Duration::from_secs(seconds as u64))
}

/// 环境变量配置汇总
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub log_level: String,
    pub default_locale: String,
    pub extended_models: bool,
    pub chunk_limit: usize,
    pub auto_mutation_budget: usize,
    pub auto_audit_interval: Duration,
    pub activation_timeout: Duration,
}

impl EnvConfig {
    /// 读取全部环境变量，解析失败时回退到默认值
    pub fn from_env() -> Self {
        Self {
            log_level: core::LogLevel::get_or_default("warn".to_string()),
            default_locale: core::DefaultLocale::get_or_default("en".to_string()),
            extended_models: audit::ExtendedModels::get_or_default(false),
            chunk_limit: audit::ChunkLimit::get_or_default(9000),
            auto_mutation_budget: audit::AutoMutationBudget::get_or_default(80),
            auto_audit_interval: audit::AutoAuditInterval::get_or_default(Duration::from_secs(60)),
            activation_timeout: audit::ActivationTimeout::get_or_default(Duration::from_secs(15)),
        }
    }

    /// 列出所有已知变量及其说明
    pub fn describe() -> Vec<(&'static str, &'static str)> {
        vec![
            (core::LogLevel::NAME, core::LogLevel::DESCRIPTION),
            (core::DefaultLocale::NAME, core::DefaultLocale::DESCRIPTION),
            (audit::ExtendedModels::NAME, audit::ExtendedModels::DESCRIPTION),
            (audit::ChunkLimit::NAME, audit::ChunkLimit::DESCRIPTION),
            (audit::AutoMutationBudget::NAME, audit::AutoMutationBudget::DESCRIPTION),
            (audit::AutoAuditInterval::NAME, audit::AutoAuditInterval::DESCRIPTION),
            (audit::ActivationTimeout::NAME, audit::ActivationTimeout::DESCRIPTION),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_values() {
        assert_eq!(parse_bool("YES", "X").ok(), Some(true));
        assert_eq!(parse_bool("off", "X").ok(), Some(false));
        assert!(parse_bool("maybe", "X").is_err());
    }

    #[test]
    fn test_parse_bounds() {
        assert!(audit::ChunkLimit::parse("100").is_err());
        assert_eq!(audit::ChunkLimit::parse("4500").ok(), Some(4500));
        assert_eq!(
            audit::ActivationTimeout::parse("20").ok(),
            Some(Duration::from_secs(20))
        );
        assert!(core::LogLevel::parse("verbose").is_err());
    }
}
