//! 审计配置管理器
//!
//! 提供统一的配置接口，支持文件配置、环境变量和默认值

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants;
use crate::error::{AuditError, AuditResult};

/// 审计引擎可调参数
///
/// 所有时间字段以毫秒保存，便于在 TOML/JSON 中书写。
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    // 语言与模型
    pub default_locale: String,
    pub extended_models_allowed: bool,

    // 摘要分块
    pub chunk_limit: usize,
    pub min_chunk_limit: usize,

    // 预算
    pub auto_mutation_budget: usize,
    pub power_saver_min_budget: usize,
    pub power_saver_max_budget: usize,
    pub explicit_min_budget: usize,
    pub max_mutation_hints: usize,
    pub max_hint_expansion: usize,

    // 调度
    pub auto_audit_interval_ms: u64,
    pub mutation_debounce_ms: u64,
    pub panel_visible_delay_ms: u64,
    pub in_progress_delay_ms: u64,
    pub no_activation_delay_ms: u64,
    pub min_cooldown_delay_ms: u64,
    pub has_more_delay_ms: u64,
    pub error_backoff_base_ms: u64,
    pub error_backoff_max_ms: u64,

    // 激活与会话
    pub activation_timeout_ms: u64,
    pub model_idle_ms: u64,
    pub model_sweep_min_ms: u64,
    pub model_status_ttl_ms: u64,
    pub image_cache_size: usize,

    // 文本采样
    pub scope_sample_chars: usize,
    pub summary_sample_chars: usize,
    pub selection_summary_chars: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            default_locale: "en".to_string(),
            extended_models_allowed: false,

            chunk_limit: constants::DEFAULT_CHUNK_LIMIT,
            min_chunk_limit: constants::MIN_CHUNK_LIMIT,

            auto_mutation_budget: constants::AUTO_MUTATION_BUDGET,
            power_saver_min_budget: constants::POWER_SAVER_MIN_BUDGET,
            power_saver_max_budget: constants::POWER_SAVER_MAX_BUDGET,
            explicit_min_budget: constants::EXPLICIT_MIN_BUDGET,
            max_mutation_hints: constants::MAX_MUTATION_HINTS,
            max_hint_expansion: constants::MAX_HINT_EXPANSION,

            auto_audit_interval_ms: millis(constants::AUTO_AUDIT_MIN_INTERVAL),
            mutation_debounce_ms: millis(constants::MUTATION_DEBOUNCE),
            panel_visible_delay_ms: millis(constants::PANEL_VISIBLE_DELAY),
            in_progress_delay_ms: millis(constants::IN_PROGRESS_DELAY),
            no_activation_delay_ms: millis(constants::NO_ACTIVATION_DELAY),
            min_cooldown_delay_ms: millis(constants::MIN_COOLDOWN_DELAY),
            has_more_delay_ms: millis(constants::HAS_MORE_DELAY),
            error_backoff_base_ms: millis(constants::ERROR_BACKOFF_BASE),
            error_backoff_max_ms: millis(constants::ERROR_BACKOFF_MAX),

            activation_timeout_ms: millis(constants::ACTIVATION_TIMEOUT),
            model_idle_ms: millis(constants::MODEL_IDLE_TIMEOUT),
            model_sweep_min_ms: millis(constants::MODEL_SWEEP_MIN_DELAY),
            model_status_ttl_ms: millis(constants::MODEL_STATUS_TTL),
            image_cache_size: constants::IMAGE_CACHE_SIZE,

            scope_sample_chars: constants::SCOPE_SAMPLE_CHARS,
            summary_sample_chars: constants::SUMMARY_SAMPLE_CHARS,
            selection_summary_chars: constants::SELECTION_SUMMARY_CHARS,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl AuditConfig {
    /// 验证配置
    pub fn validate(&self) -> AuditResult<()> {
        if self.min_chunk_limit == 0 {
            return Err(AuditError::ConfigError("最小分块长度不能为0".to_string()));
        }

        if self.chunk_limit < self.min_chunk_limit {
            return Err(AuditError::ConfigError(format!(
                "分块上限 {} 小于最小分块长度 {}",
                self.chunk_limit, self.min_chunk_limit
            )));
        }

        if self.power_saver_min_budget > self.power_saver_max_budget {
            return Err(AuditError::ConfigError("省电模式预算下限大于上限".to_string()));
        }

        if self.auto_mutation_budget == 0 || self.max_mutation_hints == 0 {
            return Err(AuditError::ConfigError("自动预算和提示上限不能为0".to_string()));
        }

        if self.image_cache_size == 0 {
            return Err(AuditError::ConfigError("图片缓存大小不能为0".to_string()));
        }

        if self.default_locale.trim().is_empty() {
            return Err(AuditError::ConfigError("默认语言不能为空".to_string()));
        }

        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        use crate::env::{audit, core, EnvVar};

        if let Some(Ok(locale)) = core::DefaultLocale::get_set() {
            self.default_locale = locale;
        }

        if let Some(Ok(extended)) = audit::ExtendedModels::get_set() {
            self.extended_models_allowed = extended;
            tracing::info!("环境变量覆盖扩展模型开关: {}", extended);
        }

        if let Some(Ok(limit)) = audit::ChunkLimit::get_set() {
            self.chunk_limit = limit;
        }

        if let Some(Ok(budget)) = audit::AutoMutationBudget::get_set() {
            self.auto_mutation_budget = budget;
        }

        if let Some(Ok(interval)) = audit::AutoAuditInterval::get_set() {
            self.auto_audit_interval_ms = millis(interval);
        }

        if let Some(Ok(timeout)) = audit::ActivationTimeout::get_set() {
            self.activation_timeout_ms = millis(timeout);
        }
    }

    /// 自动审计最小间隔，省电模式下翻倍
    pub fn auto_audit_interval(&self, power_saver: bool) -> Duration {
        let base = Duration::from_millis(self.auto_audit_interval_ms);
        if power_saver {
            base * 2
        } else {
            base
        }
    }

    /// 自动增量审计的预算
    pub fn auto_budget(&self, power_saver: bool) -> usize {
        if power_saver {
            self.auto_mutation_budget
                .clamp(self.power_saver_min_budget, self.power_saver_max_budget)
        } else {
            self.auto_mutation_budget
        }
    }

    /// 显式预算，省电模式下减半但不低于下限
    pub fn explicit_budget(&self, requested: usize, power_saver: bool) -> usize {
        if power_saver {
            self.explicit_min_budget.max(requested / 2)
        } else {
            requested
        }
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    pub fn model_idle(&self) -> Duration {
        Duration::from_millis(self.model_idle_ms)
    }

    pub fn model_sweep_min(&self) -> Duration {
        Duration::from_millis(self.model_sweep_min_ms)
    }

    pub fn model_status_ttl(&self) -> Duration {
        Duration::from_millis(self.model_status_ttl_ms)
    }

    pub fn mutation_debounce(&self) -> Duration {
        Duration::from_millis(self.mutation_debounce_ms)
    }

    pub fn panel_visible_delay(&self) -> Duration {
        Duration::from_millis(self.panel_visible_delay_ms)
    }

    pub fn in_progress_delay(&self) -> Duration {
        Duration::from_millis(self.in_progress_delay_ms)
    }

    pub fn no_activation_delay(&self) -> Duration {
        Duration::from_millis(self.no_activation_delay_ms)
    }

    pub fn min_cooldown_delay(&self) -> Duration {
        Duration::from_millis(self.min_cooldown_delay_ms)
    }

    pub fn has_more_delay(&self) -> Duration {
        Duration::from_millis(self.has_more_delay_ms)
    }

    /// 第 `failures` 次连续失败后的退避时间
    pub fn error_backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self.error_backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.error_backoff_max_ms))
    }
}

/// 配置管理器
pub struct ConfigManager {
    config: AuditConfig,
}

impl ConfigManager {
    /// 按搜索路径加载配置并应用环境变量
    pub fn new() -> AuditResult<Self> {
        let mut config = Self::load_config()?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(Self { config })
    }

    /// 从指定文件加载配置
    pub fn with_path(path: &str) -> AuditResult<Self> {
        Self::load_dotenv();
        let expanded = shellexpand::tilde(path);
        let mut config = Self::load_from_file(expanded.as_ref())?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(Self { config })
    }

    /// 获取配置
    pub fn get_config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn into_config(self) -> AuditConfig {
        self.config
    }

    fn load_config() -> AuditResult<AuditConfig> {
        Self::load_dotenv();

        for path in constants::CONFIG_PATHS {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(expanded_path.as_ref()).exists() {
                tracing::info!("加载配置文件: {}", expanded_path);
                return Self::load_from_file(&expanded_path);
            }
        }

        tracing::debug!("未找到配置文件，使用默认配置");
        Ok(AuditConfig::default())
    }

    fn load_from_file(path: &str) -> AuditResult<AuditConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AuditError::ConfigError(format!("读取配置文件失败 {}: {}", path, e)))?;

        if path.ends_with(".json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    fn load_dotenv() {
        let env_files = [".env.local", ".env"];

        for env_file in &env_files {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::debug!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    /// 生成示例配置文件
    pub fn generate_example_config(path: &str) -> AuditResult<()> {
        let content = toml::to_string_pretty(&AuditConfig::default())?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
