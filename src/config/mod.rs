//! 审计配置管理模块
//!
//! 提供配置文件、环境变量、默认值三层配置，以及用户设置与站点偏好的存储接口

pub mod manager;
pub mod settings;

// 重新导出主要类型
pub use manager::{AuditConfig, ConfigManager};
pub use settings::{
    AutomationPolicy, MemorySettingsStore, MemorySitePreferences, Settings, SettingsStore,
    SitePreference, SitePreferenceStore,
};

/// 配置常量
pub mod constants {
    use std::time::Duration;

    // 摘要分块
    pub const DEFAULT_CHUNK_LIMIT: usize = 9000;
    pub const MIN_CHUNK_LIMIT: usize = 1800;
    pub const CHUNK_BREAK_MIN_OFFSET: usize = 500;
    pub const SUMMARY_FALLBACK_LINES: usize = 3;
    pub const SUMMARY_FALLBACK_CHARS: usize = 400;

    // 预算与提示
    pub const AUTO_MUTATION_BUDGET: usize = 80;
    pub const POWER_SAVER_MIN_BUDGET: usize = 20;
    pub const POWER_SAVER_MAX_BUDGET: usize = 60;
    pub const EXPLICIT_MIN_BUDGET: usize = 10;
    pub const MAX_MUTATION_HINTS: usize = 120;
    pub const MAX_HINT_EXPANSION: usize = 40;

    // 调度延迟
    pub const AUTO_AUDIT_MIN_INTERVAL: Duration = Duration::from_secs(60);
    pub const MUTATION_DEBOUNCE: Duration = Duration::from_millis(1200);
    pub const PANEL_VISIBLE_DELAY: Duration = Duration::from_millis(1500);
    pub const IN_PROGRESS_DELAY: Duration = Duration::from_millis(800);
    pub const NO_ACTIVATION_DELAY: Duration = Duration::from_millis(2000);
    pub const MIN_COOLDOWN_DELAY: Duration = Duration::from_millis(1000);
    pub const HAS_MORE_DELAY: Duration = Duration::from_millis(1500);
    pub const ERROR_BACKOFF_BASE: Duration = Duration::from_millis(5000);
    pub const ERROR_BACKOFF_MAX: Duration = Duration::from_secs(60);

    // 激活与模型会话
    pub const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(15);
    pub const MODEL_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
    pub const MODEL_SWEEP_MIN_DELAY: Duration = Duration::from_millis(1000);
    pub const MODEL_STATUS_TTL: Duration = Duration::from_secs(15);
    pub const IMAGE_CACHE_SIZE: usize = 60;

    // 文本采样
    pub const SCOPE_SAMPLE_CHARS: usize = 8000;
    pub const SUMMARY_SAMPLE_CHARS: usize = 6000;
    pub const SELECTION_SUMMARY_CHARS: usize = 4000;
    pub const SAMPLE_MAX_PER_SELECTOR: usize = 40;

    // 分类阈值
    pub const MAX_ALT_LENGTH: usize = 160;
    pub const MAX_ALT_WORDS: usize = 30;
    pub const TARGET_ALT_LENGTH: usize = 125;
    pub const ALT_CLAMP_LENGTH: usize = 300;
    pub const MAX_HEADING_LENGTH: usize = 70;
    pub const DECORATIVE_MAX_DIMENSION: f32 = 16.0;
    pub const LINK_CONTEXT_CHARS: usize = 2000;
    pub const HEADING_CONTEXT_CHARS: usize = 2200;
    pub const LINK_SUGGESTION_CHARS: usize = 120;
    pub const HEADING_SUGGESTION_CHARS: usize = 80;
    pub const HEADING_FALLBACK_CHARS: usize = 60;

    // 监听的属性
    pub const OBSERVED_ATTRIBUTES: &[&str] = &["alt", "aria-label", "title", "role", "aria-hidden"];

    // 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "altspark.toml",
        ".altspark.toml",
        "altspark.json",
        "~/.config/altspark/config.toml",
        "/etc/altspark/config.toml",
    ];
}

/// 便利函数
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|path| std::path::Path::new(shellexpand::tilde(path).as_ref()).exists())
}

/// 加载配置，失败时回退到默认值
pub fn load_audit_config() -> AuditConfig {
    match ConfigManager::new() {
        Ok(manager) => manager.into_config(),
        Err(e) => {
            tracing::warn!("配置加载失败，使用默认配置: {}", e);
            AuditConfig::default()
        }
    }
}
