//! 用户设置与站点偏好
//!
//! 设置以宽松的 JSON 形式持久化，读取时逐字段强制转换：类型不符或缺失的字段回退到默认值，
//! 旧版的 `autoApplySafe` 字段映射到 `auto_mode_enabled`。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuditError, AuditResult};

const MAX_LANGUAGE_TAG_LEN: usize = 35;
const MAX_HOST_LEN: usize = 255;

/// 用户设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub audit_images: bool,
    pub audit_links: bool,
    pub audit_headings: bool,
    pub prefer_aria_label: bool,
    pub offer_translations: bool,
    /// `"auto"` 或语言标签
    pub user_language: String,
    pub auto_mode_enabled: bool,
    pub extension_paused: bool,
    pub auto_apply_paused: bool,
    pub power_saver_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audit_images: true,
            audit_links: true,
            audit_headings: true,
            prefer_aria_label: true,
            offer_translations: true,
            user_language: "auto".to_string(),
            auto_mode_enabled: false,
            extension_paused: false,
            auto_apply_paused: false,
            power_saver_mode: false,
        }
    }
}

impl Settings {
    /// 从任意 JSON 值强制转换
    pub fn coerce(value: &Value) -> Self {
        let defaults = Self::default();
        let Some(map) = value.as_object() else {
            return defaults;
        };

        let flag = |key: &str, default: bool| map.get(key).and_then(Value::as_bool).unwrap_or(default);

        let auto_mode_enabled = map
            .get("autoModeEnabled")
            .and_then(Value::as_bool)
            .or_else(|| map.get("autoApplySafe").and_then(Value::as_bool))
            .unwrap_or(defaults.auto_mode_enabled);

        Self {
            audit_images: flag("auditImages", defaults.audit_images),
            audit_links: flag("auditLinks", defaults.audit_links),
            audit_headings: flag("auditHeadings", defaults.audit_headings),
            prefer_aria_label: flag("preferAriaLabel", defaults.prefer_aria_label),
            offer_translations: flag("offerTranslations", defaults.offer_translations),
            user_language: map
                .get("userLanguage")
                .and_then(Value::as_str)
                .map(sanitize_language)
                .unwrap_or(defaults.user_language),
            auto_mode_enabled,
            extension_paused: flag("extensionPaused", defaults.extension_paused),
            auto_apply_paused: flag("autoApplyPaused", defaults.auto_apply_paused),
            power_saver_mode: flag("powerSaverMode", defaults.power_saver_mode),
        }
    }

    /// 序列化为持久化使用的 JSON 形式
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "auditImages": self.audit_images,
            "auditLinks": self.audit_links,
            "auditHeadings": self.audit_headings,
            "preferAriaLabel": self.prefer_aria_label,
            "offerTranslations": self.offer_translations,
            "userLanguage": self.user_language,
            "autoModeEnabled": self.auto_mode_enabled,
            "extensionPaused": self.extension_paused,
            "autoApplyPaused": self.auto_apply_paused,
            "powerSaverMode": self.power_saver_mode,
        })
    }

    /// 解析用户首选语言；`"auto"` 时使用默认语言
    pub fn resolve_user_language(&self, default_locale: &str) -> String {
        if self.user_language.eq_ignore_ascii_case("auto") {
            default_locale.to_string()
        } else {
            self.user_language.clone()
        }
    }
}

fn sanitize_language(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_LANGUAGE_TAG_LEN {
        "auto".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 设置存储接口
pub trait SettingsStore {
    fn load(&self) -> AuditResult<Settings>;
    fn save(&self, settings: &Settings) -> AuditResult<()>;
}

/// 内存设置存储
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    raw: Arc<RwLock<Value>>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            raw: Arc::new(RwLock::new(settings.to_value())),
        }
    }

    /// 用原始 JSON 初始化，模拟旧版或损坏的持久化数据
    pub fn from_value(raw: Value) -> Self {
        Self {
            raw: Arc::new(RwLock::new(raw)),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> AuditResult<Settings> {
        let raw = self
            .raw
            .read()
            .map_err(|_| AuditError::ConfigError("设置存储锁已中毒".to_string()))?;
        Ok(Settings::coerce(&raw))
    }

    fn save(&self, settings: &Settings) -> AuditResult<()> {
        let mut raw = self
            .raw
            .write()
            .map_err(|_| AuditError::ConfigError("设置存储锁已中毒".to_string()))?;
        *raw = settings.to_value();
        Ok(())
    }
}

/// 站点偏好
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitePreference {
    pub paused: bool,
    pub whitelisted: bool,
    pub never_auto: bool,
}

impl SitePreference {
    pub fn is_empty(&self) -> bool {
        !self.paused && !self.whitelisted && !self.never_auto
    }
}

/// 规范化站点主机名：小写并截断
pub fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim().to_lowercase();
    if host.is_empty() {
        return None;
    }
    Some(host.chars().take(MAX_HOST_LEN).collect())
}

/// 站点偏好存储接口
pub trait SitePreferenceStore {
    fn get(&self, host: &str) -> SitePreference;
    fn set(&self, host: &str, preference: SitePreference) -> AuditResult<()>;
}

/// 内存站点偏好存储
#[derive(Debug, Clone, Default)]
pub struct MemorySitePreferences {
    entries: Arc<RwLock<HashMap<String, SitePreference>>>,
}

impl MemorySitePreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SitePreferenceStore for MemorySitePreferences {
    fn get(&self, host: &str) -> SitePreference {
        let Some(host) = normalize_host(host) else {
            return SitePreference::default();
        };
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(&host).copied())
            .unwrap_or_default()
    }

    fn set(&self, host: &str, preference: SitePreference) -> AuditResult<()> {
        let host = normalize_host(host)
            .ok_or_else(|| AuditError::ConfigError("站点主机名为空".to_string()))?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AuditError::ConfigError("站点偏好存储锁已中毒".to_string()))?;

        // 全部为 false 的条目直接删除
        if preference.is_empty() {
            entries.remove(&host);
        } else {
            entries.insert(host, preference);
        }
        Ok(())
    }
}

/// 自动模式准入策略
///
/// 白名单站点和省电模式都不启用自动模式。
pub struct AutomationPolicy;

impl AutomationPolicy {
    /// 判断当前页面是否允许启用自动审计与自动应用
    pub fn allows(settings: &Settings, site: &SitePreference, top_frame: bool) -> bool {
        !settings.extension_paused && top_frame && Self::allows_runs(settings, site)
    }

    /// 已启用的自动模式能否继续运行
    ///
    /// 扩展暂停不在此判断：引擎拒绝审计，调度器按失败退避，恢复后自动继续。
    pub fn allows_runs(settings: &Settings, site: &SitePreference) -> bool {
        settings.auto_mode_enabled
            && !settings.auto_apply_paused
            && !settings.power_saver_mode
            && !site.paused
            && !site.never_auto
            && !site.whitelisted
    }
}
