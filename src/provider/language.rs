//! 输出语言规范化

use serde::Serialize;

use crate::html::text::primary_subtag;

/// 模型支持直接输出的语言
pub const SUPPORTED_OUTPUT_LANGUAGES: &[&str] = &["en", "es", "ja"];

/// 语言检测结果；`confidence` 为 0 表示检测失败后的回退值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageDetection {
    pub language: String,
    pub confidence: f32,
}

impl LanguageDetection {
    pub fn fallback(language: &str) -> Self {
        Self {
            language: language.to_string(),
            confidence: 0.0,
        }
    }

    pub fn is_confident(&self) -> bool {
        self.confidence > 0.0
    }
}

/// 规范化为受支持的输出语言：先比较完整标签，再比较主子标签，都不匹配时使用英语
pub fn normalize_output_language(language: Option<&str>) -> &'static str {
    let Some(language) = language.map(str::trim).filter(|lang| !lang.is_empty()) else {
        return "en";
    };
    let lower = language.to_lowercase();
    if let Some(exact) = SUPPORTED_OUTPUT_LANGUAGES.iter().find(|lang| **lang == lower) {
        return exact;
    }
    let primary = primary_subtag(&lower);
    SUPPORTED_OUTPUT_LANGUAGES
        .iter()
        .find(|lang| **lang == primary)
        .copied()
        .unwrap_or("en")
}

/// 提示词中使用的语言名称
pub fn language_label(language: &str) -> Option<&'static str> {
    match normalize_output_language(Some(language)) {
        "es" => Some("Spanish"),
        "ja" => Some("Japanese"),
        _ if primary_subtag(language) == "en" => Some("English"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_output_language() {
        assert_eq!(normalize_output_language(Some("es-MX")), "es");
        assert_eq!(normalize_output_language(Some("JA")), "ja");
        assert_eq!(normalize_output_language(Some("fr")), "en");
        assert_eq!(normalize_output_language(Some("  ")), "en");
        assert_eq!(normalize_output_language(None), "en");
    }

    #[test]
    fn test_language_label() {
        assert_eq!(language_label("en-GB"), Some("English"));
        assert_eq!(language_label("es"), Some("Spanish"));
        assert_eq!(language_label("de"), None);
    }
}
