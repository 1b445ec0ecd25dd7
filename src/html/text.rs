//! 文本规范化工具
//!
//! 审计流水线中所有的文本比较、截断和上下文清理都经过这里。长度按字符计算，而不是按字节。

use std::sync::OnceLock;

use regex::Regex;

use crate::config::constants::ALT_CLAMP_LENGTH;

static URL_REGEX: OnceLock<Regex> = OnceLock::new();
static FILE_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
static CODE_TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();

pub(crate) fn cached_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("静态正则表达式无效"))
}

/// 折叠空白并去掉首尾空白
pub fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 清理提示上下文：去掉 URL、图片文件名和类似代码的长串大写标记
pub fn clean_context(value: &str) -> String {
    if value.trim().is_empty() {
        return String::new();
    }

    let without_urls = cached_regex(&URL_REGEX, r"(?i)https?://\S+").replace_all(value, " ");
    let without_files = cached_regex(
        &FILE_NAME_REGEX,
        r"(?i)\b\w+\.(?:jpg|jpeg|png|gif|webp|svg)\b",
    )
    .replace_all(&without_urls, " ");
    let without_codes =
        cached_regex(&CODE_TOKEN_REGEX, r"[A-Z0-9/_\-]{5,}").replace_all(&without_files, " ");

    normalize_text(&without_codes)
}

/// 将替代文本限制在硬上限内，超长时以省略号结尾
pub fn clamp_alt(text: &str) -> String {
    clamp_with_ellipsis(text, ALT_CLAMP_LENGTH)
}

/// 超过 `max` 个字符时截断为 `max - 3` 个字符并追加省略号
pub fn clamp_with_ellipsis(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if char_len(trimmed) <= max {
        return trimmed.to_string();
    }
    let head = truncate_chars(trimmed, max.saturating_sub(3));
    format!("{}...", head.trim_end())
}

/// 取前 `max` 个字符
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// 取最后 `max` 个字符
pub fn tail_chars(text: &str, max: usize) -> String {
    let len = char_len(text);
    if len <= max {
        return text.to_string();
    }
    text.chars().skip(len - max).collect()
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// 忽略大小写比较两段文本（先去掉首尾空白）
pub fn same_text(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// 取语言标签的主子标签并小写，例如 `en-US` -> `en`
pub fn primary_subtag(tag: &str) -> String {
    tag.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Read\n\tmore  "), "Read more");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_clean_context_strips_noise() {
        let cleaned = clean_context(
            "Sunset over the bay https://cdn.example.com/a.jpg IMG_2031.JPG SKU-4431-XL photo",
        );
        assert_eq!(cleaned, "Sunset over the bay photo");
    }

    #[test]
    fn test_clamp_alt() {
        assert_eq!(clamp_alt("  short  "), "short");
        let long = "a".repeat(400);
        let clamped = clamp_alt(&long);
        assert_eq!(clamped.chars().count(), 300);
        assert!(clamped.ends_with("..."));
    }

    #[test]
    fn test_tail_and_subtag() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
        assert_eq!(primary_subtag("pt-BR"), "pt");
        assert_eq!(primary_subtag("EN_us"), "en");
        assert!(same_text(" Hello ", "hello"));
    }
}
