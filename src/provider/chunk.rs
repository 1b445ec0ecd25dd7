//! 摘要分块
//!
//! 长文本按字符数切块，优先在窗口内靠后的空行处断开，避免把段落切成两半。

use crate::config::constants::{
    CHUNK_BREAK_MIN_OFFSET, SUMMARY_FALLBACK_CHARS, SUMMARY_FALLBACK_LINES,
};
use crate::html::text::truncate_chars;

/// 把文本切成不超过 `limit` 个字符的块
///
/// 窗口内最后一个空行（`\n\n`）距窗口起点超过 500 个字符时在空行处断开，
/// 下一块从空行开始；否则按 `limit` 硬切。
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let mut end = (index + limit).min(chars.len());
        if end < chars.len() {
            if let Some(offset) = last_blank_line(&chars[index..end]) {
                if offset > CHUNK_BREAK_MIN_OFFSET {
                    end = index + offset;
                }
            }
        }
        chunks.push(chars[index..end].iter().collect());
        index = end;
    }

    chunks
}

fn last_blank_line(window: &[char]) -> Option<usize> {
    window
        .windows(2)
        .rposition(|pair| pair[0] == '\n' && pair[1] == '\n')
}

/// 无法调用模型时的摘要：前三行用空格连接，截断到 400 个字符
pub fn summary_fallback(text: &str) -> String {
    let joined = text
        .lines()
        .take(SUMMARY_FALLBACK_LINES)
        .collect::<Vec<_>>()
        .join(" ");
    truncate_chars(joined.trim(), SUMMARY_FALLBACK_CHARS)
}
