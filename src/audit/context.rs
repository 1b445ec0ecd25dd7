//! 上下文提取
//!
//! 为建议流水线收集元素附近的可读文本，以及用于语言检测和页面摘要的文档采样。

use std::collections::HashSet;
use std::rc::Rc;

use markup5ever_rcdom::Handle;

use crate::config::constants::{
    HEADING_CONTEXT_CHARS, LINK_CONTEXT_CHARS, SAMPLE_MAX_PER_SELECTOR,
};
use crate::html::dom::{
    closest, document_body, document_title, find_by_id, find_elements, first_element,
    get_node_attr, get_parent_element, is_element_named, previous_visible_text, text_content,
    HEADING_ELEMENTS,
};
use crate::html::text::{char_len, clean_context, normalize_text, truncate_chars};

const NEAREST_CONTEXT_TARGET: usize = 400;
const NEAREST_CONTEXT_CAP: usize = 2000;
const PRECEDING_TEXT_CHARS: usize = 400;
const LINK_TITLE_CHARS: usize = 300;
const LINK_BLOCK_CHARS: usize = 1200;
const LANDMARK_ELEMENTS: &[&str] = &["section", "article", "main", "aside", "header", "footer"];

/// 文档采样时依次使用的选择器：(祖先元素, 元素名)
const SAMPLE_SELECTORS: &[(Option<&str>, &[&str])] = &[
    (Some("main"), &["h1", "h2", "p", "li"]),
    (Some("article"), &["h1", "h2", "p", "li"]),
    (Some("section"), &["h1", "h2", "p"]),
    (Some("header"), &["h1", "h2"]),
    (None, &["h1", "h2", "h3"]),
    (None, &["p"]),
    (None, &["li"]),
];

/// `aria-labelledby` 引用的元素文本，以空格连接
pub fn labelled_text(document: &Handle, id_list: Option<&str>) -> String {
    let Some(id_list) = id_list else {
        return String::new();
    };
    id_list
        .split_whitespace()
        .filter_map(|id| find_by_id(document, id))
        .map(|element| text_content(&element))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 元素附近的文本：所在 figure 的说明、最近的地标区块及其标题、前面的可见文本
pub fn nearest_context(node: &Handle) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(figure) = closest(node, &["figure"]) {
        if let Some(caption) = first_element(&figure, &["figcaption"]) {
            parts.push(text_content(&caption));
        }
    }

    let mut parent = get_parent_element(node);
    while let Some(current) = parent {
        if char_len(&parts.join(" ")) >= NEAREST_CONTEXT_TARGET {
            break;
        }
        if is_element_named(&current, LANDMARK_ELEMENTS) {
            if let Some(heading) = first_element(&current, HEADING_ELEMENTS) {
                parts.push(text_content(&heading));
            }
            parts.push(text_content(&current));
            break;
        }
        parent = get_parent_element(&current);
    }

    let preceding = previous_visible_text(node, PRECEDING_TEXT_CHARS);
    if !preceding.is_empty() {
        parts.push(preceding);
    }

    normalize_text(&truncate_chars(&parts.join(" "), NEAREST_CONTEXT_CAP))
}

/// 图片上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageContext {
    pub raw: String,
    pub cleaned: String,
}

impl ImageContext {
    /// 展示用的上下文：优先使用清理后的文本
    pub fn display(&self) -> &str {
        if self.cleaned.is_empty() {
            &self.raw
        } else {
            &self.cleaned
        }
    }
}

pub fn image_context(document: &Handle, img: &Handle) -> ImageContext {
    let parts = [
        labelled_text(document, get_node_attr(img, "aria-labelledby").as_deref()),
        get_node_attr(img, "aria-label").unwrap_or_default(),
        get_node_attr(img, "title").unwrap_or_default(),
        nearest_context(img),
    ];
    let raw = normalize_text(
        &parts
            .iter()
            .filter(|part| !part.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" "),
    );
    let cleaned = clean_context(&raw);
    ImageContext { raw, cleaned }
}

/// 链接上下文：title、所在区块文本与前文
///
/// 每一段先单独截断，过长的区块文本不会挤掉前文。
pub fn link_context(anchor: &Handle) -> String {
    let capped = |text: String, cap: usize| truncate_chars(&normalize_text(&text), cap);
    let parts = [
        get_node_attr(anchor, "title").map(|title| capped(title, LINK_TITLE_CHARS)),
        closest(anchor, &["article", "section", "div", "li"])
            .map(|block| capped(text_content(&block), LINK_BLOCK_CHARS)),
        Some(previous_visible_text(anchor, PRECEDING_TEXT_CHARS)),
    ];
    join_context(&parts, LINK_CONTEXT_CHARS)
}

/// 标题上下文：标题本身、所在区块文本与前文
pub fn heading_context(heading: &Handle, text: &str) -> String {
    let parts = [
        Some(text.to_string()),
        closest(heading, &["section", "article", "div"]).map(|block| text_content(&block)),
        Some(previous_visible_text(heading, PRECEDING_TEXT_CHARS)),
    ];
    join_context(&parts, HEADING_CONTEXT_CHARS)
}

fn join_context(parts: &[Option<String>], cap: usize) -> String {
    let joined = parts
        .iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    truncate_chars(&normalize_text(&joined), cap)
}

/// 从正文中采样不超过 `limit` 个字符的文本
///
/// 先按选择器优先级收集标题、段落和列表项（每个选择器最多 40 个节点），
/// 收集到的文本不足一半时再补上整个 body 的文本。
pub fn sample_document_text(document: &Handle, limit: usize) -> String {
    let root = document_body(document);
    let mut sampler = Sampler::new(limit);
    let mut seen = HashSet::new();

    'selectors: for (ancestor, names) in SAMPLE_SELECTORS {
        let nodes = find_elements(&root, &|node| {
            is_element_named(node, names)
                && ancestor.map_or(true, |ancestor| has_ancestor(node, ancestor))
        });
        let mut used = 0;
        for node in nodes {
            if used >= SAMPLE_MAX_PER_SELECTOR {
                break;
            }
            if !seen.insert(Rc::as_ptr(&node)) {
                continue;
            }
            used += 1;
            if sampler.push(&text_content(&node)) {
                break 'selectors;
            }
        }
    }

    if sampler.collected * 2 < limit {
        sampler.push(&text_content(&root));
    }

    sampler.snippets.join(" ")
}

/// 页面摘要的输入：选区文本，或者标题加正文采样
pub fn summary_context(
    document: &Handle,
    selection_text: Option<&str>,
    selection_chars: usize,
    sample_chars: usize,
) -> String {
    match selection_text {
        Some(text) => truncate_chars(text, selection_chars),
        None => format!(
            "{}\n{}",
            document_title(document),
            sample_document_text(document, sample_chars)
        ),
    }
}

fn has_ancestor(node: &Handle, name: &str) -> bool {
    let mut cursor = get_parent_element(node);
    while let Some(parent) = cursor {
        if is_element_named(&parent, &[name]) {
            return true;
        }
        cursor = get_parent_element(&parent);
    }
    false
}

struct Sampler {
    limit: usize,
    collected: usize,
    snippets: Vec<String>,
}

impl Sampler {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            collected: 0,
            snippets: Vec::new(),
        }
    }

    /// 返回是否已经采满
    fn push(&mut self, value: &str) -> bool {
        let normalized = normalize_text(value);
        if normalized.is_empty() {
            return false;
        }
        let remaining = self.limit.saturating_sub(self.collected);
        if remaining == 0 {
            return true;
        }
        let snippet = truncate_chars(&normalized, remaining);
        self.collected += char_len(&snippet);
        self.snippets.push(snippet);
        self.collected >= self.limit
    }
}
