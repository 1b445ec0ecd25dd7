//! 问题分类器
//!
//! 纯规则判断，不调用模型。每个函数返回 `None` 表示该元素没有问题。

use std::sync::OnceLock;

use markup5ever_rcdom::Handle;
use regex::Regex;

use super::context::labelled_text;
use crate::config::constants::{
    DECORATIVE_MAX_DIMENSION, MAX_ALT_LENGTH, MAX_ALT_WORDS, MAX_HEADING_LENGTH,
};
use crate::html::dom::{get_node_attr, normalized_text};
use crate::html::style::parse_pixels;
use crate::html::text::char_len;
use crate::html::InlineStyle;

static VAGUE_LINK: OnceLock<Regex> = OnceLock::new();
static GENERIC_HEADING: OnceLock<Regex> = OnceLock::new();
static PLACEHOLDER_ALT: OnceLock<Regex> = OnceLock::new();

const VAGUE_LINK_PATTERN: &str = r"(?i)^\s*(?:click\s+here|read\s+more|more|more\s+info|more\s+information|learn\s+more|see\s+more|see\s+all|see\s+gallery|view\s+details|view\s+more|here|hier\s+klicken|cliquez\s+ici|haz\s+clic\s+aquí|clicca\s+qui)\s*$";
const GENERIC_HEADING_PATTERN: &str =
    r"(?i)^(?:update|welcome|news|important|announcement|section|overview)$";
const PLACEHOLDER_ALT_PATTERN: &str =
    r"(?i)^\s*(?:image|photo|picture|graphic|icon|logo|stock\s+photo|placeholder)\s*$";

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    crate::html::text::cached_regex(cell, pattern)
}

/// 图片问题
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFinding {
    /// 没有 alt 的装饰性图片
    Decorative,
    MissingAlt,
    PlaceholderAlt,
    VerboseAlt,
}

impl ImageFinding {
    pub fn reason(&self) -> &'static str {
        match self {
            ImageFinding::Decorative => "Likely decorative image without empty alt",
            ImageFinding::MissingAlt => "Image missing descriptive alt text",
            ImageFinding::PlaceholderAlt => "Image alt text is too vague",
            ImageFinding::VerboseAlt => "Image alt text is too long",
        }
    }

    /// 是否需要生成新的描述
    pub fn needs_description(&self) -> bool {
        matches!(self, ImageFinding::MissingAlt | ImageFinding::PlaceholderAlt)
    }
}

/// 去掉首尾空白后的 alt
pub fn trimmed_alt(img: &Handle) -> String {
    get_node_attr(img, "alt")
        .map(|alt| alt.trim().to_string())
        .unwrap_or_default()
}

pub fn classify_image(img: &Handle) -> Option<ImageFinding> {
    let alt = trimmed_alt(img);
    if alt.is_empty() {
        if is_decorative_image(img) {
            return Some(ImageFinding::Decorative);
        }
        return Some(ImageFinding::MissingAlt);
    }
    if is_placeholder_alt(&alt) {
        return Some(ImageFinding::PlaceholderAlt);
    }
    if is_verbose_alt(&alt) {
        return Some(ImageFinding::VerboseAlt);
    }
    None
}

/// 装饰性图片判断，只对没有非空 alt 的图片生效
pub fn is_decorative_image(img: &Handle) -> bool {
    if !trimmed_alt(img).is_empty() {
        return false;
    }
    if get_node_attr(img, "role").as_deref() == Some("presentation") {
        return true;
    }
    if get_node_attr(img, "aria-hidden").as_deref() == Some("true") {
        return true;
    }

    let style = InlineStyle::of(img);
    let dimension = |name: &str| {
        get_node_attr(img, name)
            .and_then(|value| parse_pixels(value.trim()))
            .or_else(|| style.pixel_length(name))
    };
    // 尺寸未知时不做推断
    if let (Some(width), Some(height)) = (dimension("width"), dimension("height")) {
        if width.max(height) <= DECORATIVE_MAX_DIMENSION {
            return true;
        }
    }

    style.has_background_image()
}

pub fn is_placeholder_alt(alt: &str) -> bool {
    regex(&PLACEHOLDER_ALT, PLACEHOLDER_ALT_PATTERN).is_match(alt)
}

pub fn is_verbose_alt(alt: &str) -> bool {
    char_len(alt) > MAX_ALT_LENGTH || alt.split_whitespace().count() > MAX_ALT_WORDS
}

/// 链接问题
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFinding {
    pub label: String,
}

impl LinkFinding {
    pub fn reason(&self) -> &'static str {
        "Vague link text"
    }
}

pub fn is_vague_link_label(label: &str) -> bool {
    regex(&VAGUE_LINK, VAGUE_LINK_PATTERN).is_match(label)
}

/// 含糊的链接文本，且没有 `aria-label` 或 `aria-labelledby` 提供的名称
pub fn classify_link(document: &Handle, anchor: &Handle) -> Option<LinkFinding> {
    let label = normalized_text(anchor);
    if label.is_empty() || !is_vague_link_label(&label) {
        return None;
    }
    if get_node_attr(anchor, "aria-label").is_some_and(|value| !value.trim().is_empty()) {
        return None;
    }
    let labelled = labelled_text(document, get_node_attr(anchor, "aria-labelledby").as_deref());
    if !labelled.trim().is_empty() {
        return None;
    }
    Some(LinkFinding { label })
}

/// 标题问题原因，按优先级排列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingReason {
    TooLong,
    AllCaps,
    Generic,
}

impl HeadingReason {
    pub fn message(&self) -> &'static str {
        match self {
            HeadingReason::TooLong => "Heading is longer than 70 characters.",
            HeadingReason::AllCaps => "Heading is in all caps.",
            HeadingReason::Generic => "Heading is too generic.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingFinding {
    pub text: String,
    pub reason: HeadingReason,
}

pub fn classify_heading(heading: &Handle) -> Option<HeadingFinding> {
    let text = normalized_text(heading);
    if text.is_empty() {
        return None;
    }
    let reason = if char_len(&text) > MAX_HEADING_LENGTH {
        HeadingReason::TooLong
    } else if is_all_caps(&text) {
        HeadingReason::AllCaps
    } else if is_generic_heading(&text) {
        HeadingReason::Generic
    } else {
        return None;
    };
    Some(HeadingFinding { text, reason })
}

/// 至少 4 个字母且全部大写
pub fn is_all_caps(text: &str) -> bool {
    let mut letters = 0;
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        if !c.is_uppercase() {
            return false;
        }
        letters += 1;
    }
    letters >= 4
}

pub fn is_generic_heading(text: &str) -> bool {
    regex(&GENERIC_HEADING, GENERIC_HEADING_PATTERN).is_match(text.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::dom::{find_elements, first_element, is_element_named, parse_html};

    fn images(html: &str) -> (markup5ever_rcdom::RcDom, Vec<Handle>) {
        let dom = parse_html(html);
        let found = find_elements(&dom.document, &|node| is_element_named(node, &["img"]));
        (dom, found)
    }

    #[test]
    fn test_decorative_rules() {
        let (_dom, imgs) = images(
            "<img src=a.png role=presentation>\
             <img src=b.png aria-hidden=true>\
             <img src=c.png width=16 height=12>\
             <img src=d.png style='width:1px;height:1px'>\
             <img src=e.png style='background-image:url(x.png)'>\
             <img src=f.png width=16>\
             <img src=g.png width=400 height=300>\
             <img src=h.png width=10 height=10 alt='Company logo'>",
        );
        let decorative: Vec<bool> = imgs.iter().map(is_decorative_image).collect();
        assert_eq!(
            decorative,
            vec![true, true, true, true, true, false, false, false]
        );
    }

    #[test]
    fn test_classify_image() {
        let (_dom, imgs) = images(&format!(
            "<img src=a.png><img src=b.png alt=' Photo '><img src=c.png alt='{}'>\
             <img src=d.png alt='Golden retriever catching a frisbee'><img src=e.png alt='' width=8 height=8>",
            "word ".repeat(31)
        ));
        let findings: Vec<Option<ImageFinding>> = imgs.iter().map(classify_image).collect();
        assert_eq!(
            findings,
            vec![
                Some(ImageFinding::MissingAlt),
                Some(ImageFinding::PlaceholderAlt),
                Some(ImageFinding::VerboseAlt),
                None,
                Some(ImageFinding::Decorative),
            ]
        );
        assert_eq!(
            ImageFinding::MissingAlt.reason(),
            "Image missing descriptive alt text"
        );
    }

    #[test]
    fn test_vague_link_labels() {
        for label in ["Click here", "READ MORE", "more", "See gallery", "haz clic aquí", "Clicca qui"] {
            assert!(is_vague_link_label(label), "{}", label);
        }
        for label in ["Read more about pricing", "Pricing", "Here we go"] {
            assert!(!is_vague_link_label(label), "{}", label);
        }
    }

    #[test]
    fn test_link_with_accessible_name_is_skipped() {
        let dom = parse_html(
            "<span id=n>Pricing guide</span><span id=empty> </span>\
             <a href=/a>Read more</a>\
             <a href=/b aria-label='Read the pricing guide'>Read more</a>\
             <a href=/c aria-labelledby=n>Read more</a>\
             <a href=/d aria-labelledby='empty missing'>Learn more</a>\
             <a href=/e>Pricing</a>",
        );
        let anchors = find_elements(&dom.document, &|node| is_element_named(node, &["a"]));
        let flagged: Vec<bool> = anchors
            .iter()
            .map(|anchor| classify_link(&dom.document, anchor).is_some())
            .collect();
        assert_eq!(flagged, vec![true, false, false, true, false]);
    }

    #[test]
    fn test_heading_reasons_in_priority_order() {
        let dom = parse_html(&format!(
            "<h1>{}</h1><h2>SPRING SALE</h2><h3>News</h3><h4>Release notes for 2.0</h4><h5>FAQ</h5>",
            "LONG ".repeat(20)
        ));
        let headings = find_elements(&dom.document, &|node| {
            is_element_named(node, crate::html::dom::HEADING_ELEMENTS)
        });
        let reasons: Vec<Option<HeadingReason>> = headings
            .iter()
            .map(|heading| classify_heading(heading).map(|finding| finding.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                Some(HeadingReason::TooLong),
                Some(HeadingReason::AllCaps),
                Some(HeadingReason::Generic),
                None,
                None,
            ]
        );
    }

    #[test]
    fn test_all_caps_needs_only_uppercase_letters() {
        assert!(is_all_caps("BIG NEWS 2024!"));
        assert!(!is_all_caps("Big News"));
        assert!(!is_all_caps("FAQ"));
        assert!(!is_all_caps("1234 5678"));

        let dom = parse_html("<h2>ÉTÉ À PARIS</h2>");
        let heading = first_element(&dom.document, &["h2"]).unwrap();
        assert!(classify_heading(&heading).is_some());
    }
}
