use std::cell::RefCell;
use std::rc::Rc;

use encoding_rs::Encoding;
use html5ever::interface::{Attribute, QualName};
use html5ever::parse_document;
use html5ever::tendril::{format_tendril, StrTendril, TendrilSink};
use html5ever::{namespace_url, ns, LocalName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};

use super::text::{normalize_text, tail_chars};
use crate::error::{AuditError, AuditResult};

/// 生成文本时不读取内容的元素
const OPAQUE_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// 生成文本时在其后插入换行的块级元素
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main",
    "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

pub const HEADING_ELEMENTS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// 将 HTML 字节转换为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: &str) -> AuditResult<RcDom> {
    let s = match Encoding::for_label(document_encoding.as_bytes()) {
        Some(encoding) => {
            let (string, _, _) = encoding.decode(data);
            string.into_owned()
        }
        None => String::from_utf8_lossy(data).into_owned(),
    };

    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())
        .map_err(|e| AuditError::ParseError(format!("HTML解析失败: {}", e)))
}

/// 解析 HTML 字符串
pub fn parse_html(html: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default()).one(html)
}

/// 获取节点名称
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

pub fn is_element(node: &Handle) -> bool {
    matches!(node.data, NodeData::Element { .. })
}

pub fn is_element_named(node: &Handle, names: &[&str]) -> bool {
    get_node_name(node).is_some_and(|name| names.contains(&name))
}

pub fn is_heading(node: &Handle) -> bool {
    is_element_named(node, HEADING_ELEMENTS)
}

/// 获取节点属性值
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| &*attr.name.local == attr_name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

pub fn has_node_attr(node: &Handle, attr_name: &str) -> bool {
    get_node_attr(node, attr_name).is_some()
}

/// 设置节点属性，`None` 表示彻底删除该属性
pub fn set_node_attr(node: &Handle, attr_name: &str, attr_value: Option<String>) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        match attr_value {
            Some(value) => {
                let mut found = false;
                for attr in attrs.iter_mut().filter(|attr| &*attr.name.local == attr_name) {
                    attr.value = StrTendril::from(value.as_str());
                    found = true;
                }
                if !found {
                    attrs.push(Attribute {
                        name: QualName::new(None, ns!(), LocalName::from(attr_name)),
                        value: format_tendril!("{}", value),
                    });
                }
            }
            None => attrs.retain(|attr| &*attr.name.local != attr_name),
        }
    }
}

/// 获取父节点；读取后把弱引用放回原处
pub fn get_parent_node(child: &Handle) -> Option<Handle> {
    let weak = child.parent.take();
    let parent = weak.as_ref().and_then(|node| node.upgrade());
    child.parent.set(weak);
    parent
}

/// 获取父元素（文档节点不算）
pub fn get_parent_element(child: &Handle) -> Option<Handle> {
    get_parent_node(child).filter(is_element)
}

/// 节点是否仍挂在某个文档上
pub fn is_connected(node: &Handle) -> bool {
    let mut cursor = node.clone();
    loop {
        if matches!(cursor.data, NodeData::Document) {
            return true;
        }
        match get_parent_node(&cursor) {
            Some(parent) => cursor = parent,
            None => return false,
        }
    }
}

/// 从节点自身开始向上查找第一个匹配的元素
pub fn closest(node: &Handle, names: &[&str]) -> Option<Handle> {
    let mut cursor = Some(node.clone());
    while let Some(current) = cursor {
        if is_element_named(&current, names) {
            return Some(current);
        }
        cursor = get_parent_element(&current);
    }
    None
}

/// 前序遍历，包含根节点
pub fn walk(node: &Handle, visit: &mut dyn FnMut(&Handle)) {
    visit(node);
    for child in node.children.borrow().iter() {
        walk(child, visit);
    }
}

/// 按文档顺序查找匹配的后代元素（不含根节点）
pub fn find_elements(root: &Handle, predicate: &dyn Fn(&Handle) -> bool) -> Vec<Handle> {
    let mut found = Vec::new();
    for child in root.children.borrow().iter() {
        walk(child, &mut |node| {
            if is_element(node) && predicate(node) {
                found.push(node.clone());
            }
        });
    }
    found
}

/// 按文档顺序查找第一个名称匹配的后代元素
pub fn first_element(root: &Handle, names: &[&str]) -> Option<Handle> {
    for child in root.children.borrow().iter() {
        if is_element_named(child, names) {
            return Some(child.clone());
        }
        if let Some(found) = first_element(child, names) {
            return Some(found);
        }
    }
    None
}

/// 根据名称获取直接子元素
pub fn get_child_node_by_name(parent: &Handle, node_name: &str) -> Option<Handle> {
    parent
        .children
        .borrow()
        .iter()
        .find(|child| get_node_name(child) == Some(node_name))
        .cloned()
}

/// 按 id 查找元素
pub fn find_by_id(root: &Handle, id: &str) -> Option<Handle> {
    if id.is_empty() {
        return None;
    }
    find_elements(root, &|node| get_node_attr(node, "id").as_deref() == Some(id))
        .into_iter()
        .next()
}

/// 类似 `innerText` 的文本：跳过脚本与样式，块级元素之间插入换行
pub fn text_content(node: &Handle) -> String {
    let mut buf = String::new();
    collect_text(node, &mut buf);
    buf
}

fn collect_text(node: &Handle, buf: &mut String) {
    match &node.data {
        NodeData::Text { contents } => buf.push_str(&contents.borrow()),
        NodeData::Element { name, .. } => {
            let local = name.local.as_ref();
            if OPAQUE_ELEMENTS.contains(&local) {
                return;
            }
            for child in node.children.borrow().iter() {
                collect_text(child, buf);
            }
            if BLOCK_ELEMENTS.contains(&local) {
                buf.push('\n');
            }
        }
        NodeData::Document => {
            for child in node.children.borrow().iter() {
                collect_text(child, buf);
            }
        }
        _ => {}
    }
}

/// 规范化后的元素文本
pub fn normalized_text(node: &Handle) -> String {
    normalize_text(&text_content(node))
}

/// 前一个兄弟元素
pub fn previous_element_sibling(node: &Handle) -> Option<Handle> {
    let parent = get_parent_node(node)?;
    let children = parent.children.borrow();
    let index = children.iter().position(|child| Rc::ptr_eq(child, node))?;
    children[..index].iter().rev().find(|child| is_element(child)).cloned()
}

/// 向前回溯，返回最近一段可读文本的末尾 `limit` 个字符
pub fn previous_visible_text(node: &Handle, limit: usize) -> String {
    let mut cursor = node.clone();
    loop {
        if let Some(sibling) = previous_element_sibling(&cursor) {
            let text = normalized_text(&sibling);
            if !text.is_empty() {
                return tail_chars(&text, limit);
            }
            cursor = sibling;
        } else {
            match get_parent_element(&cursor) {
                Some(parent) => cursor = parent,
                None => return String::new(),
            }
        }
    }
}

/// 文档标题
pub fn document_title(document: &Handle) -> String {
    first_element(document, &["title"])
        .map(|title| normalized_text_raw(&title))
        .unwrap_or_default()
}

// title 位于 head 中，text_content 会跳过 head，因此直接读取文本子节点
fn normalized_text_raw(node: &Handle) -> String {
    let mut buf = String::new();
    walk(node, &mut |child| {
        if let NodeData::Text { contents } = &child.data {
            buf.push_str(&contents.borrow());
        }
    });
    normalize_text(&buf)
}

/// `<html lang>` 属性
pub fn document_language(document: &Handle) -> Option<String> {
    get_child_node_by_name(document, "html")
        .and_then(|html| get_node_attr(&html, "lang"))
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
}

/// `<body>`，缺失时退回到 `<html>` 或文档本身
pub fn document_body(document: &Handle) -> Handle {
    let html = get_child_node_by_name(document, "html");
    html.as_ref()
        .and_then(|html| get_child_node_by_name(html, "body"))
        .or(html)
        .unwrap_or_else(|| document.clone())
}

/// 创建游离元素
pub fn create_element(name: &str, attrs: &[(&str, &str)]) -> Handle {
    Node::new(NodeData::Element {
        name: QualName::new(None, ns!(html), LocalName::from(name)),
        attrs: RefCell::new(
            attrs
                .iter()
                .map(|(key, value)| Attribute {
                    name: QualName::new(None, ns!(), LocalName::from(*key)),
                    value: StrTendril::from(*value),
                })
                .collect(),
        ),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

/// 创建文本节点
pub fn create_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from(text)),
    })
}

/// 从父节点上摘除；返回是否确实摘除
pub fn remove_node(node: &Handle) -> bool {
    let Some(parent) = get_parent_node(node) else {
        return false;
    };
    let mut children = parent.children.borrow_mut();
    let before = children.len();
    children.retain(|child| !Rc::ptr_eq(child, node));
    node.parent.set(None);
    children.len() != before
}

/// 追加子节点
pub fn append_child(parent: &Handle, child: &Handle) {
    remove_node(child);
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child.clone());
}

/// 把 `new_node` 插入到 `reference` 之后
pub fn insert_after(reference: &Handle, new_node: &Handle) -> AuditResult<()> {
    let parent = get_parent_node(reference)
        .ok_or_else(|| AuditError::MutationFailed("参考节点没有父节点".to_string()))?;
    remove_node(new_node);
    let mut children = parent.children.borrow_mut();
    let index = children
        .iter()
        .position(|child| Rc::ptr_eq(child, reference))
        .ok_or_else(|| AuditError::MutationFailed("参考节点不在父节点中".to_string()))?;
    new_node.parent.set(Some(Rc::downgrade(&parent)));
    children.insert(index + 1, new_node.clone());
    Ok(())
}

/// 摘下全部子节点并返回
pub fn take_children(node: &Handle) -> Vec<Handle> {
    let children: Vec<Handle> = node.children.borrow_mut().drain(..).collect();
    for child in &children {
        child.parent.set(None);
    }
    children
}

/// 把子节点整体替换为给定节点列表
pub fn set_children(node: &Handle, children: Vec<Handle>) {
    take_children(node);
    for child in &children {
        remove_node(child);
        child.parent.set(Some(Rc::downgrade(node)));
    }
    *node.children.borrow_mut() = children;
}

/// 用一个文本节点替换全部子节点，返回原来的子节点
pub fn replace_children_with_text(node: &Handle, text: &str) -> Vec<Handle> {
    let previous = take_children(node);
    append_child(node, &create_text(text));
    previous
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(dom: &RcDom) -> Handle {
        document_body(&dom.document)
    }

    #[test]
    fn test_attr_roundtrip() {
        let dom = parse_html("<img src=a.png alt=Logo>");
        let img = first_element(&dom.document, &["img"]).unwrap();
        assert_eq!(get_node_attr(&img, "alt").as_deref(), Some("Logo"));

        set_node_attr(&img, "alt", Some(String::new()));
        assert_eq!(get_node_attr(&img, "alt").as_deref(), Some(""));

        set_node_attr(&img, "aria-hidden", Some("true".to_string()));
        set_node_attr(&img, "aria-hidden", None);
        assert!(!has_node_attr(&img, "aria-hidden"));
    }

    #[test]
    fn test_parent_lookup_is_repeatable() {
        let dom = parse_html("<p><a href=#>x</a></p>");
        let link = first_element(&dom.document, &["a"]).unwrap();
        let first = get_parent_node(&link).unwrap();
        let second = get_parent_node(&link).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(is_connected(&link));

        remove_node(&link);
        assert!(!is_connected(&link));
    }

    #[test]
    fn test_text_content_skips_scripts_and_breaks_blocks() {
        let dom = parse_html("<div><p>One</p><script>var x;</script><p>Two</p></div>");
        assert_eq!(normalized_text(&body(&dom)), "One Two");
    }

    #[test]
    fn test_previous_visible_text_walks_up() {
        let dom = parse_html("<p>Intro paragraph</p><div><span></span><a href=#>more</a></div>");
        let link = first_element(&dom.document, &["a"]).unwrap();
        assert_eq!(previous_visible_text(&link, 5), "graph");
    }

    #[test]
    fn test_replace_and_restore_children() {
        let dom = parse_html("<h2>Old <em>title</em></h2>");
        let heading = first_element(&dom.document, &["h2"]).unwrap();
        let previous = replace_children_with_text(&heading, "New title");
        assert_eq!(normalized_text(&heading), "New title");

        set_children(&heading, previous);
        assert_eq!(normalized_text(&heading), "Old title");
        assert!(first_element(&heading, &["em"]).is_some());
    }

    #[test]
    fn test_insert_after_and_lookup_by_id() {
        let dom = parse_html("<h2>Title</h2><p>Body</p>");
        let heading = first_element(&dom.document, &["h2"]).unwrap();
        let note = create_element("span", &[("id", "note-1")]);
        insert_after(&heading, &note).unwrap();
        let found = find_by_id(&dom.document, "note-1").unwrap();
        assert!(Rc::ptr_eq(&found, &note));
        assert!(insert_after(&create_element("i", &[]), &note).is_err());
    }

    #[test]
    fn test_document_metadata() {
        let dom = parse_html("<html lang=de><head><title> My  Page </title></head><body></body></html>");
        assert_eq!(document_title(&dom.document), "My Page");
        assert_eq!(document_language(&dom.document).as_deref(), Some("de"));
    }
}
