//! 变更提示
//!
//! 宿主把 DOM 变更记录交给调度器，这里把它们折算成下一次增量审计要检查的节点。
//! 提示数量达到上限后进入溢出状态，下一次审计改为整页扫描。

use std::collections::HashSet;
use std::rc::Rc;

use markup5ever_rcdom::{Handle, Node};

use crate::audit::scanner::matches_category;
use crate::audit::Category;
use crate::config::constants::OBSERVED_ATTRIBUTES;
use crate::html::dom::{find_elements, get_parent_element, is_element};

/// 一条 DOM 变更记录
#[derive(Debug, Clone)]
pub enum MutationRecord {
    Attributes { target: Handle, attribute: String },
    ChildList { target: Handle, added: Vec<Handle> },
    CharacterData { target: Handle },
}

/// 图片、带 `href` 的链接或标题
pub fn is_audit_relevant(node: &Handle) -> bool {
    Category::ALL
        .iter()
        .any(|category| matches_category(node, *category))
}

/// `root` 本身及其后代中与审计相关的元素，最多 `limit` 个
pub fn collect_relevant(root: &Handle, limit: usize) -> Vec<Handle> {
    if !is_element(root) || limit == 0 {
        return Vec::new();
    }
    let mut found = Vec::new();
    if is_audit_relevant(root) {
        found.push(root.clone());
    }
    if found.len() < limit {
        found.extend(
            find_elements(root, &is_audit_relevant)
                .into_iter()
                .take(limit - found.len()),
        );
    }
    found
}

fn closest_relevant(node: &Handle) -> Option<Handle> {
    let mut cursor = get_parent_element(node);
    while let Some(element) = cursor {
        if is_audit_relevant(&element) {
            return Some(element);
        }
        cursor = get_parent_element(&element);
    }
    None
}

/// 一次取出的提示
#[derive(Debug, Clone, Default)]
pub struct HintSnapshot {
    pub nodes: Vec<Handle>,
    pub overflow: bool,
}

impl HintSnapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && !self.overflow
    }
}

#[derive(Debug)]
pub struct HintSet {
    nodes: Vec<Handle>,
    seen: HashSet<*const Node>,
    overflow: bool,
    max_hints: usize,
    max_expansion: usize,
}

impl HintSet {
    pub fn new(max_hints: usize, max_expansion: usize) -> Self {
        Self {
            nodes: Vec::new(),
            seen: HashSet::new(),
            overflow: false,
            max_hints,
            max_expansion,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// 处理一条记录；返回记录是否在监听范围内
    pub fn add_record(&mut self, record: &MutationRecord) -> bool {
        match record {
            MutationRecord::Attributes { target, attribute } => {
                let attribute = attribute.to_ascii_lowercase();
                if !OBSERVED_ATTRIBUTES.contains(&attribute.as_str()) {
                    return false;
                }
                self.add_from_node(target);
            }
            MutationRecord::ChildList { added, .. } => {
                for node in added {
                    self.add_from_node(node);
                }
            }
            MutationRecord::CharacterData { target } => {
                if let Some(element) = closest_relevant(target) {
                    self.insert_all(vec![element]);
                }
            }
        }
        true
    }

    fn add_from_node(&mut self, node: &Handle) {
        if self.overflow || !is_element(node) {
            return;
        }
        let relevant = collect_relevant(node, self.max_expansion);
        self.insert_all(relevant);
    }

    fn insert_all(&mut self, nodes: Vec<Handle>) {
        for node in nodes {
            if self.overflow {
                return;
            }
            if self.seen.insert(Rc::as_ptr(&node)) {
                self.nodes.push(node);
            }
            if self.nodes.len() >= self.max_hints {
                tracing::debug!("变更提示达到上限 {}，改为整页扫描", self.max_hints);
                self.overflow = true;
                self.nodes.clear();
                self.seen.clear();
            }
        }
    }

    /// 取出全部提示并清空
    pub fn take(&mut self) -> HintSnapshot {
        self.seen.clear();
        HintSnapshot {
            nodes: std::mem::take(&mut self.nodes),
            overflow: std::mem::replace(&mut self.overflow, false),
        }
    }

    /// 审计失败后放回提示
    pub fn restore(&mut self, snapshot: HintSnapshot) {
        if snapshot.overflow {
            self.overflow = true;
            self.nodes.clear();
            self.seen.clear();
            return;
        }
        self.insert_all(snapshot.nodes);
    }

    pub fn clear(&mut self) {
        self.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::dom::{create_element, first_element, parse_html};

    fn set() -> HintSet {
        HintSet::new(120, 40)
    }

    #[test]
    fn test_child_list_expands_descendants() {
        let dom = parse_html(
            "<div id=card><img src=a.png><p>Text <a href=/x>more</a><a>no href</a></p><h3>Title</h3></div>",
        );
        let card = first_element(&dom.document, &["div"]).unwrap();
        let mut hints = set();
        assert!(hints.add_record(&MutationRecord::ChildList {
            target: card.clone(),
            added: vec![card.clone(), card.clone()],
        }));
        assert_eq!(hints.len(), 3);
    }

    #[test]
    fn test_unobserved_attributes_are_ignored() {
        let dom = parse_html("<img src=a.png>");
        let img = first_element(&dom.document, &["img"]).unwrap();
        let mut hints = set();
        assert!(!hints.add_record(&MutationRecord::Attributes {
            target: img.clone(),
            attribute: "class".to_string(),
        }));
        assert!(hints.is_empty());
        assert!(hints.add_record(&MutationRecord::Attributes {
            target: img,
            attribute: "ALT".to_string(),
        }));
        assert_eq!(hints.len(), 1);
    }

    #[test]
    fn test_character_data_uses_relevant_ancestor() {
        let dom = parse_html("<p><a href=/x><span>Read more</span></a></p><p>plain</p>");
        let span = first_element(&dom.document, &["span"]).unwrap();
        let text = span.children.borrow()[0].clone();
        let mut hints = set();
        hints.add_record(&MutationRecord::CharacterData { target: text });
        assert_eq!(hints.len(), 1);

        let plain = first_element(&dom.document, &["p"]).unwrap();
        let mut other = set();
        other.add_record(&MutationRecord::CharacterData { target: plain });
        assert!(other.is_empty());
    }

    #[test]
    fn test_expansion_limit_and_overflow() {
        let many = "<img src=x.png>".repeat(50);
        let dom = parse_html(&format!("<div>{}</div>", many));
        let div = first_element(&dom.document, &["div"]).unwrap();
        let mut hints = HintSet::new(120, 40);
        hints.add_record(&MutationRecord::ChildList {
            target: div.clone(),
            added: vec![div.clone()],
        });
        assert_eq!(hints.len(), 40);

        let mut small = HintSet::new(3, 40);
        let extra: Vec<Handle> = (0..3).map(|_| create_element("img", &[("src", "y.png")])).collect();
        small.add_record(&MutationRecord::ChildList {
            target: div.clone(),
            added: extra,
        });
        assert!(small.overflowed());
        assert!(small.is_empty());

        let snapshot = small.take();
        assert!(snapshot.overflow);
        assert!(!small.overflowed());
        small.restore(snapshot);
        assert!(small.overflowed());
    }
}
