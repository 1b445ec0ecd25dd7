//! DOM 扫描器
//!
//! 按类别列出候选元素，并在扫描时扣除预算。预算按“检查过的候选”计数，
//! 选区外的节点不占预算。

use std::collections::HashSet;
use std::rc::Rc;

use markup5ever_rcdom::Handle;

use super::issue::Category;
use crate::html::dom::{find_elements, has_node_attr, is_connected, is_element, is_element_named};
use crate::html::ResolvedRange;

/// 候选预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Limited(usize),
    Unlimited,
}

impl Budget {
    pub fn is_exhausted(&self, used: usize) -> bool {
        matches!(self, Budget::Limited(limit) if used >= *limit)
    }

    /// 扣除已用数量后的剩余预算
    pub fn consume(self, used: usize) -> Budget {
        match self {
            Budget::Limited(limit) => Budget::Limited(limit.saturating_sub(used)),
            Budget::Unlimited => Budget::Unlimited,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            Budget::Limited(limit) => Some(*limit),
            Budget::Unlimited => None,
        }
    }
}

/// 一个类别的扫描结果
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub candidates: Vec<Handle>,
    pub used: usize,
    pub has_more: bool,
}

/// 元素是否属于该类别（链接必须带 `href`）
pub fn matches_category(node: &Handle, category: Category) -> bool {
    match category {
        Category::Link => is_element_named(node, &["a"]) && has_node_attr(node, "href"),
        _ => is_element_named(node, category.element_names()),
    }
}

/// 规范化提示节点：只保留仍在文档中的元素，去重并保持原有顺序
pub fn normalize_hints(nodes: &[Handle]) -> Vec<Handle> {
    let mut seen = HashSet::new();
    nodes
        .iter()
        .filter(|node| is_element(node) && is_connected(node))
        .filter(|node| seen.insert(Rc::as_ptr(node)))
        .cloned()
        .collect()
}

/// 扫描一个类别
///
/// `hints` 非空时候选只来自提示节点，否则按文档顺序遍历 `root`。
pub fn scan(
    root: &Handle,
    category: Category,
    range: Option<&ResolvedRange>,
    hints: &[Handle],
    budget: Budget,
) -> ScanOutcome {
    let pool: Vec<Handle> = if hints.is_empty() {
        find_elements(root, &|node| matches_category(node, category))
    } else {
        hints
            .iter()
            .filter(|node| matches_category(node, category))
            .cloned()
            .collect()
    };

    let mut outcome = ScanOutcome::default();
    for node in pool {
        if range.is_some_and(|range| !range.intersects(&node)) {
            continue;
        }
        if budget.is_exhausted(outcome.used) {
            outcome.has_more = true;
            break;
        }
        outcome.used += 1;
        outcome.candidates.push(node);
    }

    tracing::debug!(
        "扫描 {}: {} 个候选, 还有剩余: {}",
        category,
        outcome.used,
        outcome.has_more
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::dom::{document_body, parse_html, remove_node};
    use crate::html::SelectionRange;

    const PAGE: &str = "<body>\
        <img src=a.png><p><img src=b.png><a>no href</a><a href=/x>x</a></p>\
        <section id=s><img src=c.png><h2>Title</h2></section></body>";

    #[test]
    fn test_budget_marks_has_more() {
        let dom = parse_html(PAGE);
        let outcome = scan(&dom.document, Category::Image, None, &[], Budget::Limited(2));
        assert_eq!(outcome.used, 2);
        assert!(outcome.has_more);

        let outcome = scan(&dom.document, Category::Image, None, &[], Budget::Limited(3));
        assert_eq!(outcome.used, 3);
        assert!(!outcome.has_more);

        let outcome = scan(&dom.document, Category::Image, None, &[], Budget::Limited(0));
        assert_eq!(outcome.used, 0);
        assert!(outcome.has_more);
    }

    #[test]
    fn test_links_require_href() {
        let dom = parse_html(PAGE);
        let outcome = scan(&dom.document, Category::Link, None, &[], Budget::Unlimited);
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[test]
    fn test_selection_skips_do_not_consume_budget() {
        let dom = parse_html(PAGE);
        let section = crate::html::dom::find_by_id(&dom.document, "s").unwrap();
        let range = SelectionRange::around(&section).resolve(&dom.document).unwrap();
        let outcome = scan(&dom.document, Category::Image, Some(&range), &[], Budget::Limited(1));
        assert_eq!(outcome.used, 1);
        assert!(!outcome.has_more);
    }

    #[test]
    fn test_hints_are_strict_and_normalized() {
        let dom = parse_html(PAGE);
        let body = document_body(&dom.document);
        let images = find_elements(&body, &|node| matches_category(node, Category::Image));
        let detached = images[2].clone();
        remove_node(&detached);

        let hints = normalize_hints(&[images[1].clone(), images[1].clone(), detached]);
        assert_eq!(hints.len(), 1);

        let outcome = scan(&dom.document, Category::Image, None, &hints, Budget::Unlimited);
        assert_eq!(outcome.candidates.len(), 1);
        assert!(Rc::ptr_eq(&outcome.candidates[0], &images[1]));

        // 提示集中没有标题，标题类别不会回退到整页扫描
        let outcome = scan(&dom.document, Category::Heading, None, &hints, Budget::Unlimited);
        assert!(outcome.candidates.is_empty());
    }
}
