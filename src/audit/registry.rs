//! 问题登记表
//!
//! 登记表独占每个问题的状态，也是修复相关 DOM 变更的唯一执行者。
//! 应用修复时记录变更前的属性值和子节点，撤销时原样恢复；同一问题最多保留一个撤销动作，
//! 重复应用会先执行已有的撤销，所以应用是幂等的。

use std::collections::HashMap;

use markup5ever_rcdom::Handle;
use serde::{Deserialize, Serialize};

use super::counts::Counts;
use super::issue::{FixKind, Issue, IssueDraft, IssueIdGenerator};
use crate::error::{helpers::log_error, AuditError, AuditResult};
use crate::html::dom::{
    append_child, create_element, create_text, get_node_attr, insert_after, remove_node,
    replace_children_with_text, set_children, set_node_attr,
};
use crate::html::NodeRef;

pub const PREVIEW_ID_PREFIX: &str = "a11y-copy-helper-preview-";
pub const PREVIEW_CLASS: &str = "a11y-copy-helper-heading-preview";
pub const PREVIEW_DATA_ATTR: &str = "data-a11y-copy-helper-preview-id";

/// 问题状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Pending,
    Applied,
    Ignored,
}

/// 修复由谁触发
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrigin {
    Manual,
    /// 调度器的自动应用
    Automatic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// 链接与标题：直接替换元素文本
    pub replace_text: bool,
}

/// 撤销动作：变更前的属性值、被替换的子节点、插入的预览节点
#[derive(Debug)]
pub struct UndoAction {
    node: NodeRef,
    attributes: Vec<(String, Option<String>)>,
    children: Option<Vec<Handle>>,
    inserted: Option<Handle>,
}

impl UndoAction {
    fn capture(node: &Handle, attributes: &[&str]) -> Self {
        Self {
            node: NodeRef::new(node),
            attributes: attributes
                .iter()
                .map(|name| (name.to_string(), get_node_attr(node, name)))
                .collect(),
            children: None,
            inserted: None,
        }
    }

    fn run(self) {
        if let Some(inserted) = &self.inserted {
            remove_node(inserted);
        }
        let Some(node) = self.node.upgrade() else {
            tracing::warn!("撤销目标节点已被释放");
            return;
        };
        if let Some(children) = self.children {
            set_children(&node, children);
        }
        for (name, value) in self.attributes {
            set_node_attr(&node, &name, value);
        }
    }
}

#[derive(Debug)]
pub struct IssueState {
    pub status: IssueStatus,
    pub auto_applied: bool,
    undo: Option<UndoAction>,
}

impl IssueState {
    fn pending() -> Self {
        Self {
            status: IssueStatus::Pending,
            auto_applied: false,
            undo: None,
        }
    }

    pub fn has_undo(&self) -> bool {
        self.undo.is_some()
    }

    fn run_undo(&mut self) -> bool {
        match self.undo.take() {
            Some(undo) => {
                undo.run();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
struct Entry {
    issue: Issue,
    state: IssueState,
}

#[derive(Debug, Default)]
pub struct IssueRegistry {
    audit_id: Option<String>,
    ids: IssueIdGenerator,
    order: Vec<String>,
    entries: HashMap<String, Entry>,
}

impl IssueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新的审计代，丢弃旧状态；已经应用的修复留在页面上
    pub fn begin_generation(&mut self, audit_id: &str) {
        tracing::debug!("开始审计代 {}，丢弃 {} 个旧问题", audit_id, self.order.len());
        self.audit_id = Some(audit_id.to_string());
        self.order.clear();
        self.entries.clear();
    }

    pub fn audit_id(&self) -> Option<&str> {
        self.audit_id.as_deref()
    }

    pub fn register(&mut self, draft: IssueDraft) -> Issue {
        let id = self.ids.next_id(draft.category);
        let issue = Issue::from_draft(id.clone(), draft);
        self.order.push(id.clone());
        self.entries.insert(
            id,
            Entry {
                issue: issue.clone(),
                state: IssueState::pending(),
            },
        );
        issue
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Issue> {
        self.entries.get(id).map(|entry| &entry.issue)
    }

    pub fn state(&self, id: &str) -> Option<&IssueState> {
        self.entries.get(id).map(|entry| &entry.state)
    }

    pub fn status(&self, id: &str) -> Option<IssueStatus> {
        self.state(id).map(|state| state.status)
    }

    /// 按登记顺序列出问题
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| &entry.issue))
    }

    /// 问题对应的节点（仍连接在文档上时）
    pub fn locate(&self, id: &str) -> Option<Handle> {
        self.get(id)?.element.upgrade_connected()
    }

    /// 应用修复；已应用的问题先撤销再重新应用
    pub fn apply(&mut self, id: &str, options: ApplyOptions, origin: ApplyOrigin) -> AuditResult<()> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| AuditError::IssueNotFound(id.to_string()))?;

        if entry.state.run_undo() {
            entry.state.status = IssueStatus::Pending;
            entry.state.auto_applied = false;
        }

        let Some(node) = entry.issue.element.upgrade_connected() else {
            let error = AuditError::MutationFailed(format!("问题 {} 的节点已不在文档中", id));
            log_error("应用修复失败", &error);
            return Err(error);
        };

        let undo = match apply_fix(&entry.issue, &node, options) {
            Ok(undo) => undo,
            Err(error) => {
                log_error("应用修复失败", &error);
                return Err(error);
            }
        };

        entry.state = IssueState {
            status: IssueStatus::Applied,
            auto_applied: origin == ApplyOrigin::Automatic,
            undo: Some(undo),
        };
        tracing::debug!("已应用修复 {} ({:?})", id, origin);
        Ok(())
    }

    /// 撤销修复；没有撤销动作时只把状态改回 Pending
    pub fn revert(&mut self, id: &str) -> AuditResult<()> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| AuditError::IssueNotFound(id.to_string()))?;
        entry.state.run_undo();
        entry.state.status = IssueStatus::Pending;
        entry.state.auto_applied = false;
        Ok(())
    }

    /// 忽略问题，不触碰 DOM
    pub fn ignore(&mut self, id: &str) -> AuditResult<()> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| AuditError::IssueNotFound(id.to_string()))?;
        entry.state.status = IssueStatus::Ignored;
        Ok(())
    }

    /// 撤销全部问题，所有状态回到 Pending
    pub fn revert_all(&mut self) {
        for id in self.order.clone() {
            if let Err(error) = self.revert(&id) {
                log_error("撤销修复失败", &error);
            }
        }
    }

    /// 应用全部安全问题，跳过已应用和已忽略的，返回本次应用的数量
    pub fn apply_all_safe(&mut self, origin: ApplyOrigin) -> usize {
        let targets: Vec<String> = self
            .order
            .iter()
            .filter(|id| {
                self.entries.get(*id).is_some_and(|entry| {
                    entry.issue.safe && entry.state.status == IssueStatus::Pending
                })
            })
            .cloned()
            .collect();

        targets
            .iter()
            .filter(|id| self.apply(id, ApplyOptions::default(), origin).is_ok())
            .count()
    }

    pub fn compute_counts(&self) -> Counts {
        let mut applied = 0;
        let mut ignored = 0;
        let mut auto_applied = 0;
        for entry in self.entries.values() {
            match entry.state.status {
                IssueStatus::Applied => {
                    applied += 1;
                    if entry.state.auto_applied {
                        auto_applied += 1;
                    }
                }
                IssueStatus::Ignored => ignored += 1,
                IssueStatus::Pending => {}
            }
        }
        Counts::new(self.entries.len(), applied, ignored, auto_applied)
    }
}

fn apply_fix(issue: &Issue, node: &Handle, options: ApplyOptions) -> AuditResult<UndoAction> {
    let replace_text = options.replace_text && issue.can_replace_text;
    match issue.fix {
        FixKind::MarkDecorative => {
            let undo = UndoAction::capture(node, &["alt", "aria-hidden"]);
            set_node_attr(node, "alt", Some(String::new()));
            set_node_attr(node, "aria-hidden", Some("true".to_string()));
            Ok(undo)
        }
        FixKind::SetAlt => {
            let undo = UndoAction::capture(node, &["alt", "aria-hidden"]);
            set_node_attr(node, "alt", Some(issue.alt_text()));
            set_node_attr(node, "aria-hidden", None);
            Ok(undo)
        }
        FixKind::LinkLabel => {
            let mut undo = UndoAction::capture(node, &["aria-label"]);
            if replace_text {
                undo.children = Some(replace_children_with_text(node, &issue.suggestion));
                set_node_attr(node, "aria-label", None);
            } else {
                set_node_attr(node, "aria-label", Some(issue.suggestion.clone()));
            }
            Ok(undo)
        }
        FixKind::HeadingText => {
            if replace_text {
                let mut undo = UndoAction::capture(node, &[]);
                undo.children = Some(replace_children_with_text(node, &issue.suggestion));
                return Ok(undo);
            }

            let marker = format!("{}{}", PREVIEW_ID_PREFIX, issue.id);
            let badge = create_element(
                "span",
                &[("id", marker.as_str()), ("role", "note"), ("class", PREVIEW_CLASS)],
            );
            append_child(&badge, &create_text(&issue.suggestion));
            insert_after(node, &badge)?;

            let mut undo = UndoAction::capture(node, &[PREVIEW_DATA_ATTR]);
            set_node_attr(node, PREVIEW_DATA_ATTR, Some(marker));
            undo.inserted = Some(badge);
            Ok(undo)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::issue::Category;
    use crate::html::dom::{find_by_id, first_element, normalized_text, parse_html};
    use crate::html::serialize_to_string;

    fn draft(category: Category, element: &Handle, fix: FixKind, suggestion: &str) -> IssueDraft {
        IssueDraft {
            category,
            element: element.clone(),
            reason: "reason".to_string(),
            suggestion: suggestion.to_string(),
            translated_suggestion: None,
            language: "en".to_string(),
            context: String::new(),
            fix,
        }
    }

    #[test]
    fn test_apply_is_idempotent_and_revert_restores() {
        let dom = parse_html("<img src=a.png aria-hidden=false>");
        let img = first_element(&dom.document, &["img"]).unwrap();
        let before = serialize_to_string(&dom.document).unwrap();

        let mut registry = IssueRegistry::new();
        registry.begin_generation("1-1");
        let issue = registry.register(draft(Category::Image, &img, FixKind::SetAlt, " Red bicycle "));

        registry.apply(&issue.id, ApplyOptions::default(), ApplyOrigin::Manual).unwrap();
        let once = serialize_to_string(&dom.document).unwrap();
        registry.apply(&issue.id, ApplyOptions::default(), ApplyOrigin::Manual).unwrap();
        assert_eq!(serialize_to_string(&dom.document).unwrap(), once);
        assert_eq!(get_node_attr(&img, "alt").as_deref(), Some("Red bicycle"));
        assert!(get_node_attr(&img, "aria-hidden").is_none());

        registry.revert(&issue.id).unwrap();
        assert_eq!(serialize_to_string(&dom.document).unwrap(), before);
        assert!(get_node_attr(&img, "alt").is_none());
        assert_eq!(registry.status(&issue.id), Some(IssueStatus::Pending));
        assert!(!registry.state(&issue.id).unwrap().has_undo());

        // 没有撤销动作时撤销是安全的空操作
        registry.revert(&issue.id).unwrap();
        assert_eq!(serialize_to_string(&dom.document).unwrap(), before);
    }

    #[test]
    fn test_decorative_fix() {
        let dom = parse_html("<img src=spacer.gif>");
        let img = first_element(&dom.document, &["img"]).unwrap();
        let mut registry = IssueRegistry::new();
        let issue = registry.register(draft(Category::Image, &img, FixKind::MarkDecorative, "x"));

        assert_eq!(registry.apply_all_safe(ApplyOrigin::Automatic), 1);
        assert_eq!(get_node_attr(&img, "alt").as_deref(), Some(""));
        assert_eq!(get_node_attr(&img, "aria-hidden").as_deref(), Some("true"));
        assert!(registry.state(&issue.id).unwrap().auto_applied);

        let counts = registry.compute_counts();
        assert_eq!(counts, Counts::new(1, 1, 0, 1));
    }

    #[test]
    fn test_link_replace_text_round_trip() {
        let dom = parse_html("<a href=/x aria-label=''>Read <b>more</b></a>");
        let anchor = first_element(&dom.document, &["a"]).unwrap();
        let before = serialize_to_string(&dom.document).unwrap();
        let mut registry = IssueRegistry::new();
        let issue = registry.register(draft(Category::Link, &anchor, FixKind::LinkLabel, "Pricing guide"));

        registry
            .apply(&issue.id, ApplyOptions { replace_text: true }, ApplyOrigin::Manual)
            .unwrap();
        assert_eq!(normalized_text(&anchor), "Pricing guide");
        assert!(get_node_attr(&anchor, "aria-label").is_none());

        registry.revert(&issue.id).unwrap();
        assert_eq!(serialize_to_string(&dom.document).unwrap(), before);

        registry.apply(&issue.id, ApplyOptions::default(), ApplyOrigin::Manual).unwrap();
        assert_eq!(get_node_attr(&anchor, "aria-label").as_deref(), Some("Pricing guide"));
        assert_eq!(normalized_text(&anchor), "Read more");
    }

    #[test]
    fn test_heading_preview_inserted_once() {
        let dom = parse_html("<section><h2>NEWS</h2><p>Body</p></section>");
        let heading = first_element(&dom.document, &["h2"]).unwrap();
        let before = serialize_to_string(&dom.document).unwrap();
        let mut registry = IssueRegistry::new();
        let issue = registry.register(draft(Category::Heading, &heading, FixKind::HeadingText, "Latest News"));
        let marker = format!("{}{}", PREVIEW_ID_PREFIX, issue.id);

        registry.apply(&issue.id, ApplyOptions::default(), ApplyOrigin::Manual).unwrap();
        registry.apply(&issue.id, ApplyOptions::default(), ApplyOrigin::Manual).unwrap();
        let html = serialize_to_string(&dom.document).unwrap();
        assert_eq!(html.matches(PREVIEW_CLASS).count(), 1);
        let badge = find_by_id(&dom.document, &marker).unwrap();
        assert_eq!(normalized_text(&badge), "Latest News");
        assert_eq!(get_node_attr(&heading, PREVIEW_DATA_ATTR), Some(marker.clone()));

        registry.revert(&issue.id).unwrap();
        assert!(find_by_id(&dom.document, &marker).is_none());
        assert_eq!(serialize_to_string(&dom.document).unwrap(), before);
    }

    #[test]
    fn test_detached_node_fails_without_state_change() {
        let dom = parse_html("<p><img src=a.png></p>");
        let img = first_element(&dom.document, &["img"]).unwrap();
        let mut registry = IssueRegistry::new();
        let issue = registry.register(draft(Category::Image, &img, FixKind::SetAlt, "Photo"));
        remove_node(&img);

        let result = registry.apply(&issue.id, ApplyOptions::default(), ApplyOrigin::Manual);
        assert!(matches!(result, Err(AuditError::MutationFailed(_))));
        assert_eq!(registry.status(&issue.id), Some(IssueStatus::Pending));
        assert!(matches!(
            registry.apply("img-0-0", ApplyOptions::default(), ApplyOrigin::Manual),
            Err(AuditError::IssueNotFound(_))
        ));
    }

    #[test]
    fn test_ignored_issues_are_skipped_and_counted() {
        let dom = parse_html("<img src=a.png><img src=b.png><a href=/x>more</a>");
        let images: Vec<Handle> = crate::html::dom::find_elements(&dom.document, &|node| {
            crate::html::dom::is_element_named(node, &["img"])
        });
        let anchor = first_element(&dom.document, &["a"]).unwrap();
        let mut registry = IssueRegistry::new();
        let first = registry.register(draft(Category::Image, &images[0], FixKind::SetAlt, "One"));
        let second = registry.register(draft(Category::Image, &images[1], FixKind::SetAlt, "Two"));
        registry.register(draft(Category::Link, &anchor, FixKind::LinkLabel, "Three"));

        registry.ignore(&first.id).unwrap();
        assert_eq!(registry.apply_all_safe(ApplyOrigin::Manual), 1);
        assert!(get_node_attr(&images[0], "alt").is_none());
        assert_eq!(registry.status(&second.id), Some(IssueStatus::Applied));

        let counts = registry.compute_counts();
        assert_eq!(counts, Counts::new(3, 1, 1, 0));
        assert_eq!(counts.pending, 1);

        registry.revert_all();
        let counts = registry.compute_counts();
        assert_eq!(counts.pending, 3);
        assert!(get_node_attr(&images[1], "alt").is_none());
    }
}
