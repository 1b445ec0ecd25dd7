//! 审计报告与导出

use serde::Serialize;

use super::issue::{Category, Issue};
use super::registry::{IssueRegistry, IssueStatus};
use crate::html::dom::{get_node_attr, get_node_name, normalized_text};
use crate::provider::ActivationInfo;

/// 报告元数据；预算字段在不限预算时为 `None`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMeta {
    pub budget_requested: Option<usize>,
    pub budget_remaining: Option<usize>,
    pub hint_count: usize,
    pub auto_apply_attempted: bool,
    pub auto_apply_executed: bool,
}

/// 一次审计的结果，各类别内按 DOM 顺序排列
#[derive(Debug, Clone)]
pub struct Report {
    pub audit_id: String,
    pub language: String,
    pub summary: String,
    pub summary_alt: Option<String>,
    pub images: Vec<Issue>,
    pub links: Vec<Issue>,
    pub headings: Vec<Issue>,
    pub has_more: bool,
    pub meta: ReportMeta,
    pub activation: ActivationInfo,
}

impl Report {
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.images
            .iter()
            .chain(self.links.iter())
            .chain(self.headings.iter())
    }

    pub fn issue_count(&self) -> usize {
        self.images.len() + self.links.len() + self.headings.len()
    }

    pub fn find(&self, id: &str) -> Option<&Issue> {
        self.issues().find(|issue| issue.id == id)
    }

    pub fn category(&self, category: Category) -> &[Issue] {
        match category {
            Category::Image => &self.images,
            Category::Link => &self.links,
            Category::Heading => &self.headings,
        }
    }

    /// 展开为扁平列表，附带每个问题的当前状态
    pub fn export(&self, registry: &IssueRegistry, prefer_aria_label: bool) -> Vec<ExportedIssue> {
        self.issues()
            .map(|issue| ExportedIssue::new(issue, registry, prefer_aria_label))
            .collect()
    }
}

/// 导出用的问题视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedIssue {
    pub id: String,
    pub category: Category,
    pub category_label: String,
    pub title: String,
    pub reason: String,
    pub suggestion: String,
    pub translated_suggestion: String,
    pub context: String,
    pub current_text: String,
    pub safe: bool,
    pub can_replace_text: bool,
    pub default_replace: bool,
    pub status: IssueStatus,
    pub auto_applied: bool,
    pub element_tag: Option<String>,
}

impl ExportedIssue {
    fn new(issue: &Issue, registry: &IssueRegistry, prefer_aria_label: bool) -> Self {
        let state = registry.state(&issue.id);
        let node = issue.element.upgrade();
        Self {
            id: issue.id.clone(),
            category: issue.category,
            category_label: issue.category.section_label().to_string(),
            title: issue.category.title().to_string(),
            reason: issue.reason.clone(),
            suggestion: issue.suggestion.clone(),
            translated_suggestion: issue.translated_suggestion.clone().unwrap_or_default(),
            context: issue.context.clone(),
            current_text: node
                .as_ref()
                .map(|node| match issue.category {
                    Category::Image => get_node_attr(node, "alt")
                        .filter(|alt| !alt.is_empty())
                        .unwrap_or_else(|| "(empty)".to_string()),
                    _ => normalized_text(node),
                })
                .unwrap_or_default(),
            safe: issue.safe,
            can_replace_text: issue.can_replace_text,
            default_replace: issue.category == Category::Link && !prefer_aria_label,
            status: state.map_or(IssueStatus::Pending, |state| state.status),
            auto_applied: state.is_some_and(|state| state.auto_applied),
            element_tag: node
                .as_ref()
                .and_then(|node| get_node_name(node).map(str::to_string)),
        }
    }
}

/// 渲染 Markdown 格式的问题清单
pub fn to_markdown(issues: &[ExportedIssue], site: Option<&str>) -> String {
    let mut lines = vec!["# Accessibility Findings".to_string()];
    if let Some(site) = site.map(str::trim).filter(|site| !site.is_empty()) {
        lines.push(String::new());
        lines.push(format!("- {}", site));
    }
    lines.push(String::new());

    for (index, issue) in issues.iter().enumerate() {
        lines.push(format!(
            "## {}. {} - {}",
            index + 1,
            issue.category_label,
            issue.reason
        ));
        if !issue.suggestion.is_empty() {
            lines.push(format!("- Suggestion: {}", issue.suggestion));
        }
        if !issue.current_text.is_empty() {
            lines.push(format!("- Current: {}", issue.current_text));
        }
        if !issue.context.is_empty() {
            lines.push(format!("- Context: {}", issue.context));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::issue::{FixKind, IssueDraft};
    use crate::html::dom::{first_element, parse_html};

    fn report_with(registry: &mut IssueRegistry, dom: &markup5ever_rcdom::RcDom) -> Report {
        let img = first_element(&dom.document, &["img"]).unwrap();
        let anchor = first_element(&dom.document, &["a"]).unwrap();
        let image = registry.register(IssueDraft {
            category: Category::Image,
            element: img,
            reason: "Image missing descriptive alt text".to_string(),
            suggestion: "Harbour at dusk".to_string(),
            translated_suggestion: None,
            language: "en".to_string(),
            context: "Harbour photo".to_string(),
            fix: FixKind::SetAlt,
        });
        let link = registry.register(IssueDraft {
            category: Category::Link,
            element: anchor,
            reason: "Vague link text".to_string(),
            suggestion: "Read the harbour guide".to_string(),
            translated_suggestion: Some("Lee la guía".to_string()),
            language: "en".to_string(),
            context: String::new(),
            fix: FixKind::LinkLabel,
        });
        Report {
            audit_id: "1-1".to_string(),
            language: "en".to_string(),
            summary: String::new(),
            summary_alt: None,
            images: vec![image],
            links: vec![link],
            headings: Vec::new(),
            has_more: false,
            meta: ReportMeta::default(),
            activation: ActivationInfo::default(),
        }
    }

    #[test]
    fn test_export_flattens_with_status() {
        let dom = parse_html("<img src=a.png><a href=/g>Read more</a>");
        let mut registry = IssueRegistry::new();
        let report = report_with(&mut registry, &dom);
        registry.ignore(&report.links[0].id).unwrap();

        let exported = report.export(&registry, false);
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].current_text, "(empty)");
        assert_eq!(exported[0].element_tag.as_deref(), Some("img"));
        assert!(!exported[0].default_replace);
        assert_eq!(exported[1].current_text, "Read more");
        assert_eq!(exported[1].status, IssueStatus::Ignored);
        assert!(exported[1].default_replace);
        assert_eq!(exported[1].translated_suggestion, "Lee la guía");

        let value = serde_json::to_value(&exported[1]).unwrap();
        assert_eq!(value["categoryLabel"], "Links");
        assert_eq!(value["status"], "ignored");
    }

    #[test]
    fn test_markdown_layout() {
        let dom = parse_html("<img src=a.png><a href=/g>Read more</a>");
        let mut registry = IssueRegistry::new();
        let report = report_with(&mut registry, &dom);
        let markdown = to_markdown(&report.export(&registry, true), Some("example.com"));

        let expected = [
            "# Accessibility Findings",
            "",
            "- example.com",
            "",
            "## 1. Images - Image missing descriptive alt text",
            "- Suggestion: Harbour at dusk",
            "- Current: (empty)",
            "- Context: Harbour photo",
            "",
            "## 2. Links - Vague link text",
            "- Suggestion: Read the harbour guide",
            "- Current: Read more",
            "",
        ]
        .join("\n");
        assert_eq!(markdown, expected);
    }
}
