//! 单次审计
//!
//! 检测语言、生成页面摘要，然后依次审计图片、链接和标题，预算在类别之间传递。
//! 这里只产出草稿，登记和应用由引擎完成。

use markup5ever_rcdom::Handle;

use super::classifier::{classify_heading, classify_image, classify_link};
use super::context::{sample_document_text, summary_context};
use super::issue::{Category, IssueDraft};
use super::pipeline::SuggestionPipeline;
use super::scanner::{normalize_hints, scan, Budget};
use super::{AuditOptions, Scope};
use crate::config::{AuditConfig, Settings};
use crate::html::dom::document_language;
use crate::html::text::truncate_chars;
use crate::page::Page;
use crate::provider::{SuggestionProvider, SummaryKind};

/// 一次审计的产出
#[derive(Debug)]
pub struct PassOutput {
    pub language: String,
    pub summary: String,
    pub summary_alt: Option<String>,
    pub drafts: Vec<IssueDraft>,
    pub has_more: bool,
    pub budget_remaining: Budget,
    pub hint_count: usize,
}

fn category_enabled(settings: &Settings, category: Category) -> bool {
    match category {
        Category::Image => settings.audit_images,
        Category::Link => settings.audit_links,
        Category::Heading => settings.audit_headings,
    }
}

pub async fn run_pass(
    page: &Page,
    provider: &SuggestionProvider,
    settings: &Settings,
    config: &AuditConfig,
    options: &AuditOptions,
) -> PassOutput {
    let document = page.document();
    let range = match options.scope {
        Scope::Selection => options
            .range
            .as_ref()
            .and_then(|range| range.resolve(document)),
        Scope::Page => None,
    };
    let selection_text = range
        .as_ref()
        .map(|range| range.text().to_string())
        .filter(|text| !text.trim().is_empty());

    let scope_text = match &selection_text {
        Some(text) => truncate_chars(text, config.scope_sample_chars),
        None => sample_document_text(document, config.scope_sample_chars),
    };

    let detection = provider.detect_language(&scope_text).await;
    let language = if detection.is_confident() {
        detection.language
    } else {
        document_language(document).unwrap_or(detection.language)
    };
    tracing::debug!("页面语言: {}", language);

    let summary_input = summary_context(
        document,
        selection_text.as_deref(),
        config.selection_summary_chars,
        config.summary_sample_chars,
    );
    let summary = provider
        .summarize(&summary_input, SummaryKind::KeyPoints, Some(&language))
        .await;

    let hints = normalize_hints(options.hint_nodes.as_deref().unwrap_or_default());
    let pipeline = SuggestionPipeline::new(provider, document, page.url(), settings, language);

    let mut drafts = Vec::new();
    let mut remaining = options.budget;
    let mut has_more = false;

    for category in Category::ALL {
        if !category_enabled(settings, category) {
            continue;
        }
        let outcome = scan(document, category, range.as_ref(), &hints, remaining);
        remaining = remaining.consume(outcome.used);
        has_more |= outcome.has_more;

        for node in &outcome.candidates {
            if let Some(draft) = audit_node(&pipeline, document, category, node).await {
                drafts.push(draft);
            }
        }
    }

    let summary_alt = pipeline.maybe_translate(&summary).await;
    tracing::info!(
        "审计完成: {} 个问题, 还有剩余: {}, 提示节点: {}",
        drafts.len(),
        has_more,
        hints.len()
    );

    PassOutput {
        language: pipeline.language().to_string(),
        summary,
        summary_alt,
        drafts,
        has_more,
        budget_remaining: remaining,
        hint_count: hints.len(),
    }
}

async fn audit_node(
    pipeline: &SuggestionPipeline<'_>,
    document: &Handle,
    category: Category,
    node: &Handle,
) -> Option<IssueDraft> {
    match category {
        Category::Image => {
            let finding = classify_image(node)?;
            Some(pipeline.image_issue(node, finding).await)
        }
        Category::Link => {
            let finding = classify_link(document, node)?;
            Some(pipeline.link_issue(node, finding).await)
        }
        Category::Heading => {
            let finding = classify_heading(node)?;
            Some(pipeline.heading_issue(node, finding).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::dom::{find_elements, first_element, is_element_named};
    use crate::html::SelectionRange;

    const PAGE: &str = "<html lang=de><head><title>Harbour</title></head><body>\
        <img src=a.png><img src=b.png alt='Sailing boats'>\
        <p><a href=/one>Read more</a> <a href=/two>Harbour map</a></p>\
        <section id=s><h2>NEWS</h2><img src=c.png width=1 height=1></section>\
        </body></html>";

    fn options(budget: Budget) -> AuditOptions {
        AuditOptions {
            scope: Scope::Page,
            range: None,
            hint_nodes: None,
            budget,
        }
    }

    #[tokio::test]
    async fn test_full_page_pass() {
        let page = Page::from_html(PAGE, None);
        let config = AuditConfig::default();
        let provider = SuggestionProvider::heuristic(&config);
        let settings = Settings::default();

        let output = run_pass(&page, &provider, &settings, &config, &options(Budget::Unlimited)).await;
        // 没有检测能力时使用 <html lang>
        assert_eq!(output.language, "de");
        let categories: Vec<Category> = output.drafts.iter().map(|draft| draft.category).collect();
        assert_eq!(
            categories,
            vec![Category::Image, Category::Image, Category::Link, Category::Heading]
        );
        assert!(!output.has_more);
        assert_eq!(output.budget_remaining, Budget::Unlimited);
        assert!(output.summary.starts_with("Harbour"));
    }

    #[tokio::test]
    async fn test_budget_threads_through_categories() {
        let page = Page::from_html(PAGE, None);
        let config = AuditConfig::default();
        let provider = SuggestionProvider::heuristic(&config);
        let settings = Settings::default();

        let output = run_pass(&page, &provider, &settings, &config, &options(Budget::Limited(4))).await;
        // 三张图片占用 3，剩下 1 只够检查第一个链接
        assert!(output.has_more);
        assert_eq!(output.budget_remaining, Budget::Limited(0));
        assert_eq!(
            output.drafts.iter().filter(|d| d.category == Category::Link).count(),
            1
        );
        assert!(output.drafts.iter().all(|d| d.category != Category::Heading));
    }

    #[tokio::test]
    async fn test_disabled_categories_and_selection_scope() {
        let page = Page::from_html(PAGE, None);
        let config = AuditConfig::default();
        let provider = SuggestionProvider::heuristic(&config);
        let settings = Settings {
            audit_links: false,
            ..Settings::default()
        };
        let section = first_element(page.document(), &["section"]).unwrap();
        let opts = AuditOptions {
            scope: Scope::Selection,
            range: Some(SelectionRange::around(&section)),
            hint_nodes: None,
            budget: Budget::Limited(10),
        };

        let output = run_pass(&page, &provider, &settings, &config, &opts).await;
        let categories: Vec<Category> = output.drafts.iter().map(|draft| draft.category).collect();
        assert_eq!(categories, vec![Category::Image, Category::Heading]);
        // 选区外的节点不占预算
        assert_eq!(output.budget_remaining, Budget::Limited(8));
        assert!(output.summary.contains("NEWS"));
    }

    #[tokio::test]
    async fn test_hints_restrict_candidates() {
        let page = Page::from_html(PAGE, None);
        let config = AuditConfig::default();
        let provider = SuggestionProvider::heuristic(&config);
        let settings = Settings::default();
        let images = find_elements(page.document(), &|node| is_element_named(node, &["img"]));
        let opts = AuditOptions {
            scope: Scope::Page,
            range: None,
            hint_nodes: Some(vec![images[0].clone(), images[0].clone()]),
            budget: Budget::Limited(80),
        };

        let output = run_pass(&page, &provider, &settings, &config, &opts).await;
        assert_eq!(output.hint_count, 1);
        assert_eq!(output.drafts.len(), 1);
        assert_eq!(output.budget_remaining, Budget::Limited(79));
    }
}
