//! 建议生成流水线
//!
//! 为分类器标记出的元素生成替换文本和可选译文。流水线本身从不失败：
//! 提供者的每一种失败都已经在 [`SuggestionProvider`] 里降级为回退文本，
//! 这里再用元素自身的内容兜底，保证每个问题都有一条可用的建议。

use markup5ever_rcdom::Handle;
use url::Url;

use super::classifier::{trimmed_alt, HeadingFinding, ImageFinding, LinkFinding};
use super::context::{heading_context, image_context, link_context, ImageContext};
use super::issue::{Category, FixKind, IssueDraft};
use crate::config::constants::{
    HEADING_FALLBACK_CHARS, HEADING_SUGGESTION_CHARS, LINK_SUGGESTION_CHARS, TARGET_ALT_LENGTH,
};
use crate::config::Settings;
use crate::html::dom::get_node_attr;
use crate::html::text::{
    char_len, clamp_alt, clamp_with_ellipsis, normalize_text, primary_subtag, same_text,
    truncate_chars,
};
use crate::provider::{SuggestionProvider, SummaryKind};

const ALT_INSTRUCTION: &str =
    "Provide a concise alt text under 125 characters without saying \"Image of\". Focus on purpose.";
const KEY_SUBJECT_INSTRUCTION: &str =
    "Describe the key subject of the image in under 125 characters without using file names.";
const VERBOSE_ALT_INSTRUCTION: &str =
    "Rewrite this alt text so it stays under 125 characters while keeping the main subject clear.";
const VERBOSE_RETRY_INSTRUCTION: &str =
    "Summarize the key subject of this image in under 125 characters without repeating unnecessary detail.";
const LINK_INSTRUCTION: &str =
    "Write a short aria-label that clearly states where the link goes or what action it performs.";
const HEADING_INSTRUCTION: &str =
    "Draft a heading under 60 characters that reflects the key message or topic in a friendly title case.";

const DESCRIBE_SEED: &str = "Describe this image concisely.";
const DECORATIVE_SUGGESTION: &str = "Mark image as decorative";
const DEFAULT_IMAGE_ALT: &str = "Descriptive image";
const CONTEXT_UNAVAILABLE: &str = "Context unavailable.";

/// 一次审计内共享的建议生成器
pub struct SuggestionPipeline<'a> {
    provider: &'a SuggestionProvider,
    document: &'a Handle,
    base_url: Option<&'a Url>,
    settings: &'a Settings,
    language: String,
}

impl<'a> SuggestionPipeline<'a> {
    pub fn new(
        provider: &'a SuggestionProvider,
        document: &'a Handle,
        base_url: Option<&'a Url>,
        settings: &'a Settings,
        language: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            document,
            base_url,
            settings,
            language: language.into(),
        }
    }

    /// 建议所针对的页面语言
    pub fn language(&self) -> &str {
        &self.language
    }

    pub async fn image_issue(&self, img: &Handle, finding: ImageFinding) -> IssueDraft {
        if finding == ImageFinding::Decorative {
            tracing::debug!("装饰性图片，建议标记为装饰");
            return self.draft(
                Category::Image,
                img,
                finding.reason(),
                DECORATIVE_SUGGESTION.to_string(),
                None,
                String::new(),
                FixKind::MarkDecorative,
            );
        }

        let alt = trimmed_alt(img);
        let context = image_context(self.document, img);

        let mut suggestion = String::new();
        if finding.needs_description() {
            suggestion = self.describe_image(img, &context, &alt).await;
        }
        if suggestion.is_empty() && finding == ImageFinding::VerboseAlt {
            suggestion = self.shorten_alt(&alt, &context).await;
        }
        if suggestion.is_empty() {
            suggestion = clamp_alt(first_non_empty(&[&alt, context.display()], DEFAULT_IMAGE_ALT));
        }

        let translated = self.maybe_translate(&suggestion).await;
        let display = first_non_empty(&[context.display(), &alt], CONTEXT_UNAVAILABLE).to_string();
        self.draft(
            Category::Image,
            img,
            finding.reason(),
            suggestion,
            translated,
            display,
            FixKind::SetAlt,
        )
    }

    async fn describe_image(&self, img: &Handle, context: &ImageContext, alt: &str) -> String {
        let src = get_node_attr(img, "src").unwrap_or_default();
        if let Some(description) = self
            .provider
            .describe_image(&src, self.base_url, Some(&self.language))
            .await
        {
            let description = clamp_alt(&description);
            if !description.is_empty() {
                return description;
            }
        }

        let cleaned = context.cleaned.as_str();
        let summary = if cleaned.is_empty() {
            String::new()
        } else {
            self.provider
                .summarize(cleaned, SummaryKind::Tldr, Some(&self.language))
                .await
        };
        let seed = first_non_empty(&[summary.trim(), cleaned, alt], DESCRIBE_SEED).to_string();

        let suggestion = clamp_alt(
            &self
                .provider
                .rewrite(&seed, Some(ALT_INSTRUCTION), Some(&self.language))
                .await,
        );
        if !suggestion.is_empty() && !cleaned.is_empty() && same_text(&suggestion, cleaned) {
            let retry = clamp_alt(
                &self
                    .provider
                    .rewrite(cleaned, Some(KEY_SUBJECT_INSTRUCTION), Some(&self.language))
                    .await,
            );
            if !retry.is_empty() {
                return retry;
            }
        }
        suggestion
    }

    async fn shorten_alt(&self, alt: &str, context: &ImageContext) -> String {
        let mut suggestion = clamp_alt(
            &self
                .provider
                .rewrite(alt, Some(VERBOSE_ALT_INSTRUCTION), Some(&self.language))
                .await,
        );
        if !suggestion.is_empty() && same_text(&suggestion, alt) {
            let source = first_non_empty(&[&context.cleaned], alt);
            let retry = clamp_alt(
                &self
                    .provider
                    .rewrite(source, Some(VERBOSE_RETRY_INSTRUCTION), Some(&self.language))
                    .await,
            );
            if !retry.is_empty() {
                suggestion = retry;
            }
        }
        // 模型没能缩短时直接截断
        if char_len(&suggestion) > TARGET_ALT_LENGTH && same_text(&suggestion, alt) {
            suggestion = clamp_with_ellipsis(alt, TARGET_ALT_LENGTH);
        }
        suggestion
    }

    pub async fn link_issue(&self, anchor: &Handle, finding: LinkFinding) -> IssueDraft {
        let context = link_context(anchor);
        let source = first_non_empty(&[&context], &finding.label);
        let rewritten = self
            .provider
            .rewrite(source, Some(LINK_INSTRUCTION), Some(&self.language))
            .await;
        let rewritten = if rewritten.trim().is_empty() {
            format!("{} destination", finding.label)
        } else {
            rewritten
        };
        let suggestion = truncate_chars(&normalize_text(&rewritten), LINK_SUGGESTION_CHARS);

        let translated = self.maybe_translate(&suggestion).await;
        self.draft(
            Category::Link,
            anchor,
            finding.reason(),
            suggestion,
            translated,
            context,
            FixKind::LinkLabel,
        )
    }

    pub async fn heading_issue(&self, heading: &Handle, finding: HeadingFinding) -> IssueDraft {
        let context = heading_context(heading, &finding.text);
        let rewritten = self
            .provider
            .rewrite(&context, Some(HEADING_INSTRUCTION), Some(&self.language))
            .await;
        let rewritten = if rewritten.trim().is_empty() {
            truncate_chars(&finding.text, HEADING_FALLBACK_CHARS)
        } else {
            rewritten
        };
        let suggestion = truncate_chars(&normalize_text(&rewritten), HEADING_SUGGESTION_CHARS);

        let translated = self.maybe_translate(&suggestion).await;
        self.draft(
            Category::Heading,
            heading,
            finding.reason.message(),
            suggestion,
            translated,
            context,
            FixKind::HeadingText,
        )
    }

    /// 首选语言与页面语言的主子标签不同时翻译；译文与原文相同则丢弃
    pub async fn maybe_translate(&self, text: &str) -> Option<String> {
        if !self.settings.offer_translations || text.trim().is_empty() {
            return None;
        }
        let preferred = self
            .settings
            .resolve_user_language(self.provider.default_locale());
        if preferred.trim().is_empty()
            || self.language.trim().is_empty()
            || primary_subtag(&preferred) == primary_subtag(&self.language)
        {
            return None;
        }

        let translated = self
            .provider
            .translate(text, &preferred, Some(&self.language))
            .await;
        let translated = translated.trim();
        if translated.is_empty() || same_text(translated, text) {
            tracing::debug!("译文与原文相同，丢弃");
            return None;
        }
        Some(translated.to_string())
    }

    #[allow(clippy::too_many_arguments)]
    fn draft(
        &self,
        category: Category,
        element: &Handle,
        reason: &str,
        suggestion: String,
        translated_suggestion: Option<String>,
        context: String,
        fix: FixKind,
    ) -> IssueDraft {
        IssueDraft {
            category,
            element: element.clone(),
            reason: reason.to_string(),
            suggestion,
            translated_suggestion,
            language: self.language.clone(),
            context,
            fix,
        }
    }
}

fn first_non_empty<'s>(candidates: &[&'s str], fallback: &'s str) -> &'s str {
    candidates
        .iter()
        .map(|candidate| candidate.trim())
        .find(|candidate| !candidate.is_empty())
        .unwrap_or(fallback)
}
