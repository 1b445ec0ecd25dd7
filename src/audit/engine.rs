//! 审计引擎
//!
//! 每个页面一个引擎实例。`run` 执行一次审计：换算预算、运行审计、按需等待用户激活并重试一次、
//! 丢弃过期结果、登记问题，最后按需自动应用安全修复。其余操作供传输层调用。
//!
//! 引擎只在单线程上运行（DOM 是 `Rc` 树），内部状态用 `Cell`/`RefCell` 保存，
//! 借用从不跨越 `.await`。

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use chrono::Utc;
use markup5ever_rcdom::Handle;
use serde::Serialize;
use tokio::time::Instant;

use super::counts::{Counts, LifetimeMetrics};
use super::issue::Category;
use super::pass::{run_pass, PassOutput};
use super::registry::{ApplyOptions, ApplyOrigin, IssueRegistry};
use super::report::{to_markdown, ExportedIssue, Report, ReportMeta};
use super::scanner::Budget;
use super::{AuditOptions, Scope};
use crate::config::{AuditConfig, Settings, SettingsStore};
use crate::error::{helpers::log_error, AuditError, AuditResult};
use crate::page::Page;
use crate::provider::{ActivationInfo, ModelStatus, SuggestionProvider};

/// 引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineState {
    Idle,
    Running,
    /// 等待用户激活后重试
    ActivationRetry,
    Done,
    Failed,
}

/// 一次审计请求
#[derive(Debug, Clone, Default)]
pub struct AuditRequest {
    pub scope: Scope,
    /// 显式预算；`None` 时由提示节点决定
    pub budget: Option<usize>,
    pub hints: Option<Vec<Handle>>,
    /// 调度器发起的后台审计
    pub silent: bool,
    pub auto_apply: bool,
}

impl AuditRequest {
    pub fn page() -> Self {
        Self::default()
    }

    pub fn selection() -> Self {
        Self {
            scope: Scope::Selection,
            ..Self::default()
        }
    }

    /// 调度器使用的后台审计
    pub fn automatic(hints: Option<Vec<Handle>>) -> Self {
        Self {
            hints,
            silent: true,
            auto_apply: true,
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// 传输层使用的状态快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub audit_id: Option<String>,
    pub language: Option<String>,
    pub summary: String,
    pub summary_alt: String,
    pub has_report: bool,
    pub has_more: bool,
    pub issues: Vec<ExportedIssue>,
    pub counts: Counts,
    pub meta: Option<ReportMeta>,
    pub activation: ActivationInfo,
    pub has_user_activation: bool,
    pub user_activation_active: bool,
    pub model_status: ModelStatus,
    pub state: EngineState,
    pub audit_in_progress: bool,
    pub panel_visible: bool,
    pub last_audit_at: Option<i64>,
    pub lifetime: LifetimeMetrics,
}

pub struct AuditEngine {
    page: Page,
    provider: Arc<SuggestionProvider>,
    settings: Box<dyn SettingsStore>,
    config: AuditConfig,
    registry: RefCell<IssueRegistry>,
    report: RefCell<Option<Report>>,
    state: Cell<EngineState>,
    running: Cell<usize>,
    latest_audit: RefCell<Option<String>>,
    sequence: Cell<u64>,
    last_audit_at: Cell<Option<Instant>>,
    last_audit_millis: Cell<Option<i64>>,
    lifetime: RefCell<LifetimeMetrics>,
}

impl AuditEngine {
    pub fn new(
        page: Page,
        provider: Arc<SuggestionProvider>,
        settings: Box<dyn SettingsStore>,
        config: AuditConfig,
    ) -> Self {
        Self {
            page,
            provider,
            settings,
            config,
            registry: RefCell::new(IssueRegistry::new()),
            report: RefCell::new(None),
            state: Cell::new(EngineState::Idle),
            running: Cell::new(0),
            latest_audit: RefCell::new(None),
            sequence: Cell::new(0),
            last_audit_at: Cell::new(None),
            last_audit_millis: Cell::new(None),
            lifetime: RefCell::new(LifetimeMetrics::default()),
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn provider(&self) -> &Arc<SuggestionProvider> {
        &self.provider
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn engine_state(&self) -> EngineState {
        self.state.get()
    }

    pub fn in_progress(&self) -> bool {
        self.running.get() > 0
    }

    pub fn last_audit_at(&self) -> Option<Instant> {
        self.last_audit_at.get()
    }

    pub fn lifetime_metrics(&self) -> LifetimeMetrics {
        *self.lifetime.borrow()
    }

    /// 读取设置；存储失败时使用默认值
    pub fn current_settings(&self) -> Settings {
        match self.settings.load() {
            Ok(settings) => settings,
            Err(error) => {
                log_error("读取设置失败，使用默认设置", &error);
                Settings::default()
            }
        }
    }

    pub fn save_settings(&self, settings: &Settings) -> AuditResult<()> {
        self.settings.save(settings)
    }

    pub fn report(&self) -> Option<Report> {
        self.report.borrow().clone()
    }

    fn next_audit_id(&self) -> String {
        let sequence = self.sequence.get() + 1;
        self.sequence.set(sequence);
        format!("{}-{}", Utc::now().timestamp_millis(), sequence)
    }

    fn is_latest(&self, audit_id: &str) -> bool {
        self.latest_audit.borrow().as_deref() == Some(audit_id)
    }

    /// 换算有效预算
    fn effective_budget(&self, request: &AuditRequest, hinted: bool, settings: &Settings) -> Budget {
        let power_saver = settings.power_saver_mode;
        match request.budget {
            Some(requested) => Budget::Limited(self.config.explicit_budget(requested, power_saver)),
            None if hinted => Budget::Limited(self.config.auto_budget(power_saver)),
            None => Budget::Unlimited,
        }
    }

    /// 执行一次审计
    pub async fn run(&self, request: AuditRequest) -> AuditResult<Report> {
        let settings = self.current_settings();
        if settings.extension_paused {
            return Err(AuditError::ExtensionPaused);
        }

        let audit_id = self.next_audit_id();
        *self.latest_audit.borrow_mut() = Some(audit_id.clone());
        self.running.set(self.running.get() + 1);
        self.state.set(EngineState::Running);
        tracing::info!("开始审计 {} (silent: {})", audit_id, request.silent);

        let result = self.run_audit(&audit_id, request, &settings).await;
        self.running.set(self.running.get().saturating_sub(1));

        match &result {
            Ok(report) => {
                self.state.set(EngineState::Done);
                tracing::info!(
                    "审计 {} 完成: {} 个问题",
                    report.audit_id,
                    report.issue_count()
                );
            }
            Err(AuditError::Superseded(_)) => {
                tracing::debug!("审计 {} 已被更新的审计取代", audit_id);
            }
            Err(error) => {
                self.state.set(EngineState::Failed);
                log_error("审计失败", error);
            }
        }
        result
    }

    async fn run_audit(
        &self,
        audit_id: &str,
        request: AuditRequest,
        settings: &Settings,
    ) -> AuditResult<Report> {
        let range = match request.scope {
            Scope::Selection => self.page.selection(),
            Scope::Page => None,
        };
        let scope = if range.is_some() {
            Scope::Selection
        } else {
            Scope::Page
        };
        let hinted = request.hints.as_ref().is_some_and(|hints| !hints.is_empty());
        let budget = self.effective_budget(&request, hinted, settings);
        let options = AuditOptions {
            scope,
            range,
            hint_nodes: request.hints.clone(),
            budget,
        };

        let monitor = self.provider.activation_monitor().clone();
        let mut retried = false;
        let pass = loop {
            self.provider.clear_activation();
            let pass = run_pass(&self.page, &self.provider, settings, &self.config, &options).await;
            if retried || !self.provider.activation_required() {
                break pass;
            }

            retried = true;
            self.state.set(EngineState::ActivationRetry);
            if monitor.has_activation() {
                tracing::debug!("已有用户激活，立即重试");
                continue;
            }

            self.provider.request_activation();
            tracing::info!("等待用户激活后重试审计");
            match monitor.wait_for_gesture(self.config.activation_timeout()).await {
                Ok(()) => continue,
                Err(error) if request.silent => return Err(error),
                Err(_) => {
                    tracing::warn!("等待用户激活超时，返回当前结果");
                    break pass;
                }
            }
        };

        if !self.is_latest(audit_id) {
            return Err(AuditError::Superseded(audit_id.to_string()));
        }

        Ok(self.commit(audit_id, &request, budget, pass, settings))
    }

    fn commit(
        &self,
        audit_id: &str,
        request: &AuditRequest,
        budget: Budget,
        pass: PassOutput,
        settings: &Settings,
    ) -> Report {
        let can_auto_apply = request.auto_apply && !self.provider.activation_required();

        let mut registry = self.registry.borrow_mut();
        registry.begin_generation(audit_id);

        let mut report = Report {
            audit_id: audit_id.to_string(),
            language: pass.language,
            summary: pass.summary,
            summary_alt: pass.summary_alt,
            images: Vec::new(),
            links: Vec::new(),
            headings: Vec::new(),
            has_more: pass.has_more,
            meta: ReportMeta {
                budget_requested: budget.limit(),
                budget_remaining: pass.budget_remaining.limit(),
                hint_count: pass.hint_count,
                auto_apply_attempted: request.auto_apply,
                auto_apply_executed: can_auto_apply,
            },
            activation: self.provider.activation_info(),
        };
        for draft in pass.drafts {
            let issue = registry.register(draft);
            match issue.category {
                Category::Image => report.images.push(issue),
                Category::Link => report.links.push(issue),
                Category::Heading => report.headings.push(issue),
            }
        }

        if can_auto_apply {
            let applied = registry.apply_all_safe(ApplyOrigin::Automatic);
            metrics::counter!("altspark_issues_applied_total").increment(applied as u64);
            tracing::info!("自动应用了 {} 个安全修复", applied);
        }

        let counts = registry.compute_counts();
        drop(registry);

        metrics::counter!("altspark_audits_total").increment(1);
        metrics::counter!("altspark_issues_found_total").increment(counts.total as u64);
        self.lifetime.borrow_mut().record(&counts);
        self.last_audit_at.set(Some(Instant::now()));
        self.last_audit_millis.set(Some(Utc::now().timestamp_millis()));
        tracing::debug!(
            "审计 {} 已提交: {:?}, 首选 aria-label: {}",
            audit_id,
            counts,
            settings.prefer_aria_label
        );

        *self.report.borrow_mut() = Some(report.clone());
        report
    }

    // ---- 传输层操作 ----

    pub fn apply_issue(&self, id: &str, options: ApplyOptions) -> AuditResult<()> {
        self.registry
            .borrow_mut()
            .apply(id, options, ApplyOrigin::Manual)?;
        metrics::counter!("altspark_issues_applied_total").increment(1);
        Ok(())
    }

    pub fn ignore_issue(&self, id: &str) -> AuditResult<()> {
        self.registry.borrow_mut().ignore(id)
    }

    pub fn revert_issue(&self, id: &str) -> AuditResult<()> {
        self.registry.borrow_mut().revert(id)
    }

    /// 手动应用全部安全修复，返回应用数量
    pub fn apply_all_safe(&self) -> usize {
        let applied = self
            .registry
            .borrow_mut()
            .apply_all_safe(ApplyOrigin::Manual);
        metrics::counter!("altspark_issues_applied_total").increment(applied as u64);
        applied
    }

    pub fn revert_all(&self) {
        self.registry.borrow_mut().revert_all();
    }

    pub fn counts(&self) -> Counts {
        self.registry.borrow().compute_counts()
    }

    /// 问题对应的节点，供界面高亮
    pub fn locate_issue(&self, id: &str) -> AuditResult<Handle> {
        let registry = self.registry.borrow();
        if registry.get(id).is_none() {
            return Err(AuditError::IssueNotFound(id.to_string()));
        }
        registry
            .locate(id)
            .ok_or_else(|| AuditError::MutationFailed(format!("问题 {} 的节点已不在文档中", id)))
    }

    pub fn exported_issues(&self) -> Vec<ExportedIssue> {
        let prefer_aria_label = self.current_settings().prefer_aria_label;
        let registry = self.registry.borrow();
        self.report
            .borrow()
            .as_ref()
            .map(|report| report.export(&registry, prefer_aria_label))
            .unwrap_or_default()
    }

    /// 导出 Markdown；未指定站点时使用页面主机名
    pub fn export_markdown(&self, site: Option<&str>) -> String {
        let host = self.page.host();
        to_markdown(&self.exported_issues(), site.or(host.as_deref()))
    }

    /// 完整状态快照（包括模型状态）
    pub async fn state(&self) -> EngineSnapshot {
        let model_status = self.provider.model_status(false).await;
        let monitor = self.provider.activation_monitor();
        let report = self.report();

        EngineSnapshot {
            audit_id: report.as_ref().map(|report| report.audit_id.clone()),
            language: report.as_ref().map(|report| report.language.clone()),
            summary: report
                .as_ref()
                .map(|report| report.summary.clone())
                .unwrap_or_default(),
            summary_alt: report
                .as_ref()
                .and_then(|report| report.summary_alt.clone())
                .unwrap_or_default(),
            has_report: report.is_some(),
            has_more: report.as_ref().is_some_and(|report| report.has_more),
            issues: self.exported_issues(),
            counts: self.counts(),
            meta: report.as_ref().map(|report| report.meta.clone()),
            activation: self.provider.activation_info(),
            has_user_activation: monitor.has_activation(),
            user_activation_active: monitor.is_active(),
            model_status,
            state: self.engine_state(),
            audit_in_progress: self.in_progress(),
            panel_visible: self.page.panel_visible(),
            last_audit_at: self.last_audit_millis.get(),
            lifetime: self.lifetime_metrics(),
        }
    }
}
