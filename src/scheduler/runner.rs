//! 自动审计调度器
//!
//! 单线程协作式调度：只有一个定时器。变更会重新防抖，但不会覆盖已经排队的整页审计。
//! 到期后评估是否可以运行后台审计，不满足条件时推迟。时间全部使用 `tokio::time::Instant`，
//! 测试中可以暂停并快进时钟。
//!
//! 启用和每次评估前都会按当前设置与站点偏好检查自动模式是否仍被允许。

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use super::hints::{HintSet, MutationRecord};
use crate::audit::{AuditEngine, AuditRequest, Scope};
use crate::config::{AutomationPolicy, MemorySitePreferences, SitePreference, SitePreferenceStore};

/// 调度原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReason {
    /// 启动后的整页审计
    Initial,
    Mutation,
    /// 增量审计还有剩余时的整页补扫
    FollowUp,
}

/// 推迟原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    PanelVisible,
    InProgress,
    NoActivation,
    Cooldown,
}

/// 一次评估的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Deferred { reason: DeferReason, delay: Duration },
    /// 变更评估时没有任何提示
    Skipped,
    Completed { has_more: bool },
    Failed { retry_in: Duration },
    /// 已停止，或自动模式不再被允许
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Observing,
}

/// 宿主发给调度器事件循环的事件
#[derive(Debug)]
pub enum SchedulerEvent {
    Mutations(Vec<MutationRecord>),
    Stop,
}

pub struct Scheduler {
    engine: Rc<AuditEngine>,
    scope: Scope,
    state: SchedulerState,
    timer: Option<(Instant, RunReason)>,
    hints: HintSet,
    failures: u32,
    sites: Arc<dyn SitePreferenceStore>,
    host: Option<String>,
    top_frame: bool,
}

impl Scheduler {
    pub fn new(engine: Rc<AuditEngine>) -> Self {
        let config = engine.config();
        let hints = HintSet::new(config.max_mutation_hints, config.max_hint_expansion);
        let host = engine.page().host();
        Self {
            engine,
            scope: Scope::Page,
            state: SchedulerState::Stopped,
            timer: None,
            hints,
            failures: 0,
            sites: Arc::new(MemorySitePreferences::new()),
            host,
            top_frame: true,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_site_preferences(mut self, sites: Arc<dyn SitePreferenceStore>) -> Self {
        self.sites = sites;
        self
    }

    /// 嵌入在子框架中的页面不启用自动模式
    pub fn with_top_frame(mut self, top_frame: bool) -> Self {
        self.top_frame = top_frame;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|(deadline, _)| deadline)
    }

    pub fn pending_reason(&self) -> Option<RunReason> {
        self.timer.map(|(_, reason)| reason)
    }

    pub fn hint_count(&self) -> usize {
        self.hints.len()
    }

    pub fn hints_overflowed(&self) -> bool {
        self.hints.overflowed()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// 当前页面的站点偏好；没有主机名的页面使用默认偏好
    fn site_preference(&self) -> SitePreference {
        self.host
            .as_deref()
            .map(|host| self.sites.get(host))
            .unwrap_or_default()
    }

    /// 开始观察，立即安排首次整页评估；自动模式不被允许时保持停止并返回 `false`
    pub fn start(&mut self) -> bool {
        let settings = self.engine.current_settings();
        if !AutomationPolicy::allows(&settings, &self.site_preference(), self.top_frame) {
            tracing::info!("当前页面不允许自动模式: {:?}", self.host);
            self.stop();
            return false;
        }

        tracing::info!("自动审计调度器启动");
        self.state = SchedulerState::Observing;
        self.hints.clear();
        self.failures = 0;
        self.timer = Some((Instant::now(), RunReason::Initial));
        true
    }

    /// 停止观察；可以重复调用
    pub fn stop(&mut self) {
        if self.state == SchedulerState::Observing {
            tracing::info!("自动审计调度器停止");
        }
        self.state = SchedulerState::Stopped;
        self.timer = None;
        self.hints.clear();
    }

    fn schedule(&mut self, delay: Duration, reason: RunReason) {
        self.timer = Some((Instant::now() + delay, reason));
    }

    /// 接收一批变更记录；只要有一条在监听范围内就重新防抖
    ///
    /// 已排队的整页审计（首次或补扫）会覆盖这些节点，保留其原因和期限。
    pub fn on_mutations(&mut self, records: &[MutationRecord]) -> bool {
        if self.state == SchedulerState::Stopped {
            return false;
        }
        let mut observed = false;
        for record in records {
            observed |= self.hints.add_record(record);
        }
        let full_scan_pending = matches!(
            self.timer,
            Some((_, RunReason::Initial | RunReason::FollowUp))
        );
        if observed && !full_scan_pending {
            let delay = self.engine.config().mutation_debounce();
            self.schedule(delay, RunReason::Mutation);
        }
        observed
    }

    /// 定时器到期时调用：取出定时器并评估
    pub async fn fire(&mut self) -> Option<Evaluation> {
        let (_, reason) = self.timer.take()?;
        Some(self.evaluate(reason).await)
    }

    pub async fn evaluate(&mut self, reason: RunReason) -> Evaluation {
        if self.state == SchedulerState::Stopped {
            return Evaluation::Stopped;
        }

        let engine = self.engine.clone();
        let config = engine.config();

        let settings = engine.current_settings();
        if !AutomationPolicy::allows_runs(&settings, &self.site_preference()) {
            tracing::info!("自动模式已被禁用，停止调度");
            self.stop();
            return Evaluation::Stopped;
        }

        if engine.page().panel_visible() {
            return self.defer(DeferReason::PanelVisible, config.panel_visible_delay(), reason);
        }
        if engine.in_progress() {
            return self.defer(DeferReason::InProgress, config.in_progress_delay(), reason);
        }
        let provider = engine.provider();
        if !provider.activation_monitor().has_activation() {
            provider.request_activation();
            return self.defer(DeferReason::NoActivation, config.no_activation_delay(), reason);
        }

        let interval = config.auto_audit_interval(settings.power_saver_mode);
        if let Some(last) = engine.last_audit_at() {
            let elapsed = last.elapsed();
            if elapsed < interval {
                let delay = (interval - elapsed).max(config.min_cooldown_delay());
                return self.defer(DeferReason::Cooldown, delay, reason);
            }
        }

        let snapshot = self.hints.take();
        if reason == RunReason::Mutation && snapshot.is_empty() {
            tracing::debug!("变更中没有相关节点，跳过审计");
            return Evaluation::Skipped;
        }

        // 首次审计和补扫总是整页
        let hints = (reason == RunReason::Mutation && !snapshot.overflow && !snapshot.nodes.is_empty())
            .then(|| snapshot.nodes.clone());
        let hinted = hints.is_some();
        let mut request = AuditRequest::automatic(hints);
        request.scope = self.scope;

        let result = engine.run(request).await;
        if self.state == SchedulerState::Stopped {
            return Evaluation::Stopped;
        }

        match result {
            Ok(report) => {
                self.failures = 0;
                if hinted && report.has_more {
                    self.schedule(config.has_more_delay(), RunReason::FollowUp);
                }
                Evaluation::Completed {
                    has_more: report.has_more,
                }
            }
            Err(error) => {
                self.failures += 1;
                let retry_in = config.error_backoff(self.failures);
                tracing::warn!(
                    "自动审计失败（连续 {} 次），{:?} 后重试: {}",
                    self.failures,
                    retry_in,
                    error
                );
                self.hints.restore(snapshot);
                self.schedule(retry_in, reason);
                Evaluation::Failed { retry_in }
            }
        }
    }

    fn defer(&mut self, defer: DeferReason, delay: Duration, reason: RunReason) -> Evaluation {
        tracing::debug!("推迟自动审计 {:?}: {:?}", defer, delay);
        self.schedule(delay, reason);
        Evaluation::Deferred {
            reason: defer,
            delay,
        }
    }

    /// 事件循环：处理变更事件和定时器，收到 `Stop` 或通道关闭时退出
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SchedulerEvent>) {
        if self.state == SchedulerState::Stopped && !self.start() {
            return;
        }

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(SchedulerEvent::Mutations(records)) => {
                        self.on_mutations(&records);
                    }
                    Some(SchedulerEvent::Stop) | None => {
                        self.stop();
                        break;
                    }
                },
                _ = wait_until(deadline) => {
                    self.fire().await;
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => futures::future::pending::<()>().await,
    }
}
