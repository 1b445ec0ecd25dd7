// 集成测试公共模块
//
// 提供可编排的能力后端和构建审计引擎的辅助函数

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use altspark::config::{AuditConfig, MemorySettingsStore, Settings};
use altspark::provider::{
    Availability, CapabilityBackend, CapabilitySet, Invocation, Session, SessionOptions,
    SessionOutput,
};
use altspark::{ActivationMonitor, AuditEngine, Page, ProviderError, SuggestionProvider};

type Handler = dyn Fn(&Invocation) -> Result<SessionOutput, ProviderError> + Send + Sync;

/// 按脚本应答的能力后端，记录每一次调用
pub struct ScriptedBackend {
    availability: Availability,
    handler: Arc<Handler>,
    created: AtomicUsize,
    calls: Arc<Mutex<Vec<Invocation>>>,
}

impl ScriptedBackend {
    pub fn new<F>(availability: Availability, handler: F) -> Arc<Self>
    where
        F: Fn(&Invocation) -> Result<SessionOutput, ProviderError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            availability,
            handler: Arc::new(handler),
            created: AtomicUsize::new(0),
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// 总是返回同一段文本
    pub fn text(availability: Availability, text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new(availability, move |_| Ok(SessionOutput::Text(text.clone())))
    }

    /// 总是失败
    pub fn failing(availability: Availability, error: ProviderError) -> Arc<Self> {
        Self::new(availability, move |_| Err(error.clone()))
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

struct ScriptedSession {
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<Invocation>>>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn invoke(&self, invocation: &Invocation) -> Result<SessionOutput, ProviderError> {
        self.calls.lock().unwrap().push(invocation.clone());
        (self.handler)(invocation)
    }

    async fn release(&self) {}
}

#[async_trait]
impl CapabilityBackend for ScriptedBackend {
    async fn availability(&self, _options: &SessionOptions) -> Availability {
        self.availability
    }

    async fn create(
        &self,
        _options: &SessionOptions,
        progress: altspark::provider::ProgressSink,
    ) -> Result<Arc<dyn Session>, ProviderError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        progress.report(1, 1);
        Ok(Arc::new(ScriptedSession {
            handler: self.handler.clone(),
            calls: self.calls.clone(),
        }))
    }
}

/// 构建审计引擎
pub struct EngineBuilder {
    html: String,
    capabilities: CapabilitySet,
    monitor: Arc<ActivationMonitor>,
    settings: Settings,
    config: AuditConfig,
    url: Option<url::Url>,
}

impl EngineBuilder {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            capabilities: CapabilitySet::new(),
            monitor: Arc::new(ActivationMonitor::activated()),
            settings: Settings::default(),
            config: AuditConfig::default(),
            url: None,
        }
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = url::Url::parse(url).ok();
        self
    }

    pub fn capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn monitor(mut self, monitor: Arc<ActivationMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn config(mut self, config: AuditConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> AuditEngine {
        let provider = SuggestionProvider::new(self.capabilities, self.monitor, &self.config);
        AuditEngine::new(
            Page::from_html(&self.html, self.url),
            Arc::new(provider),
            Box::new(MemorySettingsStore::new(self.settings)),
            self.config,
        )
    }
}

/// 包装成完整文档
pub fn page_html(lang: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"{}\"><head><title>Test page</title></head><body>{}</body></html>",
        lang, body
    )
}
