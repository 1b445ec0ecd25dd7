//! 用户激活与自动审计调度集成测试

mod common;

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use altspark::audit::{AuditRequest, EngineState};
use altspark::config::{MemorySitePreferences, Settings, SitePreference, SitePreferenceStore};
use altspark::html::dom::{append_child, create_element, document_body, first_element, get_node_attr};
use altspark::provider::{Availability, Capability, CapabilitySet};
use altspark::scheduler::{Evaluation, MutationRecord, RunReason, Scheduler, SchedulerState};
use altspark::{ActivationMonitor, AuditEngine, AuditError};
use markup5ever_rcdom::Handle;

use common::{page_html, EngineBuilder, ScriptedBackend};

const LINK_PAGE: &str = "<p>Opening hours for the library <a href=/hours>More</a></p>";

#[tokio::test(start_paused = true)]
async fn test_interactive_audit_retries_after_gesture() {
    let writer = ScriptedBackend::text(Availability::Downloadable, "See library opening hours");
    let monitor = Arc::new(ActivationMonitor::new());
    let engine = EngineBuilder::new(&page_html("en", LINK_PAGE))
        .capabilities(CapabilitySet::new().with(Capability::Writer, writer.clone()))
        .monitor(monitor.clone())
        .build();

    let gesture = async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        monitor.record_gesture();
    };
    let (report, ()) = tokio::join!(engine.run(AuditRequest::page()), gesture);
    let report = report.unwrap();

    assert_eq!(report.links.len(), 1);
    assert_eq!(report.links[0].suggestion, "See library opening hours");
    assert!(!report.activation.required);
    assert_eq!(writer.created(), 1);
    assert_eq!(engine.engine_state(), EngineState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_interactive_timeout_returns_fallback_report() {
    let writer = ScriptedBackend::text(Availability::Downloadable, "unused");
    let engine = EngineBuilder::new(&page_html("en", LINK_PAGE))
        .capabilities(CapabilitySet::new().with(Capability::Writer, writer.clone()))
        .monitor(Arc::new(ActivationMonitor::new()))
        .build();

    let report = engine.run(AuditRequest::page()).await.unwrap();
    assert_eq!(report.links.len(), 1);
    assert!(report.activation.required);
    assert_eq!(writer.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_audit_times_out_without_gesture() {
    let writer = ScriptedBackend::text(Availability::Downloadable, "unused");
    let engine = EngineBuilder::new(&page_html("en", LINK_PAGE))
        .capabilities(CapabilitySet::new().with(Capability::Writer, writer))
        .monitor(Arc::new(ActivationMonitor::new()))
        .build();

    let started = tokio::time::Instant::now();
    let result = engine.run(AuditRequest::automatic(None)).await;
    assert!(matches!(result, Err(AuditError::AuditTimeout)));
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert_eq!(engine.engine_state(), EngineState::Failed);
    assert!(engine.report().is_none());
    assert!(engine.provider().activation_required());
}

fn ready_writer_blocked_summarizer() -> (Arc<ScriptedBackend>, Arc<ScriptedBackend>, CapabilitySet) {
    let writer = ScriptedBackend::text(Availability::Ready, "See library opening hours");
    let summarizer = ScriptedBackend::text(Availability::Downloadable, "Library hours");
    let capabilities = CapabilitySet::new()
        .with(Capability::Summarizer, summarizer.clone())
        .with(Capability::Writer, writer.clone());
    (writer, summarizer, capabilities)
}

#[tokio::test(start_paused = true)]
async fn test_blocked_summarizer_is_not_masked_by_later_writer_session() {
    let (writer, summarizer, capabilities) = ready_writer_blocked_summarizer();
    let engine = EngineBuilder::new(&page_html("en", LINK_PAGE))
        .capabilities(capabilities)
        .monitor(Arc::new(ActivationMonitor::new()))
        .build();

    let started = tokio::time::Instant::now();
    let result = engine.run(AuditRequest::automatic(None)).await;
    assert!(matches!(result, Err(AuditError::AuditTimeout)));
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert!(engine.provider().activation_required());
    assert_eq!(summarizer.created(), 0);
    assert_eq!(writer.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_summarizer_prevents_auto_apply() {
    let (_writer, summarizer, capabilities) = ready_writer_blocked_summarizer();
    let body = format!("{}<img src=icon.png width=8 height=8>", LINK_PAGE);
    let engine = EngineBuilder::new(&page_html("en", &body))
        .capabilities(capabilities)
        .monitor(Arc::new(ActivationMonitor::new()))
        .build();

    let request = AuditRequest {
        auto_apply: true,
        ..AuditRequest::page()
    };
    let report = engine.run(request).await.unwrap();
    assert!(report.activation.required);
    assert!(report.meta.auto_apply_attempted);
    assert!(!report.meta.auto_apply_executed);
    assert_eq!(report.links[0].suggestion, "See library opening hours");
    assert_eq!(summarizer.created(), 0);

    assert_eq!(report.images.len(), 1);
    let icon = first_element(engine.page().document(), &["img"]).unwrap();
    assert!(get_node_attr(&icon, "aria-hidden").is_none());
}

fn auto_settings() -> Settings {
    Settings {
        auto_mode_enabled: true,
        ..Settings::default()
    }
}

fn add_image(engine: &AuditEngine, src: &str) -> (Handle, MutationRecord) {
    let body = document_body(engine.page().document());
    let added = create_element("img", &[("src", src)]);
    append_child(&body, &added);
    let record = MutationRecord::ChildList {
        target: body,
        added: vec![added.clone()],
    };
    (added, record)
}

#[tokio::test(start_paused = true)]
async fn test_early_mutation_does_not_narrow_initial_audit() {
    let engine = Rc::new(
        EngineBuilder::new(&page_html("en", "<main><img src=hero.png width=8 height=8></main>"))
            .settings(auto_settings())
            .build(),
    );
    let mut scheduler = Scheduler::new(engine.clone());
    assert!(scheduler.start());

    let (added, record) = add_image(&engine, "late.png");
    assert!(scheduler.on_mutations(&[record]));
    assert_eq!(scheduler.pending_reason(), Some(RunReason::Initial));

    tokio::time::advance(Duration::from_millis(1200)).await;
    assert_eq!(
        scheduler.fire().await,
        Some(Evaluation::Completed { has_more: false })
    );

    let report = engine.report().unwrap();
    assert_eq!(report.images.len(), 2);
    assert_eq!(report.meta.hint_count, 0);
    let hero = first_element(engine.page().document(), &["img"]).unwrap();
    assert_eq!(get_node_attr(&hero, "aria-hidden").as_deref(), Some("true"));
    assert!(get_node_attr(&added, "alt").is_some());
    assert!(scheduler.next_deadline().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_backs_off_and_keeps_hints() {
    let engine = Rc::new(
        EngineBuilder::new(&page_html("en", "<main><img src=hero.png></main>"))
            .settings(auto_settings())
            .build(),
    );
    let mut scheduler = Scheduler::new(engine.clone());
    assert!(scheduler.start());
    assert_eq!(
        scheduler.fire().await,
        Some(Evaluation::Completed { has_more: false })
    );
    let hero = first_element(engine.page().document(), &["img"]).unwrap();
    assert!(get_node_attr(&hero, "alt").is_some());

    // 冷却结束后暂停扩展，引擎拒绝审计
    tokio::time::advance(Duration::from_secs(61)).await;
    engine
        .save_settings(&Settings {
            extension_paused: true,
            ..auto_settings()
        })
        .unwrap();
    let (added, record) = add_image(&engine, "late.png");
    assert!(scheduler.on_mutations(&[record]));
    assert_eq!(scheduler.pending_reason(), Some(RunReason::Mutation));

    tokio::time::advance(Duration::from_millis(1200)).await;
    assert_eq!(
        scheduler.fire().await,
        Some(Evaluation::Failed {
            retry_in: Duration::from_secs(5)
        })
    );
    assert_eq!(scheduler.hint_count(), 1);

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(
        scheduler.fire().await,
        Some(Evaluation::Failed {
            retry_in: Duration::from_secs(10)
        })
    );
    assert_eq!(scheduler.consecutive_failures(), 2);
    assert_eq!(scheduler.hint_count(), 1);
    assert_eq!(scheduler.pending_reason(), Some(RunReason::Mutation));

    // 恢复后只审计提示节点，失败计数清零
    engine.save_settings(&auto_settings()).unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(
        scheduler.fire().await,
        Some(Evaluation::Completed { has_more: false })
    );
    assert_eq!(scheduler.consecutive_failures(), 0);
    assert_eq!(scheduler.hint_count(), 0);

    let report = engine.report().unwrap();
    assert_eq!(report.images.len(), 1);
    assert_eq!(report.meta.hint_count, 1);
    assert!(report.meta.auto_apply_executed);
    assert!(get_node_attr(&added, "alt").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_honours_site_preferences() {
    let html = page_html("en", "<img src=hero.png width=8 height=8>");
    let engine = Rc::new(
        EngineBuilder::new(&html)
            .url("https://shop.example.org/cart")
            .settings(auto_settings())
            .build(),
    );
    let sites = Arc::new(MemorySitePreferences::new());
    sites
        .set(
            "SHOP.example.org",
            SitePreference {
                never_auto: true,
                ..Default::default()
            },
        )
        .unwrap();

    let mut scheduler = Scheduler::new(engine.clone()).with_site_preferences(sites.clone());
    assert!(!scheduler.start());
    assert!(engine.report().is_none());

    sites.set("shop.example.org", SitePreference::default()).unwrap();
    assert!(scheduler.start());
    assert_eq!(
        scheduler.fire().await,
        Some(Evaluation::Completed { has_more: false })
    );
    let hero = first_element(engine.page().document(), &["img"]).unwrap();
    assert_eq!(get_node_attr(&hero, "aria-hidden").as_deref(), Some("true"));

    // 运行中关闭自动模式，下一次评估即停止
    engine.save_settings(&Settings::default()).unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    let (_, record) = add_image(&engine, "late.png");
    assert!(scheduler.on_mutations(&[record]));
    tokio::time::advance(Duration::from_millis(1200)).await;
    assert_eq!(scheduler.fire().await, Some(Evaluation::Stopped));
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(engine.report().unwrap().images.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attribute_mutations_outside_observed_set_are_ignored() {
    let engine = Rc::new(
        EngineBuilder::new(&page_html("en", "<img src=a.png alt=Logo>"))
            .settings(auto_settings())
            .build(),
    );
    let mut scheduler = Scheduler::new(engine.clone());
    assert!(scheduler.start());
    assert_eq!(
        scheduler.fire().await,
        Some(Evaluation::Completed { has_more: false })
    );
    let img = first_element(engine.page().document(), &["img"]).unwrap();

    assert!(!scheduler.on_mutations(&[MutationRecord::Attributes {
        target: img.clone(),
        attribute: "class".to_string(),
    }]));
    assert_eq!(scheduler.pending_reason(), None);

    assert!(scheduler.on_mutations(&[MutationRecord::Attributes {
        target: img,
        attribute: "ALT".to_string(),
    }]));
    assert_eq!(scheduler.pending_reason(), Some(RunReason::Mutation));
    assert_eq!(scheduler.hint_count(), 1);
}
