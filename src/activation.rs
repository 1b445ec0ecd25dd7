//! 用户激活监视器
//!
//! 宿主在每次指针或键盘交互时调用 [`ActivationMonitor::record_gesture`]。
//! 模型会话创建前需要检查是否存在激活；审计引擎在需要时等待下一次手势，等待有硬超时。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{AuditError, AuditResult};

#[derive(Debug, Default)]
pub struct ActivationMonitor {
    /// 瞬时激活，由宿主在手势过期后清除
    is_active: AtomicBool,
    /// 粘性激活：页面上曾经发生过手势
    has_been_active: AtomicBool,
    gestures: AtomicU64,
    notify: Notify,
}

impl ActivationMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已经有过交互的页面
    pub fn activated() -> Self {
        let monitor = Self::new();
        monitor.has_been_active.store(true, Ordering::SeqCst);
        monitor
    }

    /// 是否存在已缓冲的用户激活
    pub fn has_activation(&self) -> bool {
        self.is_active() || self.has_been_active.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    pub fn gesture_count(&self) -> u64 {
        self.gestures.load(Ordering::SeqCst)
    }

    /// 记录一次用户手势并唤醒所有等待者
    pub fn record_gesture(&self) {
        self.is_active.store(true, Ordering::SeqCst);
        self.has_been_active.store(true, Ordering::SeqCst);
        self.gestures.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("记录用户手势");
        self.notify.notify_waiters();
    }

    /// 瞬时激活过期
    pub fn expire_transient(&self) {
        self.is_active.store(false, Ordering::SeqCst);
    }

    /// 等待下一次手势；当前已处于瞬时激活时立即返回
    pub async fn wait_for_gesture(&self, timeout: Duration) -> AuditResult<()> {
        let notified = self.notify.notified();
        if self.is_active() {
            return Ok(());
        }
        tokio::time::timeout(timeout, notified)
            .await
            .map_err(|_| AuditError::AuditTimeout)
    }
}
