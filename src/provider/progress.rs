//! 模型下载进度与激活状态广播

use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use super::capability::Capability;

const CHANNEL_CAPACITY: usize = 64;

/// 一次下载进度事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub capability: Capability,
    pub session_key: String,
    pub loaded: u64,
    pub total: u64,
}

impl DownloadProgress {
    /// 0.0..=1.0；总量未知时为 `None`
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some((self.loaded as f64 / self.total as f64).clamp(0.0, 1.0))
    }
}

/// 交给后端的进度上报句柄
#[derive(Debug, Clone)]
pub struct ProgressSink {
    capability: Capability,
    session_key: String,
    sender: broadcast::Sender<DownloadProgress>,
}

impl ProgressSink {
    pub(crate) fn new(
        capability: Capability,
        session_key: String,
        sender: broadcast::Sender<DownloadProgress>,
    ) -> Self {
        Self {
            capability,
            session_key,
            sender,
        }
    }

    /// 一个没有订阅者的句柄，测试中使用
    pub fn detached(capability: Capability) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(capability, String::new(), sender)
    }

    pub fn report(&self, loaded: u64, total: u64) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.sender.send(DownloadProgress {
            capability: self.capability,
            session_key: self.session_key.clone(),
            loaded,
            total,
        });
    }
}

/// 激活状态快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivationInfo {
    pub required: bool,
    /// 最近一次请求激活的时间（Unix 毫秒）
    pub last_requested_at: Option<i64>,
}

/// 激活事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationEvent {
    pub required: bool,
    pub timestamp: Option<i64>,
}

/// 跟踪“需要用户激活”标志，并向界面广播变化
#[derive(Debug)]
pub struct ActivationTracker {
    state: Mutex<ActivationInfo>,
    sender: broadcast::Sender<ActivationEvent>,
}

impl Default for ActivationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivationTracker {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(ActivationInfo::default()),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivationEvent> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> ActivationInfo {
        self.state.lock().map(|state| *state).unwrap_or_default()
    }

    pub fn is_required(&self) -> bool {
        self.snapshot().required
    }

    /// 更新标志；重复设置为 true 时仍然广播，便于界面重新提示
    pub fn set_required(&self, required: bool) {
        let event = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.required == required {
                if !required {
                    return;
                }
            } else {
                state.required = required;
                state.last_requested_at = required.then(|| Utc::now().timestamp_millis());
            }
            ActivationEvent {
                required,
                timestamp: state.last_requested_at,
            }
        };
        if required {
            tracing::debug!("需要用户激活");
        }
        let _ = self.sender.send(event);
    }

    /// 主动请求激活
    pub fn request(&self) {
        if !self.is_required() {
            self.set_required(true);
        }
    }
}
