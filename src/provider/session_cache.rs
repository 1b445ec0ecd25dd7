//! 模型会话缓存
//!
//! 每个会话键对应一个会话，记录最近使用时间。空闲超过阈值的会话由清理任务释放；
//! 清理任务每轮结束后把自己重新安排到最早的下一个过期时间，缓存为空时挂起等待。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::capability::Session;

struct CacheEntry {
    session: Arc<dyn Session>,
    last_used: Instant,
}

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCacheStats {
    pub active: usize,
    pub created: u64,
    pub hits: u64,
    pub released: u64,
}

pub struct SessionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    stats: Mutex<SessionCacheStats>,
    idle: Duration,
    min_sweep_delay: Duration,
    wakeup: Notify,
}

impl SessionCache {
    pub fn new(idle: Duration, min_sweep_delay: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stats: Mutex::new(SessionCacheStats::default()),
            idle,
            min_sweep_delay,
            wakeup: Notify::new(),
        }
    }

    /// 取出会话并刷新使用时间
    pub fn get(&self, key: &str) -> Option<Arc<dyn Session>> {
        let mut entries = self.entries.lock().ok()?;
        let entry = entries.get_mut(key)?;
        entry.last_used = Instant::now();
        let session = entry.session.clone();
        drop(entries);
        self.update_stats(|stats| stats.hits += 1);
        Some(session)
    }

    pub fn insert(&self, key: String, session: Arc<dyn Session>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key,
                CacheEntry {
                    session,
                    last_used: Instant::now(),
                },
            );
        }
        self.update_stats(|stats| stats.created += 1);
        self.wakeup.notify_one();
    }

    /// 移除会话并释放
    pub async fn evict(&self, key: &str) {
        let removed = self
            .entries
            .lock()
            .ok()
            .and_then(|mut entries| entries.remove(key));
        if let Some(entry) = removed {
            entry.session.release().await;
            self.update_stats(|stats| stats.released += 1);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SessionCacheStats {
        let mut stats = self.stats.lock().map(|stats| *stats).unwrap_or_default();
        stats.active = self.len();
        stats
    }

    fn update_stats(&self, update: impl FnOnce(&mut SessionCacheStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    /// 释放所有空闲超时的会话，返回距离下一次清理的时间；缓存为空时返回 `None`
    pub async fn sweep(&self) -> Option<Duration> {
        let now = Instant::now();
        let (expired, next_expiry) = {
            let Ok(mut entries) = self.entries.lock() else {
                return None;
            };
            let expired_keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| now.saturating_duration_since(entry.last_used) >= self.idle)
                .map(|(key, _)| key.clone())
                .collect();
            let expired: Vec<(String, Arc<dyn Session>)> = expired_keys
                .into_iter()
                .filter_map(|key| entries.remove(&key).map(|entry| (key, entry.session)))
                .collect();
            let next_expiry = entries
                .values()
                .map(|entry| self.idle.saturating_sub(now.saturating_duration_since(entry.last_used)))
                .min();
            (expired, next_expiry)
        };

        for (key, session) in expired {
            tracing::debug!("释放空闲模型会话: {}", key);
            session.release().await;
            self.update_stats(|stats| stats.released += 1);
        }

        next_expiry.map(|delay| delay.max(self.min_sweep_delay))
    }

    /// 清理循环，通常通过 `tokio::spawn` 在后台运行
    pub async fn run_sweeper(self: Arc<Self>) {
        loop {
            let notified = self.wakeup.notified();
            match self.sweep().await {
                Some(delay) => tokio::time::sleep(delay).await,
                None => notified.await,
            }
        }
    }

    /// 立即释放全部会话
    pub async fn flush(&self) {
        let drained: Vec<(String, CacheEntry)> = self
            .entries
            .lock()
            .map(|mut entries| entries.drain().collect())
            .unwrap_or_default();
        for (key, entry) in drained {
            tracing::debug!("释放模型会话: {}", key);
            entry.session.release().await;
            self.update_stats(|stats| stats.released += 1);
        }
    }
}
