//! 问题计数与累计指标

use serde::{Deserialize, Serialize};

/// 当前审计代的问题计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub total: usize,
    pub applied: usize,
    pub ignored: usize,
    pub auto_applied: usize,
    pub pending: usize,
}

impl Counts {
    /// 由各项计数推导 `pending`
    pub fn new(total: usize, applied: usize, ignored: usize, auto_applied: usize) -> Self {
        Self {
            total,
            applied,
            ignored,
            auto_applied,
            pending: total.saturating_sub(applied).saturating_sub(ignored),
        }
    }
}

/// 跨审计累计的指标
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifetimeMetrics {
    pub findings: u64,
    pub applied: u64,
    pub auto_applied: u64,
    pub ignored: u64,
}

impl LifetimeMetrics {
    /// 累加一次审计结束时的计数
    pub fn record(&mut self, counts: &Counts) {
        self.findings += counts.total as u64;
        self.applied += counts.applied as u64;
        self.auto_applied += counts.auto_applied as u64;
        self.ignored += counts.ignored as u64;
    }
}
