//! 自动审计调度
//!
//! 宿主把 DOM 变更记录交给调度器，调度器收集提示节点、防抖，并在条件满足时运行后台审计。

pub mod hints;
pub mod runner;

pub use hints::{HintSet, HintSnapshot, MutationRecord};
pub use runner::{DeferReason, Evaluation, RunReason, Scheduler, SchedulerEvent, SchedulerState};
