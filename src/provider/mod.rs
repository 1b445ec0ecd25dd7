//! 建议提供者模块
//!
//! 能力后端抽象、会话缓存、摘要分块、语言规范化以及统一的 [`SuggestionProvider`] 客户端。

pub mod capability;
pub mod chunk;
pub mod client;
pub mod language;
pub mod progress;
pub mod session_cache;

pub use capability::{
    Availability, Capability, CapabilityBackend, CapabilitySet, ImageInput, ImagePayload,
    Invocation, Session, SessionOptions, SessionOutput, SummaryKind,
};
pub use chunk::{chunk_text, summary_fallback};
pub use client::{rewrite_fallback, ImageLoader, ModelStatus, ModelStatusItem, SuggestionProvider};
pub use language::{language_label, normalize_output_language, LanguageDetection};
pub use progress::{ActivationEvent, ActivationInfo, ActivationTracker, DownloadProgress, ProgressSink};
pub use session_cache::{SessionCache, SessionCacheStats};
