//! 验证调度层
//!
//! 在Worker池之上提供结果缓存、批处理、重新验证判断与流水线编排。

pub mod aggregate;
pub mod batch_processor;
pub mod cache;
pub mod orchestrator;
pub mod revalidation;
pub mod settings_listener;

pub use batch_processor::{
    BatchOptions, BatchProcessor, CancellationFlag, ProcessedResource, ProgressSink,
    ProgressUpdate, ResourceOutcome,
};
pub use cache::{CacheStats, ResultCache};
pub use orchestrator::PipelineOrchestrator;
pub use revalidation::{
    needs_revalidation, RevalidationDecision, RevalidationPolicy, RevalidationReason,
};
pub use settings_listener::SettingsChangeListener;
