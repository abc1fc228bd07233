pub mod app_config;
pub mod dispatcher_worker;
pub mod pipeline;

// Re-export main types for easier imports
pub use app_config::ValidatorConfig;
pub use dispatcher_worker::{BatchConfig, WorkerPoolConfig};
pub use pipeline::{CacheConfig, PipelineConfig, RevalidationConfig};
