//! 类型化事件
//!
//! 生命周期与进度事件通过 `tokio::sync::broadcast` 通道分发，日志与界面等协作方订阅即可。

use std::sync::Arc;

use serde::Serialize;

use crate::models::{PipelinePerformance, PipelineProgress, PipelineSummary, ValidationSettings};

/// 流水线事件，均携带请求ID
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started {
        request_id: String,
        total_resources: usize,
        requested_by: Option<String>,
    },
    Progress {
        request_id: String,
        progress: PipelineProgress,
    },
    ResourceProcessed {
        request_id: String,
        index: usize,
        resource_type: String,
        resource_id: Option<String>,
        is_valid: bool,
        from_cache: bool,
    },
    Completed {
        request_id: String,
        summary: PipelineSummary,
        performance: PipelinePerformance,
    },
    Failed {
        request_id: String,
        error: String,
    },
    Cancelled {
        request_id: String,
    },
}

impl PipelineEvent {
    pub fn request_id(&self) -> &str {
        match self {
            PipelineEvent::Started { request_id, .. }
            | PipelineEvent::Progress { request_id, .. }
            | PipelineEvent::ResourceProcessed { request_id, .. }
            | PipelineEvent::Completed { request_id, .. }
            | PipelineEvent::Failed { request_id, .. }
            | PipelineEvent::Cancelled { request_id } => request_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Started { .. } => "started",
            PipelineEvent::Progress { .. } => "progress",
            PipelineEvent::ResourceProcessed { .. } => "resource_processed",
            PipelineEvent::Completed { .. } => "completed",
            PipelineEvent::Failed { .. } => "failed",
            PipelineEvent::Cancelled { .. } => "cancelled",
        }
    }
}

/// Worker池事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    WorkerStarted { worker_id: usize },
    WorkerReplaced { old_worker_id: usize, new_worker_id: Option<usize>, reason: String },
    WorkerRestartFailed { worker_id: usize, error: String },
    TaskTimedOut { task_id: String, worker_id: usize, timeout_ms: u64 },
    TaskFailed { task_id: String, worker_id: usize, error: String },
    ShutdownStarted { in_flight: usize },
    ShutdownCompleted { forced: bool },
}

/// 设置变更通知
///
/// 收到后清空结果缓存；正在运行的流水线继续使用各自捕获的设置快照。
#[derive(Debug, Clone)]
pub struct SettingsChanged {
    pub settings: Arc<ValidationSettings>,
}

impl SettingsChanged {
    pub fn new(settings: ValidationSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}
