//! Test data builders
//!
//! Builder patterns for creating records, tasks and pipeline requests with
//! sensible defaults.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use validator_core::{
    PipelineConfigOverride, PipelineContext, PipelineRequest, ResourceInput, TaskPriority,
    ValidationSettings, ValidationTask, WorkerPoolConfig,
};

/// A minimal Patient record with the given id
pub fn patient(id: &str) -> serde_json::Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{"family": "Test", "given": [id]}]
    })
}

/// A Patient record carrying extra mock directives, e.g. `json!({"mockDelayMs": 50})`
pub fn patient_with(id: &str, directives: serde_json::Value) -> serde_json::Value {
    let mut resource = patient(id);
    if let (Some(target), Some(extra)) = (resource.as_object_mut(), directives.as_object()) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    resource
}

/// Pool configuration sized for tests
pub fn test_pool_config(max_workers: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        max_workers,
        max_queue_depth: 100,
        task_timeout_ms: 5_000,
        worker_startup_timeout_ms: 5_000,
        drain_timeout_ms: 2_000,
    }
}

/// Builder for [`ValidationTask`]s
pub struct TaskBuilder {
    resource: serde_json::Value,
    resource_type: String,
    settings: ValidationSettings,
    priority: TaskPriority,
    timeout: Option<Duration>,
}

impl TaskBuilder {
    pub fn new(resource_id: &str) -> Self {
        Self {
            resource: patient(resource_id),
            resource_type: "Patient".to_string(),
            settings: ValidationSettings::default(),
            priority: TaskPriority::Normal,
            timeout: None,
        }
    }

    pub fn with_resource(mut self, resource: serde_json::Value) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = resource_type.to_string();
        self
    }

    pub fn with_settings(mut self, settings: ValidationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ValidationTask {
        let mut task = ValidationTask::new(
            self.resource,
            self.resource_type,
            Arc::new(self.settings),
        )
        .with_priority(self.priority);
        task.timeout = self.timeout;
        task
    }
}

/// Builder for [`PipelineRequest`]s
pub struct PipelineRequestBuilder {
    resources: Vec<ResourceInput>,
    config: Option<PipelineConfigOverride>,
    context: PipelineContext,
}

impl PipelineRequestBuilder {
    pub fn new(request_id: &str) -> Self {
        Self {
            resources: Vec::new(),
            config: None,
            context: PipelineContext::new(request_id),
        }
    }

    /// Adds a plain Patient record per id
    pub fn with_patients(mut self, ids: &[&str]) -> Self {
        self.resources
            .extend(ids.iter().map(|id| ResourceInput::new(patient(id), "Patient")));
        self
    }

    pub fn with_resource(mut self, resource: serde_json::Value) -> Self {
        self.resources.push(ResourceInput::new(resource, "Patient"));
        self
    }

    pub fn with_input(mut self, input: ResourceInput) -> Self {
        self.resources.push(input);
        self
    }

    pub fn with_config(mut self, config: PipelineConfigOverride) -> Self {
        self.config = Some(config);
        self
    }

    pub fn requested_by(mut self, who: &str) -> Self {
        self.context.requested_by = Some(who.to_string());
        self
    }

    pub fn build(self) -> PipelineRequest {
        let request = PipelineRequest::new(self.resources, self.context);
        match self.config {
            Some(config) => request.with_config(config),
            None => request,
        }
    }
}
