use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::ValidationResult;
use super::settings::ValidationSettings;
use super::task::TaskPriority;

/// 单个资源的验证输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInput {
    pub resource: serde_json::Value,
    pub resource_type: String,
    pub fhir_version: Option<String>,
    pub priority: Option<TaskPriority>,
}

impl ResourceInput {
    pub fn new(resource: serde_json::Value, resource_type: impl Into<String>) -> Self {
        Self {
            resource,
            resource_type: resource_type.into(),
            fhir_version: None,
            priority: None,
        }
    }

    /// 从记录自身的 `resourceType` 字段推断类型
    pub fn from_resource(resource: serde_json::Value) -> Option<Self> {
        let resource_type = resource.get("resourceType")?.as_str()?.to_string();
        Some(Self::new(resource, resource_type))
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn resource_id(&self) -> Option<String> {
        crate::fingerprint::resource_id(&self.resource)
    }
}

/// 单个请求对流水线配置的局部覆盖
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfigOverride {
    pub parallel: Option<bool>,
    pub max_concurrent: Option<usize>,
    pub timeout_ms: Option<u64>,
    /// 替换本次请求使用的验证设置
    pub settings: Option<ValidationSettings>,
    /// 忽略已存储结果，强制重新验证
    pub force_revalidation: Option<bool>,
}

/// 请求上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    pub request_id: String,
    pub requested_by: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PipelineContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            requested_by: None,
            metadata: HashMap::new(),
        }
    }

    /// 生成随机请求ID
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// 流水线请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub resources: Vec<ResourceInput>,
    pub config: Option<PipelineConfigOverride>,
    pub context: PipelineContext,
}

impl PipelineRequest {
    pub fn new(resources: Vec<ResourceInput>, context: PipelineContext) -> Self {
        Self {
            resources,
            config: None,
            context,
        }
    }

    pub fn with_config(mut self, config: PipelineConfigOverride) -> Self {
        self.config = Some(config);
        self
    }

    pub fn request_id(&self) -> &str {
        &self.context.request_id
    }
}

/// 流水线状态
///
/// ```text
/// Pending → Running → Completed
///                   ↘ Failed
///                   ↘ Cancelled
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Failed | PipelineStatus::Cancelled
        )
    }
}

/// 状态查询结果，历史记录由持久化层负责
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatusQuery {
    Running,
    NotFound,
}

/// 流水线汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub total_resources: usize,
    /// 引擎给出了结果的资源数（无论有效与否）
    pub successful_validations: usize,
    /// 超时、错误、被拒绝或被取消的资源数
    pub failed_validations: usize,
    pub valid_resources: usize,
    pub invalid_resources: usize,
    pub cache_hits: usize,
    /// 通过重新验证判断直接复用的已存储结果数
    pub reused_results: usize,
    pub total_issues: usize,
    pub issues_by_aspect: BTreeMap<String, usize>,
    pub issues_by_severity: BTreeMap<String, usize>,
}

/// 流水线性能数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelinePerformance {
    pub total_time_ms: u64,
    pub average_time_ms: f64,
    pub fastest_ms: u64,
    pub slowest_ms: u64,
    pub throughput_per_second: f64,
}

/// 流水线结果
///
/// `results` 与请求中的 `resources` 一一对应、顺序一致，即使部分失败也如此。
/// `completed_at`、`failed_at`、`cancelled_at` 三者最多只有一个被设置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub request_id: String,
    pub status: PipelineStatus,
    pub results: Vec<ValidationResult>,
    pub summary: PipelineSummary,
    pub performance: PipelinePerformance,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn pending(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: PipelineStatus::Pending,
            results: Vec::new(),
            summary: PipelineSummary::default(),
            performance: PipelinePerformance::default(),
            started_at: Utc::now(),
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            error: None,
        }
    }

    /// 设置终止状态及对应的时间戳
    pub fn finish(&mut self, status: PipelineStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = None;
        self.failed_at = None;
        self.cancelled_at = None;
        match status {
            PipelineStatus::Completed => self.completed_at = Some(now),
            PipelineStatus::Failed => self.failed_at = Some(now),
            PipelineStatus::Cancelled => self.cancelled_at = Some(now),
            PipelineStatus::Pending | PipelineStatus::Running => {}
        }
    }
}

/// 运行中流水线的进度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineProgress {
    pub request_id: String,
    pub total: usize,
    pub processed: usize,
    pub valid: usize,
    pub errors: usize,
    pub cache_hits: usize,
    pub percentage: f64,
    pub current_resource: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl PipelineProgress {
    pub fn new(request_id: impl Into<String>, total: usize) -> Self {
        Self {
            request_id: request_id.into(),
            total,
            processed: 0,
            valid: 0,
            errors: 0,
            cache_hits: 0,
            percentage: if total == 0 { 100.0 } else { 0.0 },
            current_resource: None,
            started_at: Utc::now(),
        }
    }

    pub fn record(&mut self, result: &ValidationResult) {
        self.processed += 1;
        if result.is_valid {
            self.valid += 1;
        }
        if result.is_pipeline_failure() {
            self.errors += 1;
        }
        if result.from_cache {
            self.cache_hits += 1;
        }
        self.current_resource = Some(match &result.resource_id {
            Some(id) => format!("{}/{}", result.resource_type, id),
            None => result.resource_type.clone(),
        });
        self.percentage = if self.total == 0 {
            100.0
        } else {
            (self.processed as f64 / self.total as f64) * 100.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_sets_exactly_one_timestamp() {
        let mut result = PipelineResult::pending("req-1");
        result.finish(PipelineStatus::Failed);
        result.finish(PipelineStatus::Completed);
        assert_eq!(result.status, PipelineStatus::Completed);
        assert!(result.completed_at.is_some());
        assert!(result.failed_at.is_none());
        assert!(result.cancelled_at.is_none());
    }

    #[test]
    fn test_resource_input_infers_type() {
        let input =
            ResourceInput::from_resource(serde_json::json!({"resourceType": "Encounter", "id": "e1"}))
                .unwrap();
        assert_eq!(input.resource_type, "Encounter");
        assert_eq!(input.resource_id().as_deref(), Some("e1"));
        assert!(ResourceInput::from_resource(serde_json::json!({"id": "x"})).is_none());
    }

    #[test]
    fn test_progress_percentage() {
        let mut progress = PipelineProgress::new("req", 4);
        let result = ValidationResult::from_issues("Patient", Some("p".into()), vec![], vec![], false);
        progress.record(&result);
        assert_eq!(progress.processed, 1);
        assert_eq!(progress.valid, 1);
        assert!((progress.percentage - 25.0).abs() < f64::EPSILON);
        assert_eq!(progress.current_resource.as_deref(), Some("Patient/p"));
    }
}
