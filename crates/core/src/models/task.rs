use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::settings::ValidationSettings;

/// 任务优先级
///
/// 高优先级任务总是先于低优先级任务出队，同级别内保持先进先出。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    /// 数值越大优先级越高
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::High => 2,
            TaskPriority::Normal => 1,
            TaskPriority::Low => 0,
        }
    }

    pub fn is_higher_than(&self, other: &TaskPriority) -> bool {
        self.rank() > other.rank()
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(TaskPriority::High),
            "normal" => Ok(TaskPriority::Normal),
            "low" => Ok(TaskPriority::Low),
            _ => Err(format!("无效的任务优先级: {s}")),
        }
    }
}

/// 验证任务
///
/// 一个资源的一次验证工作单元。任务在任意时刻要么属于队列，要么属于某个Worker，
/// 不会同时属于两者；完成回调触发后任务即从所有跟踪结构中移除。
///
/// # 字段说明
///
/// - `id`: 任务唯一标识
/// - `priority`: 调度优先级
/// - `resource`: 待验证的记录
/// - `resource_type`: 声明的资源类型
/// - `settings`: 验证设置快照
/// - `fhir_version`: 可选的版本标签
/// - `timeout`: 任务级超时，未设置时使用Worker池默认值
/// - `enqueued_at`: 入队时间
#[derive(Debug, Clone)]
pub struct ValidationTask {
    pub id: String,
    pub priority: TaskPriority,
    pub resource: serde_json::Value,
    pub resource_type: String,
    pub settings: Arc<ValidationSettings>,
    pub fhir_version: Option<String>,
    pub timeout: Option<Duration>,
    pub enqueued_at: DateTime<Utc>,
}

impl ValidationTask {
    /// 创建新任务
    pub fn new(
        resource: serde_json::Value,
        resource_type: impl Into<String>,
        settings: Arc<ValidationSettings>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            priority: TaskPriority::Normal,
            resource,
            resource_type: resource_type.into(),
            fhir_version: settings.fhir_version.clone(),
            settings,
            timeout: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_fhir_version(mut self, fhir_version: Option<String>) -> Self {
        if fhir_version.is_some() {
            self.fhir_version = fhir_version;
        }
        self
    }

    /// 资源自身的 `id` 字段
    pub fn resource_id(&self) -> Option<String> {
        crate::fingerprint::resource_id(&self.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_rank() {
        assert!(TaskPriority::High.is_higher_than(&TaskPriority::Normal));
        assert!(TaskPriority::Normal.is_higher_than(&TaskPriority::Low));
        assert!(!TaskPriority::Normal.is_higher_than(&TaskPriority::Normal));
        assert_eq!("HIGH".parse::<TaskPriority>().unwrap(), TaskPriority::High);
        assert!("urgent".parse::<TaskPriority>().is_err());
    }

    #[test]
    fn test_task_inherits_settings_fhir_version() {
        let settings = Arc::new(ValidationSettings::default());
        let task = ValidationTask::new(
            serde_json::json!({"resourceType": "Patient", "id": "p1"}),
            "Patient",
            settings,
        );
        assert_eq!(task.fhir_version.as_deref(), Some("R4"));
        assert_eq!(task.resource_id().as_deref(), Some("p1"));

        let task = task.with_fhir_version(Some("R5".to_string()));
        assert_eq!(task.fhir_version.as_deref(), Some("R5"));
    }
}
