use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker统计信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub id: usize,
    pub busy: bool,
    pub current_task_id: Option<String>,
    pub tasks_processed: u64,
    pub errors: u64,
    /// 平均任务耗时（毫秒）
    pub avg_duration_ms: f64,
    pub last_activity: DateTime<Utc>,
}

impl WorkerStats {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            busy: false,
            current_task_id: None,
            tasks_processed: 0,
            errors: 0,
            avg_duration_ms: 0.0,
            last_activity: Utc::now(),
        }
    }

    /// 标记Worker开始执行任务
    pub fn mark_busy(&mut self, task_id: &str) {
        self.busy = true;
        self.current_task_id = Some(task_id.to_string());
        self.last_activity = Utc::now();
    }

    /// 记录一次任务完成并更新滑动平均耗时
    pub fn record_completion(&mut self, duration_ms: u64, failed: bool) {
        self.busy = false;
        self.current_task_id = None;
        self.tasks_processed += 1;
        if failed {
            self.errors += 1;
        }
        let n = self.tasks_processed as f64;
        self.avg_duration_ms += (duration_ms as f64 - self.avg_duration_ms) / n;
        self.last_activity = Utc::now();
    }
}

/// Worker池运行指标
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub queue_depth: usize,
    pub active_tasks: usize,
    pub accepting: bool,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    /// 派发前提交方已放弃等待而被丢弃的任务
    pub tasks_discarded: u64,
    pub workers_restarted: u64,
    pub workers: Vec<WorkerStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_average() {
        let mut stats = WorkerStats::new(1);
        stats.mark_busy("t1");
        assert!(stats.busy);
        stats.record_completion(100, false);
        stats.record_completion(300, true);
        assert!(!stats.busy);
        assert_eq!(stats.tasks_processed, 2);
        assert_eq!(stats.errors, 1);
        assert!((stats.avg_duration_ms - 200.0).abs() < f64::EPSILON);
    }
}
