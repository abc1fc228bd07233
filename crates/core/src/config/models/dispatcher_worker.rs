use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker池配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// 最大Worker数，Worker按需懒创建
    pub max_workers: usize,
    /// 任务队列最大深度，超过后提交直接失败
    pub max_queue_depth: usize,
    /// 默认任务超时（毫秒）
    pub task_timeout_ms: u64,
    /// Worker启动（创建引擎实例）的超时（毫秒）
    pub worker_startup_timeout_ms: u64,
    /// 关闭时等待在途任务完成的时间（毫秒）
    pub drain_timeout_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_queue_depth: 1000,
            task_timeout_ms: 30_000,
            worker_startup_timeout_ms: 10_000,
            drain_timeout_ms: 30_000,
        }
    }
}

impl WorkerPoolConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn worker_startup_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_startup_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_workers == 0 {
            return Err(anyhow::anyhow!("最大Worker数必须大于0"));
        }

        if self.max_queue_depth == 0 {
            return Err(anyhow::anyhow!("任务队列最大深度必须大于0"));
        }

        if self.task_timeout_ms == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        if self.worker_startup_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Worker启动超时时间必须大于0"));
        }

        Ok(())
    }
}

/// 批处理器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// 是否按块并行处理，关闭时严格逐个处理
    pub parallel: bool,
    /// 每块的最大并发数
    pub max_concurrent: usize,
    /// 设置中未指定超时时使用的默认超时（毫秒）
    pub default_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_concurrent: 8,
            default_timeout_ms: 30_000,
        }
    }
}

impl BatchConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent == 0 {
            return Err(anyhow::anyhow!("批处理最大并发数必须大于0"));
        }

        if self.default_timeout_ms == 0 {
            return Err(anyhow::anyhow!("批处理默认超时时间必须大于0"));
        }

        Ok(())
    }
}
