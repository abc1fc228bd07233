use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 流水线编排配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 同时运行的流水线上限
    pub max_concurrent_pipelines: usize,
    /// 事件通道容量
    pub event_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pipelines: 4,
            event_channel_capacity: 1024,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_pipelines == 0 {
            return Err(anyhow::anyhow!("最大并发流水线数必须大于0"));
        }

        if self.event_channel_capacity == 0 {
            return Err(anyhow::anyhow!("事件通道容量必须大于0"));
        }

        Ok(())
    }
}

/// 结果缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// 缓存条目存活时间（秒）
    pub ttl_seconds: u64,
    /// 最大条目数，满时淘汰最旧条目
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.ttl_seconds == 0 {
            return Err(anyhow::anyhow!("缓存TTL必须大于0"));
        }

        if self.enabled && self.max_entries == 0 {
            return Err(anyhow::anyhow!("缓存最大条目数必须大于0"));
        }

        Ok(())
    }
}

/// 重新验证判断配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevalidationConfig {
    /// 内容与设置均未变化且未过期时跳过重新验证
    pub skip_unchanged: bool,
    /// 过期窗口（秒）
    pub max_age_seconds: u64,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            skip_unchanged: true,
            max_age_seconds: 3600,
        }
    }
}

impl RevalidationConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_age_seconds == 0 {
            return Err(anyhow::anyhow!("过期窗口必须大于0"));
        }
        Ok(())
    }
}
