//! 批处理器
//!
//! 把一批资源转换为验证任务提交给Worker池：先查结果缓存，未命中才提交；
//! 并行模式按块提交并逐块等待，顺序模式逐个处理。任何单个资源的失败都被转换为
//! 合成的失败结果，`process_resources` 本身从不返回错误，结果顺序与输入一致。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use validator_core::{
    fingerprint, BatchConfig, CacheConfig, ResourceInput, SettingsChanged, ValidationResult,
    ValidationSettings, ValidationTask, ValidatorError, ValidatorResult, PIPELINE_CANCELLED,
    PIPELINE_ERROR, PIPELINE_REJECTED, PIPELINE_TIMEOUT,
};
use validator_worker::WorkerPool;

use crate::cache::{CacheStats, ResultCache};

/// 单个资源的处理结局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceOutcome {
    /// 引擎给出了结果
    Validated,
    /// 命中结果缓存
    Cached,
    /// 复用已存储的上一次结果
    Reused,
    TimedOut,
    Failed,
    /// 队列已满或池已关闭
    Rejected,
    Cancelled,
}

impl ResourceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ResourceOutcome::Validated | ResourceOutcome::Cached | ResourceOutcome::Reused
        )
    }
}

/// 已处理的资源
#[derive(Debug, Clone)]
pub struct ProcessedResource {
    /// 在本批输入中的位置
    pub index: usize,
    pub result: ValidationResult,
    pub outcome: ResourceOutcome,
}

/// 单个资源完成时的进度通知
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub request_id: String,
    pub index: usize,
    pub total: usize,
    pub result: ValidationResult,
    pub outcome: ResourceOutcome,
}

impl ProgressUpdate {
    /// 是否直接由缓存提供
    pub fn from_cache(&self) -> bool {
        self.outcome == ResourceOutcome::Cached
    }
}

/// 进度回调，每个资源完成后调用一次
pub type ProgressSink = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// 协作式取消标记
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 单次批处理的选项，未设置的项使用设置或处理器配置
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub parallel: Option<bool>,
    pub max_concurrent: Option<usize>,
    pub timeout: Option<Duration>,
    /// 跳过缓存查找，结果仍会写入缓存
    pub bypass_cache: bool,
    pub cancellation: Option<CancellationFlag>,
}

impl BatchOptions {
    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(CancellationFlag::is_cancelled)
            .unwrap_or(false)
    }
}

struct ResolvedOptions<'a> {
    settings: &'a Arc<ValidationSettings>,
    settings_hash: String,
    timeout: Duration,
    bypass_cache: bool,
    request_id: &'a str,
    total: usize,
    sink: Option<&'a ProgressSink>,
}

/// 批处理器
pub struct BatchProcessor {
    pool: WorkerPool,
    cache: ResultCache,
    config: RwLock<BatchConfig>,
}

impl BatchProcessor {
    pub fn new(pool: WorkerPool, config: BatchConfig, cache_config: CacheConfig) -> Self {
        Self {
            pool,
            cache: ResultCache::new(cache_config),
            config: RwLock::new(config),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// 处理一批资源，结果与输入一一对应
    #[instrument(skip_all, fields(request_id = %request_id, total = inputs.len()))]
    pub async fn process_resources(
        &self,
        inputs: &[ResourceInput],
        settings: Arc<ValidationSettings>,
        request_id: &str,
        options: &BatchOptions,
        sink: Option<&ProgressSink>,
    ) -> Vec<ProcessedResource> {
        let config = self.config.read().await.clone();
        let parallel = options.parallel.unwrap_or(config.parallel);
        let max_concurrent = options
            .max_concurrent
            .or(settings.max_concurrent)
            .unwrap_or(config.max_concurrent)
            .max(1);
        let timeout = options
            .timeout
            .or(settings.timeout_ms.map(Duration::from_millis))
            .unwrap_or_else(|| config.default_timeout());

        let resolved = ResolvedOptions {
            settings_hash: settings.fingerprint(),
            settings: &settings,
            timeout,
            bypass_cache: options.bypass_cache,
            request_id,
            total: inputs.len(),
            sink,
        };

        info!(
            "开始批处理: {} 个资源, 并行: {}, 最大并发: {}, 超时: {:?}",
            inputs.len(),
            parallel,
            max_concurrent,
            timeout
        );
        let started = Instant::now();
        let mut processed = Vec::with_capacity(inputs.len());

        if parallel {
            let mut start = 0;
            while start < inputs.len() {
                let size = max_concurrent.min(inputs.len() - start);
                let chunk = (start..start + size).map(|index| {
                    self.process_entry(index, &inputs[index], &resolved, options)
                });
                processed.extend(join_all(chunk).await);
                start += size;
            }
        } else {
            for (index, input) in inputs.iter().enumerate() {
                processed.push(self.process_entry(index, input, &resolved, options).await);
            }
        }

        histogram!("validator_batch_duration_ms").record(started.elapsed().as_millis() as f64);
        debug!("批处理完成，耗时 {:?}", started.elapsed());
        processed
    }

    /// 处理单个资源
    pub async fn process_resource(
        &self,
        input: &ResourceInput,
        settings: Arc<ValidationSettings>,
    ) -> ValidationResult {
        let request_id = uuid::Uuid::new_v4().to_string();
        let options = BatchOptions {
            parallel: Some(false),
            ..Default::default()
        };
        self.process_resources(
            std::slice::from_ref(input),
            settings,
            &request_id,
            &options,
            None,
        )
        .await
        .pop()
        .map(|processed| processed.result)
        .unwrap_or_else(|| {
            ValidationResult::pipeline_failure(
                input.resource_type.clone(),
                input.resource_id(),
                PIPELINE_ERROR,
                "批处理未返回结果",
                0,
            )
        })
    }

    async fn process_entry(
        &self,
        index: usize,
        input: &ResourceInput,
        resolved: &ResolvedOptions<'_>,
        options: &BatchOptions,
    ) -> ProcessedResource {
        let resource_id = input.resource_id();

        if options.is_cancelled() {
            return ProcessedResource {
                index,
                result: ValidationResult::pipeline_failure(
                    input.resource_type.clone(),
                    resource_id,
                    PIPELINE_CANCELLED,
                    "流水线已取消，资源未处理",
                    0,
                ),
                outcome: ResourceOutcome::Cancelled,
            };
        }

        let processed = self.validate_entry(index, input, resource_id, resolved).await;

        if let Some(sink) = resolved.sink {
            sink(ProgressUpdate {
                request_id: resolved.request_id.to_string(),
                index,
                total: resolved.total,
                result: processed.result.clone(),
                outcome: processed.outcome,
            });
        }
        processed
    }

    async fn validate_entry(
        &self,
        index: usize,
        input: &ResourceInput,
        resource_id: Option<String>,
        resolved: &ResolvedOptions<'_>,
    ) -> ProcessedResource {
        let started = Instant::now();
        let content_hash = fingerprint::content_hash(&input.resource);
        let key = fingerprint::cache_key(
            &input.resource_type,
            resource_id.as_deref(),
            &content_hash,
            &resolved.settings_hash,
        );

        if !resolved.bypass_cache {
            if let Some(mut cached) = self.cache.get(&key).await {
                debug!(
                    "资源 {}/{} 由缓存提供",
                    input.resource_type,
                    resource_id.as_deref().unwrap_or("-")
                );
                cached.from_cache = true;
                return ProcessedResource {
                    index,
                    result: cached,
                    outcome: ResourceOutcome::Cached,
                };
            }
        }

        let mut task = ValidationTask::new(
            input.resource.clone(),
            input.resource_type.clone(),
            Arc::clone(resolved.settings),
        )
        .with_timeout(resolved.timeout)
        .with_fhir_version(input.fhir_version.clone());
        if let Some(priority) = input.priority {
            task = task.with_priority(priority);
        }

        match self.pool.execute(task).await {
            Ok(mut result) => {
                if result.resource_id.is_none() {
                    result.resource_id = resource_id;
                }
                if result.duration_ms == 0 {
                    result.duration_ms = started.elapsed().as_millis() as u64;
                }
                result.content_hash = Some(content_hash);
                result.settings_hash = Some(resolved.settings_hash.clone());
                result.from_cache = false;

                self.cache.insert(key, result.clone()).await;
                ProcessedResource {
                    index,
                    result,
                    outcome: ResourceOutcome::Validated,
                }
            }
            Err(error) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let (code, outcome) = classify_failure(&error);
                warn!(
                    "资源 {}/{} 验证失败 ({}): {}",
                    input.resource_type,
                    resource_id.as_deref().unwrap_or("-"),
                    code,
                    error
                );
                counter!("validator_batch_failures_total", "code" => code).increment(1);

                let mut result = ValidationResult::pipeline_failure(
                    input.resource_type.clone(),
                    resource_id,
                    code,
                    error.to_string(),
                    elapsed_ms,
                );
                result.content_hash = Some(content_hash);
                result.settings_hash = Some(resolved.settings_hash.clone());
                ProcessedResource {
                    index,
                    result,
                    outcome,
                }
            }
        }
    }

    /// 清空结果缓存
    pub async fn clear_cache(&self) -> usize {
        let cleared = self.cache.clear().await;
        info!("结果缓存已清空，共 {} 条", cleared);
        cleared
    }

    /// 设置变更：旧设置下计算的缓存条目全部作废
    pub async fn on_settings_changed(&self, event: &SettingsChanged) -> usize {
        debug!("收到设置变更，新设置指纹 {}", event.settings.fingerprint());
        self.clear_cache().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn config(&self) -> BatchConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: BatchConfig) -> ValidatorResult<()> {
        config
            .validate()
            .map_err(|e| ValidatorError::config_error(e.to_string()))?;
        *self.config.write().await = config;
        Ok(())
    }

    pub async fn update_cache_config(&self, config: CacheConfig) -> ValidatorResult<()> {
        config
            .validate()
            .map_err(|e| ValidatorError::config_error(e.to_string()))?;
        self.cache.update_config(config).await;
        Ok(())
    }
}

fn classify_failure(error: &ValidatorError) -> (&'static str, ResourceOutcome) {
    if error.is_timeout() {
        (PIPELINE_TIMEOUT, ResourceOutcome::TimedOut)
    } else if error.is_rejection() {
        (PIPELINE_REJECTED, ResourceOutcome::Rejected)
    } else {
        (PIPELINE_ERROR, ResourceOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure(&ValidatorError::task_timeout("t", 10)),
            (PIPELINE_TIMEOUT, ResourceOutcome::TimedOut)
        );
        assert_eq!(
            classify_failure(&ValidatorError::QueueFull { max_depth: 1 }),
            (PIPELINE_REJECTED, ResourceOutcome::Rejected)
        );
        assert_eq!(
            classify_failure(&ValidatorError::PoolShutdown),
            (PIPELINE_REJECTED, ResourceOutcome::Rejected)
        );
        assert_eq!(
            classify_failure(&ValidatorError::worker_fault("crash")),
            (PIPELINE_ERROR, ResourceOutcome::Failed)
        );
    }

    #[test]
    fn test_cancellation_flag_shared() {
        let flag = CancellationFlag::new();
        let options = BatchOptions {
            cancellation: Some(flag.clone()),
            ..Default::default()
        };
        assert!(!options.is_cancelled());
        flag.cancel();
        assert!(options.is_cancelled());
        assert!(ResourceOutcome::Reused.is_success());
        assert!(!ResourceOutcome::Rejected.is_success());
    }
}
