//! 流水线编排器
//!
//! 每个请求的状态机为 `Pending → Running → {Completed | Failed | Cancelled}`。
//! 编排器负责并发上限、活动流水线注册表、可选的重新验证判断、进度跟踪与事件分发；
//! 实际的逐资源执行委托给 [`BatchProcessor`]。
//!
//! 注册表只保存运行中的流水线，结束后立即移除，历史记录由持久化协作方负责。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, error, info, instrument, warn};
use validator_core::{
    fingerprint, PipelineConfig, PipelineEvent, PipelineProgress, PipelineRequest,
    PipelineResult, PipelineStatus, PipelineStatusQuery, RevalidationConfig, RevalidationStore,
    SettingsChanged, ValidationResult, ValidationSettings, ValidatorError, ValidatorResult,
    PIPELINE_CANCELLED, PIPELINE_ERROR,
};

use crate::aggregate::{measure, summarize};
use crate::batch_processor::{
    BatchOptions, BatchProcessor, CancellationFlag, ProgressSink, ProgressUpdate, ResourceOutcome,
};
use crate::revalidation::RevalidationPolicy;

/// 单个运行中流水线的可变状态，由进度回调与编排器共享
struct RunState {
    progress: PipelineProgress,
    results: Vec<Option<ValidationResult>>,
    reused: usize,
}

struct ActivePipeline {
    run: Arc<Mutex<RunState>>,
    cancel_tx: watch::Sender<bool>,
    cancellation: CancellationFlag,
}

type Registry = Arc<Mutex<HashMap<String, ActivePipeline>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 流水线编排器
pub struct PipelineOrchestrator {
    processor: Arc<BatchProcessor>,
    config: RwLock<PipelineConfig>,
    revalidation: RwLock<RevalidationConfig>,
    settings: RwLock<Arc<ValidationSettings>>,
    store: Option<Arc<dyn RevalidationStore>>,
    active: Registry,
    events: broadcast::Sender<PipelineEvent>,
}

impl PipelineOrchestrator {
    pub fn new(
        processor: Arc<BatchProcessor>,
        config: PipelineConfig,
        settings: ValidationSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            processor,
            config: RwLock::new(config),
            revalidation: RwLock::new(RevalidationConfig::default()),
            settings: RwLock::new(Arc::new(settings)),
            store: None,
            active: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// 挂接重新验证所需的存储，只有挂接后才会做重新验证判断
    pub fn with_revalidation_store(
        mut self,
        store: Arc<dyn RevalidationStore>,
        config: RevalidationConfig,
    ) -> Self {
        self.store = Some(store);
        self.revalidation = RwLock::new(config);
        self
    }

    pub fn processor(&self) -> &Arc<BatchProcessor> {
        &self.processor
    }

    /// 订阅流水线事件
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// 执行流水线
    ///
    /// 只有编排层面的拒绝（并发上限、重复请求）以 `Err` 返回；单个资源的失败被吸收为
    /// 合成结果，取消与编排故障分别以 `Cancelled`、`Failed` 状态的结果返回。
    #[instrument(skip_all, fields(request_id = %request.request_id()))]
    pub async fn execute_pipeline(
        &self,
        request: PipelineRequest,
    ) -> ValidatorResult<PipelineResult> {
        let request_id = request.request_id().to_string();
        let total = request.resources.len();
        let (run, mut cancel_rx, cancellation) = self.register(&request_id, total).await?;

        let started = Instant::now();
        let mut outcome = PipelineResult::pending(&request_id);
        outcome.status = PipelineStatus::Running;

        info!("流水线 {} 开始: {} 个资源", request_id, total);
        counter!("validator_pipelines_total", "status" => "started").increment(1);
        self.emit(PipelineEvent::Started {
            request_id: request_id.clone(),
            total_resources: total,
            requested_by: request.context.requested_by.clone(),
        });

        let execution = self.run_pipeline(&request, Arc::clone(&run), cancellation.clone());
        let cancelled = async move {
            // 发送端被丢弃说明流水线已被注销，视为永不取消
            if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        let execution_result = tokio::select! {
            result = execution => Some(result),
            _ = cancelled => None,
        };
        // 批处理与取消同时结束时以取消为准
        let execution_result = execution_result.filter(|_| !cancellation.is_cancelled());

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let result = match execution_result {
            Some(Ok(results)) => {
                let reused = lock(&run).reused;
                outcome.summary = summarize(&results, reused);
                outcome.performance = measure(&results, elapsed_ms);
                outcome.results = results;
                outcome.finish(PipelineStatus::Completed);

                info!(
                    "流水线 {} 完成: 有效 {}, 无效 {}, 失败 {}, 耗时 {}ms",
                    request_id,
                    outcome.summary.valid_resources,
                    outcome.summary.invalid_resources,
                    outcome.summary.failed_validations,
                    elapsed_ms
                );
                self.deregister(&request_id);
                self.emit(PipelineEvent::Completed {
                    request_id: request_id.clone(),
                    summary: outcome.summary.clone(),
                    performance: outcome.performance.clone(),
                });
                "completed"
            }
            Some(Err(e)) => {
                error!("流水线 {} 失败: {}", request_id, e);
                outcome.results =
                    self.collect_partial(&request, &run, PIPELINE_ERROR, "流水线执行失败，资源未处理");
                outcome.summary = summarize(&outcome.results, lock(&run).reused);
                outcome.performance = measure(&outcome.results, elapsed_ms);
                outcome.error = Some(e.to_string());
                outcome.finish(PipelineStatus::Failed);

                self.deregister(&request_id);
                self.emit(PipelineEvent::Failed {
                    request_id: request_id.clone(),
                    error: e.to_string(),
                });
                "failed"
            }
            None => {
                // 已在 cancel_pipeline 中注销并发出事件
                info!("流水线 {} 已取消", request_id);
                cancellation.cancel();
                outcome.results =
                    self.collect_partial(&request, &run, PIPELINE_CANCELLED, "流水线已取消，资源未处理");
                outcome.summary = summarize(&outcome.results, lock(&run).reused);
                outcome.performance = measure(&outcome.results, elapsed_ms);
                outcome.finish(PipelineStatus::Cancelled);
                "cancelled"
            }
        };

        counter!("validator_pipelines_total", "status" => result).increment(1);
        histogram!("validator_pipeline_duration_ms").record(elapsed_ms as f64);
        gauge!("validator_active_pipelines").set(lock(&self.active).len() as f64);
        Ok(outcome)
    }

    /// 取消运行中的流水线
    ///
    /// 已派发给Worker的任务继续执行完毕，但结果被丢弃。返回是否找到该流水线。
    pub fn cancel_pipeline(&self, request_id: &str) -> bool {
        let Some(active) = lock(&self.active).remove(request_id) else {
            debug!("取消失败，流水线 {} 不在运行中", request_id);
            return false;
        };

        active.cancellation.cancel();
        let _ = active.cancel_tx.send(true);
        info!("流水线 {} 被取消", request_id);
        self.emit(PipelineEvent::Cancelled {
            request_id: request_id.to_string(),
        });
        true
    }

    pub fn get_status(&self, request_id: &str) -> PipelineStatusQuery {
        if lock(&self.active).contains_key(request_id) {
            PipelineStatusQuery::Running
        } else {
            PipelineStatusQuery::NotFound
        }
    }

    pub fn get_progress(&self, request_id: &str) -> Option<PipelineProgress> {
        lock(&self.active)
            .get(request_id)
            .map(|active| lock(&active.run).progress.clone())
    }

    pub fn active_pipelines(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.active).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn config(&self) -> PipelineConfig {
        self.config.read().await.clone()
    }

    /// 更新编排配置，新上限只影响之后的请求
    pub async fn update_config(&self, config: PipelineConfig) -> ValidatorResult<()> {
        config
            .validate()
            .map_err(|e| ValidatorError::config_error(e.to_string()))?;
        info!(
            "更新流水线配置: 最大并发流水线 {}",
            config.max_concurrent_pipelines
        );
        *self.config.write().await = config;
        Ok(())
    }

    pub async fn update_revalidation_config(&self, config: RevalidationConfig) -> ValidatorResult<()> {
        config
            .validate()
            .map_err(|e| ValidatorError::config_error(e.to_string()))?;
        *self.revalidation.write().await = config;
        Ok(())
    }

    /// 当前生效的验证设置
    pub async fn settings(&self) -> Arc<ValidationSettings> {
        Arc::clone(&*self.settings.read().await)
    }

    /// 应用新设置并清空结果缓存；运行中的流水线继续使用各自捕获的设置
    pub async fn apply_settings(&self, event: &SettingsChanged) -> usize {
        *self.settings.write().await = Arc::clone(&event.settings);
        self.processor.on_settings_changed(event).await
    }

    async fn register(
        &self,
        request_id: &str,
        total: usize,
    ) -> ValidatorResult<(Arc<Mutex<RunState>>, watch::Receiver<bool>, CancellationFlag)> {
        let max = self.config.read().await.max_concurrent_pipelines;
        let mut active = lock(&self.active);

        if active.len() >= max {
            warn!(
                "拒绝流水线 {}: 运行中流水线已达上限 {}",
                request_id, max
            );
            counter!("validator_pipelines_total", "status" => "rejected").increment(1);
            return Err(ValidatorError::ConcurrencyLimitExceeded { max });
        }
        if active.contains_key(request_id) {
            return Err(ValidatorError::DuplicatePipeline {
                request_id: request_id.to_string(),
            });
        }

        let run = Arc::new(Mutex::new(RunState {
            progress: PipelineProgress::new(request_id, total),
            results: vec![None; total],
            reused: 0,
        }));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancellation = CancellationFlag::new();
        active.insert(
            request_id.to_string(),
            ActivePipeline {
                run: Arc::clone(&run),
                cancel_tx,
                cancellation: cancellation.clone(),
            },
        );
        gauge!("validator_active_pipelines").set(active.len() as f64);
        Ok((run, cancel_rx, cancellation))
    }

    fn deregister(&self, request_id: &str) {
        lock(&self.active).remove(request_id);
    }

    async fn run_pipeline(
        &self,
        request: &PipelineRequest,
        run: Arc<Mutex<RunState>>,
        cancellation: CancellationFlag,
    ) -> ValidatorResult<Vec<ValidationResult>> {
        let request_id = request.request_id().to_string();
        let overrides = request.config.clone().unwrap_or_default();
        let settings = match overrides.settings {
            Some(settings) => {
                settings
                    .validate()
                    .map_err(|e| ValidatorError::config_error(e.to_string()))?;
                Arc::new(settings)
            }
            None => self.settings().await,
        };
        let force = overrides.force_revalidation.unwrap_or(false);

        let pending = self
            .reuse_unchanged(request, &settings, force, &run)
            .await;

        let inputs: Vec<_> = pending
            .iter()
            .map(|&position| request.resources[position].clone())
            .collect();
        let options = BatchOptions {
            parallel: overrides.parallel,
            max_concurrent: overrides.max_concurrent,
            timeout: overrides.timeout_ms.map(Duration::from_millis),
            bypass_cache: force,
            cancellation: Some(cancellation),
        };

        let sink: ProgressSink = {
            let run = Arc::clone(&run);
            let events = self.events.clone();
            let positions = pending.clone();
            Arc::new(move |update: ProgressUpdate| {
                let Some(&position) = positions.get(update.index) else {
                    return;
                };
                record_progress(
                    &run,
                    &events,
                    &update.request_id,
                    position,
                    update.result,
                    update.outcome,
                );
            })
        };

        let processed = self
            .processor
            .process_resources(&inputs, settings, &request_id, &options, Some(&sink))
            .await;

        if processed.len() != inputs.len() {
            return Err(ValidatorError::pipeline_fault(format!(
                "批处理结果数量不一致: 期望 {}, 实际 {}",
                inputs.len(),
                processed.len()
            )));
        }

        let mut state = lock(&run);
        for entry in processed {
            let position = pending[entry.index];
            if state.results[position].is_none() {
                state.results[position] = Some(entry.result);
            }
        }

        state
            .results
            .iter()
            .enumerate()
            .map(|(position, result)| {
                result.clone().ok_or_else(|| {
                    ValidatorError::pipeline_fault(format!("资源 {position} 缺少验证结果"))
                })
            })
            .collect()
    }

    /// 挂接了存储时，复用无需重新验证的已存储结果，返回仍需验证的资源位置
    async fn reuse_unchanged(
        &self,
        request: &PipelineRequest,
        settings: &ValidationSettings,
        force: bool,
        run: &Arc<Mutex<RunState>>,
    ) -> Vec<usize> {
        let all: Vec<usize> = (0..request.resources.len()).collect();
        let Some(store) = &self.store else {
            return all;
        };

        let policy = RevalidationPolicy::from(&*self.revalidation.read().await).with_force(force);
        let settings_hash = settings.fingerprint();
        let mut pending = Vec::with_capacity(all.len());

        for position in all {
            let input = &request.resources[position];
            let Some(resource_id) = input.resource_id() else {
                pending.push(position);
                continue;
            };

            let prior = match store.load_prior(&input.resource_type, &resource_id).await {
                Ok(prior) => prior,
                Err(e) => {
                    warn!(
                        "读取 {}/{} 的历史验证记录失败，重新验证: {}",
                        input.resource_type, resource_id, e
                    );
                    None
                }
            };
            let content_hash = fingerprint::content_hash(&input.resource);
            let decision = policy.decide(prior.as_ref(), &content_hash, &settings_hash, Utc::now());
            debug!(
                "资源 {}/{} 重新验证判断: {:?}",
                input.resource_type, resource_id, decision.reason
            );

            match prior {
                Some(prior) if !decision.needs_revalidation => {
                    lock(run).reused += 1;
                    record_progress(
                        run,
                        &self.events,
                        request.request_id(),
                        position,
                        prior.result,
                        ResourceOutcome::Reused,
                    );
                }
                _ => pending.push(position),
            }
        }

        pending
    }

    /// 取消或失败时补齐结果：已接受的保留，其余填充合成条目
    fn collect_partial(
        &self,
        request: &PipelineRequest,
        run: &Arc<Mutex<RunState>>,
        code: &str,
        message: &str,
    ) -> Vec<ValidationResult> {
        let state = lock(run);
        request
            .resources
            .iter()
            .zip(state.results.iter())
            .map(|(input, result)| {
                result.clone().unwrap_or_else(|| {
                    ValidationResult::pipeline_failure(
                        input.resource_type.clone(),
                        input.resource_id(),
                        code,
                        message,
                        0,
                    )
                })
            })
            .collect()
    }

    fn emit(&self, event: PipelineEvent) {
        debug!("流水线事件: {} ({})", event.name(), event.request_id());
        let _ = self.events.send(event);
    }
}

fn record_progress(
    run: &Mutex<RunState>,
    events: &broadcast::Sender<PipelineEvent>,
    request_id: &str,
    position: usize,
    result: ValidationResult,
    outcome: ResourceOutcome,
) {
    let progress = {
        let mut state = lock(run);
        if state.results[position].is_some() {
            return;
        }
        state.progress.record(&result);
        let progress = state.progress.clone();
        let event = PipelineEvent::ResourceProcessed {
            request_id: request_id.to_string(),
            index: position,
            resource_type: result.resource_type.clone(),
            resource_id: result.resource_id.clone(),
            is_valid: result.is_valid,
            from_cache: outcome == ResourceOutcome::Cached,
        };
        state.results[position] = Some(result);
        let _ = events.send(event);
        progress
    };

    let _ = events.send(PipelineEvent::Progress {
        request_id: request_id.to_string(),
        progress,
    });
}
