//! Worker池
//!
//! 池由一个协调器任务驱动，它独占任务队列与Worker集合，所有操作都通过有界命令通道
//! 发送给它。Worker完成、任务超时与Worker启动结果经内部通道回到协调器，
//! 协调器本身从不阻塞等待Worker。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use validator_core::{
    EngineFactory, PoolEvent, PoolMetrics, ValidationResult, ValidationTask, ValidatorError,
    ValidatorResult, WorkerPoolConfig, WorkerStats,
};

use crate::queue::{Prioritized, TaskQueue};
use crate::unit::{WorkAssignment, WorkerReply, WorkerUnit};

const COMMAND_CHANNEL_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 256;

type TaskReply = oneshot::Sender<ValidatorResult<ValidationResult>>;

/// 已提交任务的结果句柄
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    receiver: oneshot::Receiver<ValidatorResult<ValidationResult>>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// 等待任务结果
    pub async fn result(self) -> ValidatorResult<ValidationResult> {
        self.receiver
            .await
            .unwrap_or(Err(ValidatorError::PoolShutdown))
    }
}

enum PoolCommand {
    Submit {
        task: ValidationTask,
        reply: TaskReply,
        ack: oneshot::Sender<ValidatorResult<()>>,
    },
    Metrics {
        reply: oneshot::Sender<PoolMetrics>,
    },
    Shutdown {
        drain_timeout: Duration,
        reply: oneshot::Sender<()>,
    },
    Reinitialize {
        reply: oneshot::Sender<ValidatorResult<()>>,
    },
    UpdateConfig {
        config: WorkerPoolConfig,
        reply: oneshot::Sender<ValidatorResult<()>>,
    },
}

enum TaskOutcome {
    Completed(ValidatorResult<ValidationResult>),
    Crashed(String),
    TimedOut,
}

enum InternalEvent {
    WorkerStarted {
        worker_id: usize,
        result: ValidatorResult<WorkerUnit>,
    },
    TaskFinished {
        worker_id: usize,
        task_id: String,
        outcome: TaskOutcome,
    },
    DrainDeadline {
        generation: u64,
    },
}

struct PendingTask {
    task: ValidationTask,
    reply: TaskReply,
}

impl Prioritized for PendingTask {
    fn priority(&self) -> validator_core::TaskPriority {
        self.task.priority
    }
}

struct InFlight {
    task_id: String,
    reply: TaskReply,
    started: Instant,
    timeout: Duration,
}

struct WorkerSlot {
    unit: WorkerUnit,
    stats: WorkerStats,
    current: Option<InFlight>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Running,
    Draining,
    Stopped,
}

/// Worker池句柄
///
/// 可廉价克隆，所有克隆共享同一个协调器。最后一个句柄被丢弃后协调器终止全部Worker并退出。
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::Sender<PoolCommand>,
    events: broadcast::Sender<PoolEvent>,
}

impl WorkerPool {
    /// 创建Worker池并启动协调器
    ///
    /// 必须在tokio运行时内调用。Worker按需懒创建。
    pub fn new(config: WorkerPoolConfig, factory: Arc<dyn EngineFactory>) -> ValidatorResult<Self> {
        config
            .validate()
            .map_err(|e| ValidatorError::config_error(e.to_string()))?;

        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        info!(
            "创建Worker池: 最大Worker数 {}, 队列深度 {}, 默认超时 {}ms",
            config.max_workers, config.max_queue_depth, config.task_timeout_ms
        );

        let coordinator = Coordinator::new(config, factory, events.clone(), internal_tx);
        tokio::spawn(coordinator.run(command_rx, internal_rx));

        Ok(Self { commands, events })
    }

    /// 提交任务
    ///
    /// 队列已满时返回 `QueueFull`，池已关闭时返回 `PoolShutdown`。
    pub async fn submit(&self, task: ValidationTask) -> ValidatorResult<TaskHandle> {
        let task_id = task.id.clone();
        let (reply, receiver) = oneshot::channel();
        let (ack, ack_rx) = oneshot::channel();

        self.commands
            .send(PoolCommand::Submit { task, reply, ack })
            .await
            .map_err(|_| ValidatorError::PoolShutdown)?;
        ack_rx.await.map_err(|_| ValidatorError::PoolShutdown)??;

        Ok(TaskHandle { task_id, receiver })
    }

    /// 提交任务并等待结果
    pub async fn execute(&self, task: ValidationTask) -> ValidatorResult<ValidationResult> {
        self.submit(task).await?.result().await
    }

    /// 当前运行指标，协调器已退出时返回空指标
    pub async fn metrics(&self) -> PoolMetrics {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(PoolCommand::Metrics { reply }).await.is_err() {
            return PoolMetrics::default();
        }
        rx.await.unwrap_or_default()
    }

    /// 优雅关闭
    ///
    /// 停止派发新任务，最多等待 `drain_timeout` 让在途任务完成，随后终止全部Worker，
    /// 队列中剩余的任务以 `PoolShutdown` 失败。重复调用是安全的。
    pub async fn shutdown(&self, drain_timeout: Duration) {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(PoolCommand::Shutdown {
                drain_timeout,
                reply,
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// 重新开放已关闭的池
    pub async fn reinitialize(&self) -> ValidatorResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(PoolCommand::Reinitialize { reply })
            .await
            .map_err(|_| ValidatorError::PoolShutdown)?;
        rx.await.map_err(|_| ValidatorError::PoolShutdown)?
    }

    /// 更新池配置，新的上限只影响之后的派发
    pub async fn update_config(&self, config: WorkerPoolConfig) -> ValidatorResult<()> {
        config
            .validate()
            .map_err(|e| ValidatorError::config_error(e.to_string()))?;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(PoolCommand::UpdateConfig { config, reply })
            .await
            .map_err(|_| ValidatorError::PoolShutdown)?;
        rx.await.map_err(|_| ValidatorError::PoolShutdown)?
    }

    /// 订阅池事件
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

struct Coordinator {
    config: WorkerPoolConfig,
    factory: Arc<dyn EngineFactory>,
    queue: TaskQueue<PendingTask>,
    workers: BTreeMap<usize, WorkerSlot>,
    /// 正在启动的Worker，值为被替换的旧Worker及原因
    starting: BTreeMap<usize, Option<(usize, String)>>,
    next_worker_id: usize,
    state: PoolState,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    drain_generation: u64,
    events: broadcast::Sender<PoolEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    tasks_completed: u64,
    tasks_failed: u64,
    tasks_timed_out: u64,
    tasks_discarded: u64,
    workers_restarted: u64,
}

impl Coordinator {
    fn new(
        config: WorkerPoolConfig,
        factory: Arc<dyn EngineFactory>,
        events: broadcast::Sender<PoolEvent>,
        internal_tx: mpsc::UnboundedSender<InternalEvent>,
    ) -> Self {
        Self {
            queue: TaskQueue::new(config.max_queue_depth),
            config,
            factory,
            workers: BTreeMap::new(),
            starting: BTreeMap::new(),
            next_worker_id: 1,
            state: PoolState::Running,
            shutdown_waiters: Vec::new(),
            drain_generation: 0,
            events,
            internal_tx,
            tasks_completed: 0,
            tasks_failed: 0,
            tasks_timed_out: 0,
            tasks_discarded: 0,
            workers_restarted: 0,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<PoolCommand>,
        mut internal: mpsc::UnboundedReceiver<InternalEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event),
            }
        }

        debug!("Worker池句柄已全部释放，协调器退出");
        self.stop(true);
    }

    fn handle_command(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Submit { task, reply, ack } => {
                let _ = ack.send(self.accept(task, reply));
            }
            PoolCommand::Metrics { reply } => {
                self.reap_dead_workers();
                let _ = reply.send(self.snapshot());
            }
            PoolCommand::Shutdown {
                drain_timeout,
                reply,
            } => self.begin_shutdown(drain_timeout, reply),
            PoolCommand::Reinitialize { reply } => {
                let result = match self.state {
                    PoolState::Stopped => {
                        info!("Worker池重新开放");
                        self.state = PoolState::Running;
                        Ok(())
                    }
                    PoolState::Running => Ok(()),
                    PoolState::Draining => Err(ValidatorError::internal("Worker池正在关闭，无法重新开放")),
                };
                let _ = reply.send(result);
            }
            PoolCommand::UpdateConfig { config, reply } => {
                info!(
                    "更新Worker池配置: 最大Worker数 {} -> {}, 队列深度 {} -> {}",
                    self.config.max_workers,
                    config.max_workers,
                    self.config.max_queue_depth,
                    config.max_queue_depth
                );
                self.queue.set_max_depth(config.max_queue_depth);
                self.config = config;
                self.trim_idle_workers();
                self.dispatch();
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::WorkerStarted { worker_id, result } => {
                self.on_worker_started(worker_id, result)
            }
            InternalEvent::TaskFinished {
                worker_id,
                task_id,
                outcome,
            } => self.on_task_finished(worker_id, task_id, outcome),
            InternalEvent::DrainDeadline { generation } => {
                if self.state == PoolState::Draining && generation == self.drain_generation {
                    warn!("等待在途任务超时，强制关闭Worker池");
                    self.stop(true);
                }
            }
        }
    }

    fn accept(&mut self, task: ValidationTask, reply: TaskReply) -> ValidatorResult<()> {
        if self.state != PoolState::Running {
            return Err(ValidatorError::PoolShutdown);
        }

        // 尚未运行的Worker名额（启动中或可再启动）各认领一个排队任务，不计入队列深度
        let headroom = self.config.max_workers.saturating_sub(self.workers.len());
        let task_id = task.id.clone();
        if let Err(rejected) = self
            .queue
            .enqueue_with_headroom(PendingTask { task, reply }, headroom)
        {
            let (_, error) = rejected.into_parts();
            counter!("validator_pool_tasks_total", "outcome" => "rejected").increment(1);
            warn!("任务 {} 被拒绝: {}", task_id, error);
            return Err(error);
        }

        debug!("任务 {} 已入队，队列深度 {}", task_id, self.queue.depth());
        self.dispatch();
        Ok(())
    }

    /// 把队首任务派发给空闲Worker，必要时按上限启动新Worker
    fn dispatch(&mut self) {
        if self.state != PoolState::Running {
            return;
        }

        self.reap_dead_workers();
        self.discard_abandoned();

        while !self.queue.is_empty() {
            let Some(worker_id) = self.idle_worker() else {
                break;
            };
            let Some(pending) = self.queue.dequeue() else {
                break;
            };
            self.assign(worker_id, pending);
        }

        let capacity = self
            .config
            .max_workers
            .saturating_sub(self.workers.len() + self.starting.len());
        let wanted = self.queue.depth().saturating_sub(self.starting.len());
        for _ in 0..capacity.min(wanted) {
            self.start_worker(None);
        }

        gauge!("validator_pool_queue_depth").set(self.queue.depth() as f64);
    }

    /// 丢弃提交方已放弃等待的排队任务，它们不再派发给Worker
    fn discard_abandoned(&mut self) {
        let discarded = self.queue.retain(|pending| !pending.reply.is_closed());
        if discarded > 0 {
            self.tasks_discarded += discarded as u64;
            counter!("validator_pool_tasks_total", "outcome" => "discarded")
                .increment(discarded as u64);
            debug!("丢弃 {} 个已无人等待的排队任务", discarded);
        }
    }

    /// 移除线程已退出的空闲Worker，排队任务需要时由派发重新启动
    fn reap_dead_workers(&mut self) {
        let dead: Vec<usize> = self
            .workers
            .iter()
            .filter(|(_, slot)| slot.current.is_none() && !slot.unit.is_alive())
            .map(|(id, _)| *id)
            .collect();

        for worker_id in dead {
            if let Some(slot) = self.workers.remove(&worker_id) {
                warn!("空闲Worker {} 的线程已退出，移除", worker_id);
                slot.unit.terminate();
                self.emit(PoolEvent::WorkerReplaced {
                    old_worker_id: worker_id,
                    new_worker_id: None,
                    reason: "空闲Worker线程已退出".to_string(),
                });
            }
            gauge!("validator_pool_workers").set(self.workers.len() as f64);
        }
    }

    fn idle_worker(&self) -> Option<usize> {
        self.workers
            .iter()
            .find(|(_, slot)| slot.current.is_none())
            .map(|(id, _)| *id)
    }

    fn assign(&mut self, worker_id: usize, pending: PendingTask) {
        let Some(slot) = self.workers.get_mut(&worker_id) else {
            self.queue.requeue_front(pending);
            return;
        };

        let PendingTask { task, reply } = pending;
        let timeout = task.timeout.unwrap_or_else(|| self.config.task_timeout());
        let task_id = task.id.clone();
        let (priority, task_timeout, enqueued_at) = (task.priority, task.timeout, task.enqueued_at);
        let (worker_tx, worker_rx) = oneshot::channel();

        let assignment = WorkAssignment {
            task_id: task_id.clone(),
            resource: task.resource,
            resource_type: task.resource_type,
            settings: task.settings,
            fhir_version: task.fhir_version,
            reply: worker_tx,
        };

        if let Err(returned) = slot.unit.assign(assignment) {
            // 线程已退出，任务原样放回队首后替换Worker
            warn!("Worker {} 已退出，任务 {} 放回队列", worker_id, task_id);
            let WorkAssignment {
                resource,
                resource_type,
                settings,
                fhir_version,
                ..
            } = *returned;
            let task = ValidationTask {
                id: task_id,
                priority,
                resource,
                resource_type,
                settings,
                fhir_version,
                timeout: task_timeout,
                enqueued_at,
            };
            self.queue.requeue_front(PendingTask { task, reply });
            self.replace_worker(worker_id, "Worker线程已退出".to_string());
            return;
        }

        slot.stats.mark_busy(&task_id);
        slot.current = Some(InFlight {
            task_id: task_id.clone(),
            reply,
            started: Instant::now(),
            timeout,
        });
        debug!("任务 {} 派发给Worker {}", task_id, worker_id);

        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, worker_rx).await {
                Ok(Ok(WorkerReply::Completed(result))) => TaskOutcome::Completed(result),
                Ok(Ok(WorkerReply::Crashed(message))) => TaskOutcome::Crashed(message),
                Ok(Err(_)) => TaskOutcome::Crashed("Worker线程在返回结果前退出".to_string()),
                Err(_) => TaskOutcome::TimedOut,
            };
            let _ = internal.send(InternalEvent::TaskFinished {
                worker_id,
                task_id,
                outcome,
            });
        });
    }

    fn on_task_finished(&mut self, worker_id: usize, task_id: String, outcome: TaskOutcome) {
        let Some(slot) = self.workers.get_mut(&worker_id) else {
            debug!("忽略已移除Worker {} 的任务 {} 结果", worker_id, task_id);
            return;
        };
        let in_flight = match slot.current.take() {
            Some(in_flight) if in_flight.task_id == task_id => in_flight,
            other => {
                slot.current = other;
                debug!("忽略Worker {} 上过期任务 {} 的结果", worker_id, task_id);
                return;
            }
        };

        let elapsed_ms = in_flight.started.elapsed().as_millis() as u64;
        histogram!("validator_pool_task_duration_ms").record(elapsed_ms as f64);

        match outcome {
            TaskOutcome::Completed(Ok(result)) => {
                slot.stats.record_completion(elapsed_ms, false);
                self.tasks_completed += 1;
                counter!("validator_pool_tasks_total", "outcome" => "completed").increment(1);
                let _ = in_flight.reply.send(Ok(result));
            }
            TaskOutcome::Completed(Err(e)) => {
                slot.stats.record_completion(elapsed_ms, true);
                self.tasks_failed += 1;
                counter!("validator_pool_tasks_total", "outcome" => "failed").increment(1);
                warn!("任务 {} 在Worker {} 上执行失败: {}", task_id, worker_id, e);
                self.emit(PoolEvent::TaskFailed {
                    task_id: task_id.clone(),
                    worker_id,
                    error: e.to_string(),
                });
                let _ = in_flight.reply.send(Err(e));
            }
            TaskOutcome::Crashed(message) => {
                slot.stats.record_completion(elapsed_ms, true);
                self.tasks_failed += 1;
                counter!("validator_pool_tasks_total", "outcome" => "crashed").increment(1);
                error!("Worker {} 执行任务 {} 时崩溃: {}", worker_id, task_id, message);
                self.emit(PoolEvent::TaskFailed {
                    task_id: task_id.clone(),
                    worker_id,
                    error: message.clone(),
                });
                let _ = in_flight
                    .reply
                    .send(Err(ValidatorError::worker_fault(message.clone())));
                self.replace_worker(worker_id, format!("Worker崩溃: {message}"));
            }
            TaskOutcome::TimedOut => {
                let timeout_ms = in_flight.timeout.as_millis() as u64;
                slot.stats.record_completion(elapsed_ms, true);
                self.tasks_timed_out += 1;
                counter!("validator_pool_task_timeouts_total").increment(1);
                warn!(
                    "任务 {} 在Worker {} 上超时 ({}ms)",
                    task_id, worker_id, timeout_ms
                );
                self.emit(PoolEvent::TaskTimedOut {
                    task_id: task_id.clone(),
                    worker_id,
                    timeout_ms,
                });
                let _ = in_flight
                    .reply
                    .send(Err(ValidatorError::task_timeout(&task_id, timeout_ms)));
                self.replace_worker(worker_id, format!("任务 {task_id} 超时"));
            }
        }

        if self.state == PoolState::Draining {
            if self.in_flight() == 0 {
                info!("在途任务已全部完成");
                self.stop(false);
            }
            return;
        }

        self.dispatch();
    }

    fn start_worker(&mut self, replaces: Option<(usize, String)>) {
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;
        self.starting.insert(worker_id, replaces);

        let factory = Arc::clone(&self.factory);
        let startup_timeout = self.config.worker_startup_timeout();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = WorkerUnit::spawn(worker_id, factory, startup_timeout).await;
            let _ = internal.send(InternalEvent::WorkerStarted { worker_id, result });
        });
    }

    fn on_worker_started(&mut self, worker_id: usize, result: ValidatorResult<WorkerUnit>) {
        let replaces = self.starting.remove(&worker_id).flatten();

        let unit = match result {
            Ok(unit) => unit,
            Err(e) => {
                error!("启动Worker {} 失败: {}", worker_id, e);
                let failed_id = replaces.map(|(old, _)| old).unwrap_or(worker_id);
                self.emit(PoolEvent::WorkerRestartFailed {
                    worker_id: failed_id,
                    error: e.to_string(),
                });
                // 没有任何Worker可用时，排队任务无法继续
                if self.workers.is_empty() && self.starting.is_empty() {
                    self.fail_queued(|| ValidatorError::worker_fault(e.to_string()));
                }
                return;
            }
        };

        if self.state != PoolState::Running || self.workers.len() >= self.config.max_workers {
            debug!("Worker {} 启动时池已不再需要，直接终止", worker_id);
            unit.terminate();
            return;
        }

        self.workers.insert(
            worker_id,
            WorkerSlot {
                unit,
                stats: WorkerStats::new(worker_id),
                current: None,
            },
        );
        gauge!("validator_pool_workers").set(self.workers.len() as f64);

        match replaces {
            Some((old_worker_id, reason)) => self.emit(PoolEvent::WorkerReplaced {
                old_worker_id,
                new_worker_id: Some(worker_id),
                reason,
            }),
            None => self.emit(PoolEvent::WorkerStarted { worker_id }),
        }

        self.dispatch();
    }

    /// 终止并移除Worker，池仍在运行时尝试启动替代者
    fn replace_worker(&mut self, worker_id: usize, reason: String) {
        if let Some(slot) = self.workers.remove(&worker_id) {
            slot.unit.terminate();
        }
        self.workers_restarted += 1;
        counter!("validator_pool_worker_restarts_total").increment(1);
        gauge!("validator_pool_workers").set(self.workers.len() as f64);

        if self.state == PoolState::Running
            && self.workers.len() + self.starting.len() < self.config.max_workers
        {
            info!("替换Worker {}: {}", worker_id, reason);
            self.start_worker(Some((worker_id, reason)));
        } else {
            self.emit(PoolEvent::WorkerReplaced {
                old_worker_id: worker_id,
                new_worker_id: None,
                reason,
            });
        }
    }

    /// 配置下调后终止多余的空闲Worker
    fn trim_idle_workers(&mut self) {
        while self.workers.len() > self.config.max_workers {
            let Some(worker_id) = self.idle_worker() else {
                break;
            };
            if let Some(slot) = self.workers.remove(&worker_id) {
                debug!("终止多余的空闲Worker {}", worker_id);
                slot.unit.terminate();
            }
        }
    }

    fn begin_shutdown(&mut self, drain_timeout: Duration, reply: oneshot::Sender<()>) {
        match self.state {
            PoolState::Stopped => {
                let _ = reply.send(());
                return;
            }
            PoolState::Draining => {
                self.shutdown_waiters.push(reply);
                return;
            }
            PoolState::Running => {}
        }

        let in_flight = self.in_flight();
        info!(
            "开始关闭Worker池: 在途任务 {}, 排队任务 {}",
            in_flight,
            self.queue.depth()
        );
        self.state = PoolState::Draining;
        self.shutdown_waiters.push(reply);
        self.emit(PoolEvent::ShutdownStarted { in_flight });

        if in_flight == 0 {
            self.stop(false);
            return;
        }

        self.drain_generation += 1;
        let generation = self.drain_generation;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(drain_timeout).await;
            let _ = internal.send(InternalEvent::DrainDeadline { generation });
        });
    }

    /// 终止全部Worker并清空队列
    fn stop(&mut self, forced: bool) {
        for (worker_id, slot) in std::mem::take(&mut self.workers) {
            if let Some(in_flight) = slot.current {
                debug!("任务 {} 因关闭被中止", in_flight.task_id);
                let _ = in_flight.reply.send(Err(ValidatorError::PoolShutdown));
            }
            debug!("终止Worker {}", worker_id);
            slot.unit.terminate();
        }
        self.fail_queued(|| ValidatorError::PoolShutdown);

        let was_stopped = self.state == PoolState::Stopped;
        self.state = PoolState::Stopped;
        gauge!("validator_pool_workers").set(0.0);
        gauge!("validator_pool_queue_depth").set(0.0);

        if !was_stopped {
            info!("Worker池已关闭 (强制: {})", forced);
            self.emit(PoolEvent::ShutdownCompleted { forced });
        }
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn fail_queued(&mut self, error: impl Fn() -> ValidatorError) {
        for pending in self.queue.drain() {
            debug!("排队任务 {} 失败", pending.task.id);
            let _ = pending.reply.send(Err(error()));
        }
    }

    fn in_flight(&self) -> usize {
        self.workers
            .values()
            .filter(|slot| slot.current.is_some())
            .count()
    }

    fn snapshot(&self) -> PoolMetrics {
        let busy_workers = self.in_flight();
        PoolMetrics {
            total_workers: self.workers.len(),
            busy_workers,
            idle_workers: self.workers.len() - busy_workers,
            queue_depth: self.queue.depth(),
            active_tasks: busy_workers + self.queue.depth(),
            accepting: self.state == PoolState::Running,
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            tasks_timed_out: self.tasks_timed_out,
            tasks_discarded: self.tasks_discarded,
            workers_restarted: self.workers_restarted,
            workers: self.workers.values().map(|slot| slot.stats.clone()).collect(),
        }
    }

    fn emit(&self, event: PoolEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use validator_core::ValidationSettings;
    use validator_testing_utils::{patient_with, test_pool_config, MockEngineFactory, TaskBuilder};

    /// 让Worker线程在引擎中崩溃退出，但保留其句柄
    async fn dead_unit(factory: Arc<dyn EngineFactory>) -> WorkerUnit {
        let unit = WorkerUnit::spawn(1, factory, Duration::from_secs(5))
            .await
            .unwrap();
        let (reply, rx) = oneshot::channel();
        let crash = WorkAssignment {
            task_id: "crash".to_string(),
            resource: patient_with("crash", json!({"mockPanic": "engine lost"})),
            resource_type: "Patient".to_string(),
            settings: Arc::new(ValidationSettings::default()),
            fhir_version: None,
            reply,
        };
        assert!(unit.assign(crash).is_ok());
        assert!(matches!(rx.await.unwrap(), WorkerReply::Crashed(_)));

        for _ in 0..100 {
            if !unit.is_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!unit.is_alive());
        unit
    }

    #[tokio::test]
    async fn test_dead_idle_worker_removed_before_dispatch() {
        let factory = MockEngineFactory::new();
        let engines = factory.probe();
        let (events, mut event_rx) = broadcast::channel(16);
        let (internal_tx, mut internal_rx) = mpsc::unbounded_channel();
        let mut coordinator =
            Coordinator::new(test_pool_config(1), Arc::new(factory), events, internal_tx);

        let unit = dead_unit(Arc::clone(&coordinator.factory)).await;
        coordinator.workers.insert(
            1,
            WorkerSlot {
                unit,
                stats: WorkerStats::new(1),
                current: None,
            },
        );
        coordinator.next_worker_id = 2;

        // 指标不再把已退出的线程计为Worker
        let (reply, rx) = oneshot::channel();
        coordinator.handle_command(PoolCommand::Metrics { reply });
        let metrics = rx.await.unwrap();
        assert_eq!(metrics.total_workers, 0);
        assert!(matches!(
            event_rx.try_recv(),
            Ok(PoolEvent::WorkerReplaced {
                old_worker_id: 1,
                new_worker_id: None,
                ..
            })
        ));

        let (reply, result_rx) = oneshot::channel();
        coordinator
            .accept(TaskBuilder::new("p1").build(), reply)
            .unwrap();
        assert_eq!(coordinator.starting.len(), 1);

        // 新Worker启动后执行任务
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(5), internal_rx.recv())
                .await
                .unwrap()
                .unwrap();
            coordinator.handle_internal(event);
        }
        let result = result_rx.await.unwrap().unwrap();
        assert_eq!(result.resource_id.as_deref(), Some("p1"));
        assert_eq!(coordinator.snapshot().total_workers, 1);
        assert_eq!(engines.engines_created(), 2);

        coordinator.stop(true);
    }
}
