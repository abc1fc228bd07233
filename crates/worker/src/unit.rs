//! Worker执行单元
//!
//! 每个Worker是一个独立的操作系统线程，在线程内通过 [`EngineFactory`] 创建自己的引擎实例，
//! 一次只处理一个任务，通过通道与协调器通信。引擎内部的panic被捕获并上报为Worker故障，
//! 线程随即退出，由Worker池负责替换。

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use validator_core::{
    EngineFactory, ValidationEngine, ValidationResult, ValidationSettings, ValidatorError,
    ValidatorResult,
};

/// 派发给Worker的一次执行
pub struct WorkAssignment {
    pub task_id: String,
    pub resource: serde_json::Value,
    pub resource_type: String,
    pub settings: Arc<ValidationSettings>,
    pub fhir_version: Option<String>,
    pub reply: oneshot::Sender<WorkerReply>,
}

/// Worker对一次执行的回复
#[derive(Debug)]
pub enum WorkerReply {
    /// 引擎正常返回（结果可能是验证错误）
    Completed(ValidatorResult<ValidationResult>),
    /// 引擎panic，Worker线程已退出
    Crashed(String),
}

enum WorkerMessage {
    Execute(WorkAssignment),
    Terminate,
}

/// Worker执行单元
pub struct WorkerUnit {
    id: usize,
    sender: std_mpsc::Sender<WorkerMessage>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerUnit {
    /// 启动Worker线程并等待引擎实例就绪
    pub async fn spawn(
        id: usize,
        factory: Arc<dyn EngineFactory>,
        startup_timeout: Duration,
    ) -> ValidatorResult<Self> {
        let (sender, receiver) = std_mpsc::channel::<WorkerMessage>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<String, String>>();

        let thread = thread::Builder::new()
            .name(format!("validation-worker-{id}"))
            .spawn(move || {
                let engine = match panic::catch_unwind(AssertUnwindSafe(|| factory.create())) {
                    Ok(Ok(engine)) => engine,
                    Ok(Err(e)) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                    Err(payload) => {
                        let _ = ready_tx.send(Err(panic_message(payload.as_ref())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(engine.name().to_string()));
                run_worker_loop(id, engine, receiver);
            })
            .map_err(|e| ValidatorError::worker_fault(format!("创建Worker线程失败: {e}")))?;

        match tokio::time::timeout(startup_timeout, ready_rx).await {
            Ok(Ok(Ok(engine_name))) => {
                info!("Worker {} 已启动，引擎: {}", id, engine_name);
                Ok(Self {
                    id,
                    sender,
                    thread: Some(thread),
                })
            }
            Ok(Ok(Err(e))) => Err(ValidatorError::worker_fault(format!(
                "Worker {id} 创建验证引擎失败: {e}"
            ))),
            Ok(Err(_)) => Err(ValidatorError::worker_fault(format!(
                "Worker {id} 启动过程中线程意外退出"
            ))),
            Err(_) => {
                // 线程仍在初始化，放弃它；发送端被丢弃后线程会在初始化完成时自行退出
                drop(sender);
                Err(ValidatorError::worker_fault(format!(
                    "Worker {id} 启动超时 ({startup_timeout:?})"
                )))
            }
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// 线程是否仍在运行
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// 派发一次执行，线程已退出时原样交还
    pub fn assign(&self, assignment: WorkAssignment) -> Result<(), Box<WorkAssignment>> {
        match self.sender.send(WorkerMessage::Execute(assignment)) {
            Ok(()) => Ok(()),
            Err(std_mpsc::SendError(WorkerMessage::Execute(assignment))) => Err(Box::new(assignment)),
            Err(std_mpsc::SendError(WorkerMessage::Terminate)) => Ok(()),
        }
    }

    /// 终止Worker
    ///
    /// 空闲线程收到终止消息后立即退出并被回收；正在执行（可能已挂起）的线程无法被抢占，
    /// 它被分离，当前执行结束后发现通道已关闭便自行退出，其结果会被丢弃。
    pub fn terminate(mut self) {
        let _ = self.sender.send(WorkerMessage::Terminate);
        if let Some(thread) = self.thread.take() {
            if thread.is_finished() {
                if thread.join().is_err() {
                    warn!("Worker {} 线程以异常状态退出", self.id);
                }
            } else {
                debug!("Worker {} 仍在执行，分离线程", self.id);
            }
        }
    }
}

impl std::fmt::Debug for WorkerUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerUnit")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn run_worker_loop(
    id: usize,
    mut engine: Box<dyn ValidationEngine>,
    receiver: std_mpsc::Receiver<WorkerMessage>,
) {
    while let Ok(message) = receiver.recv() {
        let assignment = match message {
            WorkerMessage::Execute(assignment) => assignment,
            WorkerMessage::Terminate => break,
        };

        let WorkAssignment {
            task_id,
            resource,
            resource_type,
            settings,
            fhir_version,
            reply,
        } = assignment;

        debug!("Worker {} 开始执行任务 {}", id, task_id);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.execute(&resource, &resource_type, &settings, fhir_version.as_deref())
        }));

        match outcome {
            Ok(result) => {
                if reply.send(WorkerReply::Completed(result)).is_err() {
                    debug!("任务 {} 的结果已无人接收", task_id);
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Worker {} 执行任务 {} 时崩溃: {}", id, task_id, message);
                let _ = reply.send(WorkerReply::Crashed(message));
                // 引擎状态已不可信，退出线程
                break;
            }
        }
    }
    debug!("Worker {} 线程退出", id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator_core::ValidatorResult;

    struct EchoEngine;

    impl ValidationEngine for EchoEngine {
        fn execute(
            &mut self,
            resource: &serde_json::Value,
            resource_type: &str,
            settings: &ValidationSettings,
            _fhir_version: Option<&str>,
        ) -> ValidatorResult<ValidationResult> {
            if resource.get("panic").is_some() {
                panic!("engine exploded");
            }
            Ok(ValidationResult::from_issues(
                resource_type,
                validator_core::fingerprint::resource_id(resource),
                vec![],
                vec![],
                settings.strict_mode,
            ))
        }
    }

    struct EchoFactory;

    impl EngineFactory for EchoFactory {
        fn create(&self) -> ValidatorResult<Box<dyn ValidationEngine>> {
            Ok(Box::new(EchoEngine))
        }
    }

    struct BrokenFactory;

    impl EngineFactory for BrokenFactory {
        fn create(&self) -> ValidatorResult<Box<dyn ValidationEngine>> {
            Err(ValidatorError::engine_error("profile包加载失败"))
        }
    }

    fn assignment(resource: serde_json::Value) -> (WorkAssignment, oneshot::Receiver<WorkerReply>) {
        let (reply, rx) = oneshot::channel();
        (
            WorkAssignment {
                task_id: "t1".to_string(),
                resource,
                resource_type: "Patient".to_string(),
                settings: Arc::new(ValidationSettings::default()),
                fhir_version: None,
                reply,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_worker_executes_assignment() {
        let unit = WorkerUnit::spawn(1, Arc::new(EchoFactory), Duration::from_secs(5))
            .await
            .unwrap();
        let (job, rx) = assignment(serde_json::json!({"id": "p1"}));
        assert!(unit.assign(job).is_ok());

        match rx.await.unwrap() {
            WorkerReply::Completed(Ok(result)) => {
                assert_eq!(result.resource_id.as_deref(), Some("p1"))
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(unit.is_alive());
        unit.terminate();
    }

    #[tokio::test]
    async fn test_worker_reports_panic_and_exits() {
        let unit = WorkerUnit::spawn(2, Arc::new(EchoFactory), Duration::from_secs(5))
            .await
            .unwrap();
        let (job, rx) = assignment(serde_json::json!({"panic": true}));
        assert!(unit.assign(job).is_ok());

        match rx.await.unwrap() {
            WorkerReply::Crashed(message) => assert!(message.contains("engine exploded")),
            other => panic!("unexpected reply: {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!unit.is_alive());
        unit.terminate();
    }

    #[tokio::test]
    async fn test_engine_creation_failure() {
        let result = WorkerUnit::spawn(3, Arc::new(BrokenFactory), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ValidatorError::WorkerFault(_))));
    }
}
