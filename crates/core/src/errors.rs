use thiserror::Error;

/// 验证引擎错误类型定义
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("任务队列已满: 最大深度 {max_depth}")]
    QueueFull { max_depth: usize },

    #[error("任务执行超时: {task_id} (超时时间: {timeout_ms}ms)")]
    TaskTimeout { task_id: String, timeout_ms: u64 },

    #[error("Worker故障: {0}")]
    WorkerFault(String),

    #[error("并发流水线数量已达上限: {max}")]
    ConcurrencyLimitExceeded { max: usize },

    #[error("流水线内部错误: {0}")]
    PipelineFault(String),

    #[error("流水线请求已在运行: {request_id}")]
    DuplicatePipeline { request_id: String },

    #[error("验证引擎错误: {0}")]
    Engine(String),

    #[error("Worker池已关闭")]
    PoolShutdown,

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type ValidatorResult<T> = std::result::Result<T, ValidatorError>;

impl ValidatorError {
    pub fn task_timeout<S: Into<String>>(task_id: S, timeout_ms: u64) -> Self {
        Self::TaskTimeout {
            task_id: task_id.into(),
            timeout_ms,
        }
    }

    pub fn worker_fault<S: Into<String>>(msg: S) -> Self {
        Self::WorkerFault(msg.into())
    }

    pub fn engine_error<S: Into<String>>(msg: S) -> Self {
        Self::Engine(msg.into())
    }

    pub fn pipeline_fault<S: Into<String>>(msg: S) -> Self {
        Self::PipelineFault(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 调用方稍后重试即可恢复的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ValidatorError::QueueFull { .. } | ValidatorError::TaskTimeout { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ValidatorError::TaskTimeout { .. })
    }

    /// 因背压或关闭而被拒绝，任务从未被执行
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ValidatorError::QueueFull { .. } | ValidatorError::PoolShutdown
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            ValidatorError::QueueFull { .. } => "验证队列繁忙，请稍后重试",
            ValidatorError::TaskTimeout { .. } => "验证超时，请稍后重试",
            ValidatorError::ConcurrencyLimitExceeded { .. } => "同时运行的验证批次过多，请稍后重试",
            ValidatorError::DuplicatePipeline { .. } => "相同的验证请求正在运行",
            ValidatorError::Configuration(_) => "验证配置有误",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for ValidatorError {
    fn from(err: serde_json::Error) -> Self {
        ValidatorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ValidatorError {
    fn from(err: anyhow::Error) -> Self {
        ValidatorError::Internal(err.to_string())
    }
}
