//! Worker池与任务队列
//!
//! - [`queue`]: 有界优先级任务队列
//! - [`unit`]: 持有独立引擎实例的Worker线程
//! - [`pool`]: 协调派发、超时、崩溃替换与优雅关闭的Worker池

pub mod pool;
pub mod queue;
pub mod unit;

pub use pool::{TaskHandle, WorkerPool};
pub use queue::{Prioritized, QueueFull, TaskQueue};
pub use unit::{WorkAssignment, WorkerReply, WorkerUnit};
