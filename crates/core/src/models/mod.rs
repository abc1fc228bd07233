//! # 数据模型
//!
//! 定义验证编排引擎的核心数据结构：验证设置、验证任务、验证结果、流水线请求与结果、
//! Worker统计以及重新验证所需的历史记录。
//!
//! ## 核心模型
//!
//! ### ValidationSettings - 验证设置
//! 唯一的设置类型，枚举所有可识别的选项（维度开关、严重级别、超时、并发数）。
//!
//! ### ValidationTask - 验证任务
//! 一个资源的一次验证工作单元，由Worker池调度到某个Worker执行。
//!
//! ### PipelineRequest / PipelineResult - 流水线
//! 批量验证的请求与结果，结果与请求中的资源一一对应。
//!
//! ### WorkerStats / PoolMetrics - Worker池指标
//!
//! ## 状态流转
//!
//! ```text
//! Pending → Running → Completed
//!                   ↘ Failed
//!                   ↘ Cancelled
//! ```

pub mod pipeline;
pub mod result;
pub mod revalidation;
pub mod settings;
pub mod task;
pub mod worker;

pub use pipeline::*;
pub use result::*;
pub use revalidation::*;
pub use settings::*;
pub use task::*;
pub use worker::*;
