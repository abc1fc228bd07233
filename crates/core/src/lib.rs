//! 验证编排核心库
//!
//! 为Worker池、批处理器与流水线编排器提供共享的错误类型、配置、数据模型、
//! 验证引擎接口、指纹计算、事件类型与日志初始化。

pub mod config;
pub mod errors;
pub mod events;
pub mod fingerprint;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use events::*;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use models::*;
pub use traits::*;
