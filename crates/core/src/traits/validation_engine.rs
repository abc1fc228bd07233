//! 验证引擎接口定义
//!
//! 验证引擎是外部提供的、不透明的验证能力：给定记录与设置，返回验证结果或错误。
//! 引擎可能很慢，也可能出错甚至崩溃，因此编排核心只通过此接口与之交互。
//!
//! ## 隔离模型
//!
//! 每个Worker线程通过 [`EngineFactory`] 在自己的线程内创建一个独立的引擎实例，
//! 引擎实例从不跨Worker共享，所以 [`ValidationEngine`] 不要求 `Send`。
//! 某个实例崩溃只会导致其所在Worker被替换，不会波及其他Worker。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use validator_core::traits::{EngineFactory, ValidationEngine};
//!
//! struct NoopEngine;
//!
//! impl ValidationEngine for NoopEngine {
//!     fn execute(
//!         &mut self,
//!         resource: &serde_json::Value,
//!         resource_type: &str,
//!         settings: &ValidationSettings,
//!         _fhir_version: Option<&str>,
//!     ) -> ValidatorResult<ValidationResult> {
//!         Ok(ValidationResult::from_issues(resource_type, None, vec![], vec![], settings.strict_mode))
//!     }
//! }
//!
//! let factory: Arc<dyn EngineFactory> =
//!     Arc::new(|| -> ValidatorResult<Box<dyn ValidationEngine>> { Ok(Box::new(NoopEngine)) });
//! ```

use crate::models::{ValidationResult, ValidationSettings};
use crate::ValidatorResult;

/// 验证引擎核心接口
///
/// 在Worker线程上同步调用。实现可以持有任意可变状态（已加载的profile、术语表缓存等）。
pub trait ValidationEngine {
    /// 验证一条记录
    fn execute(
        &mut self,
        resource: &serde_json::Value,
        resource_type: &str,
        settings: &ValidationSettings,
        fhir_version: Option<&str>,
    ) -> ValidatorResult<ValidationResult>;

    /// 引擎名称
    fn name(&self) -> &str {
        "validation-engine"
    }
}

/// 引擎工厂
///
/// Worker启动时在自己的线程中调用 `create`，创建失败视为Worker启动失败。
pub trait EngineFactory: Send + Sync + 'static {
    fn create(&self) -> ValidatorResult<Box<dyn ValidationEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> ValidatorResult<Box<dyn ValidationEngine>> + Send + Sync + 'static,
{
    fn create(&self) -> ValidatorResult<Box<dyn ValidationEngine>> {
        self()
    }
}
