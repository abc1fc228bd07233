use async_trait::async_trait;

use crate::models::PriorValidation;
use crate::ValidatorResult;

/// 重新验证所需历史记录的存储接口
///
/// 由持久化协作方实现。从核心的角度看是只读的，写回新结果由调用方负责。
#[async_trait]
pub trait RevalidationStore: Send + Sync {
    /// 读取某个资源最近一次的验证记录
    async fn load_prior(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> ValidatorResult<Option<PriorValidation>>;
}
