use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::ValidationResult;

/// 已存储的上一次验证记录
///
/// 由持久化协作方提供，核心只读取不持有。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorValidation {
    pub result: ValidationResult,
    pub content_hash: String,
    pub settings_hash: String,
    pub validated_at: DateTime<Utc>,
}

impl PriorValidation {
    pub fn new(
        result: ValidationResult,
        content_hash: impl Into<String>,
        settings_hash: impl Into<String>,
        validated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            result,
            content_hash: content_hash.into(),
            settings_hash: settings_hash.into(),
            validated_at,
        }
    }
}
