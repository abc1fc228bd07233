//! 重新验证判断
//!
//! 根据已存储的上一次验证记录决定是否需要重新验证。判断是纯函数：
//! 不读时钟（`now` 由调用方传入），不做任何修改。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use validator_core::{PriorValidation, RevalidationConfig};

/// 判断原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevalidationReason {
    NoPriorResult,
    Forced,
    SkipUnchangedDisabled,
    ContentChanged,
    SettingsChanged,
    Stale,
    Unchanged,
}

/// 判断结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevalidationDecision {
    pub needs_revalidation: bool,
    pub reason: RevalidationReason,
}

impl RevalidationDecision {
    fn revalidate(reason: RevalidationReason) -> Self {
        Self {
            needs_revalidation: true,
            reason,
        }
    }
}

/// 判断策略
#[derive(Debug, Clone, PartialEq)]
pub struct RevalidationPolicy {
    pub force: bool,
    pub skip_unchanged: bool,
    /// 过期窗口，默认1小时
    pub max_age: Duration,
}

impl Default for RevalidationPolicy {
    fn default() -> Self {
        Self {
            force: false,
            skip_unchanged: true,
            max_age: Duration::from_secs(3600),
        }
    }
}

impl From<&RevalidationConfig> for RevalidationPolicy {
    fn from(config: &RevalidationConfig) -> Self {
        Self {
            force: false,
            skip_unchanged: config.skip_unchanged,
            max_age: config.max_age(),
        }
    }
}

impl RevalidationPolicy {
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// 给出判断及原因
    pub fn decide(
        &self,
        prior: Option<&PriorValidation>,
        content_hash: &str,
        settings_hash: &str,
        now: DateTime<Utc>,
    ) -> RevalidationDecision {
        let Some(prior) = prior else {
            return RevalidationDecision::revalidate(RevalidationReason::NoPriorResult);
        };
        if self.force {
            return RevalidationDecision::revalidate(RevalidationReason::Forced);
        }
        if !self.skip_unchanged {
            return RevalidationDecision::revalidate(RevalidationReason::SkipUnchangedDisabled);
        }
        if prior.content_hash != content_hash {
            return RevalidationDecision::revalidate(RevalidationReason::ContentChanged);
        }
        if prior.settings_hash != settings_hash {
            return RevalidationDecision::revalidate(RevalidationReason::SettingsChanged);
        }

        // 时钟回拨时年龄按0处理
        let age = (now - prior.validated_at).to_std().unwrap_or(Duration::ZERO);
        if age > self.max_age {
            RevalidationDecision::revalidate(RevalidationReason::Stale)
        } else {
            RevalidationDecision {
                needs_revalidation: false,
                reason: RevalidationReason::Unchanged,
            }
        }
    }
}

/// 是否需要重新验证
pub fn needs_revalidation(
    prior: Option<&PriorValidation>,
    force: bool,
    skip_unchanged: bool,
    content_hash: &str,
    settings_hash: &str,
    max_age: Duration,
    now: DateTime<Utc>,
) -> bool {
    RevalidationPolicy {
        force,
        skip_unchanged,
        max_age,
    }
    .decide(prior, content_hash, settings_hash, now)
    .needs_revalidation
}
