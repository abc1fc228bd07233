//! Test helper utilities
//!
//! Polling, timestamp and assertion helpers shared by the integration tests.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use validator_core::{PipelineResult, ValidationResult};

/// Test environment helpers
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to become true, polling every 10ms
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        condition().await
    }

    /// Current time shifted by `offset_seconds` (negative for the past)
    pub fn timestamp_with_offset(offset_seconds: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(offset_seconds)
    }
}

/// Assertions over pipeline outcomes
pub struct TestAssertions;

impl TestAssertions {
    /// Resource ids of the results, in result order
    pub fn result_ids(results: &[ValidationResult]) -> Vec<String> {
        results
            .iter()
            .map(|result| result.resource_id.clone().unwrap_or_default())
            .collect()
    }

    /// Asserts that the result at `index` is a synthetic entry with `code`
    pub fn assert_pipeline_issue(result: &PipelineResult, index: usize, code: &str) {
        let entry = &result.results[index];
        assert!(!entry.is_valid, "result {index} should be invalid");
        assert_eq!(entry.score, 0, "result {index} should score 0");
        assert!(
            entry.issues.iter().any(|issue| issue.code == code),
            "result {index} should carry issue {code}, got {:?}",
            entry.issues
        );
    }
}
