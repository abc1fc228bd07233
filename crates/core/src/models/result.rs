use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::settings::ValidationAspect;

/// 流水线层面合成问题使用的问题码
pub const PIPELINE_TIMEOUT: &str = "PIPELINE_TIMEOUT";
pub const PIPELINE_ERROR: &str = "PIPELINE_ERROR";
pub const PIPELINE_REJECTED: &str = "PIPELINE_REJECTED";
pub const PIPELINE_CANCELLED: &str = "PIPELINE_CANCELLED";

const PIPELINE_CODES: [&str; 4] = [
    PIPELINE_TIMEOUT,
    PIPELINE_ERROR,
    PIPELINE_REJECTED,
    PIPELINE_CANCELLED,
];

/// 问题严重级别，按 Information < Warning < Error < Fatal 排序
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Information,
    Warning,
    Error,
    Fatal,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Information => "information",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Error => "error",
            IssueSeverity::Fatal => "fatal",
        }
    }
}

/// 验证问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub message: String,
    /// 产生该问题的验证维度，流水线合成的问题没有维度
    pub aspect: Option<ValidationAspect>,
    pub path: Option<String>,
}

impl ValidationIssue {
    pub fn new<C: Into<String>, M: Into<String>>(
        severity: IssueSeverity,
        aspect: ValidationAspect,
        code: C,
        message: M,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            aspect: Some(aspect),
            path: None,
        }
    }

    pub fn at<P: Into<String>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn is_pipeline_issue(&self) -> bool {
        PIPELINE_CODES.contains(&self.code.as_str())
    }
}

/// 单个维度的验证结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectResult {
    pub aspect: ValidationAspect,
    pub enabled: bool,
    pub is_valid: bool,
    pub issue_count: usize,
    pub duration_ms: u64,
}

/// 单个资源的验证结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub aspects: Vec<AspectResult>,
    /// 0-100 的质量分
    pub score: u8,
    pub duration_ms: u64,
    pub validated_at: DateTime<Utc>,
    pub settings_hash: Option<String>,
    pub content_hash: Option<String>,
    #[serde(default)]
    pub from_cache: bool,
}

impl ValidationResult {
    /// 根据问题列表构建结果，自动计算有效性与分数
    pub fn from_issues(
        resource_type: impl Into<String>,
        resource_id: Option<String>,
        issues: Vec<ValidationIssue>,
        aspects: Vec<AspectResult>,
        strict_mode: bool,
    ) -> Self {
        let threshold = if strict_mode {
            IssueSeverity::Warning
        } else {
            IssueSeverity::Error
        };
        let is_valid = !issues.iter().any(|issue| issue.severity >= threshold);
        let score = compute_score(&issues);

        Self {
            resource_type: resource_type.into(),
            resource_id,
            is_valid,
            issues,
            aspects,
            score,
            duration_ms: 0,
            validated_at: Utc::now(),
            settings_hash: None,
            content_hash: None,
            from_cache: false,
        }
    }

    /// 流水线合成的失败结果：分数为0，携带一个结构化问题
    pub fn pipeline_failure(
        resource_type: impl Into<String>,
        resource_id: Option<String>,
        code: &str,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id,
            is_valid: false,
            issues: vec![ValidationIssue {
                severity: IssueSeverity::Error,
                code: code.to_string(),
                message: message.into(),
                aspect: None,
                path: None,
            }],
            aspects: Vec::new(),
            score: 0,
            duration_ms,
            validated_at: Utc::now(),
            settings_hash: None,
            content_hash: None,
            from_cache: false,
        }
    }

    /// 结果是否由流水线合成（超时、错误、拒绝、取消）
    pub fn is_pipeline_failure(&self) -> bool {
        self.issues.iter().any(ValidationIssue::is_pipeline_issue)
    }

    pub fn count_by_severity(&self, severity: IssueSeverity) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == severity)
            .count()
    }
}

/// 每个 fatal/error 扣15分，warning 扣5分，information 扣1分
pub fn compute_score(issues: &[ValidationIssue]) -> u8 {
    let penalty: u32 = issues
        .iter()
        .map(|issue| match issue.severity {
            IssueSeverity::Fatal | IssueSeverity::Error => 15,
            IssueSeverity::Warning => 5,
            IssueSeverity::Information => 1,
        })
        .sum();
    100u32.saturating_sub(penalty) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_issues_validity() {
        let warning = ValidationIssue::new(
            IssueSeverity::Warning,
            ValidationAspect::Terminology,
            "CODE_UNKNOWN",
            "未知编码",
        );

        let lenient = ValidationResult::from_issues("Patient", None, vec![warning.clone()], vec![], false);
        assert!(lenient.is_valid);
        assert_eq!(lenient.score, 95);

        let strict = ValidationResult::from_issues("Patient", None, vec![warning], vec![], true);
        assert!(!strict.is_valid);
    }

    #[test]
    fn test_pipeline_failure_shape() {
        let result = ValidationResult::pipeline_failure(
            "Observation",
            Some("obs-1".to_string()),
            PIPELINE_TIMEOUT,
            "验证超时",
            120,
        );
        assert!(!result.is_valid);
        assert_eq!(result.score, 0);
        assert_eq!(result.duration_ms, 120);
        assert!(result.is_pipeline_failure());
        assert_eq!(result.issues[0].code, PIPELINE_TIMEOUT);
    }

    #[test]
    fn test_score_saturates_at_zero() {
        let issues: Vec<_> = (0..10)
            .map(|i| {
                ValidationIssue::new(
                    IssueSeverity::Error,
                    ValidationAspect::Structural,
                    format!("E{i}"),
                    "错误",
                )
            })
            .collect();
        assert_eq!(compute_score(&issues), 0);
    }
}
