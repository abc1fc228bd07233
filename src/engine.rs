//! 命令行使用的内置验证引擎
//!
//! 只做记录外形检查（资源类型、ID、引用格式、元数据），不包含profile、术语等规则。
//! 嵌入方应通过 [`EngineFactory`] 接入完整的验证引擎。

use std::time::Instant;

use serde_json::Value;
use validator_core::{
    fingerprint, AspectResult, EngineFactory, IssueSeverity, ValidationAspect, ValidationEngine,
    ValidationIssue, ValidationResult, ValidationSettings, ValidatorResult,
};

/// 外形检查引擎
#[derive(Debug, Default)]
pub struct EnvelopeEngine;

impl EnvelopeEngine {
    fn check_structure(
        resource: &Value,
        resource_type: &str,
        settings: &ValidationSettings,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let severity = settings.aspects.structural.severity;
        let Some(object) = resource.as_object() else {
            issues.push(ValidationIssue::new(
                severity,
                ValidationAspect::Structural,
                "not-an-object",
                "记录必须是JSON对象",
            ));
            return;
        };

        match object.get("resourceType").and_then(Value::as_str) {
            None => issues.push(
                ValidationIssue::new(
                    severity,
                    ValidationAspect::Structural,
                    "required",
                    "缺少 resourceType",
                )
                .at("resourceType"),
            ),
            Some(declared) if declared != resource_type => issues.push(
                ValidationIssue::new(
                    severity,
                    ValidationAspect::Structural,
                    "type-mismatch",
                    format!("resourceType 为 {declared}，期望 {resource_type}"),
                )
                .at("resourceType"),
            ),
            Some(_) => {}
        }

        if let Some(id) = object.get("id") {
            let valid = id
                .as_str()
                .map(|id| !id.is_empty() && id.len() <= 64)
                .unwrap_or(false);
            if !valid {
                issues.push(
                    ValidationIssue::new(
                        severity,
                        ValidationAspect::Structural,
                        "invalid-id",
                        "id 必须是1到64个字符的字符串",
                    )
                    .at(format!("{resource_type}.id")),
                );
            }
        }
    }

    fn check_references(
        value: &Value,
        path: &str,
        settings: &ValidationSettings,
        issues: &mut Vec<ValidationIssue>,
    ) {
        match value {
            Value::Object(object) => {
                for (key, child) in object {
                    let child_path = format!("{path}.{key}");
                    if key == "reference" {
                        if let Some(reference) = child.as_str() {
                            if !is_reference(reference) {
                                issues.push(
                                    ValidationIssue::new(
                                        settings.aspects.reference.severity,
                                        ValidationAspect::Reference,
                                        "invalid-reference",
                                        format!("无法解析的引用: {reference}"),
                                    )
                                    .at(child_path),
                                );
                            }
                            continue;
                        }
                    }
                    Self::check_references(child, &child_path, settings, issues);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    Self::check_references(item, &format!("{path}[{i}]"), settings, issues);
                }
            }
            _ => {}
        }
    }

    fn check_metadata(
        resource: &Value,
        resource_type: &str,
        settings: &ValidationSettings,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let last_updated = resource
            .pointer("/meta/lastUpdated")
            .and_then(Value::as_str);
        if last_updated.is_none() {
            issues.push(
                ValidationIssue::new(
                    settings.aspects.metadata.severity,
                    ValidationAspect::Metadata,
                    "missing-last-updated",
                    "缺少 meta.lastUpdated",
                )
                .at(format!("{resource_type}.meta.lastUpdated")),
            );
        }
    }
}

/// 相对引用 `Type/id`、内部引用 `#id`、URN或绝对URL
fn is_reference(reference: &str) -> bool {
    if let Some(local) = reference.strip_prefix('#') {
        return !local.is_empty();
    }
    if reference.starts_with("urn:") || reference.contains("://") {
        return true;
    }
    let mut parts = reference.rsplitn(2, '/');
    match (parts.next(), parts.next()) {
        (Some(id), Some(kind)) => {
            !id.is_empty() && kind.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        }
        _ => false,
    }
}

impl ValidationEngine for EnvelopeEngine {
    fn execute(
        &mut self,
        resource: &Value,
        resource_type: &str,
        settings: &ValidationSettings,
        _fhir_version: Option<&str>,
    ) -> ValidatorResult<ValidationResult> {
        let started = Instant::now();
        let mut issues = Vec::new();
        let enabled = settings.enabled_aspects();

        for aspect in &enabled {
            match aspect {
                ValidationAspect::Structural => {
                    Self::check_structure(resource, resource_type, settings, &mut issues)
                }
                ValidationAspect::Reference => {
                    Self::check_references(resource, resource_type, settings, &mut issues)
                }
                ValidationAspect::Metadata => {
                    Self::check_metadata(resource, resource_type, settings, &mut issues)
                }
                _ => {}
            }
        }
        issues.retain(|issue| issue.severity >= settings.min_severity);

        let aspects = enabled
            .into_iter()
            .map(|aspect| {
                let issue_count = issues
                    .iter()
                    .filter(|issue| issue.aspect == Some(aspect))
                    .count();
                AspectResult {
                    aspect,
                    enabled: true,
                    is_valid: !issues.iter().any(|issue| {
                        issue.aspect == Some(aspect)
                            && issue.severity >= IssueSeverity::Error
                    }),
                    issue_count,
                    duration_ms: 0,
                }
            })
            .collect();

        let mut result = ValidationResult::from_issues(
            resource_type,
            fingerprint::resource_id(resource),
            issues,
            aspects,
            settings.strict_mode,
        );
        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    fn name(&self) -> &str {
        "envelope"
    }
}

/// 为每个Worker创建一个 [`EnvelopeEngine`]
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeEngineFactory;

impl EngineFactory for EnvelopeEngineFactory {
    fn create(&self) -> ValidatorResult<Box<dyn ValidationEngine>> {
        Ok(Box::new(EnvelopeEngine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(resource: Value) -> ValidationResult {
        EnvelopeEngine
            .execute(&resource, "Patient", &ValidationSettings::default(), None)
            .unwrap()
    }

    #[test]
    fn test_well_formed_record() {
        let result = run(json!({
            "resourceType": "Patient",
            "id": "p1",
            "meta": {"lastUpdated": "2024-01-01T00:00:00Z"},
            "managingOrganization": {"reference": "Organization/o1"}
        }));
        assert!(result.is_valid);
        assert!(result.issues.is_empty());
        assert_eq!(result.resource_id.as_deref(), Some("p1"));
        assert_eq!(result.aspects.len(), 6);
    }

    #[test]
    fn test_type_mismatch_and_bad_reference() {
        let result = run(json!({
            "resourceType": "Observation",
            "id": "o1",
            "meta": {"lastUpdated": "2024-01-01T00:00:00Z"},
            "subject": {"reference": "not a reference"}
        }));
        assert!(!result.is_valid);
        let codes: Vec<_> = result.issues.iter().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, vec!["type-mismatch", "invalid-reference"]);
        assert_eq!(
            result.issues[1].path.as_deref(),
            Some("Patient.subject.reference")
        );
    }

    #[test]
    fn test_missing_metadata_is_informational() {
        let result = run(json!({"resourceType": "Patient", "id": "p1"}));
        assert!(result.is_valid);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].severity, IssueSeverity::Information);

        let quiet = ValidationSettings {
            min_severity: IssueSeverity::Warning,
            ..Default::default()
        };
        let result = EnvelopeEngine
            .execute(&json!({"resourceType": "Patient"}), "Patient", &quiet, None)
            .unwrap();
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_reference_forms() {
        assert!(is_reference("Patient/123"));
        assert!(is_reference("#contained"));
        assert!(is_reference("urn:uuid:1234"));
        assert!(is_reference("https://example.org/fhir/Patient/1"));
        assert!(!is_reference("patient/1"));
        assert!(!is_reference("Patient/"));
        assert!(!is_reference("#"));
    }
}
