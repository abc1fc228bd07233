use serde::{Deserialize, Serialize};

use super::result::IssueSeverity;

/// 验证维度
///
/// 每个维度对应一类可以独立开关的验证规则。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ValidationAspect {
    Structural,
    Profile,
    Terminology,
    Reference,
    BusinessRule,
    Metadata,
}

impl ValidationAspect {
    pub const ALL: [ValidationAspect; 6] = [
        ValidationAspect::Structural,
        ValidationAspect::Profile,
        ValidationAspect::Terminology,
        ValidationAspect::Reference,
        ValidationAspect::BusinessRule,
        ValidationAspect::Metadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationAspect::Structural => "structural",
            ValidationAspect::Profile => "profile",
            ValidationAspect::Terminology => "terminology",
            ValidationAspect::Reference => "reference",
            ValidationAspect::BusinessRule => "business_rule",
            ValidationAspect::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for ValidationAspect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个验证维度的设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectSettings {
    pub enabled: bool,
    /// 该维度产生问题时使用的严重级别
    pub severity: IssueSeverity,
}

impl Default for AspectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            severity: IssueSeverity::Error,
        }
    }
}

/// 各验证维度的开关
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AspectToggles {
    pub structural: AspectSettings,
    pub profile: AspectSettings,
    pub terminology: AspectSettings,
    pub reference: AspectSettings,
    pub business_rule: AspectSettings,
    pub metadata: AspectSettings,
}

impl Default for AspectToggles {
    fn default() -> Self {
        let warning = AspectSettings {
            enabled: true,
            severity: IssueSeverity::Warning,
        };
        Self {
            structural: AspectSettings::default(),
            profile: AspectSettings::default(),
            terminology: warning.clone(),
            reference: AspectSettings::default(),
            business_rule: AspectSettings::default(),
            metadata: AspectSettings {
                enabled: true,
                severity: IssueSeverity::Information,
            },
        }
    }
}

impl AspectToggles {
    pub fn get(&self, aspect: ValidationAspect) -> &AspectSettings {
        match aspect {
            ValidationAspect::Structural => &self.structural,
            ValidationAspect::Profile => &self.profile,
            ValidationAspect::Terminology => &self.terminology,
            ValidationAspect::Reference => &self.reference,
            ValidationAspect::BusinessRule => &self.business_rule,
            ValidationAspect::Metadata => &self.metadata,
        }
    }

    pub fn get_mut(&mut self, aspect: ValidationAspect) -> &mut AspectSettings {
        match aspect {
            ValidationAspect::Structural => &mut self.structural,
            ValidationAspect::Profile => &mut self.profile,
            ValidationAspect::Terminology => &mut self.terminology,
            ValidationAspect::Reference => &mut self.reference,
            ValidationAspect::BusinessRule => &mut self.business_rule,
            ValidationAspect::Metadata => &mut self.metadata,
        }
    }
}

/// 验证设置快照
///
/// 整个系统只认这一种设置类型。每个流水线在启动时捕获一份快照（`Arc<ValidationSettings>`），
/// 运行期间设置变更不会影响已经在跑的流水线。
///
/// # 字段说明
///
/// - `aspects`: 各验证维度的开关与严重级别
/// - `min_severity`: 低于该级别的问题不计入结果
/// - `strict_mode`: 严格模式下警告也会导致资源判定为无效
/// - `fhir_version`: 默认的FHIR版本标签
/// - `timeout_ms`: 单个资源的验证超时，未设置时使用处理器默认值
/// - `max_concurrent`: 单批次内的最大并发数，未设置时使用处理器默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub aspects: AspectToggles,
    pub min_severity: IssueSeverity,
    pub strict_mode: bool,
    pub fhir_version: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_concurrent: Option<usize>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            aspects: AspectToggles::default(),
            min_severity: IssueSeverity::Information,
            strict_mode: false,
            fhir_version: Some("R4".to_string()),
            timeout_ms: None,
            max_concurrent: None,
        }
    }
}

impl ValidationSettings {
    pub fn is_aspect_enabled(&self, aspect: ValidationAspect) -> bool {
        self.aspects.get(aspect).enabled
    }

    pub fn enabled_aspects(&self) -> Vec<ValidationAspect> {
        ValidationAspect::ALL
            .into_iter()
            .filter(|aspect| self.is_aspect_enabled(*aspect))
            .collect()
    }

    pub fn with_aspect(mut self, aspect: ValidationAspect, enabled: bool) -> Self {
        self.aspects.get_mut(aspect).enabled = enabled;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// 设置指纹，用于缓存键与重新验证判断
    pub fn fingerprint(&self) -> String {
        crate::fingerprint::settings_hash(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled_aspects().is_empty() {
            return Err(anyhow::anyhow!("至少需要启用一个验证维度"));
        }
        if self.timeout_ms == Some(0) {
            return Err(anyhow::anyhow!("验证超时时间必须大于0"));
        }
        if self.max_concurrent == Some(0) {
            return Err(anyhow::anyhow!("最大并发数必须大于0"));
        }
        Ok(())
    }
}
