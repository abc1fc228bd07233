use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    dispatcher_worker::{BatchConfig, WorkerPoolConfig},
    pipeline::{CacheConfig, PipelineConfig, RevalidationConfig},
};
use crate::logging::LogConfig;
use crate::models::ValidationSettings;

/// 系统配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub pool: WorkerPoolConfig,
    pub batch: BatchConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub revalidation: RevalidationConfig,
    pub observability: LogConfig,
    /// 默认验证设置，由设置协作方在运行期替换
    pub settings: ValidationSettings,
}

impl ValidatorConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 默认配置
    /// 2. 配置文件（TOML格式）
    /// 3. 环境变量覆盖（前缀: VALIDATOR_，层级分隔符: __）
    ///
    /// # 参数
    ///
    /// * `config_path` - 配置文件路径，为None时尝试默认路径
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&ValidatorConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/validator.toml", "validator.toml"];
            if let Some(path) = default_paths.iter().find(|path| Path::new(path).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("VALIDATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: ValidatorConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置，缺省字段取默认值
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: ValidatorConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        self.pool.validate().context("Worker池配置验证失败")?;
        self.batch.validate().context("批处理配置验证失败")?;
        self.pipeline.validate().context("流水线配置验证失败")?;
        self.cache.validate().context("缓存配置验证失败")?;
        self.revalidation
            .validate()
            .context("重新验证配置验证失败")?;
        self.observability
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .context("日志配置验证失败")?;
        self.settings.validate().context("验证设置校验失败")?;

        Ok(())
    }
}
