//! 配置管理
//!
//! 所有可调参数集中在 [`ValidatorConfig`] 中，每个分段都提供 `validate()`：
//!
//! - **pool**: Worker数量上限、队列深度、任务超时、关闭等待时间
//! - **batch**: 并行/串行开关、每块并发数、默认超时
//! - **pipeline**: 并发流水线上限
//! - **cache**: 结果缓存TTL与容量
//! - **revalidation**: 过期窗口与跳过未变化资源的开关
//! - **observability**: 日志级别与格式
//! - **settings**: 默认验证设置
//!
//! 配置从默认值、TOML文件、`VALIDATOR_` 前缀的环境变量依次叠加。

pub mod models;

pub use models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ValidatorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ValidatorConfig::from_toml(
            r#"
            [pool]
            max_workers = 2
            max_queue_depth = 16

            [batch]
            parallel = false
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.max_workers, 2);
        assert_eq!(config.pool.max_queue_depth, 16);
        assert_eq!(config.pool.task_timeout_ms, 30_000);
        assert!(!config.batch.parallel);
        assert_eq!(config.cache.ttl_seconds, 300);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let result = ValidatorConfig::from_toml(
            r#"
            [pool]
            max_workers = 0
            "#,
        );
        assert!(result.is_err());

        let mut config = ValidatorConfig::default();
        config.pipeline.max_concurrent_pipelines = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = ValidatorConfig::default();
        config.cache.ttl_seconds = 42;
        let text = config.to_toml().unwrap();
        let parsed = ValidatorConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.cache.ttl_seconds, 42);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [pool]
            max_workers = 3

            [pipeline]
            max_concurrent_pipelines = 7
            "#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = ValidatorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.pool.max_workers, 3);
        assert_eq!(config.pipeline.max_concurrent_pipelines, 7);
        assert_eq!(config.cache.max_entries, 10_000);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(ValidatorConfig::load(Some("/nonexistent/validator.toml")).is_err());
    }
}
