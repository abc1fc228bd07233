use validator_core::config::*;
use validator_core::{IssueSeverity, LogFormat, ValidationAspect};

#[test]
fn test_default_config() {
    let config = ValidatorConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert!(config.pool.max_workers >= 1);
    assert_eq!(config.pool.max_queue_depth, 1000);
    assert!(config.batch.parallel);
    assert_eq!(config.pipeline.max_concurrent_pipelines, 4);
    assert!(config.cache.enabled);
    assert_eq!(config.revalidation.max_age_seconds, 3600);
    assert_eq!(config.settings.enabled_aspects().len(), 6);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[pool]
max_workers = 3
max_queue_depth = 50
task_timeout_ms = 2000
worker_startup_timeout_ms = 1000
drain_timeout_ms = 500

[batch]
parallel = false
max_concurrent = 2
default_timeout_ms = 1500

[pipeline]
max_concurrent_pipelines = 1

[cache]
enabled = true
ttl_seconds = 60
max_entries = 100

[revalidation]
skip_unchanged = false
max_age_seconds = 120

[observability]
level = "debug"
format = "json"

[settings]
strict_mode = true
min_severity = "warning"

[settings.aspects.terminology]
enabled = false
severity = "warning"
"#;

    let config = ValidatorConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.pool.max_workers, 3);
    assert_eq!(config.pool.max_queue_depth, 50);
    assert!(!config.batch.parallel);
    assert_eq!(config.batch.max_concurrent, 2);
    assert_eq!(config.pipeline.max_concurrent_pipelines, 1);
    // 未写出的字段取默认值
    assert_eq!(config.pipeline.event_channel_capacity, 1024);
    assert_eq!(config.cache.ttl_seconds, 60);
    assert!(!config.revalidation.skip_unchanged);
    assert_eq!(config.observability.level, "debug");
    assert_eq!(config.observability.format, LogFormat::Json);
    assert!(config.settings.strict_mode);
    assert_eq!(config.settings.min_severity, IssueSeverity::Warning);
    assert!(!config.settings.is_aspect_enabled(ValidationAspect::Terminology));
    assert!(config.settings.is_aspect_enabled(ValidationAspect::Structural));
}

#[test]
fn test_config_validation_pool() {
    let mut config = ValidatorConfig::default();

    config.pool.max_workers = 0;
    assert!(config.validate().is_err());

    config.pool.max_workers = 2;
    config.pool.max_queue_depth = 0;
    assert!(config.validate().is_err());

    config.pool.max_queue_depth = 10;
    config.pool.task_timeout_ms = 0;
    assert!(config.validate().is_err());

    config.pool.task_timeout_ms = 1000;
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_batch_and_pipeline() {
    let mut config = ValidatorConfig::default();

    config.batch.max_concurrent = 0;
    assert!(config.validate().is_err());

    config.batch.max_concurrent = 4;
    config.pipeline.max_concurrent_pipelines = 0;
    assert!(config.validate().is_err());

    config.pipeline.max_concurrent_pipelines = 2;
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_cache_and_revalidation() {
    let mut config = ValidatorConfig::default();

    config.cache.ttl_seconds = 0;
    assert!(config.validate().is_err());

    // 关闭缓存后TTL不再校验
    config.cache.enabled = false;
    assert!(config.validate().is_ok());

    config.revalidation.max_age_seconds = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_settings() {
    let mut config = ValidatorConfig::default();

    for aspect in ValidationAspect::ALL {
        config.settings.aspects.get_mut(aspect).enabled = false;
    }
    assert!(config.validate().is_err());

    config.settings = Default::default();
    config.observability.level = String::new();
    assert!(config.validate().is_err());
}
