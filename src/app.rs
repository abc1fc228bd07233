use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use validator_core::{
    EngineFactory, PipelineConfigOverride, PipelineContext, PipelineRequest, PipelineResult,
    ResourceInput, RevalidationStore, SettingsChanged, ValidationSettings, ValidatorConfig,
};
use validator_dispatcher::{BatchProcessor, PipelineOrchestrator, SettingsChangeListener};
use validator_worker::WorkerPool;

/// 主应用程序
///
/// 显式构建Worker池、批处理器与编排器并持有它们，没有任何全局单例。
pub struct Application {
    config: ValidatorConfig,
    pool: WorkerPool,
    orchestrator: Arc<PipelineOrchestrator>,
    settings_tx: broadcast::Sender<SettingsChanged>,
}

impl Application {
    /// 创建新的应用实例
    pub fn new(
        config: ValidatorConfig,
        factory: Arc<dyn EngineFactory>,
        store: Option<Arc<dyn RevalidationStore>>,
    ) -> Result<Self> {
        config.validate().context("配置验证失败")?;
        info!(
            "初始化应用程序: 最大Worker {}, 队列深度 {}, 并发流水线 {}",
            config.pool.max_workers,
            config.pool.max_queue_depth,
            config.pipeline.max_concurrent_pipelines
        );

        let pool = WorkerPool::new(config.pool.clone(), factory).context("创建Worker池失败")?;
        let processor = Arc::new(BatchProcessor::new(
            pool.clone(),
            config.batch.clone(),
            config.cache.clone(),
        ));

        let mut orchestrator = PipelineOrchestrator::new(
            processor,
            config.pipeline.clone(),
            config.settings.clone(),
        );
        if let Some(store) = store {
            orchestrator = orchestrator.with_revalidation_store(store, config.revalidation.clone());
        }

        let (settings_tx, _) = broadcast::channel(16);

        Ok(Self {
            config,
            pool,
            orchestrator: Arc::new(orchestrator),
            settings_tx,
        })
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.orchestrator
    }

    /// 发布新的验证设置
    pub fn publish_settings(&self, settings: ValidationSettings) -> Result<()> {
        settings.validate().context("验证设置无效")?;
        self.settings_tx
            .send(SettingsChanged::new(settings))
            .map(|_| ())
            .map_err(|_| anyhow::anyhow!("设置变更监听未运行"))
    }

    /// 启动后台监听
    pub fn start_listeners(&self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let listener = SettingsChangeListener::new(Arc::clone(&self.orchestrator));
        listener.start(self.settings_tx.subscribe(), shutdown_rx)
    }

    /// 把一组记录作为一个流水线验证
    pub async fn validate(&self, inputs: Vec<ResourceInput>, force: bool) -> Result<PipelineResult> {
        let context = PipelineContext::generate();
        let mut request = PipelineRequest::new(inputs, context);
        if force {
            request = request.with_config(PipelineConfigOverride {
                force_revalidation: Some(true),
                ..Default::default()
            });
        }

        let request_id = request.request_id().to_string();
        self.orchestrator
            .execute_pipeline(request)
            .await
            .with_context(|| format!("流水线 {request_id} 被拒绝"))
    }

    /// 取消所有运行中的流水线并排空Worker池
    pub async fn shutdown(&self) {
        for request_id in self.orchestrator.active_pipelines() {
            if self.orchestrator.cancel_pipeline(&request_id) {
                info!("关闭时取消流水线 {}", request_id);
            }
        }
        self.pool.shutdown(self.config.pool.drain_timeout()).await;
        info!("Worker池已关闭");
    }
}

/// 读取目录下的全部 `.json` 文件
///
/// 每个文件可以是单条记录、记录数组或带 `entry[].resource` 的Bundle，按文件名排序。
pub fn load_inputs(dir: &Path) -> Result<Vec<ResourceInput>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("读取输入目录失败: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut inputs = Vec::new();
    for path in files {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("读取文件失败: {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("解析JSON失败: {}", path.display()))?;

        let before = inputs.len();
        collect_records(value, &mut inputs);
        debug!("{}: {} 条记录", path.display(), inputs.len() - before);
        if inputs.len() == before {
            warn!("文件中没有可识别的记录: {}", path.display());
        }
    }

    Ok(inputs)
}

fn collect_records(value: serde_json::Value, inputs: &mut Vec<ResourceInput>) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_records(item, inputs);
            }
        }
        serde_json::Value::Object(ref object)
            if object.get("resourceType").and_then(|t| t.as_str()) == Some("Bundle") =>
        {
            let entries = object
                .get("entry")
                .and_then(|entry| entry.as_array())
                .cloned()
                .unwrap_or_default();
            for entry in entries {
                if let Some(resource) = entry.get("resource") {
                    collect_records(resource.clone(), inputs);
                }
            }
        }
        other => match ResourceInput::from_resource(other) {
            Some(input) => inputs.push(input),
            None => warn!("跳过缺少 resourceType 的记录"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_bundle_and_array() {
        let mut inputs = Vec::new();
        collect_records(
            json!({
                "resourceType": "Bundle",
                "entry": [
                    {"resource": {"resourceType": "Patient", "id": "p1"}},
                    {"resource": {"resourceType": "Observation", "id": "o1"}},
                    {"fullUrl": "urn:uuid:no-resource"}
                ]
            }),
            &mut inputs,
        );
        collect_records(
            json!([{"resourceType": "Patient", "id": "p2"}, {"id": "untyped"}]),
            &mut inputs,
        );

        let types: Vec<_> = inputs.iter().map(|i| i.resource_type.as_str()).collect();
        assert_eq!(types, vec!["Patient", "Observation", "Patient"]);
        assert_eq!(inputs[2].resource_id().as_deref(), Some("p2"));
    }
}
