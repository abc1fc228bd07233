use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::orchestrator::PipelineOrchestrator;
use validator_core::SettingsChanged;

/// 监听验证设置变更，应用到编排器并清空结果缓存
pub struct SettingsChangeListener {
    orchestrator: Arc<PipelineOrchestrator>,
    running: Arc<RwLock<bool>>,
}

impl SettingsChangeListener {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self {
            orchestrator,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 启动监听循环，设置通道关闭或收到关闭信号时退出
    pub fn start(
        &self,
        mut settings_rx: broadcast::Receiver<SettingsChanged>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            *running.write().await = true;
            info!("启动设置变更监听");

            loop {
                tokio::select! {
                    received = settings_rx.recv() => match received {
                        Ok(event) => {
                            let cleared = orchestrator.apply_settings(&event).await;
                            info!(
                                "验证设置已更新 (指纹 {}), 清除缓存 {} 条",
                                event.settings.fingerprint(),
                                cleared
                            );
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // 丢失的变更无法重放，保守地清空缓存
                            warn!("设置变更通知积压，跳过 {} 条", skipped);
                            orchestrator.processor().clear_cache().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("设置变更通道已关闭");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        info!("收到关闭信号，停止设置变更监听");
                        break;
                    }
                }
            }

            *running.write().await = false;
        })
    }
}
