//! 心跳存活監控
//!
//! 以固定間隔掃描所有連線，而不是為每條連線維護計時器。
//! 超過存活窗口未更新心跳的連線經由註冊表移除，原因記為 `timeout`。

use crate::config::GatewayConfig;
use crate::connection::registry::ConnectionRegistry;
use crate::connection::types::ConnectionId;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    stale_timeout: chrono::Duration,
    sweep_interval: Duration,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, stale_timeout: Duration, sweep_interval: Duration) -> Self {
        Self {
            registry,
            stale_timeout: chrono::Duration::from_std(stale_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            sweep_interval: sweep_interval.max(Duration::from_millis(10)),
        }
    }

    pub fn from_config(registry: Arc<ConnectionRegistry>, config: &GatewayConfig) -> Self {
        Self::new(registry, config.stale_timeout(), config.sweep_interval())
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// 以目前時間執行一次掃描
    pub fn sweep(&self) -> Vec<ConnectionId> {
        self.sweep_at(Utc::now())
    }

    /// 移除在 `now` 時已逾時的連線，返回被移除的連線
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<ConnectionId> {
        let evicted: Vec<ConnectionId> = self
            .registry
            .stale_connections(now, self.stale_timeout)
            .into_iter()
            .filter(|id| self.registry.remove_if_stale(id, now, self.stale_timeout))
            .collect();

        if evicted.is_empty() {
            debug!(connections = self.registry.count(), "存活掃描完成");
        } else {
            info!(evicted = evicted.len(), "存活掃描移除逾時連線");
        }
        evicted
    }

    /// 啟動背景掃描任務，收到關閉信號後結束
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即觸發
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("存活監控已停止");
                            break;
                        }
                    }
                }
            }
        })
    }
}
