use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ApiAuth, AppState, RestApi, TokenAuthenticator};
use crate::config::{ApplicationConfig, Validator};
use crate::connection::{ConnectionRegistry, DisconnectReason, LivenessMonitor, RegistryLimits};
use crate::event::HistoryBuffer;
use crate::monitor::MetricsCollector;
use crate::redis::{Client, ConnectionPool};
use crate::relay::{InMemoryRelay, RedisRelay, RelayBus};
use crate::routing::{EventRouter, RelayTasks};
use crate::server::{ServerError, ServerResult, ServerState};

/// 等待存活監控結束的上限
const LIVENESS_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// 伺服器實例
///
/// 持有路由器與其依賴的所有組件，以及背景任務的控制權。
pub struct Server {
    config: ApplicationConfig,
    router: Arc<EventRouter>,
    app_state: AppState,
    /// 伺服器狀態
    state: Arc<RwLock<ServerState>>,
    /// 關閉信號，存活監控訂閱此通道
    shutdown_tx: watch::Sender<bool>,
    liveness: Option<JoinHandle<()>>,
    relay_tasks: Option<RelayTasks>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

impl Server {
    /// 啟動背景任務：存活監控與跨實例中繼
    pub async fn start(&mut self) -> ServerResult<()> {
        if self.state() != ServerState::Initializing {
            return Err(ServerError::Runtime(format!("無法在 {:?} 狀態下啟動", self.state())));
        }
        info!(instance_id = %self.router.instance_id(), "啟動伺服器...");

        let monitor = LivenessMonitor::from_config(Arc::clone(self.router.registry()), &self.config.gateway);
        self.liveness = Some(monitor.spawn(self.shutdown_tx.subscribe()));

        self.relay_tasks = self.router.start_relay(self.config.relay.inbound_buffer).await?;

        *self.state.write() = ServerState::Running;
        info!("伺服器已啟動");
        Ok(())
    }

    /// 綁定配置中的位址並提供服務，直到 `signal` 完成
    pub async fn run<F>(self, signal: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.rest_api().bind().await?;
        self.serve(listener, signal).await
    }

    /// 在給定的 listener 上提供服務，`signal` 完成後優雅關閉
    pub async fn serve<F>(mut self, listener: TcpListener, signal: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.state() == ServerState::Initializing {
            self.start().await?;
        }

        let registry = Arc::clone(self.router.registry());
        let shutdown = async move {
            signal.await;
            info!("接收到關閉信號，關閉所有連線");
            registry.close_all(DisconnectReason::Shutdown);
        };

        let result = self.rest_api().serve(listener, shutdown).await;
        self.shutdown().await?;
        result.map_err(ServerError::Io)
    }

    /// 優雅關閉伺服器，可重複呼叫
    pub async fn shutdown(&mut self) -> ServerResult<()> {
        if self.state() == ServerState::Stopped {
            return Ok(());
        }
        info!("正在關閉伺服器...");
        *self.state.write() = ServerState::ShuttingDown;

        let _ = self.shutdown_tx.send(true);
        let closed = self.router.registry().close_all(DisconnectReason::Shutdown);
        debug!(closed, "已關閉剩餘連線");

        if let Some(tasks) = self.relay_tasks.take() {
            tasks.abort();
        }
        if let Some(handle) = self.liveness.take() {
            if tokio::time::timeout(LIVENESS_STOP_TIMEOUT, handle).await.is_err() {
                warn!("等待存活監控結束超時");
            }
        }

        *self.state.write() = ServerState::Stopped;
        info!("伺服器已關閉");
        Ok(())
    }

    /// 獲取伺服器狀態
    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn app_state(&self) -> &AppState {
        &self.app_state
    }

    pub fn rest_api(&self) -> RestApi {
        RestApi::new(
            self.config.server.clone(),
            ApiAuth::from_config(&self.config.auth),
            self.app_state.clone(),
        )
    }
}

/// 伺服器構建器
#[derive(Default)]
pub struct ServerBuilder {
    config: Option<ApplicationConfig>,
    relay: Option<Arc<dyn RelayBus>>,
}

impl ServerBuilder {
    /// 創建新的伺服器構建器
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ApplicationConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 指定中繼後端，覆寫配置中的選擇
    pub fn with_relay(mut self, relay: Arc<dyn RelayBus>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// 構建並返回伺服器實例
    pub fn build(self) -> ServerResult<Server> {
        info!("構建伺服器實例");

        let config = self
            .config
            .ok_or_else(|| ServerError::Config("未提供應用配置".to_string()))?;
        config.validate()?;

        let instance_id = config
            .gateway
            .instance_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let metrics = Arc::new(MetricsCollector::new(Duration::from_secs(config.metrics.window_secs)));
        let registry = Arc::new(ConnectionRegistry::new(
            RegistryLimits::from(&config.gateway),
            Arc::clone(&metrics),
        ));
        let history = Arc::new(HistoryBuffer::new(config.gateway.history_capacity));

        let mut router = EventRouter::new(instance_id, registry, history, metrics);
        let relay = match self.relay {
            Some(relay) => Some(relay),
            None => Self::relay_from_config(&config)?,
        };
        if let Some(relay) = relay {
            router = router.with_relay(relay);
        }
        let router = Arc::new(router);

        let app_state = AppState::new(
            Arc::clone(&router),
            TokenAuthenticator::new(config.auth.token_secret.clone()),
            config.gateway.heartbeat_interval(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            instance_id = %router.instance_id(),
            relay = router.relay_backend().unwrap_or("disabled"),
            "伺服器實例構建完成"
        );

        Ok(Server {
            config,
            router,
            app_state,
            state: Arc::new(RwLock::new(ServerState::Initializing)),
            shutdown_tx,
            liveness: None,
            relay_tasks: None,
        })
    }

    fn relay_from_config(config: &ApplicationConfig) -> ServerResult<Option<Arc<dyn RelayBus>>> {
        if !config.relay.enabled {
            return Ok(None);
        }

        match config.relay.backend.as_str() {
            "memory" => Ok(Some(Arc::new(InMemoryRelay::standalone()))),
            "redis" => {
                let client = Client::new(config.redis.clone())?;
                let pool = Arc::new(ConnectionPool::new(config.redis.clone())?);
                Ok(Some(Arc::new(RedisRelay::new(client, pool, config.relay.channel.clone()))))
            }
            other => Err(ServerError::Config(format!("未知的中繼後端: {}", other))),
        }
    }
}
