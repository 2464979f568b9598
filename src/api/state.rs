use crate::api::auth::TokenAuthenticator;
use crate::connection::ConnectionRegistry;
use crate::routing::EventRouter;
use std::sync::Arc;
use std::time::Duration;

/// 所有 HTTP 與 WebSocket 處理器共用的狀態
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<EventRouter>,
    pub tokens: Arc<TokenAuthenticator>,
    /// 伺服器主動發送 WebSocket ping 的間隔
    pub heartbeat_interval: Duration,
}

impl AppState {
    pub fn new(router: Arc<EventRouter>, tokens: TokenAuthenticator, heartbeat_interval: Duration) -> Self {
        Self {
            router,
            tokens: Arc::new(tokens),
            heartbeat_interval,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.router.registry()
    }
}
