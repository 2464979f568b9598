#![allow(dead_code)]

use apix_gateway::config::{
    ApplicationConfig, AuthConfig, GatewayConfig, LogConfig, MetricsConfig, RedisConfig,
    RelayConfig, ServerConfig,
};
use apix_gateway::connection::{
    ClientInfo, Connection, ConnectionId, ConnectionRegistry, Identity, OutboundReceiver,
    RegistryLimits,
};
use apix_gateway::event::{Event, HistoryBuffer, ServerMessage};
use apix_gateway::monitor::MetricsCollector;
use apix_gateway::relay::RelayBus;
use apix_gateway::routing::EventRouter;
use std::sync::Arc;

pub const TOKEN_SECRET: &str = "test-token-secret";
pub const API_KEY: &str = "test-api-key";
pub const API_SECRET: &str = "test-api-secret";

/// 單一實例的所有組件
pub struct Gateway {
    pub router: Arc<EventRouter>,
    pub registry: Arc<ConnectionRegistry>,
    pub history: Arc<HistoryBuffer>,
    pub metrics: Arc<MetricsCollector>,
}

pub fn gateway(instance_id: &str) -> Gateway {
    build_gateway(instance_id, RegistryLimits::default(), 1000, None)
}

pub fn gateway_with_limits(instance_id: &str, limits: RegistryLimits) -> Gateway {
    build_gateway(instance_id, limits, 1000, None)
}

pub fn gateway_with_history(instance_id: &str, capacity: usize) -> Gateway {
    build_gateway(instance_id, RegistryLimits::default(), capacity, None)
}

pub fn gateway_with_relay(instance_id: &str, relay: Arc<dyn RelayBus>) -> Gateway {
    build_gateway(instance_id, RegistryLimits::default(), 1000, Some(relay))
}

fn build_gateway(
    instance_id: &str,
    limits: RegistryLimits,
    history_capacity: usize,
    relay: Option<Arc<dyn RelayBus>>,
) -> Gateway {
    let metrics = Arc::new(MetricsCollector::default());
    let registry = Arc::new(ConnectionRegistry::new(limits, Arc::clone(&metrics)));
    let history = Arc::new(HistoryBuffer::new(history_capacity));
    let mut router = EventRouter::new(
        instance_id,
        Arc::clone(&registry),
        Arc::clone(&history),
        Arc::clone(&metrics),
    );
    if let Some(relay) = relay {
        router = router.with_relay(relay);
    }
    Gateway {
        router: Arc::new(router),
        registry,
        history,
        metrics,
    }
}

pub fn connect(registry: &ConnectionRegistry, id: &str, org: &str) -> (ConnectionId, OutboundReceiver) {
    registry
        .register(Connection::new(
            ConnectionId::from(id),
            Identity::new(format!("user-{}", id), org),
            ClientInfo::default(),
        ))
        .expect("無法註冊測試連線")
}

/// 取出佇列中目前所有的事件訊息
pub fn drain_events(rx: &mut OutboundReceiver) -> Vec<Arc<Event>> {
    let mut events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let ServerMessage::Event { event } = message.as_ref() {
            events.push(Arc::clone(event));
        }
    }
    events
}

pub fn test_config() -> ApplicationConfig {
    ApplicationConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            request_timeout_secs: 5,
            enable_cors: true,
            cors_allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        log: LogConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        },
        redis: RedisConfig::default(),
        gateway: GatewayConfig {
            instance_id: Some("instance-test".to_string()),
            ..GatewayConfig::default()
        },
        relay: RelayConfig::default(),
        metrics: MetricsConfig::default(),
        auth: AuthConfig {
            token_secret: TOKEN_SECRET.to_string(),
            api_key: API_KEY.to_string(),
            api_secret: API_SECRET.to_string(),
            max_clock_skew_secs: 300,
        },
    }
}
