//! 事件路由器
//!
//! 所有事件的唯一入口：驗證、蓋章、寫入歷史、解析收件者、扇出、
//! 交給跨實例中繼，最後更新指標。可被多個呼叫端同時使用。

use crate::connection::ConnectionRegistry;
use crate::event::{Ack, Event, EventOrigin, EventSource, HistoryBuffer, HistoryQuery, ServerMessage};
use crate::monitor::{MetricsCollector, MetricsSnapshot};
use crate::relay::{RelayBus, RelayEnvelope, RelayError};
use crate::routing::error::RoutingResult;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 中繼相關的背景任務
#[derive(Debug)]
pub struct RelayTasks {
    pub subscription: JoinHandle<()>,
    pub pump: JoinHandle<()>,
}

impl RelayTasks {
    pub fn abort(&self) {
        self.subscription.abort();
        self.pump.abort();
    }
}

pub struct EventRouter {
    instance_id: String,
    registry: Arc<ConnectionRegistry>,
    history: Arc<HistoryBuffer>,
    metrics: Arc<MetricsCollector>,
    relay: Option<Arc<dyn RelayBus>>,
}

impl EventRouter {
    pub fn new(
        instance_id: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
        history: Arc<HistoryBuffer>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            registry,
            history,
            metrics,
            relay: None,
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn RelayBus>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn relay_backend(&self) -> Option<&'static str> {
        self.relay.as_ref().map(|relay| relay.name())
    }

    /// 接收一個事件並完成本地扇出與跨實例發布
    pub async fn ingest(&self, mut event: Event, origin: EventOrigin) -> RoutingResult<Ack> {
        if let Err(err) = event.validate() {
            self.metrics.record_rejected();
            warn!(event_id = %event.id, error = %err, "拒絕無效事件");
            return Err(err.into());
        }

        event.metadata.timestamp.get_or_insert_with(Utc::now);
        event.metadata.source.get_or_insert(origin.as_source());

        Ok(self.route(Arc::new(event)).await)
    }

    /// 內部發布介面
    pub async fn publish(&self, event: Event) -> RoutingResult<Ack> {
        self.ingest(event, EventOrigin::Internal).await
    }

    /// 處理來自其他實例的事件
    ///
    /// 自己發出的回聲返回 `None`；時間戳保持原樣，來源改為 `relay`，永不再次發布。
    pub async fn on_relayed(&self, envelope: RelayEnvelope) -> RoutingResult<Option<Ack>> {
        if envelope.instance_id == self.instance_id {
            debug!(event_id = %envelope.event.id, "忽略自身發出的中繼事件");
            return Ok(None);
        }
        self.metrics.record_relay_received();

        let mut event = Arc::unwrap_or_clone(envelope.event);
        if let Err(err) = event.validate() {
            self.metrics.record_rejected();
            warn!(
                event_id = %event.id,
                from_instance = %envelope.instance_id,
                error = %err,
                "拒絕無效的中繼事件"
            );
            return Err(err.into());
        }

        event.metadata.source = Some(EventSource::Relay);
        event.metadata.timestamp.get_or_insert_with(Utc::now);

        Ok(Some(self.route(Arc::new(event)).await))
    }

    async fn route(&self, event: Arc<Event>) -> Ack {
        self.history.append(Arc::clone(&event));

        let (delivered, dropped) = if event.is_expired(Utc::now()) {
            debug!(event_id = %event.id, "事件已過期，只寫入歷史");
            (0, 0)
        } else {
            let recipients = self.registry.resolve_recipients(&event);
            let message = Arc::new(ServerMessage::Event {
                event: Arc::clone(&event),
            });
            let report = self.registry.fanout(&recipients, message);
            if !report.evicted.is_empty() {
                info!(
                    event_id = %event.id,
                    evicted = report.evicted.len(),
                    "移除持續滿載的連線"
                );
            }
            (report.delivered, report.dropped)
        };

        let relayed = self.relay_out(&event).await;

        self.metrics.record_event(&event);
        self.metrics.record_fanout(delivered, dropped);

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            channel = %event.channel,
            delivered,
            dropped,
            relayed,
            "事件已路由"
        );

        Ack {
            event_id: event.id.clone(),
            delivered,
            relayed,
        }
    }

    /// 來源為 relay 的事件永不再次發布
    async fn relay_out(&self, event: &Arc<Event>) -> bool {
        let Some(relay) = &self.relay else {
            return false;
        };
        if event.source() == Some(EventSource::Relay) {
            return false;
        }

        let envelope = RelayEnvelope::new(self.instance_id.clone(), Arc::clone(event));
        match relay.publish(&envelope).await {
            Ok(()) => {
                self.metrics.record_relay_published();
                true
            }
            Err(err) => {
                self.metrics.record_relay_failure();
                warn!(event_id = %event.id, backend = relay.name(), error = %err, "中繼發布失敗");
                false
            }
        }
    }

    /// 近期事件查詢
    pub fn recent_events(
        &self,
        channel: Option<&str>,
        limit: usize,
        organization_id: Option<&str>,
    ) -> Vec<Arc<Event>> {
        let mut query = HistoryQuery::new(limit);
        query.channel = channel.map(str::to_string);
        query.organization_id = organization_id.map(str::to_string);
        self.history.query(&query)
    }

    pub fn query_history(&self, query: &HistoryQuery) -> Vec<Arc<Event>> {
        self.history.query(query)
    }

    pub fn metrics(&self, organization_id: Option<&str>) -> MetricsSnapshot {
        self.metrics.snapshot(organization_id)
    }

    /// 訂閱中繼並把收到的事件交給 `on_relayed`
    ///
    /// 沒有設定中繼時返回 `None`。
    pub async fn start_relay(self: &Arc<Self>, buffer: usize) -> Result<Option<RelayTasks>, RelayError> {
        let Some(relay) = self.relay.clone() else {
            return Ok(None);
        };

        let (tx, mut rx) = mpsc::channel(buffer.max(1));
        let subscription = relay.subscribe(tx).await?;

        let router = Arc::clone(self);
        let pump = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                // 錯誤已在 on_relayed 中記錄
                let _ = router.on_relayed(envelope).await;
            }
            debug!("中繼事件泵已結束");
        });

        info!(backend = relay.name(), instance_id = %self.instance_id, "跨實例中繼已啟動");
        Ok(Some(RelayTasks { subscription, pump }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{
        ClientInfo, Connection, ConnectionId, Identity, OutboundReceiver, RegistryLimits,
    };
    use crate::event::EventValidationError;
    use crate::relay::MockRelayBus;
    use crate::routing::RoutingError;
    use assert_matches::assert_matches;
    use serde_json::json;

    struct Fixture {
        router: EventRouter,
        registry: Arc<ConnectionRegistry>,
        history: Arc<HistoryBuffer>,
        metrics: Arc<MetricsCollector>,
    }

    fn fixture() -> Fixture {
        let metrics = Arc::new(MetricsCollector::default());
        let registry = Arc::new(ConnectionRegistry::new(RegistryLimits::default(), Arc::clone(&metrics)));
        let history = Arc::new(HistoryBuffer::new(100));
        let router = EventRouter::new(
            "instance-a",
            Arc::clone(&registry),
            Arc::clone(&history),
            Arc::clone(&metrics),
        );
        Fixture {
            router,
            registry,
            history,
            metrics,
        }
    }

    fn connect(registry: &ConnectionRegistry, id: &str, org: &str) -> (ConnectionId, OutboundReceiver) {
        registry
            .register(Connection::new(ConnectionId::from(id), Identity::new("u", org), ClientInfo::default()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_event_has_no_side_effects() {
        let f = fixture();
        let event = Event::new("", "agent-events", json!(null));

        let result = f.router.publish(event).await;
        assert_matches!(result, Err(RoutingError::InvalidEvent(EventValidationError::MissingField("type"))));
        assert!(f.history.is_empty());
        assert_eq!(f.metrics.snapshot(None).rejected_events, 1);
        assert_eq!(f.metrics.snapshot(None).total_events, 0);
    }

    #[tokio::test]
    async fn test_ingest_stamps_timestamp_and_source() {
        let f = fixture();
        let (id, mut rx) = connect(&f.registry, "c1", "O1");
        f.registry.subscribe(&id, "agent-events", None).unwrap();

        let ack = f
            .router
            .ingest(Event::new("AGENT_CREATED", "agent-events", json!(null)), EventOrigin::Client)
            .await
            .unwrap();
        assert_eq!(ack.delivered, 1);
        assert!(!ack.relayed);

        let message = rx.recv().await.unwrap();
        let ServerMessage::Event { event } = message.as_ref() else {
            panic!("unexpected message: {:?}", message);
        };
        assert!(event.metadata.timestamp.is_some());
        assert_eq!(event.source(), Some(EventSource::Client));
    }

    #[tokio::test]
    async fn test_existing_timestamp_is_kept() {
        let f = fixture();
        let stamped = Utc::now() - chrono::Duration::minutes(5);
        let mut event = Event::new("AGENT_CREATED", "agent-events", json!(null));
        event.metadata.timestamp = Some(stamped);

        f.router.publish(event).await.unwrap();
        let recent = f.router.recent_events(Some("agent-events"), 10, None);
        assert_eq!(recent[0].metadata.timestamp, Some(stamped));
        assert_eq!(recent[0].source(), Some(EventSource::Server));
    }

    #[tokio::test]
    async fn test_expired_event_is_buffered_but_not_delivered() {
        let f = fixture();
        let (id, mut rx) = connect(&f.registry, "c1", "O1");
        f.registry.subscribe(&id, "agent-events", None).unwrap();

        let mut event = Event::new("AGENT_CREATED", "agent-events", json!(null)).with_ttl(1_000);
        event.metadata.timestamp = Some(Utc::now() - chrono::Duration::seconds(5));

        let ack = f.router.publish(event).await.unwrap();
        assert_eq!(ack.delivered, 0);
        assert_eq!(f.history.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_publish_and_failure_are_swallowed() {
        let mut relay = MockRelayBus::new();
        relay.expect_name().return_const("mock");
        let mut calls = 0;
        relay.expect_publish().times(2).returning(move |envelope| {
            assert_eq!(envelope.instance_id, "instance-a");
            calls += 1;
            if calls == 1 {
                Ok(())
            } else {
                Err(RelayError::Unavailable("down".to_string()))
            }
        });

        let f = fixture();
        let router = f.router.with_relay(Arc::new(relay));

        let first = router.publish(Event::new("A", "c", json!(null))).await.unwrap();
        assert!(first.relayed);
        let second = router.publish(Event::new("B", "c", json!(null))).await.unwrap();
        assert!(!second.relayed);

        let snapshot = f.metrics.snapshot(None);
        assert_eq!(snapshot.relay_published, 1);
        assert_eq!(snapshot.relay_failures, 1);
        assert_eq!(snapshot.total_events, 2);
    }

    #[tokio::test]
    async fn test_relayed_event_is_never_republished() {
        let mut relay = MockRelayBus::new();
        relay.expect_publish().never();
        relay.expect_name().return_const("mock");

        let f = fixture();
        let (id, mut rx) = connect(&f.registry, "c1", "O1");
        f.registry.subscribe(&id, "agent-events", None).unwrap();
        let router = f.router.with_relay(Arc::new(relay));

        let stamped = Utc::now() - chrono::Duration::seconds(3);
        let mut event = Event::new("AGENT_CREATED", "agent-events", json!(null));
        event.metadata.timestamp = Some(stamped);
        event.metadata.source = Some(EventSource::Server);

        let ack = router
            .on_relayed(RelayEnvelope::new("instance-b", Arc::new(event)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.delivered, 1);
        assert!(!ack.relayed);

        let message = rx.recv().await.unwrap();
        let ServerMessage::Event { event } = message.as_ref() else {
            panic!("unexpected message: {:?}", message);
        };
        assert_eq!(event.source(), Some(EventSource::Relay));
        assert_eq!(event.metadata.timestamp, Some(stamped));

        // 直接注入 source = relay 的事件也不會被發布
        let injected = Event::new("X", "c", json!(null)).with_source(EventSource::Relay);
        let ack = router.publish(injected).await.unwrap();
        assert!(!ack.relayed);
        assert_eq!(f.metrics.snapshot(None).relay_received, 1);
    }

    #[tokio::test]
    async fn test_own_echo_is_dropped() {
        let f = fixture();
        let event = Arc::new(Event::new("AGENT_CREATED", "agent-events", json!(null)));

        let result = f
            .router
            .on_relayed(RelayEnvelope::new("instance-a", event))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(f.history.is_empty());
    }

    #[tokio::test]
    async fn test_start_relay_without_backend() {
        let f = fixture();
        let router = Arc::new(f.router);
        assert!(router.start_relay(16).await.unwrap().is_none());
        assert_eq!(router.relay_backend(), None);
    }
}
