//! 連線註冊表
//!
//! 連線表、訂閱索引與房間索引共用同一把 `RwLock`，因此註冊、移除（含級聯清理）、
//! 訂閱、退訂、加入與離開房間彼此之間是原子的，訂閱永遠指向存活的連線。
//!
//! 扇出時在讀鎖下收集收件者的發送端，釋放鎖之後才以 `try_send` 投遞，
//! 路由器永遠不會等待任何一條連線。

use crate::config::GatewayConfig;
use crate::connection::room::{channel_room, organization_room, RoomIndex, RoomKind};
use crate::connection::subscription::{Subscription, SubscriptionFilters, SubscriptionIndex};
use crate::connection::types::{Connection, ConnectionId, DisconnectReason, SubscriptionId};
use crate::event::{Event, ServerMessage};
use crate::monitor::MetricsCollector;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

pub type OutboundSender = mpsc::Sender<Arc<ServerMessage>>;
pub type OutboundReceiver = mpsc::Receiver<Arc<ServerMessage>>;

/// 註冊表錯誤
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("連線已存在: {0}")]
    DuplicateConnection(ConnectionId),

    #[error("連線數已達上限: {0}")]
    CapacityExceeded(usize),

    #[error("找不到連線: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("找不到訂閱: {0}")]
    SubscriptionNotFound(SubscriptionId),

    #[error("每條連線最多 {0} 個訂閱")]
    SubscriptionLimit(usize),

    #[error("頻道名稱不可為空")]
    EmptyChannel,

    #[error("不允許操作房間: {0}")]
    ForbiddenRoom(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// 註冊表容量限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    pub max_connections: usize,
    pub max_subscriptions_per_connection: usize,
    pub outbound_queue_size: usize,
    pub max_consecutive_drops: u32,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for RegistryLimits {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            max_subscriptions_per_connection: config.max_subscriptions_per_connection,
            outbound_queue_size: config.outbound_queue_size.max(1),
            max_consecutive_drops: config.max_consecutive_drops.max(1),
        }
    }
}

/// 單一投遞的結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// 佇列已滿，訊息被丟棄
    Dropped,
    /// 接收端已關閉
    Closed,
}

/// 一次扇出的統計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub dropped: usize,
    pub evicted: Vec<ConnectionId>,
}

/// 扇出收件者：連線 id 與其發送端
#[derive(Debug, Clone)]
pub struct Recipient {
    pub connection_id: ConnectionId,
    outbound: OutboundSender,
    consecutive_drops: Arc<AtomicU32>,
}

#[derive(Debug)]
struct ConnectionEntry {
    record: Connection,
    /// 毫秒時間戳，於讀鎖下更新
    last_ping_ms: AtomicI64,
    outbound: OutboundSender,
    consecutive_drops: Arc<AtomicU32>,
}

impl ConnectionEntry {
    fn last_ping_at(&self) -> DateTime<Utc> {
        let millis = self.last_ping_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(self.record.last_ping_at)
    }

    fn snapshot(&self) -> Connection {
        let mut record = self.record.clone();
        record.last_ping_at = self.last_ping_at();
        record
    }

    fn recipient(&self) -> Recipient {
        Recipient {
            connection_id: self.record.id.clone(),
            outbound: self.outbound.clone(),
            consecutive_drops: Arc::clone(&self.consecutive_drops),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    subscriptions: SubscriptionIndex,
    rooms: RoomIndex,
}

/// 連線註冊表
#[derive(Debug)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    limits: RegistryLimits,
    metrics: Arc<MetricsCollector>,
}

impl ConnectionRegistry {
    pub fn new(limits: RegistryLimits, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            limits,
            metrics,
        }
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// 註冊連線並自動加入其組織房間
    ///
    /// 返回連線 id 與發送佇列的接收端，由傳輸層負責消費。
    pub fn register(&self, mut connection: Connection) -> RegistryResult<(ConnectionId, OutboundReceiver)> {
        let (tx, rx) = mpsc::channel(self.limits.outbound_queue_size);
        let id = connection.id.clone();
        let organization_id = connection.organization_id.clone();
        let org_room = organization_room(&organization_id);

        {
            let mut state = self.state.write();
            if state.connections.contains_key(&id) {
                return Err(RegistryError::DuplicateConnection(id));
            }
            if state.connections.len() >= self.limits.max_connections {
                return Err(RegistryError::CapacityExceeded(self.limits.max_connections));
            }

            connection.is_connected = true;
            connection.rooms.insert(org_room.clone());
            state.rooms.join(&org_room, &id);

            let last_ping_ms = connection.last_ping_at.timestamp_millis();
            state.connections.insert(
                id.clone(),
                ConnectionEntry {
                    record: connection,
                    last_ping_ms: AtomicI64::new(last_ping_ms),
                    outbound: tx,
                    consecutive_drops: Arc::new(AtomicU32::new(0)),
                },
            );
            // 計數與插入在同一把鎖內，移除時的遞減不會早於遞增
            self.metrics.connection_opened(&organization_id);
        }

        info!(connection_id = %id, organization_id = %organization_id, "連線已註冊");
        Ok((id, rx))
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Connection> {
        self.state.read().connections.get(id).map(ConnectionEntry::snapshot)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.state.read().connections.contains_key(id)
    }

    /// 移除連線並級聯刪除其訂閱與房間成員資格
    ///
    /// 重複移除為 no-op，返回是否真的移除了連線。
    pub fn remove(&self, id: &ConnectionId, reason: DisconnectReason) -> bool {
        self.remove_where(id, reason, |_| true)
    }

    /// 在寫鎖下重新確認心跳仍逾時才移除
    ///
    /// 掃描取得逾時名單後到移除之前抵達的心跳會讓連線保留。
    pub fn remove_if_stale(&self, id: &ConnectionId, now: DateTime<Utc>, window: Duration) -> bool {
        self.remove_where(id, DisconnectReason::Timeout, |entry| {
            now.signed_duration_since(entry.last_ping_at()) > window
        })
    }

    fn remove_where<F>(&self, id: &ConnectionId, reason: DisconnectReason, should_remove: F) -> bool
    where
        F: FnOnce(&ConnectionEntry) -> bool,
    {
        let removed = {
            let mut state = self.state.write();
            if !state.connections.get(id).is_some_and(should_remove) {
                return false;
            }
            let Some(entry) = state.connections.remove(id) else {
                return false;
            };
            for subscription_id in &entry.record.subscriptions {
                state.subscriptions.remove(subscription_id);
            }
            for room in &entry.record.rooms {
                state.rooms.leave(room, id);
            }
            self.metrics
                .connection_closed(&entry.record.organization_id, reason);
            entry.record
        };

        info!(
            connection_id = %id,
            organization_id = %removed.organization_id,
            reason = %reason,
            subscriptions = removed.subscriptions.len(),
            "連線已移除"
        );
        true
    }

    /// 以目前時間更新心跳
    pub fn touch(&self, id: &ConnectionId) -> bool {
        self.touch_at(id, Utc::now())
    }

    pub fn touch_at(&self, id: &ConnectionId, at: DateTime<Utc>) -> bool {
        match self.state.read().connections.get(id) {
            Some(entry) => {
                entry
                    .last_ping_ms
                    .fetch_max(at.timestamp_millis(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn subscribe(
        &self,
        connection_id: &ConnectionId,
        channel: &str,
        filters: Option<SubscriptionFilters>,
    ) -> RegistryResult<SubscriptionId> {
        if channel.trim().is_empty() {
            return Err(RegistryError::EmptyChannel);
        }

        let mut state = self.state.write();
        let state = &mut *state;
        let entry = state
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RegistryError::ConnectionNotFound(connection_id.clone()))?;
        if entry.record.subscriptions.len() >= self.limits.max_subscriptions_per_connection {
            return Err(RegistryError::SubscriptionLimit(
                self.limits.max_subscriptions_per_connection,
            ));
        }

        let subscription = Subscription {
            id: SubscriptionId::new(),
            connection_id: connection_id.clone(),
            channel: channel.to_string(),
            user_id: entry.record.user_id.clone(),
            organization_id: entry.record.organization_id.clone(),
            filters: filters.filter(|filters| !filters.is_empty()),
            is_active: true,
            created_at: Utc::now(),
        };
        let id = subscription.id.clone();
        entry.record.subscriptions.insert(id.clone());
        state.subscriptions.insert(subscription);

        debug!(connection_id = %connection_id, subscription_id = %id, channel, "已訂閱頻道");
        Ok(id)
    }

    pub fn unsubscribe(&self, subscription_id: &SubscriptionId) -> RegistryResult<Subscription> {
        let mut state = self.state.write();
        let subscription = state
            .subscriptions
            .remove(subscription_id)
            .ok_or_else(|| RegistryError::SubscriptionNotFound(subscription_id.clone()))?;
        if let Some(entry) = state.connections.get_mut(&subscription.connection_id) {
            entry.record.subscriptions.remove(subscription_id);
        }
        Ok(subscription)
    }

    /// 只允許擁有者退訂，其他連線的訂閱視為不存在
    pub fn unsubscribe_owned(
        &self,
        connection_id: &ConnectionId,
        subscription_id: &SubscriptionId,
    ) -> RegistryResult<Subscription> {
        let mut state = self.state.write();
        let owned = state
            .subscriptions
            .get(subscription_id)
            .is_some_and(|subscription| &subscription.connection_id == connection_id);
        if !owned {
            return Err(RegistryError::SubscriptionNotFound(subscription_id.clone()));
        }

        let subscription = state
            .subscriptions
            .remove(subscription_id)
            .ok_or_else(|| RegistryError::SubscriptionNotFound(subscription_id.clone()))?;
        if let Some(entry) = state.connections.get_mut(connection_id) {
            entry.record.subscriptions.remove(subscription_id);
        }
        Ok(subscription)
    }

    /// 訂閱命中的連線集合
    pub fn matches(&self, event: &Event) -> HashSet<ConnectionId> {
        self.state.read().subscriptions.matches(event).cloned().collect()
    }

    pub fn join_room(&self, connection_id: &ConnectionId, room: &str) -> RegistryResult<bool> {
        Self::check_room(room)?;
        let mut state = self.state.write();
        let entry = state
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RegistryError::ConnectionNotFound(connection_id.clone()))?;
        entry.record.rooms.insert(room.to_string());
        Ok(state.rooms.join(room, connection_id))
    }

    pub fn leave_room(&self, connection_id: &ConnectionId, room: &str) -> RegistryResult<bool> {
        Self::check_room(room)?;
        let mut state = self.state.write();
        let entry = state
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RegistryError::ConnectionNotFound(connection_id.clone()))?;
        entry.record.rooms.remove(room);
        Ok(state.rooms.leave(room, connection_id))
    }

    fn check_room(room: &str) -> RegistryResult<()> {
        if room.trim().is_empty() || !RoomKind::of(room).is_client_joinable() {
            return Err(RegistryError::ForbiddenRoom(room.to_string()));
        }
        Ok(())
    }

    pub fn is_room_member(&self, connection_id: &ConnectionId, room: &str) -> bool {
        self.state
            .read()
            .connections
            .get(connection_id)
            .is_some_and(|entry| entry.record.rooms.contains(room))
    }

    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.state.read().rooms.members(room).cloned().collect()
    }

    /// 解析事件的收件者，每條連線最多出現一次
    ///
    /// 訂閱命中 ∪ 組織房間 ∪ 事件指定房間 ∪ 頻道房間。
    pub fn resolve_recipients(&self, event: &Event) -> Vec<Recipient> {
        let state = self.state.read();
        let mut seen: HashSet<&ConnectionId> = HashSet::new();

        let org_room = event
            .metadata
            .organization_id
            .as_deref()
            .map(organization_room);
        let channel_room = channel_room(event.channel.as_str());

        let from_rooms = org_room
            .iter()
            .map(String::as_str)
            .chain(event.metadata.room_id.as_deref())
            .chain(std::iter::once(channel_room.as_str()))
            .flat_map(|room| state.rooms.members(room));

        state
            .subscriptions
            .matches(event)
            .chain(from_rooms)
            .filter(|id| seen.insert(*id))
            .filter_map(|id| state.connections.get(id))
            .map(ConnectionEntry::recipient)
            .collect()
    }

    /// 投遞一則訊息給單一收件者
    ///
    /// 佇列滿時丟棄並累計連續丟棄次數，成功投遞會重置計數。
    pub fn deliver(&self, recipient: &Recipient, message: Arc<ServerMessage>) -> DeliveryOutcome {
        match recipient.outbound.try_send(message) {
            Ok(()) => {
                recipient.consecutive_drops.store(0, Ordering::Relaxed);
                DeliveryOutcome::Delivered
            }
            Err(TrySendError::Full(_)) => {
                let drops = recipient.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    connection_id = %recipient.connection_id,
                    consecutive_drops = drops,
                    "發送佇列已滿，丟棄訊息"
                );
                DeliveryOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => DeliveryOutcome::Closed,
        }
    }

    /// 扇出同一則訊息，並移除連續丟棄超過上限的連線
    pub fn fanout(&self, recipients: &[Recipient], message: Arc<ServerMessage>) -> FanoutReport {
        let mut report = FanoutReport::default();
        for recipient in recipients {
            match self.deliver(recipient, Arc::clone(&message)) {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Dropped => {
                    report.dropped += 1;
                    if self.is_over_drop_limit(recipient) {
                        report.evicted.push(recipient.connection_id.clone());
                    }
                }
                DeliveryOutcome::Closed => {}
            }
        }

        for id in &report.evicted {
            self.remove(id, DisconnectReason::Backpressure);
        }
        report
    }

    /// 直接回覆單一連線
    pub fn send_to(&self, id: &ConnectionId, message: ServerMessage) -> RegistryResult<DeliveryOutcome> {
        let recipient = self
            .state
            .read()
            .connections
            .get(id)
            .map(ConnectionEntry::recipient)
            .ok_or_else(|| RegistryError::ConnectionNotFound(id.clone()))?;

        let outcome = self.deliver(&recipient, Arc::new(message));
        if outcome == DeliveryOutcome::Dropped && self.is_over_drop_limit(&recipient) {
            self.remove(id, DisconnectReason::Backpressure);
        }
        Ok(outcome)
    }

    fn is_over_drop_limit(&self, recipient: &Recipient) -> bool {
        recipient.consecutive_drops.load(Ordering::Relaxed) >= self.limits.max_consecutive_drops
    }

    pub fn count(&self) -> usize {
        self.state.read().connections.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.read().subscriptions.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.state.read().connections.keys().cloned().collect()
    }

    /// 心跳超過 `window` 未更新的連線
    pub fn stale_connections(&self, now: DateTime<Utc>, window: Duration) -> Vec<ConnectionId> {
        self.state
            .read()
            .connections
            .values()
            .filter(|entry| now.signed_duration_since(entry.last_ping_at()) > window)
            .map(|entry| entry.record.id.clone())
            .collect()
    }

    /// 移除所有連線，用於關閉伺服器
    pub fn close_all(&self, reason: DisconnectReason) -> usize {
        self.connection_ids()
            .iter()
            .filter(|id| self.remove(id, reason))
            .count()
    }
}
