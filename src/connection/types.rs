use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// 連線識別碼，等同傳輸層的 session id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 訂閱識別碼
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(format!("sub_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 已通過認證的連線身分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub organization_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
        }
    }
}

/// 連線的客戶端資訊
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub reconnect_count: u32,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            user_agent: None,
            ip_address: None,
            connected_at: Utc::now(),
            reconnect_count: 0,
        }
    }
}

/// 一條存活的客戶端連線
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: String,
    pub organization_id: String,
    pub is_connected: bool,
    pub last_ping_at: DateTime<Utc>,
    pub subscriptions: HashSet<SubscriptionId>,
    pub rooms: HashSet<String>,
    pub metadata: ClientInfo,
}

impl Connection {
    pub fn new(id: ConnectionId, identity: Identity, metadata: ClientInfo) -> Self {
        Self {
            id,
            user_id: identity.user_id,
            organization_id: identity.organization_id,
            is_connected: true,
            last_ping_at: metadata.connected_at,
            subscriptions: HashSet::new(),
            rooms: HashSet::new(),
            metadata,
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.user_id.clone(), self.organization_id.clone())
    }
}

/// 連線被移除的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// 客戶端關閉或傳輸中斷
    ClientClosed,
    /// 心跳逾時
    Timeout,
    /// 發送佇列長期滿載
    Backpressure,
    /// 伺服器關閉
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::Backpressure => "backpressure",
            DisconnectReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
