//! WebSocket 文字訊框協議
//!
//! 所有訊框皆為以 `type` 標記的 JSON 物件。

use crate::connection::{ConnectionId, SubscriptionFilters, SubscriptionId};
use crate::event::types::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 路由器對已接受事件的確認
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub event_id: String,
    /// 實際放入發送佇列的本地連線數
    pub delivered: usize,
    /// 是否已交給跨實例中繼
    pub relayed: bool,
}

/// 客戶端送往伺服器的訊息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Publish {
        event: Event,
    },
    Subscribe {
        channel: String,
        #[serde(default)]
        filters: Option<SubscriptionFilters>,
    },
    Unsubscribe {
        subscription_id: SubscriptionId,
    },
    JoinRoom {
        room: String,
    },
    LeaveRoom {
        room: String,
    },
    Ping,
    History {
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        since: Option<DateTime<Utc>>,
    },
}

/// 錯誤回覆代碼
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidMessage,
    InvalidEvent,
    NotFound,
    SubscriptionLimit,
    ForbiddenRoom,
    Internal,
}

/// 伺服器送往客戶端的訊息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        connection_id: ConnectionId,
        instance_id: String,
    },
    Event {
        event: Arc<Event>,
    },
    Ack {
        #[serde(flatten)]
        ack: Ack,
    },
    Subscribed {
        subscription_id: SubscriptionId,
        channel: String,
    },
    Unsubscribed {
        subscription_id: SubscriptionId,
    },
    RoomJoined {
        room: String,
    },
    RoomLeft {
        room: String,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    History {
        events: Vec<Arc<Event>>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}
