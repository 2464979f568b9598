//! WebSocket 傳輸層
//!
//! 升級前先驗證 token，失敗時回應 401 且不建立任何註冊表狀態。
//! 每條連線拆成寫入任務（消費發送佇列並定期 ping）與讀取迴圈（解析客戶端訊框）。
//! 註冊表移除連線時發送佇列會關閉，寫入任務隨之送出 Close 並結束。

use crate::api::state::AppState;
use crate::connection::{
    ClientInfo, Connection, ConnectionId, DisconnectReason, Identity, OutboundReceiver,
    RegistryError, RoomKind,
};
use crate::event::{ClientMessage, ErrorCode, Event, EventOrigin, EventSource, HistoryQuery, ServerMessage};
use crate::routing::{EventRouter, RoutingError};
use axum::{
    extract::{
        ws::{
            rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket,
            WebSocketUpgrade,
        },
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// 歷史查詢未指定數量時的預設值
const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header_value = |name| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let ip_address = header_value(header::HeaderName::from_static("x-forwarded-for"))
        .and_then(|forwarded| forwarded.split(',').next().map(|ip| ip.trim().to_string()));
    let reconnect_count = header_value(header::HeaderName::from_static("x-reconnect-count"))
        .and_then(|count| count.parse().ok())
        .unwrap_or(0);

    ClientInfo {
        user_agent: header_value(header::USER_AGENT),
        ip_address,
        connected_at: Utc::now(),
        reconnect_count,
    }
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = match state.tokens.verify(params.token.as_deref().unwrap_or_default()) {
        Ok(identity) => identity,
        Err(err) => {
            warn!(error = %err, "WebSocket 連線認證失敗");
            return err.into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let connection = Connection::new(ConnectionId::new(), identity.clone(), client_info(&headers));
    let (connection_id, outbound) = match state.registry().register(connection) {
        Ok(registered) => registered,
        Err(err) => {
            warn!(error = %err, "無法註冊連線");
            let body = Json(json!({"error": "unavailable", "message": err.to_string()}));
            return (StatusCode::SERVICE_UNAVAILABLE, body).into_response();
        }
    };

    let registry = Arc::clone(state.registry());
    let failed_id = connection_id.clone();
    ws.on_failed_upgrade(move |err| {
        warn!(connection_id = %failed_id, error = %err, "WebSocket 升級失敗");
        registry.remove(&failed_id, DisconnectReason::ClientClosed);
    })
    .on_upgrade(move |socket| {
        let session = ConnectionSession::new(connection_id, identity, Arc::clone(&state.router));
        run_connection(socket, session, outbound, state.heartbeat_interval)
    })
}

async fn run_connection(
    socket: WebSocket,
    session: ConnectionSession,
    mut outbound: OutboundReceiver,
    heartbeat_interval: Duration,
) {
    let connection_id = session.connection_id.clone();
    let registry = Arc::clone(session.router.registry());
    let (mut ws_tx, mut ws_rx) = socket.split();

    let _ = registry.send_to(
        &connection_id,
        ServerMessage::Welcome {
            connection_id: connection_id.clone(),
            instance_id: session.router.instance_id().to_string(),
        },
    );

    let writer_id = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat_interval);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                message = outbound.recv() => {
                    let Some(message) = message else {
                        // 註冊表已移除此連線
                        let _ = ws_tx.send(Message::Close(Some(CloseFrame {
                            code: axum::extract::ws::close_code::AWAY,
                            reason: "connection closed by server".into(),
                        }))).await;
                        break;
                    };
                    let text = match serde_json::to_string(message.as_ref()) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(connection_id = %writer_id, error = %err, "無法序列化訊息");
                            continue;
                        }
                    };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!(connection_id = %writer_id, "已發送 ping");
                }
            }
        }
    });

    let reader_session = session.clone();
    let mut reader = tokio::spawn(async move {
        let registry = reader_session.router.registry();
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                Message::Text(text) => {
                    registry.touch(&reader_session.connection_id);
                    if let Some(reply) = reader_session.handle_text(text.as_str()).await {
                        if registry.send_to(&reader_session.connection_id, reply).is_err() {
                            break;
                        }
                    }
                }
                Message::Pong(_) | Message::Ping(_) => {
                    registry.touch(&reader_session.connection_id);
                }
                Message::Binary(_) => {
                    registry.touch(&reader_session.connection_id);
                    let reply = ServerMessage::error(ErrorCode::InvalidMessage, "只接受文字訊框");
                    let _ = registry.send_to(&reader_session.connection_id, reply);
                }
                Message::Close(_) => break,
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if registry.remove(&connection_id, DisconnectReason::ClientClosed) {
        info!(connection_id = %connection_id, "客戶端已斷線");
    }
}

/// 單一連線的協議狀態
///
/// 與傳輸層分離，使每個客戶端訊框的處理都能在沒有 socket 的情況下測試。
#[derive(Clone)]
pub struct ConnectionSession {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub router: Arc<EventRouter>,
}

impl ConnectionSession {
    pub fn new(connection_id: ConnectionId, identity: Identity, router: Arc<EventRouter>) -> Self {
        Self {
            connection_id,
            identity,
            router,
        }
    }

    /// 解析並處理一個文字訊框，返回要回覆給此連線的訊息
    pub async fn handle_text(&self, text: &str) -> Option<ServerMessage> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => Some(self.handle(message).await),
            Err(err) => {
                debug!(connection_id = %self.connection_id, error = %err, "無法解析客戶端訊框");
                Some(ServerMessage::error(ErrorCode::InvalidMessage, err.to_string()))
            }
        }
    }

    pub async fn handle(&self, message: ClientMessage) -> ServerMessage {
        let registry = self.router.registry();
        match message {
            ClientMessage::Publish { event } => self.publish(event).await,
            ClientMessage::Subscribe { channel, filters } => {
                match registry.subscribe(&self.connection_id, &channel, filters) {
                    Ok(subscription_id) => ServerMessage::Subscribed {
                        subscription_id,
                        channel,
                    },
                    Err(err) => registry_error_reply(err),
                }
            }
            ClientMessage::Unsubscribe { subscription_id } => {
                match registry.unsubscribe_owned(&self.connection_id, &subscription_id) {
                    Ok(_) => ServerMessage::Unsubscribed { subscription_id },
                    Err(err) => registry_error_reply(err),
                }
            }
            ClientMessage::JoinRoom { room } => match registry.join_room(&self.connection_id, &room) {
                Ok(_) => ServerMessage::RoomJoined { room },
                Err(err) => registry_error_reply(err),
            },
            ClientMessage::LeaveRoom { room } => match registry.leave_room(&self.connection_id, &room) {
                Ok(_) => ServerMessage::RoomLeft { room },
                Err(err) => registry_error_reply(err),
            },
            ClientMessage::Ping => {
                registry.touch(&self.connection_id);
                ServerMessage::Pong {
                    timestamp: Utc::now(),
                }
            }
            ClientMessage::History {
                channel,
                limit,
                since,
            } => {
                // 只能查詢自己組織的事件
                let mut query = HistoryQuery::new(limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
                    .organization(self.identity.organization_id.clone());
                query.channel = channel;
                query.since = since;
                ServerMessage::History {
                    events: self.router.query_history(&query),
                }
            }
        }
    }

    /// 客戶端發布的事件以連線身分為準，來源固定為 client
    ///
    /// 指定 `roomId` 時必須是客戶端可加入且自己已加入的房間，組織房間一律拒絕。
    async fn publish(&self, mut event: Event) -> ServerMessage {
        if let Some(room) = event.metadata.room_id.as_deref() {
            let allowed = RoomKind::of(room).is_client_joinable()
                && self.router.registry().is_room_member(&self.connection_id, room);
            if !allowed {
                warn!(
                    connection_id = %self.connection_id,
                    room = %room,
                    "拒絕發布到未加入的房間"
                );
                return ServerMessage::error(
                    ErrorCode::ForbiddenRoom,
                    format!("不可發布到房間: {}", room),
                );
            }
        }
        if event.id.trim().is_empty() {
            event.id = Uuid::new_v4().to_string();
        }
        event.metadata.user_id = Some(self.identity.user_id.clone());
        event.metadata.organization_id = Some(self.identity.organization_id.clone());
        event.metadata.source = Some(EventSource::Client);

        match self.router.ingest(event, EventOrigin::Client).await {
            Ok(ack) => ServerMessage::Ack { ack },
            Err(RoutingError::InvalidEvent(err)) => {
                ServerMessage::error(ErrorCode::InvalidEvent, err.to_string())
            }
        }
    }
}

fn registry_error_reply(err: RegistryError) -> ServerMessage {
    let code = match &err {
        RegistryError::ConnectionNotFound(_) | RegistryError::SubscriptionNotFound(_) => {
            ErrorCode::NotFound
        }
        RegistryError::SubscriptionLimit(_) => ErrorCode::SubscriptionLimit,
        RegistryError::ForbiddenRoom(_) => ErrorCode::ForbiddenRoom,
        RegistryError::EmptyChannel => ErrorCode::InvalidMessage,
        RegistryError::DuplicateConnection(_) | RegistryError::CapacityExceeded(_) => {
            ErrorCode::Internal
        }
    };
    ServerMessage::error(code, err.to_string())
}
