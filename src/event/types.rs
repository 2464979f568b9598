use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// 事件信封驗證錯誤
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventValidationError {
    #[error("缺少必要欄位: {0}")]
    MissingField(&'static str),

    #[error("串流事件 {stream_id} 缺少 chunkIndex")]
    MissingChunkIndex { stream_id: String },

    #[error("chunkIndex {index} 超出 totalChunks {total}")]
    ChunkOutOfRange { index: u32, total: u32 },
}

/// 已知的頻道，其餘名稱以 `Custom` 保存
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Channel {
    AgentEvents,
    ToolEvents,
    WorkflowEvents,
    ProviderEvents,
    KnowledgeEvents,
    SystemEvents,
    Streaming,
    Notifications,
    Custom(String),
}

impl Channel {
    pub fn as_str(&self) -> &str {
        match self {
            Channel::AgentEvents => "agent-events",
            Channel::ToolEvents => "tool-events",
            Channel::WorkflowEvents => "workflow-events",
            Channel::ProviderEvents => "provider-events",
            Channel::KnowledgeEvents => "knowledge-events",
            Channel::SystemEvents => "system-events",
            Channel::Streaming => "streaming",
            Channel::Notifications => "notifications",
            Channel::Custom(name) => name,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

impl From<String> for Channel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "agent-events" => Channel::AgentEvents,
            "tool-events" => Channel::ToolEvents,
            "workflow-events" => Channel::WorkflowEvents,
            "provider-events" => Channel::ProviderEvents,
            "knowledge-events" => Channel::KnowledgeEvents,
            "system-events" => Channel::SystemEvents,
            "streaming" => Channel::Streaming,
            "notifications" => Channel::Notifications,
            _ => Channel::Custom(value),
        }
    }
}

impl From<&str> for Channel {
    fn from(value: &str) -> Self {
        Channel::from(value.to_string())
    }
}

impl From<Channel> for String {
    fn from(value: Channel) -> Self {
        match value {
            Channel::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Channel::Custom(String::new())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已知的事件類型標籤；信封上的 `type` 仍是自由字串
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgentCreated,
    AgentUpdated,
    AgentDeleted,
    AgentExecutionStarted,
    AgentExecutionCompleted,
    AgentExecutionFailed,
    ToolCallStarted,
    ToolCallCompleted,
    ToolCallError,
    WorkflowStarted,
    WorkflowStepCompleted,
    WorkflowCompleted,
    WorkflowFailed,
    TextChunk,
    StreamStart,
    StreamEnd,
    SystemNotification,
    SystemError,
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::AgentCreated => "AGENT_CREATED",
            EventKind::AgentUpdated => "AGENT_UPDATED",
            EventKind::AgentDeleted => "AGENT_DELETED",
            EventKind::AgentExecutionStarted => "AGENT_EXECUTION_STARTED",
            EventKind::AgentExecutionCompleted => "AGENT_EXECUTION_COMPLETED",
            EventKind::AgentExecutionFailed => "AGENT_EXECUTION_FAILED",
            EventKind::ToolCallStarted => "TOOL_CALL_STARTED",
            EventKind::ToolCallCompleted => "TOOL_CALL_COMPLETED",
            EventKind::ToolCallError => "TOOL_CALL_ERROR",
            EventKind::WorkflowStarted => "WORKFLOW_STARTED",
            EventKind::WorkflowStepCompleted => "WORKFLOW_STEP_COMPLETED",
            EventKind::WorkflowCompleted => "WORKFLOW_COMPLETED",
            EventKind::WorkflowFailed => "WORKFLOW_FAILED",
            EventKind::TextChunk => "TEXT_CHUNK",
            EventKind::StreamStart => "STREAM_START",
            EventKind::StreamEnd => "STREAM_END",
            EventKind::SystemNotification => "SYSTEM_NOTIFICATION",
            EventKind::SystemError => "SYSTEM_ERROR",
            EventKind::Custom(tag) => tag,
        }
    }

    /// 類型標籤帶有錯誤或失敗標記
    pub fn is_error(&self) -> bool {
        is_error_type(self.as_str())
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            "AGENT_CREATED" => EventKind::AgentCreated,
            "AGENT_UPDATED" => EventKind::AgentUpdated,
            "AGENT_DELETED" => EventKind::AgentDeleted,
            "AGENT_EXECUTION_STARTED" => EventKind::AgentExecutionStarted,
            "AGENT_EXECUTION_COMPLETED" => EventKind::AgentExecutionCompleted,
            "AGENT_EXECUTION_FAILED" => EventKind::AgentExecutionFailed,
            "TOOL_CALL_STARTED" => EventKind::ToolCallStarted,
            "TOOL_CALL_COMPLETED" => EventKind::ToolCallCompleted,
            "TOOL_CALL_ERROR" => EventKind::ToolCallError,
            "WORKFLOW_STARTED" => EventKind::WorkflowStarted,
            "WORKFLOW_STEP_COMPLETED" => EventKind::WorkflowStepCompleted,
            "WORKFLOW_COMPLETED" => EventKind::WorkflowCompleted,
            "WORKFLOW_FAILED" => EventKind::WorkflowFailed,
            "TEXT_CHUNK" => EventKind::TextChunk,
            "STREAM_START" => EventKind::StreamStart,
            "STREAM_END" => EventKind::StreamEnd,
            "SYSTEM_NOTIFICATION" => EventKind::SystemNotification,
            "SYSTEM_ERROR" => EventKind::SystemError,
            other => EventKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 類型字串是否含有錯誤標記（error / fail，不分大小寫）
pub fn is_error_type(event_type: &str) -> bool {
    let lower = event_type.to_ascii_lowercase();
    lower.contains("error") || lower.contains("fail")
}

/// 事件優先級
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// 事件來源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Client,
    Server,
    Relay,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Client => "client",
            EventSource::Server => "server",
            EventSource::Relay => "relay",
        }
    }
}

/// 事件進入路由器的途徑
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// 客戶端連線送出
    Client,
    /// 業務模組透過內部發布介面送出
    Internal,
}

impl EventOrigin {
    pub fn as_source(&self) -> EventSource {
        match self {
            EventOrigin::Client => EventSource::Client,
            EventOrigin::Internal => EventSource::Server,
        }
    }
}

/// 事件元數據
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EventSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
}

impl EventMetadata {
    /// 依訂閱過濾鍵取出對應欄位，接受 camelCase 與 snake_case
    pub fn field(&self, key: &str) -> Option<&str> {
        match key {
            "userId" | "user_id" => self.user_id.as_deref(),
            "organizationId" | "organization_id" => self.organization_id.as_deref(),
            "sessionId" | "session_id" => self.session_id.as_deref(),
            "roomId" | "room_id" => self.room_id.as_deref(),
            "correlationId" | "correlation_id" => self.correlation_id.as_deref(),
            "parentEventId" | "parent_event_id" => self.parent_event_id.as_deref(),
            "source" => self.source.map(|source| source.as_str()),
            _ => None,
        }
    }
}

/// 事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub priority: EventPriority,
    /// 存活時間（毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_stream_end: Option<bool>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl Event {
    /// 以隨機 id 建立事件
    pub fn new(event_type: impl Into<String>, channel: impl Into<Channel>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            channel: channel.into(),
            data,
            priority: EventPriority::Normal,
            ttl: None,
            stream_id: None,
            chunk_index: None,
            total_chunks: None,
            is_stream_end: None,
            metadata: EventMetadata::default(),
        }
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.metadata.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.metadata.user_id = Some(user_id.into());
        self
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.metadata.room_id = Some(room_id.into());
        self
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.metadata.source = Some(source);
        self
    }

    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    /// 標記為串流分片
    pub fn with_chunk(mut self, stream_id: impl Into<String>, index: u32, total: Option<u32>, is_end: bool) -> Self {
        self.stream_id = Some(stream_id.into());
        self.chunk_index = Some(index);
        self.total_chunks = total;
        self.is_stream_end = Some(is_end);
        self
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from(self.event_type.as_str())
    }

    pub fn is_error(&self) -> bool {
        is_error_type(&self.event_type)
    }

    pub fn source(&self) -> Option<EventSource> {
        self.metadata.source
    }

    /// 驗證必要欄位與串流欄位的一致性
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.id.trim().is_empty() {
            return Err(EventValidationError::MissingField("id"));
        }
        if self.event_type.trim().is_empty() {
            return Err(EventValidationError::MissingField("type"));
        }
        if self.channel.is_empty() {
            return Err(EventValidationError::MissingField("channel"));
        }

        if let Some(stream_id) = &self.stream_id {
            let index = self.chunk_index.ok_or_else(|| EventValidationError::MissingChunkIndex {
                stream_id: stream_id.clone(),
            })?;
            if let Some(total) = self.total_chunks {
                if index >= total {
                    return Err(EventValidationError::ChunkOutOfRange { index, total });
                }
            }
        }

        Ok(())
    }

    /// 事件是否已超過 TTL；沒有 TTL 或時間戳的事件永不過期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.ttl, self.metadata.timestamp) {
            (Some(ttl), Some(timestamp)) => {
                let ttl = Duration::milliseconds(i64::try_from(ttl).unwrap_or(i64::MAX));
                timestamp
                    .checked_add_signed(ttl)
                    .map(|deadline| deadline < now)
                    .unwrap_or(false)
            }
            _ => false,
        }
    }
}
