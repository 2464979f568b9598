use crate::event::Event;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 中繼錯誤
#[derive(Error, Debug)]
pub enum RelayError {
    /// 中繼不可用，呼叫端記錄後忽略
    #[error("中繼不可用: {0}")]
    Unavailable(String),

    #[error("中繼訊息序列化錯誤: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 跨實例傳遞的訊息
///
/// `event` 保持原始事件信封不變，`instance_id` 用於丟棄自己發出的回聲。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEnvelope {
    pub instance_id: String,
    pub event: Arc<Event>,
}

impl RelayEnvelope {
    pub fn new(instance_id: impl Into<String>, event: Arc<Event>) -> Self {
        Self {
            instance_id: instance_id.into(),
            event,
        }
    }

    pub fn to_payload(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// 跨實例發布/訂閱匯流排
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RelayBus: Send + Sync {
    /// 後端名稱，用於日誌與健康檢查
    fn name(&self) -> &'static str;

    /// 發布到所有實例
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError>;

    /// 開始接收其他實例的訊息並送入 `sink`，`sink` 關閉後任務結束
    async fn subscribe(&self, sink: mpsc::Sender<RelayEnvelope>) -> Result<JoinHandle<()>, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_keeps_event_unchanged() {
        let mut event = Event::new("AGENT_CREATED", "agent-events", json!({"name": "a"}))
            .with_organization("O1");
        event.metadata.timestamp = Some(chrono::Utc::now());
        let envelope = RelayEnvelope::new("instance-a", Arc::new(event.clone()));

        let payload = envelope.to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["instanceId"], "instance-a");
        assert_eq!(value["event"]["type"], "AGENT_CREATED");
        assert_eq!(value["event"]["metadata"]["organizationId"], "O1");

        let decoded = RelayEnvelope::from_payload(&payload).unwrap();
        assert_eq!(*decoded.event, event);
    }

    #[test]
    fn test_garbage_payload_is_serialization_error() {
        assert!(matches!(
            RelayEnvelope::from_payload("{not json"),
            Err(RelayError::Serialization(_))
        ));
    }
}
