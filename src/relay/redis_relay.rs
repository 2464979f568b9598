//! Redis 發布/訂閱中繼
//!
//! 發布透過連接池，訂閱使用專用的 pub/sub 連接。訂閱連接斷開時等待
//! `reconnect_delay_secs` 後重新訂閱，直到接收端關閉為止。

use crate::redis::{Client, ConnectionPool, RedisPool};
use crate::relay::bus::{RelayBus, RelayEnvelope, RelayError};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct RedisRelay {
    client: Client,
    pool: Arc<ConnectionPool>,
    channel: String,
}

impl RedisRelay {
    pub fn new(client: Client, pool: Arc<ConnectionPool>, channel: impl Into<String>) -> Self {
        Self {
            client,
            pool,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// 單次訂閱循環，連接中斷時返回 `true` 表示需要重連
    async fn pump(client: &Client, channel: &str, sink: &mpsc::Sender<RelayEnvelope>) -> bool {
        let mut pubsub = match client.subscribe(channel).await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                warn!(channel, error = %err, "Redis中繼訂閱失敗");
                return true;
            }
        };
        info!(channel, "Redis中繼訂閱已建立");

        let mut messages = Box::pin(pubsub.on_message());
        while let Some(message) = messages.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "無法讀取Redis中繼訊息");
                    continue;
                }
            };
            match RelayEnvelope::from_payload(&payload) {
                Ok(envelope) => {
                    if sink.send(envelope).await.is_err() {
                        return false;
                    }
                }
                Err(err) => warn!(error = %err, "無法解析中繼訊息"),
            }
        }

        warn!(channel, "Redis中繼訂閱連接已中斷");
        true
    }
}

#[async_trait]
impl RelayBus for RedisRelay {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError> {
        let payload = envelope.to_payload()?;
        let receivers = self
            .pool
            .publish(&self.channel, &payload)
            .await
            .map_err(|err| RelayError::Unavailable(err.to_string()))?;
        debug!(event_id = %envelope.event.id, receivers, "事件已發布到Redis中繼");
        Ok(())
    }

    async fn subscribe(&self, sink: mpsc::Sender<RelayEnvelope>) -> Result<JoinHandle<()>, RelayError> {
        let client = self.client.clone();
        let channel = self.channel.clone();
        let retry_delay = Duration::from_secs(client.config().reconnect_delay_secs);

        Ok(tokio::spawn(async move {
            while Self::pump(&client, &channel, &sink).await {
                if sink.is_closed() {
                    break;
                }
                tokio::time::sleep(retry_delay).await;
            }
            info!(channel = %channel, "Redis中繼訂閱已停止");
        }))
    }
}
