//! 行程內的中繼匯流排
//!
//! 多個 [`InMemoryRelay`] 共用同一個 [`InMemoryHub`]，模擬多個實例連到同一個 broker。
//! 訊息以序列化後的字串傳遞，與 Redis 後端走相同的線路格式。

use crate::relay::bus::{RelayBus, RelayEnvelope, RelayError};
use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 廣播通道容量，落後太多的接收端會跳過訊息
const HUB_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct InMemoryHub {
    sender: broadcast::Sender<String>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    pub fn relay(&self) -> InMemoryRelay {
        InMemoryRelay { hub: self.clone() }
    }
}

impl Default for InMemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryRelay {
    hub: InMemoryHub,
}

impl InMemoryRelay {
    /// 擁有獨立 hub 的中繼，只會收到自己發布的訊息
    pub fn standalone() -> Self {
        InMemoryHub::new().relay()
    }
}

#[async_trait]
impl RelayBus for InMemoryRelay {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError> {
        let payload = envelope.to_payload()?;
        // 沒有訂閱者時 send 會失敗，這不是錯誤
        let _ = self.hub.sender.send(payload);
        Ok(())
    }

    async fn subscribe(&self, sink: mpsc::Sender<RelayEnvelope>) -> Result<JoinHandle<()>, RelayError> {
        let mut receiver = self.hub.sender.subscribe();

        Ok(tokio::spawn(async move {
            loop {
                let payload = match receiver.recv().await {
                    Ok(payload) => payload,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "記憶體中繼接收端落後，已跳過訊息");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                match RelayEnvelope::from_payload(&payload) {
                    Ok(envelope) => {
                        if sink.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "無法解析中繼訊息"),
                }
            }
            debug!("記憶體中繼訂閱已結束");
        }))
    }
}
