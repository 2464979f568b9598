use crate::config::types::RedisConfig;
use redis::aio::PubSub;
use redis::{Client as RedisClient, RedisError};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Redis客戶端錯誤
#[derive(Error, Debug)]
pub enum RedisClientError {
    /// Redis連接錯誤
    #[error("Redis連接錯誤: {0}")]
    ConnectionError(#[from] RedisError),

    /// 操作超時錯誤
    #[error("Redis操作超時: {0}")]
    TimeoutError(String),
}

/// Redis客戶端
///
/// 訂閱必須使用專用連接，不能從連接池借用。
#[derive(Debug, Clone)]
pub struct Client {
    client: RedisClient,
    config: RedisConfig,
}

impl Client {
    /// 創建新的Redis客戶端
    pub fn new(config: RedisConfig) -> Result<Self, RedisClientError> {
        let client = RedisClient::open(config.url.clone())?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connection_timeout_secs)
    }

    async fn with_timeout<T, F>(&self, what: &str, future: F) -> Result<T, RedisClientError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match timeout(self.connect_timeout(), future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                error!("無法建立Redis{}: {}", what, err);
                Err(RedisClientError::ConnectionError(err))
            }
            Err(_) => {
                error!("Redis{}超時 ({}秒)", what, self.config.connection_timeout_secs);
                Err(RedisClientError::TimeoutError(format!(
                    "{}超時 ({}秒)",
                    what, self.config.connection_timeout_secs
                )))
            }
        }
    }

    /// 建立專用的發布/訂閱連接
    pub async fn get_pubsub(&self) -> Result<PubSub, RedisClientError> {
        let pubsub = self
            .with_timeout("訂閱連接", self.client.get_async_pubsub())
            .await?;
        debug!("成功建立Redis訂閱連接");
        Ok(pubsub)
    }

    /// 建立訂閱連接並訂閱指定頻道，失敗時按配置重試
    pub async fn subscribe(&self, channel: &str) -> Result<PubSub, RedisClientError> {
        self.with_retry(|| async move {
            let mut pubsub = self.get_pubsub().await?;
            pubsub.subscribe(channel).await?;
            Ok(pubsub)
        })
        .await
    }

    /// 使用重試策略執行Redis操作
    async fn with_retry<F, Fut, T>(&self, operation: F) -> Result<T, RedisClientError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RedisClientError>>,
    {
        let max_attempts = self.config.reconnect_attempts + 1;
        let retry_delay = Duration::from_secs(self.config.reconnect_delay_secs);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempts >= max_attempts => return Err(err),
                Err(err) => {
                    warn!(
                        "Redis操作失敗 (嘗試 {}/{}): {}. 重試中...",
                        attempts, max_attempts, err
                    );
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::pool::RedisPool;
    use crate::redis::test_config::RedisTestConfig;
    use futures::StreamExt;

    #[test]
    fn test_invalid_url_is_rejected() {
        let config = RedisConfig {
            url: "not-a-redis-url".to_string(),
            ..RedisConfig::default()
        };
        assert!(Client::new(config).is_err());
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let Some(pool) = RedisTestConfig::skip_if_redis_unavailable("test_publish_reaches_subscriber").await
        else {
            return;
        };

        let client = Client::new(RedisTestConfig::create_test_config()).expect("無法創建Redis客戶端");
        let channel = format!("apix:test:{}", uuid::Uuid::new_v4());
        let mut pubsub = client.subscribe(&channel).await.expect("SUBSCRIBE失敗");

        let receivers = pool.publish(&channel, "hello").await.expect("PUBLISH失敗");
        assert_eq!(receivers, 1);

        let mut messages = Box::pin(pubsub.on_message());
        let message = tokio::time::timeout(Duration::from_secs(2), messages.next())
            .await
            .expect("等待訊息超時")
            .expect("訂閱串流已結束");
        assert_eq!(message.get_payload::<String>().unwrap(), "hello");
    }
}
