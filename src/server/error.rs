use crate::config::ValidationError;
use crate::redis::{RedisClientError, RedisPoolError};
use crate::relay::RelayError;
use thiserror::Error;

/// 伺服器錯誤類型
#[derive(Error, Debug)]
pub enum ServerError {
    /// 配置錯誤
    #[error("配置錯誤: {0}")]
    Config(String),

    #[error("配置驗證失敗: {0}")]
    Validation(#[from] ValidationError),

    #[error("Redis 客戶端錯誤: {0}")]
    RedisClient(#[from] RedisClientError),

    #[error("Redis 連接池錯誤: {0}")]
    RedisPool(#[from] RedisPoolError),

    /// 跨實例中繼錯誤
    #[error("中繼錯誤: {0}")]
    Relay(#[from] RelayError),

    /// IO 錯誤
    #[error("IO 錯誤: {0}")]
    Io(#[from] std::io::Error),

    /// 運行時錯誤
    #[error("運行時錯誤: {0}")]
    Runtime(String),
}

/// 伺服器結果類型別名
pub type ServerResult<T> = Result<T, ServerError>;
