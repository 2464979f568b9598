//! 集中化的 Redis 測試配置
//!
//! 需要真實 Redis 的測試透過此處取得連線配置；環境中沒有 Redis 時跳過。

use crate::config::types::RedisConfig;
use crate::redis::pool::{ConnectionPool, RedisPool, RedisPoolError};
use std::sync::Arc;
use tracing::warn;

/// Redis 測試配置建構器
pub struct RedisTestConfig;

impl RedisTestConfig {
    /// 獲取測試用 Redis URL
    ///
    /// 優先使用 REDIS_TEST_URL 環境變數，否則為 localhost:6379
    pub fn get_test_url() -> String {
        std::env::var("REDIS_TEST_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    /// 建立標準測試 Redis 配置
    pub fn create_test_config() -> RedisConfig {
        RedisConfig {
            url: Self::get_test_url(),
            pool_size: 3,
            connection_timeout_secs: 2,
            reconnect_attempts: 0,
            reconnect_delay_secs: 1,
        }
    }

    /// 建立測試用 Redis 連接池
    pub fn create_test_pool() -> Result<Arc<ConnectionPool>, RedisPoolError> {
        Ok(Arc::new(ConnectionPool::new(Self::create_test_config())?))
    }

    /// Redis 可用時返回連接池，否則記錄並返回 None 讓測試跳過
    pub async fn skip_if_redis_unavailable(test_name: &str) -> Option<Arc<ConnectionPool>> {
        let pool = Self::create_test_pool().ok()?;
        if pool.check_health().await {
            Some(pool)
        } else {
            warn!("跳過 Redis 測試 '{}' - Redis 環境不可用", test_name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_get_test_url_with_env_var() {
        std::env::set_var("REDIS_TEST_URL", "redis://custom:1234");
        assert_eq!(RedisTestConfig::get_test_url(), "redis://custom:1234");
        std::env::remove_var("REDIS_TEST_URL");
    }

    #[test]
    #[serial]
    fn test_create_test_config() {
        let config = RedisTestConfig::create_test_config();
        assert!(config.url.starts_with("redis://"));
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.reconnect_attempts, 0);
    }
}
