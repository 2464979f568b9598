//! Redis連接模組
//!
//! 提供跨實例中繼所需的 Redis 客戶端（專用訂閱連接）與連接池（發布）。

pub mod client;
pub mod pool;

#[cfg(test)]
pub mod test_config;

pub use client::{Client, RedisClientError};
pub use pool::{ConnectionPool, RedisPool, RedisPoolError};
