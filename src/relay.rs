// 跨實例中繼模組
//
// 讓連到實例 A 的客戶端能收到在實例 B 發布的事件。後端可替換，
// 路由器只依賴 `RelayBus`。

pub mod bus;
pub mod memory;
pub mod redis_relay;

pub use bus::{RelayBus, RelayEnvelope, RelayError};
#[cfg(test)]
pub use bus::MockRelayBus;
pub use memory::{InMemoryHub, InMemoryRelay};
pub use redis_relay::RedisRelay;
