// 連線模組
//
// 管理存活連線、頻道訂閱與房間成員資格，以及心跳存活監控。

pub mod liveness;
pub mod registry;
pub mod room;
pub mod subscription;
pub mod types;

// 重新導出核心類型
pub use liveness::LivenessMonitor;
pub use registry::{
    ConnectionRegistry, DeliveryOutcome, FanoutReport, OutboundReceiver, OutboundSender,
    Recipient, RegistryError, RegistryLimits, RegistryResult,
};
pub use room::{channel_room, organization_room, RoomIndex, RoomKind};
pub use subscription::{Subscription, SubscriptionFilters, SubscriptionIndex};
pub use types::{ClientInfo, Connection, ConnectionId, DisconnectReason, Identity, SubscriptionId};
