// 事件模型模組
//
// 定義在連線、路由器與跨實例中繼之間流動的事件信封、
// 頻道與事件類型枚舉、近期事件緩衝，以及 WebSocket 訊框協議。

pub mod history;
pub mod protocol;
pub mod types;

// 重新導出核心類型
pub use history::{HistoryBuffer, HistoryQuery, DEFAULT_HISTORY_CAPACITY};
pub use protocol::{Ack, ClientMessage, ErrorCode, ServerMessage};
pub use types::{
    is_error_type, Channel, Event, EventKind, EventMetadata, EventOrigin, EventPriority,
    EventSource, EventValidationError,
};
