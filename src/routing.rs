// 事件路由模組

pub mod error;
pub mod router;

pub use error::{RoutingError, RoutingResult};
pub use router::{EventRouter, RelayTasks};
