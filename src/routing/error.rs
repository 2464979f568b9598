use crate::event::EventValidationError;
use thiserror::Error;

/// 路由錯誤
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// 事件未通過驗證，沒有產生任何副作用
    #[error("無效事件: {0}")]
    InvalidEvent(#[from] EventValidationError),
}

pub type RoutingResult<T> = Result<T, RoutingError>;
