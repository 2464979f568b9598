// api.rs - API服務模組，宣告子模組
//
// 提供閘道對外的傳輸層：
// - WebSocket 端點與訊框協議處理
// - 近期事件、指標與內部發布的 REST 介面
// - 連線 token 與簽名請求認證

/// 認證和授權
pub mod auth;
/// REST 錯誤回應
pub mod error;
/// API處理器
pub mod handlers;
/// REST API 與應用組裝
pub mod rest;
/// API路由定義
pub mod routes;
/// 處理器共用狀態
pub mod state;
/// WebSocket 端點
pub mod ws;

pub use auth::{ApiAuth, AuthError, TokenAuthenticator};
pub use error::ApiError;
pub use rest::{RestApi, API_BASE_PATH};
pub use state::AppState;
pub use ws::ConnectionSession;
