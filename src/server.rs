// server.rs - 伺服器核心組件，宣告子模組
//
// 伺服器模組依配置組裝所有組件並管理生命週期：
// - 構建器模式的組件組裝與中繼後端選擇
// - 存活監控與跨實例中繼等背景任務
// - HTTP/WebSocket 服務與優雅關閉

/// 伺服器構建器實現
pub mod builder;
/// 伺服器級別錯誤處理
pub mod error;

// 重新導出核心組件，簡化外部使用
pub use builder::{Server, ServerBuilder};
pub use error::{ServerError, ServerResult};

/// 伺服器狀態枚舉
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// 伺服器正在初始化
    Initializing,
    /// 伺服器正在運行
    Running,
    /// 伺服器正在關閉
    ShuttingDown,
    /// 伺服器已停止
    Stopped,
}
