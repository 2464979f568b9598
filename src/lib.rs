// 模組定義
pub mod api;
pub mod config;
pub mod connection;
pub mod event;
pub mod monitor;
pub mod redis;
pub mod relay;
pub mod routing;
pub mod server;
