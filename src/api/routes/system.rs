// src/api/routes/system.rs
use crate::api::{handlers::system, state::AppState};
use axum::{routing::get, Router};

/// 不需簽名的系統路由
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/system/health", get(system::health))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(system::metrics))
}
