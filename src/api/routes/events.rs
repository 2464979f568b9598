// src/api/routes/events.rs
use crate::api::{handlers::events, state::AppState};
use axum::{
    routing::{get, post},
    Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(events::publish))
        .route("/events/recent", get(events::recent))
}
