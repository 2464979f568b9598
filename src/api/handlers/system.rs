use crate::api::state::AppState;
use crate::monitor::MetricsSnapshot;
use axum::extract::{Json, Query, State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub instance_id: String,
    pub connections: usize,
    pub relay_backend: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.router.instance_id().to_string(),
        connections: state.registry().count(),
        relay_backend: state.router.relay_backend().map(str::to_string),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    pub organization_id: Option<String>,
}

pub async fn metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Json<MetricsSnapshot> {
    Json(state.router.metrics(query.organization_id.as_deref()))
}
