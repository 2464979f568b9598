use crate::api::{error::ApiError, state::AppState};
use crate::event::{Ack, Event, EventOrigin};
use axum::extract::{Json, Query, State};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

/// 未指定 limit 時返回的事件數
const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentEventsQuery {
    pub channel: Option<String>,
    pub limit: Option<usize>,
    pub organization_id: Option<String>,
}

pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<RecentEventsQuery>,
) -> Result<Json<Vec<Arc<Event>>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    if limit == 0 {
        return Err(ApiError::BadRequest("limit 必須大於 0".to_string()));
    }

    let events = state.router.recent_events(
        query.channel.as_deref(),
        limit,
        query.organization_id.as_deref(),
    );
    Ok(Json(events))
}

/// 內部發布介面
pub async fn publish(
    State(state): State<AppState>,
    Json(mut event): Json<Event>,
) -> Result<Json<Ack>, ApiError> {
    if event.id.trim().is_empty() {
        event.id = Uuid::new_v4().to_string();
    }
    let ack = state.router.ingest(event, EventOrigin::Internal).await?;
    Ok(Json(ack))
}
