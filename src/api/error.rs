use crate::routing::RoutingError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// REST 處理器錯誤
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("請求參數錯誤: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Routing(RoutingError::InvalidEvent(_)) => "invalid_event",
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}
