// src/api/rest.rs
use axum::{
    http::{HeaderValue, StatusCode},
    routing::get,
    Router,
};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn};

use super::{
    auth::ApiAuth,
    routes::api_routes,
    state::AppState,
    ws::ws_handler,
};
use crate::config::ServerConfig;

pub const API_BASE_PATH: &str = "/api/v1";

pub struct RestApi {
    server_config: ServerConfig,
    auth: ApiAuth,
    state: AppState,
}

impl RestApi {
    pub fn new(server_config: ServerConfig, auth: ApiAuth, state: AppState) -> Self {
        Self {
            server_config,
            auth,
            state,
        }
    }

    pub async fn bind(&self) -> io::Result<TcpListener> {
        let ip = self
            .server_config
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let addr = SocketAddr::from((ip, self.server_config.port));
        TcpListener::bind(addr).await
    }

    /// 在給定的 listener 上提供服務，直到 `shutdown` 完成
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.build_app();
        info!("HTTP/WebSocket 服務監聽於 {}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }

    pub fn build_app(&self) -> Router {
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .nest(API_BASE_PATH, api_routes(self.auth.clone()))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            )
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                self.server_config.request_timeout(),
            ));

        let app = if self.server_config.enable_cors {
            app.layer(self.build_cors_layer())
        } else {
            app
        };

        app.with_state(self.state.clone())
    }

    fn build_cors_layer(&self) -> CorsLayer {
        let cors = CorsLayer::new()
            .allow_methods(vec![axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers(vec![
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-api-key"),
                axum::http::HeaderName::from_static("x-timestamp"),
                axum::http::HeaderName::from_static("x-signature"),
            ]);

        let origins = &self.server_config.cors_allowed_origins;
        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            return cors.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "忽略無效的 CORS 來源");
                    None
                }
            })
            .collect();
        cors.allow_origin(origins)
    }
}
