use crate::api::{
    auth::{auth_middleware, ApiAuth},
    state::AppState,
};
use axum::{middleware, Router};

pub mod events;
pub mod system;

/// `/api/v1` 之下的路由；健康檢查以外都需要簽名請求
pub fn api_routes(auth: ApiAuth) -> Router<AppState> {
    let protected = Router::new()
        .merge(events::routes())
        .merge(system::routes())
        .route_layer(middleware::from_fn_with_state(auth, auth_middleware));

    Router::new().merge(system::public_routes()).merge(protected)
}
