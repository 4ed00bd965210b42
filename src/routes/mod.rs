pub mod location;
pub mod rides;

use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;

use crate::{
    AppState,
    middleware::{auth_middleware, log_errors},
};

pub async fn health() -> &'static str {
    "ok"
}

/// 创建主路由，所有业务接口都在 `api_base_uri` 下并需要认证
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route(
            "/rides/{ride_id}/location",
            get(location::get_latest).put(location::update_location),
        )
        .route(
            "/rides/{ride_id}/location/stream",
            get(location::stream_location),
        )
        .route("/rides/{ride_id}/seats/decrease", post(rides::decrease_seats))
        .route("/rides/{ride_id}/seats/increase", post(rides::increase_seats))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api = Router::new().merge(public_routes).merge(protected_routes);

    // axum 不允许在根路径上 nest
    let base = state.config.api_base_uri.trim_matches('/');
    let router = if base.is_empty() {
        api
    } else {
        Router::new().nest(&format!("/{}", base), api)
    };

    router
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(log_errors)))
        .with_state(state)
}
