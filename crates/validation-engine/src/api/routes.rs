//! 路由配置

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use rel_shared::observability::middleware as obs_middleware;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{handlers, state::AppState};

/// 规则管理与记录校验路由，挂载在 `/api` 下
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/rules",
            post(handlers::save_rule).get(handlers::list_rules),
        )
        .route("/rules/initialize", post(handlers::initialize_rules))
        .route(
            "/rules/{id}",
            get(handlers::get_rule).delete(handlers::delete_rule),
        )
        .route("/rules/{id}/active", put(handlers::set_rule_active))
        .route(
            "/records/{key_prefix}/validate",
            post(handlers::validate_record),
        )
        .route("/translate", post(handlers::translate_expression))
}

/// 完整应用路由
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(handlers::health_check))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .with_state(state)
}
