pub mod blob;
pub mod config;
pub mod db;
pub mod engine;
pub mod http;
pub mod repo;
pub mod state;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/stream/:id",
            get(http::stream_routes::get_stream)
                .put(http::stream_routes::put_stream)
                .post(http::stream_routes::post_stream)
                .head(http::stream_routes::head_stream)
                .delete(http::stream_routes::delete_stream),
        )
        .route("/internal/session", post(http::internal_routes::create_session))
        .route(
            "/internal/subscriptions/:session_id",
            get(http::internal_routes::list_subscriptions)
                .post(http::internal_routes::add_subscription)
                .delete(http::internal_routes::remove_subscription),
        )
        .route(
            "/internal/subscribers/:source_stream",
            get(http::internal_routes::list_subscribers).post(http::internal_routes::add_subscriber),
        )
        .route(
            "/internal/fan-in-append/:session_id",
            post(http::internal_routes::fan_in_append),
        )
        .route("/healthz", get(http::health::healthz))
        .route("/readyz", get(http::health::readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
