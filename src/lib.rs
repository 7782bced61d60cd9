pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod money;
pub mod providers;
pub mod services;
pub mod store;
pub mod validation;
pub mod webhooks;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use services::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments", post(handlers::payments::create_payment))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route(
            "/payments/:id/capture",
            post(handlers::payments::capture_payment),
        )
        .route(
            "/payments/:id/cancel",
            post(handlers::payments::cancel_payment),
        )
        .route("/webhooks/:provider", post(handlers::webhook::receive))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
