pub mod backend;
pub mod config;
pub mod decoder;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use config::{GatewaySettings, ProviderId};
use errors::GatewayError;
use gateway::InferenceGateway;
use tracing::info;

pub fn build_state() -> Result<state::AppState, GatewayError> {
    let settings = GatewaySettings::from_env()?;
    let gateway = InferenceGateway::from_env()?;

    let enabled = ProviderId::ALL
        .into_iter()
        .filter(|id| settings.provider(*id).is_some_and(|config| config.enabled))
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(",");
    info!(active = %settings.active, enabled = %enabled, "providers configured");
    Ok(state::AppState::new(gateway, settings))
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/providers", get(handlers::providers))
        .route("/v1/ask", post(handlers::ask))
        .with_state(state)
}
