use std::sync::Arc;

use crate::{
    config::{GatewaySettings, ProviderId},
    gateway::InferenceGateway,
    metrics::AppMetrics,
};

#[derive(Clone)]
pub struct AppState {
    pub gateway: InferenceGateway,
    pub settings: Arc<GatewaySettings>,
    pub metrics: Arc<AppMetrics>,
}

impl AppState {
    pub fn new(gateway: InferenceGateway, settings: GatewaySettings) -> Self {
        Self {
            gateway,
            settings: Arc::new(settings),
            metrics: Arc::new(AppMetrics::new()),
        }
    }

    /// Settings snapshot for one request, optionally with another active
    /// provider.
    pub fn snapshot_for(&self, provider: Option<ProviderId>) -> Arc<GatewaySettings> {
        match provider {
            Some(id) if id != self.settings.active => Arc::new(self.settings.with_active(id)),
            _ => self.settings.clone(),
        }
    }
}
