use std::{env, sync::Arc, time::Duration};

use futures_util::{stream::BoxStream, StreamExt};
use tokio::{sync::mpsc, time::Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    backend::{
        gemini::SingleShotClient,
        rest::{RestDescriptor, RestSseClient},
        spark::SignedSocketClient,
        InferenceClient, UpdateFn,
    },
    config::{GatewaySettings, ProviderConfig, ProviderId},
    errors::GatewayError,
    models::CallResult,
};

/// Dispatches prompts to the active provider. Holds no per-call state; the
/// settings snapshot is handed in with every call.
#[derive(Clone, Default)]
pub struct InferenceGateway {
    http: reqwest::Client,
}

#[derive(Debug)]
pub enum GatewayUpdate {
    Text(String),
    Done(CallResult),
    Failed(GatewayError),
}

impl InferenceGateway {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub fn from_env() -> Result<Self, GatewayError> {
        let connect_timeout_secs = env::var("GATEWAY_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(10);

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .build()
            .map_err(|error| {
                GatewayError::configuration(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self::new(http))
    }

    /// Resolves the active provider and builds its client. Never touches the
    /// network.
    pub fn client_for(
        &self,
        settings: &GatewaySettings,
    ) -> Result<Box<dyn InferenceClient>, GatewayError> {
        let id = settings.active;
        let config = settings
            .provider(id)
            .filter(|config| config.enabled)
            .ok_or_else(|| GatewayError::configuration("no model configured"))?;
        self.build_client(id, config)
    }

    fn build_client(
        &self,
        id: ProviderId,
        config: &ProviderConfig,
    ) -> Result<Box<dyn InferenceClient>, GatewayError> {
        let client: Box<dyn InferenceClient> = match id {
            ProviderId::Spark => Box::new(SignedSocketClient::new(config)?),
            ProviderId::Gemini => Box::new(SingleShotClient::new(self.http.clone(), config)?),
            rest => {
                let descriptor = RestDescriptor::for_provider(rest).ok_or_else(|| {
                    GatewayError::configuration(format!("{rest} has no REST descriptor"))
                })?;
                Box::new(RestSseClient::new(self.http.clone(), descriptor, config)?)
            }
        };
        Ok(client)
    }

    pub async fn submit(
        &self,
        settings: &GatewaySettings,
        prompt: &str,
        on_update: &mut UpdateFn<'_>,
    ) -> Result<CallResult, GatewayError> {
        let client = match self.client_for(settings) {
            Ok(client) => client,
            Err(error) => {
                warn!(provider = %settings.active, error = %error, "call rejected");
                return Err(error);
            }
        };
        run(client.as_ref(), prompt, on_update).await
    }

    /// Channel form of [`InferenceGateway::submit`]: every cumulative text
    /// value, then exactly one `Done` or `Failed`.
    pub fn stream(
        &self,
        settings: Arc<GatewaySettings>,
        prompt: String,
    ) -> BoxStream<'static, GatewayUpdate> {
        match self.client_for(&settings) {
            Ok(client) => self.stream_with(client, prompt),
            Err(error) => {
                warn!(provider = %settings.active, error = %error, "call rejected");
                futures_util::stream::once(async move { GatewayUpdate::Failed(error) }).boxed()
            }
        }
    }

    /// Streams a call on a client already resolved by
    /// [`InferenceGateway::client_for`].
    pub fn stream_with(
        &self,
        client: Box<dyn InferenceClient>,
        prompt: String,
    ) -> BoxStream<'static, GatewayUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let updates = tx.clone();
            let mut forward = move |text: &str| {
                let _ = updates.send(GatewayUpdate::Text(text.to_owned()));
            };
            let outcome = match run(client.as_ref(), &prompt, &mut forward).await {
                Ok(result) => GatewayUpdate::Done(result),
                Err(error) => GatewayUpdate::Failed(error),
            };
            let _ = tx.send(outcome);
        });

        UnboundedReceiverStream::new(rx).boxed()
    }
}

async fn run(
    client: &dyn InferenceClient,
    prompt: &str,
    on_update: &mut UpdateFn<'_>,
) -> Result<CallResult, GatewayError> {
    let call_id = Uuid::new_v4();
    info!(%call_id, provider = client.name(), prompt_len = prompt.len(), "call started");
    let started = Instant::now();
    let result = client.complete(prompt, on_update).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(answer) => info!(
            %call_id,
            provider = client.name(),
            len = answer.text.len(),
            elapsed_ms,
            "call finished"
        ),
        Err(error) => warn!(
            %call_id,
            provider = client.name(),
            kind = error.kind(),
            error = %error,
            elapsed_ms,
            "call failed"
        ),
    }
    result
}
