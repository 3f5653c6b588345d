use std::{convert::Infallible, sync::Arc, time::Instant};

use axum::{
    extract::State,
    http::header::CONTENT_TYPE,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::{GatewaySettings, ProviderId},
    errors::{BadRequest, ErrorEnvelope, GatewayError},
    gateway::GatewayUpdate,
    models::{AskChunk, AskRequest, AskResponse, ProviderSummary, ProvidersResponse},
    state::AppState,
};

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorEnvelope::new(
                "server_error",
                format!("metrics render failed: {error}"),
            )),
        )
            .into_response(),
    }
}

pub async fn providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let active = state.settings.active;
    let providers = ProviderId::ALL
        .into_iter()
        .map(|id| ProviderSummary {
            id,
            enabled: state
                .settings
                .provider(id)
                .is_some_and(|config| config.enabled),
            active: id == active,
        })
        .collect();

    Json(ProvidersResponse { active, providers })
}

pub async fn ask(State(state): State<AppState>, Json(request): Json<AskRequest>) -> Response {
    let started = Instant::now();
    let stream = request.stream;
    let _inflight = state.metrics.inflight_guard();

    let response = match process_ask(state.clone(), request).await {
        Ok(response) => response,
        Err(error) => error,
    };

    state.metrics.observe_request(
        "/v1/ask",
        "POST",
        stream,
        response.status().as_u16(),
        started.elapsed(),
    );

    response
}

async fn process_ask(state: AppState, request: AskRequest) -> Result<Response, Response> {
    request
        .validate()
        .map_err(|message| BadRequest(message).into_response())?;

    let settings = state.snapshot_for(request.provider);
    let response_id = format!("ask-{}", Uuid::new_v4());
    info!(
        request_id = %response_id,
        provider = %settings.active,
        stream = request.stream,
        "ask request accepted"
    );

    if request.stream {
        stream_answer(state, settings, request.prompt, response_id)
    } else {
        one_shot_answer(state, settings, request.prompt, response_id).await
    }
}

async fn one_shot_answer(
    state: AppState,
    settings: Arc<GatewaySettings>,
    prompt: String,
    response_id: String,
) -> Result<Response, Response> {
    let provider = settings.active;
    let mut ignore = |_: &str| {};
    match state.gateway.submit(&settings, &prompt, &mut ignore).await {
        Ok(result) => {
            state.metrics.observe_call(provider.as_str(), "ok");
            Ok(Json(AskResponse {
                id: response_id,
                provider,
                text: result.text,
            })
            .into_response())
        }
        Err(error) => {
            state.metrics.observe_call(provider.as_str(), error.kind());
            Err(error.into_response())
        }
    }
}

fn stream_answer(
    state: AppState,
    settings: Arc<GatewaySettings>,
    prompt: String,
    response_id: String,
) -> Result<Response, Response> {
    let provider = settings.active;
    // Configuration problems surface as a plain HTTP error, not an SSE event.
    let client = match state.gateway.client_for(&settings) {
        Ok(client) => client,
        Err(error) => {
            state.metrics.observe_call(provider.as_str(), error.kind());
            return Err(error.into_response());
        }
    };

    let mut updates = state.gateway.stream_with(client, prompt);
    let metrics = state.metrics.clone();
    let outbound = async_stream::stream! {
        while let Some(update) = updates.next().await {
            match update {
                GatewayUpdate::Text(text) => {
                    let chunk = AskChunk { id: &response_id, text: &text };
                    yield Ok::<Event, Infallible>(json_event(&chunk));
                }
                GatewayUpdate::Done(_) => {
                    metrics.observe_call(provider.as_str(), "ok");
                    break;
                }
                GatewayUpdate::Failed(error) => {
                    metrics.observe_call(provider.as_str(), error.kind());
                    warn!(request_id = %response_id, error = %error, "streamed call failed");
                    yield Ok::<Event, Infallible>(error_event(&error));
                    break;
                }
            }
        }

        yield Ok::<Event, Infallible>(Event::default().data("[DONE]"));
    };

    Ok(Sse::new(outbound)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(10)))
        .into_response())
}

fn error_event(error: &GatewayError) -> Event {
    json_event(&ErrorEnvelope::from_gateway(error))
}

fn json_event<T: serde::Serialize>(payload: &T) -> Event {
    match serde_json::to_string(payload) {
        Ok(serialized) => Event::default().data(serialized),
        Err(error) => {
            let fallback = serde_json::json!({
                "error": {
                    "message": format!("serialization error: {error}"),
                    "type": "server_error"
                }
            });
            Event::default().data(fallback.to_string())
        }
    }
}
