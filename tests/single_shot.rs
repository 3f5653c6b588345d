mod common;

use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value};
use streaming_inference_gateway::{
    config::{ProviderId, API_KEY},
    errors::{GatewayError, TransportError},
    gateway::InferenceGateway,
};

use common::{rest_config, serve, settings_for};

struct Upstream {
    reply: (StatusCode, String),
    seen: Mutex<Option<(Uri, Value)>>,
}

async fn generate(
    State(upstream): State<Arc<Upstream>>,
    uri: Uri,
    Json(body): Json<Value>,
) -> Response {
    *upstream.seen.lock().expect("seen lock") = Some((uri, body));
    let (status, body) = upstream.reply.clone();
    (status, body).into_response()
}

async fn call(
    status: StatusCode,
    reply: Value,
) -> (Arc<Upstream>, Result<String, GatewayError>, Vec<String>) {
    let reply = if reply.is_null() {
        String::new()
    } else {
        reply.to_string()
    };
    let upstream = Arc::new(Upstream {
        reply: (status, reply),
        seen: Mutex::new(None),
    });
    let addr = serve(Router::new().fallback(generate).with_state(upstream.clone())).await;
    let config = rest_config(ProviderId::Gemini, addr);
    let settings = settings_for(ProviderId::Gemini, config);

    let mut updates = Vec::new();
    let mut record = |text: &str| updates.push(text.to_owned());
    let result = InferenceGateway::default()
        .submit(&settings, "Translate: hello", &mut record)
        .await
        .map(|answer| answer.text);
    (upstream, result, updates)
}

#[tokio::test]
async fn single_update_with_full_text() {
    let (upstream, result, updates) = call(
        StatusCode::OK,
        json!({"candidates": [{"content": {"parts": [{"text": "Bonjour"}]}}]}),
    )
    .await;

    assert_eq!(result.expect("call should succeed"), "Bonjour");
    assert_eq!(updates, vec!["Bonjour"]);

    let (uri, body) = upstream
        .seen
        .lock()
        .expect("seen lock")
        .clone()
        .expect("request captured");
    assert_eq!(uri.path(), "/models/gemini-1.5-flash:generateContent");
    assert_eq!(uri.query(), Some("key=sk-test"));
    assert_eq!(body["contents"][0]["parts"][0]["text"], "Translate: hello");
}

#[tokio::test]
async fn structured_error_message_is_surfaced() {
    let (_, result, updates) = call(
        StatusCode::BAD_REQUEST,
        json!({"error": {"code": 400, "message": "API key not valid"}}),
    )
    .await;

    match result {
        Err(GatewayError::Transport(TransportError::Status { status, body })) => {
            assert_eq!(status, 400);
            assert_eq!(body, "API key not valid");
        }
        other => panic!("expected transport status error, got {other:?}"),
    }
    assert!(updates.is_empty());
}

#[tokio::test]
async fn unstructured_error_falls_back_to_status_line() {
    let (_, result, _) = call(StatusCode::INTERNAL_SERVER_ERROR, Value::Null).await;

    match result {
        Err(GatewayError::Transport(TransportError::Status { status, body })) => {
            assert_eq!(status, 500);
            assert_eq!(body, "500 Internal Server Error");
        }
        other => panic!("expected transport status error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_key_is_a_configuration_error() {
    let mut config = rest_config(ProviderId::Gemini, "127.0.0.1:9".parse().expect("addr"));
    config.credentials.remove(API_KEY);
    let settings = settings_for(ProviderId::Gemini, config);

    let mut record = |_: &str| {};
    let result = InferenceGateway::default()
        .submit(&settings, "hi", &mut record)
        .await;
    assert!(matches!(result, Err(GatewayError::Configuration(_))));
}
