mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde_json::Value;
use streaming_inference_gateway::{
    build_app,
    config::{GatewaySettings, ProviderId},
    gateway::InferenceGateway,
    state::AppState,
};
use tower::util::ServiceExt;

use common::{rest_config, serve, settings_for, sse_response};

async fn happy_upstream() -> std::net::SocketAddr {
    let router = Router::new().route(
        "/chat/completions",
        post(|| async {
            sse_response(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n",
                "data: [DONE]\n",
            ])
        }),
    );
    serve(router).await
}

async fn failing_upstream() -> std::net::SocketAddr {
    let router = Router::new().route(
        "/chat/completions",
        post(|| async { (StatusCode::UNAUTHORIZED, "denied").into_response() }),
    );
    serve(router).await
}

fn app_for(settings: GatewaySettings) -> Router {
    build_app(AppState::new(InferenceGateway::default(), settings))
}

fn ask(body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/ask")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("request build")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    String::from_utf8(bytes.to_vec()).expect("response body should be UTF-8")
}

#[tokio::test]
async fn returns_full_answer_for_non_stream_request() {
    let addr = happy_upstream().await;
    let app = app_for(settings_for(
        ProviderId::DeepSeek,
        rest_config(ProviderId::DeepSeek, addr),
    ));

    let response = app
        .oneshot(ask(r#"{"prompt":"hello"}"#))
        .await
        .expect("request execution");
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_text(response).await).expect("json body");
    assert_eq!(body["text"], "Hi there");
    assert_eq!(body["provider"], "deepseek");
}

#[tokio::test]
async fn streams_cumulative_events_then_done() {
    let addr = happy_upstream().await;
    let app = app_for(settings_for(
        ProviderId::Glm,
        rest_config(ProviderId::Glm, addr),
    ));

    let response = app
        .oneshot(ask(r#"{"prompt":"hello","stream":true}"#))
        .await
        .expect("request execution");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_text(response).await;
    let first = body.find(r#""text":"Hi""#).expect("first update");
    let second = body.find(r#""text":"Hi there""#).expect("second update");
    let done = body.find("data: [DONE]").expect("done marker");
    assert!(first < second && second < done);
}

#[tokio::test]
async fn rejects_blank_prompt() {
    let app = app_for(GatewaySettings::default());

    let response = app
        .oneshot(ask(r#"{"prompt":"  "}"#))
        .await
        .expect("request execution");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unconfigured_provider_is_a_bad_request() {
    let app = app_for(GatewaySettings::default());

    let response = app
        .oneshot(ask(r#"{"prompt":"hello","provider":"moonshot","stream":true}"#))
        .await
        .expect("request execution");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("no model configured"));
}

#[tokio::test]
async fn upstream_failure_maps_to_bad_gateway() {
    let addr = failing_upstream().await;
    let app = app_for(settings_for(
        ProviderId::Qwen,
        rest_config(ProviderId::Qwen, addr),
    ));

    let response = app
        .oneshot(ask(r#"{"prompt":"hello"}"#))
        .await
        .expect("request execution");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_text(response).await.contains("\"backend_error\""));
}

#[tokio::test]
async fn lists_providers_and_counts_calls() {
    let addr = happy_upstream().await;
    let app = app_for(settings_for(
        ProviderId::DeepSeek,
        rest_config(ProviderId::DeepSeek, addr),
    ));

    let providers = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/providers")
                .body(Body::empty())
                .expect("request build"),
        )
        .await
        .expect("request execution");
    let body: Value = serde_json::from_str(&body_text(providers).await).expect("json body");
    assert_eq!(body["active"], "deepseek");
    assert_eq!(body["providers"].as_array().map(Vec::len), Some(8));

    let answered = app
        .clone()
        .oneshot(ask(r#"{"prompt":"hello"}"#))
        .await
        .expect("request execution");
    assert_eq!(answered.status(), StatusCode::OK);

    let metrics = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .expect("request build"),
        )
        .await
        .expect("request execution");
    let text = body_text(metrics).await;
    assert!(text.contains(r#"gateway_calls_total{outcome="ok",provider="deepseek"} 1"#));
}
