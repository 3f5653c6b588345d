#![allow(dead_code)]

use std::{convert::Infallible, net::SocketAddr};

use axum::{
    body::{Body, Bytes},
    http::header::CONTENT_TYPE,
    response::Response,
    Router,
};
use streaming_inference_gateway::config::{
    GatewaySettings, ProviderConfig, ProviderId, API_KEY, SECRET_KEY,
};
use tokio::net::TcpListener;

pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream listener");
    let addr = listener.local_addr().expect("upstream address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Streams `chunks` as separate body frames, split wherever the caller chose.
pub fn sse_response(chunks: &[&'static str]) -> Response {
    let frames = chunks
        .iter()
        .map(|chunk| Ok::<Bytes, Infallible>(Bytes::from_static(chunk.as_bytes())))
        .collect::<Vec<_>>();
    Response::builder()
        .header(CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(futures_util::stream::iter(frames)))
        .expect("sse response")
}

pub fn rest_config(id: ProviderId, addr: SocketAddr) -> ProviderConfig {
    ProviderConfig::defaults_for(id)
        .enabled(true)
        .with_credential(API_KEY, "sk-test")
        .with_credential(SECRET_KEY, "sk-test")
        .with_base_url(format!("http://{addr}"))
}

pub fn settings_for(id: ProviderId, config: ProviderConfig) -> GatewaySettings {
    GatewaySettings::default()
        .with_provider(id, config)
        .with_active(id)
}

/// Every value extends the previous one; the last equals `final_text`.
pub fn assert_monotonic(updates: &[String], final_text: &str) {
    for pair in updates.windows(2) {
        assert!(
            pair[1].starts_with(&pair[0]) && pair[1].len() >= pair[0].len(),
            "update {:?} does not extend {:?}",
            pair[1],
            pair[0]
        );
    }
    if let Some(last) = updates.last() {
        assert_eq!(last, final_text);
    }
}
