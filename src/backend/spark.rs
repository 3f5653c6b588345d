//! Websocket backend authenticated by an HMAC-SHA256 signed handshake URL.
//!
//! The signature covers three canonical lines (`host`, `date`, request line)
//! and travels in the query string together with the date it was computed
//! for, so the server can recompute it.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, info, warn};
use url::{form_urlencoded, Url};

use crate::{
    backend::{InferenceClient, TextAccumulator, UpdateFn},
    config::{ProviderConfig, ProviderId, API_KEY, API_SECRET, APP_ID, DOMAIN},
    decoder::{parse_line, StreamEvent},
    errors::{GatewayError, TransportError},
    models::CallResult,
};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(30);

const TEMPERATURE: f32 = 0.5;
const MAX_TOKENS: u32 = 4096;
const USER_TAG: &str = "default";
const FINAL_FRAME_STATUS: i64 = 2;

/// Model version to `(endpoint path, domain tag)`.
const VERSIONS: [(&str, &str, &str); 6] = [
    ("4.0Ultra", "/v4.0/chat", "4.0Ultra"),
    ("max-32k", "/chat/max-32k", "max-32k"),
    ("generalv3.5", "/v3.5/chat", "generalv3.5"),
    ("pro-128k", "/chat/pro-128k", "pro-128k"),
    ("generalv3", "/v3.1/chat", "generalv3"),
    ("lite", "/v1.1/chat", "lite"),
];

pub fn resolve_version(version: &str) -> Option<(&'static str, &'static str)> {
    VERSIONS
        .iter()
        .find(|(name, _, _)| *name == version)
        .map(|(_, path, domain)| (*path, *domain))
}

/// Logged in order: signing, connecting, open, streaming, then resolved or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketPhase {
    Signing,
    Connecting,
    Open,
    Streaming,
    Resolved,
    Failed,
}

impl SocketPhase {
    fn as_str(&self) -> &'static str {
        match self {
            SocketPhase::Signing => "signing",
            SocketPhase::Connecting => "connecting",
            SocketPhase::Open => "open",
            SocketPhase::Streaming => "streaming",
            SocketPhase::Resolved => "resolved",
            SocketPhase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub signature: String,
    pub authorization: String,
}

pub fn signing_string(host: &str, date: &str, path: &str) -> String {
    [
        format!("host: {host}"),
        format!("date: {date}"),
        format!("GET {path} HTTP/1.1"),
    ]
    .join("\n")
}

pub fn sign_request(
    host: &str,
    date: &str,
    path: &str,
    api_key: &str,
    api_secret: &str,
) -> Result<SignedRequest, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(api_secret.trim().as_bytes())
        .map_err(|error| GatewayError::configuration(format!("invalid api secret: {error}")))?;
    mac.update(signing_string(host, date, path).as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    let descriptor = format!(
        "api_key=\"{api_key}\", algorithm=\"hmac-sha256\", headers=\"host date request-line\", signature=\"{signature}\""
    );
    Ok(SignedRequest {
        authorization: STANDARD.encode(descriptor),
        signature,
    })
}

pub fn rfc1123_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

enum FrameOutcome {
    Continue,
    Complete,
}

#[derive(Debug, Clone)]
pub struct SignedSocketClient {
    app_id: String,
    api_key: String,
    api_secret: String,
    endpoint: String,
    host: String,
    path: String,
    domain: &'static str,
    watchdog: Duration,
}

impl SignedSocketClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, GatewayError> {
        let provider = ProviderId::Spark;
        if !config.enabled {
            return Err(GatewayError::configuration(format!("{provider} is not enabled")));
        }
        let api_key = config.require_credential(provider, API_KEY)?;
        let api_secret = config.require_credential(provider, API_SECRET)?;
        let app_id = config.require_credential(provider, APP_ID)?;

        let version = config.extra(DOMAIN).unwrap_or_default();
        let (version_path, domain) = resolve_version(version).ok_or_else(|| {
            GatewayError::configuration(format!("unknown {provider} model version `{version}`"))
        })?;

        let endpoint = format!("{}{version_path}", config.base_url());
        let parsed = Url::parse(&endpoint).map_err(|error| {
            GatewayError::configuration(format!("invalid {provider} base URL: {error}"))
        })?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_owned(),
            (None, _) => {
                return Err(GatewayError::configuration(format!(
                    "{provider} base URL has no host"
                )))
            }
        };

        Ok(Self {
            app_id: app_id.to_owned(),
            api_key: api_key.to_owned(),
            api_secret: api_secret.to_owned(),
            path: parsed.path().to_owned(),
            endpoint,
            host,
            domain,
            watchdog: config.watchdog().unwrap_or(DEFAULT_WATCHDOG),
        })
    }

    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }

    /// Handshake URL signed for `date`.
    pub fn authorized_url(&self, date: &str) -> Result<String, GatewayError> {
        let signed = sign_request(&self.host, date, &self.path, &self.api_key, &self.api_secret)?;
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("authorization", &signed.authorization)
            .append_pair("date", date)
            .append_pair("host", &self.host)
            .finish();
        Ok(format!("{}?{query}", self.endpoint))
    }

    pub fn request_frame(&self, prompt: &str) -> Value {
        json!({
            "header": {
                "app_id": self.app_id,
                "uid": USER_TAG
            },
            "parameter": {
                "chat": {
                    "domain": self.domain,
                    "temperature": TEMPERATURE,
                    "max_tokens": MAX_TOKENS
                }
            },
            "payload": {
                "message": {
                    "text": [
                        {"role": "user", "content": prompt}
                    ]
                }
            }
        })
    }

    fn handle_frame(
        &self,
        raw: &str,
        accumulator: &mut TextAccumulator,
        on_update: &mut UpdateFn<'_>,
    ) -> Result<FrameOutcome, GatewayError> {
        let frame = match parse_line(raw) {
            Some(StreamEvent::Data(frame)) => frame,
            Some(StreamEvent::Sentinel) => return Ok(FrameOutcome::Complete),
            Some(StreamEvent::Malformed(_)) | None => return Ok(FrameOutcome::Continue),
        };

        let code = frame
            .pointer("/header/code")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if code != 0 {
            let message = frame
                .pointer("/header/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_owned();
            return Err(TransportError::Code { code, message }.into());
        }

        if let Some(content) = frame
            .pointer("/payload/choices/text/0/content")
            .and_then(Value::as_str)
        {
            accumulator.append(content, on_update);
        }
        if let Some(usage) = frame.pointer("/payload/usage/text") {
            debug!(provider = self.name(), usage = %usage, "stream usage reported");
        }

        let status = frame.pointer("/header/status").and_then(Value::as_i64);
        if status == Some(FINAL_FRAME_STATUS) {
            Ok(FrameOutcome::Complete)
        } else {
            Ok(FrameOutcome::Continue)
        }
    }

    fn phase(&self, phase: SocketPhase) {
        debug!(provider = self.name(), phase = phase.as_str(), "socket phase");
    }

    fn fail(&self, error: GatewayError) -> Result<CallResult, GatewayError> {
        self.phase(SocketPhase::Failed);
        warn!(provider = self.name(), error = %error, "socket call failed");
        Err(error)
    }
}

fn socket_error(error: WsError) -> GatewayError {
    match error {
        WsError::Http(response) => {
            let body = response
                .body()
                .as_deref()
                .map(|body| String::from_utf8_lossy(body).into_owned())
                .unwrap_or_default();
            TransportError::Status {
                status: response.status().as_u16(),
                body,
            }
            .into()
        }
        other => TransportError::Connection(other.to_string()).into(),
    }
}

#[async_trait]
impl InferenceClient for SignedSocketClient {
    fn name(&self) -> &str {
        ProviderId::Spark.as_str()
    }

    async fn complete(
        &self,
        prompt: &str,
        on_update: &mut UpdateFn<'_>,
    ) -> Result<CallResult, GatewayError> {
        self.phase(SocketPhase::Signing);
        let url = self.authorized_url(&rfc1123_date(Utc::now()))?;

        self.phase(SocketPhase::Connecting);
        // The handshake shares the watchdog budget.
        let mut socket = match timeout(self.watchdog, connect_async(url)).await {
            Ok(Ok((socket, _))) => socket,
            Ok(Err(error)) => return self.fail(socket_error(error)),
            Err(_) => return self.fail(GatewayError::Timeout(self.watchdog)),
        };

        self.phase(SocketPhase::Open);
        let watchdog = sleep_until(Instant::now() + self.watchdog);
        tokio::pin!(watchdog);

        let frame = self.request_frame(prompt).to_string();
        if let Err(error) = socket.send(Message::Text(frame)).await {
            return self.fail(socket_error(error));
        }

        self.phase(SocketPhase::Streaming);
        let mut accumulator = TextAccumulator::new();
        loop {
            let next = tokio::select! {
                _ = &mut watchdog => {
                    let _ = socket.close(None).await;
                    return self.fail(GatewayError::Timeout(self.watchdog));
                }
                next = socket.next() => next,
            };

            let raw = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(error)) => return self.fail(socket_error(error)),
            };

            match self.handle_frame(&raw, &mut accumulator, on_update) {
                Ok(FrameOutcome::Continue) => {}
                Ok(FrameOutcome::Complete) => {
                    let _ = socket.close(None).await;
                    self.phase(SocketPhase::Resolved);
                    info!(provider = self.name(), len = accumulator.len(), "stream completed");
                    return Ok(accumulator.into_result());
                }
                Err(error) => {
                    let _ = socket.close(None).await;
                    return self.fail(error);
                }
            }
        }

        if accumulator.is_empty() {
            return self.fail(
                TransportError::Connection("closed without response".to_owned()).into(),
            );
        }
        self.phase(SocketPhase::Resolved);
        info!(provider = self.name(), len = accumulator.len(), "connection closed after response");
        Ok(accumulator.into_result())
    }
}
