use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    backend::{InferenceClient, TextAccumulator, UpdateFn},
    config::{ProviderConfig, ProviderId, API_KEY, ENDPOINT_ID, ORGANIZATION, REGION, SECRET_KEY},
    decoder::{StreamDecoder, StreamEvent},
    errors::{GatewayError, TransportError},
    models::{CallResult, Usage},
};

const ERROR_BODY_LIMIT: usize = 400;

const GENERIC_PREAMBLE: &str = "You are a helpful assistant.";
const OPENAI_PREAMBLE: &str = "你是一个有帮助的AI助手。";
const DOUBAO_PREAMBLE: &str = "你是豆包，是由字节跳动开发的 AI 人工智能助手";
const MOONSHOT_PREAMBLE: &str = "你是 Kimi，由 Moonshot AI 提供的人工智能助手，你更擅长中文和英文的对话。你会为用户提供安全，有帮助，准确的回答。同时，你会拒绝一切涉及恐怖主义，种族歧视，黄色暴力等问题的回答。Moonshot AI 为专有名词，不可翻译成其他语言。";
const GLM_PREAMBLE: &str =
    "你是一个乐于回答各种问题的小助手，你的任务是提供专业、准确、有洞察力的建议。";

type HeaderBuilder = fn(&ProviderConfig) -> Vec<(&'static str, String)>;
type ModelResolver = fn(&ProviderConfig) -> Option<String>;
type TextExtractor = fn(&Value) -> Option<&str>;

/// Everything that differs between the OpenAI-compatible backends.
#[derive(Clone, Copy)]
pub struct RestDescriptor {
    pub provider: ProviderId,
    pub path: &'static str,
    pub credential: &'static str,
    pub system_preamble: &'static str,
    pub temperature: Option<f32>,
    pub include_usage: bool,
    pub extra_headers: HeaderBuilder,
    pub model: ModelResolver,
    pub extract: TextExtractor,
}

impl RestDescriptor {
    pub fn for_provider(provider: ProviderId) -> Option<Self> {
        let base = Self {
            provider,
            path: "/chat/completions",
            credential: API_KEY,
            system_preamble: GENERIC_PREAMBLE,
            temperature: Some(0.3),
            include_usage: false,
            extra_headers: no_headers,
            model: configured_model,
            extract: delta_or_message_content,
        };

        let descriptor = match provider {
            ProviderId::DeepSeek => Self {
                temperature: None,
                ..base
            },
            ProviderId::OpenAi => Self {
                system_preamble: OPENAI_PREAMBLE,
                temperature: Some(0.7),
                extra_headers: organization_header,
                ..base
            },
            ProviderId::Doubao => Self {
                credential: SECRET_KEY,
                system_preamble: DOUBAO_PREAMBLE,
                extra_headers: region_header,
                model: endpoint_model,
                ..base
            },
            ProviderId::Moonshot => Self {
                system_preamble: MOONSHOT_PREAMBLE,
                ..base
            },
            ProviderId::Glm => Self {
                system_preamble: GLM_PREAMBLE,
                ..base
            },
            ProviderId::Qwen => Self {
                include_usage: true,
                ..base
            },
            ProviderId::Spark | ProviderId::Gemini => return None,
        };
        Some(descriptor)
    }
}

fn no_headers(_: &ProviderConfig) -> Vec<(&'static str, String)> {
    Vec::new()
}

fn organization_header(config: &ProviderConfig) -> Vec<(&'static str, String)> {
    config
        .extra(ORGANIZATION)
        .map(|organization| vec![("OpenAI-Organization", organization.to_owned())])
        .unwrap_or_default()
}

fn region_header(config: &ProviderConfig) -> Vec<(&'static str, String)> {
    let region = config.extra(REGION).unwrap_or("cn-beijing");
    vec![("X-Region", region.to_owned())]
}

fn configured_model(config: &ProviderConfig) -> Option<String> {
    Some(config.model.trim().to_owned()).filter(|model| !model.is_empty())
}

fn endpoint_model(config: &ProviderConfig) -> Option<String> {
    config
        .extra(ENDPOINT_ID)
        .map(ToOwned::to_owned)
        .or_else(|| configured_model(config))
}

pub fn delta_content(chunk: &Value) -> Option<&str> {
    chunk.pointer("/choices/0/delta/content")?.as_str()
}

/// Fallback responses carry a full `message` object instead of a delta.
pub fn delta_or_message_content(chunk: &Value) -> Option<&str> {
    delta_content(chunk)
        .filter(|content| !content.is_empty())
        .or_else(|| chunk.pointer("/choices/0/message/content")?.as_str())
}

pub struct RestSseClient {
    http: reqwest::Client,
    descriptor: RestDescriptor,
    url: String,
    api_key: String,
    model: String,
    headers: Vec<(&'static str, String)>,
}

impl RestSseClient {
    pub fn new(
        http: reqwest::Client,
        descriptor: RestDescriptor,
        config: &ProviderConfig,
    ) -> Result<Self, GatewayError> {
        let provider = descriptor.provider;
        if !config.enabled {
            return Err(GatewayError::configuration(format!("{provider} is not enabled")));
        }
        let api_key = config.require_credential(provider, descriptor.credential)?;
        let model = (descriptor.model)(config).ok_or_else(|| {
            GatewayError::configuration(format!("{provider} requires a model identifier"))
        })?;
        if config.base_url().is_empty() {
            return Err(GatewayError::configuration(format!("{provider} requires a base URL")));
        }

        Ok(Self {
            http,
            url: format!("{}{}", config.base_url(), descriptor.path),
            api_key: api_key.to_owned(),
            model,
            headers: (descriptor.extra_headers)(config),
            descriptor,
        })
    }

    pub fn request_body(&self, prompt: &str) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.descriptor.system_preamble},
                {"role": "user", "content": prompt}
            ],
            "stream": true
        });
        if let Some(temperature) = self.descriptor.temperature {
            payload["temperature"] = json!(temperature);
        }
        if self.descriptor.include_usage {
            payload["stream_options"] = json!({"include_usage": true});
        }
        payload
    }

    fn apply(
        &self,
        event: StreamEvent,
        accumulator: &mut TextAccumulator,
        on_update: &mut UpdateFn<'_>,
    ) {
        let StreamEvent::Data(chunk) = event else {
            return;
        };
        if let Some(fragment) = (self.descriptor.extract)(&chunk) {
            accumulator.append(fragment, on_update);
        }
        if let Some(usage) = chunk
            .get("usage")
            .filter(|usage| !usage.is_null())
            .and_then(|usage| serde_json::from_value::<Usage>(usage.clone()).ok())
        {
            debug!(
                provider = %self.descriptor.provider,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "stream usage reported"
            );
        }
    }
}

#[async_trait]
impl InferenceClient for RestSseClient {
    fn name(&self) -> &str {
        self.descriptor.provider.as_str()
    }

    async fn complete(
        &self,
        prompt: &str,
        on_update: &mut UpdateFn<'_>,
    ) -> Result<CallResult, GatewayError> {
        let payload = self.request_body(prompt);
        let mut request = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(&self.api_key);
        for (name, value) in &self.headers {
            request = request.header(*name, value);
        }

        let response = request.json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown backend error".to_owned());
            return Err(map_http_error(status, body).into());
        }

        let mut upstream = response.bytes_stream();
        let mut decoder = StreamDecoder::new();
        let mut accumulator = TextAccumulator::new();

        while let Some(next) = upstream.next().await {
            let bytes = next.map_err(TransportError::from)?;
            for event in decoder.push(&bytes) {
                self.apply(event, &mut accumulator, on_update);
            }
            if decoder.is_finished() {
                break;
            }
        }
        for event in decoder.finish() {
            self.apply(event, &mut accumulator, on_update);
        }

        info!(provider = self.name(), len = accumulator.len(), "stream completed");
        Ok(accumulator.into_result())
    }
}

/// Prefers the `error.message` of an OpenAI-style envelope over the raw body.
pub fn map_http_error(status: StatusCode, body: String) -> TransportError {
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        })
        .unwrap_or(body);

    TransportError::Status {
        status: status.as_u16(),
        body: message.chars().take(ERROR_BODY_LIMIT).collect(),
    }
}
