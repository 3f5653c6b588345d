use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::{
    backend::{InferenceClient, UpdateFn},
    config::{ProviderConfig, ProviderId, API_KEY},
    errors::{GatewayError, TransportError},
    models::CallResult,
};

/// Non-streaming backend: one request, one complete JSON response.
pub struct SingleShotClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl SingleShotClient {
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Result<Self, GatewayError> {
        let provider = ProviderId::Gemini;
        if !config.enabled {
            return Err(GatewayError::configuration(format!("{provider} is not enabled")));
        }
        let api_key = config.require_credential(provider, API_KEY)?;
        let model = config.model.trim();
        if model.is_empty() {
            return Err(GatewayError::configuration(format!(
                "{provider} requires a model identifier"
            )));
        }

        Ok(Self {
            http,
            url: format!("{}/models/{model}:generateContent", config.base_url()),
            api_key: api_key.to_owned(),
        })
    }

    pub fn request_body(prompt: &str) -> Value {
        json!({
            "contents": [
                {"parts": [{"text": prompt}]}
            ]
        })
    }
}

pub fn candidate_text(response: &Value) -> &str {
    response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

#[async_trait]
impl InferenceClient for SingleShotClient {
    fn name(&self) -> &str {
        ProviderId::Gemini.as_str()
    }

    async fn complete(
        &self,
        prompt: &str,
        on_update: &mut UpdateFn<'_>,
    ) -> Result<CallResult, GatewayError> {
        let response = self
            .http
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|value| {
                    value
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned)
                })
                .unwrap_or_else(|| status.to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: message,
            }
            .into());
        }

        let parsed: Value = response.json().await?;
        let text = candidate_text(&parsed).to_owned();
        on_update(&text);

        info!(provider = self.name(), len = text.len(), "response completed");
        Ok(CallResult { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_candidate_part() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": "Bonjour"}, {"text": "ignored"}]}}]
        });
        assert_eq!(candidate_text(&response), "Bonjour");
        assert_eq!(candidate_text(&json!({"candidates": []})), "");
    }

    #[test]
    fn url_embeds_model() {
        let config = ProviderConfig::defaults_for(ProviderId::Gemini)
            .enabled(true)
            .with_credential(API_KEY, "g-key");
        let client = SingleShotClient::new(reqwest::Client::new(), &config).expect("client");
        assert_eq!(
            client.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
