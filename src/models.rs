use serde::{Deserialize, Serialize};

use crate::config::ProviderId;

/// Final answer of one call. Equal to the last value passed to the update
/// callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallResult {
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub prompt: String,
    #[serde(default)]
    pub provider: Option<ProviderId>,
    #[serde(default)]
    pub stream: bool,
}

impl AskRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt must not be empty".to_owned());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub id: String,
    pub provider: ProviderId,
    pub text: String,
}

/// One SSE event of a streamed answer; `text` is cumulative.
#[derive(Debug, Serialize)]
pub struct AskChunk<'a> {
    pub id: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ProviderSummary {
    pub id: ProviderId,
    pub enabled: bool,
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub active: ProviderId,
    pub providers: Vec<ProviderSummary>,
}
