use std::{collections::HashMap, env, fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

pub const API_KEY: &str = "api_key";
pub const API_SECRET: &str = "api_secret";
pub const APP_ID: &str = "app_id";
pub const ACCESS_KEY: &str = "access_key";
pub const SECRET_KEY: &str = "secret_key";

pub const ORGANIZATION: &str = "organization";
pub const REGION: &str = "region";
pub const ENDPOINT_ID: &str = "endpoint_id";
pub const DOMAIN: &str = "domain";
pub const WATCHDOG_SECS: &str = "watchdog_secs";

const CREDENTIAL_FIELDS: [&str; 5] = [API_KEY, API_SECRET, APP_ID, ACCESS_KEY, SECRET_KEY];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Spark,
    DeepSeek,
    OpenAi,
    Doubao,
    Moonshot,
    Glm,
    Qwen,
    Gemini,
}

impl ProviderId {
    pub const ALL: [ProviderId; 8] = [
        ProviderId::Spark,
        ProviderId::DeepSeek,
        ProviderId::OpenAi,
        ProviderId::Doubao,
        ProviderId::Moonshot,
        ProviderId::Glm,
        ProviderId::Qwen,
        ProviderId::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Spark => "spark",
            ProviderId::DeepSeek => "deepseek",
            ProviderId::OpenAi => "openai",
            ProviderId::Doubao => "doubao",
            ProviderId::Moonshot => "moonshot",
            ProviderId::Glm => "glm",
            ProviderId::Qwen => "qwen",
            ProviderId::Gemini => "gemini",
        }
    }

    fn env_prefix(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        ProviderId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| GatewayError::configuration(format!("unknown provider `{value}`")))
    }
}

/// Per-backend settings snapshot. Read-only to the gateway.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub credentials: HashMap<String, String>,
    pub base_url: String,
    pub model: String,
    pub extras: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn defaults_for(id: ProviderId) -> Self {
        let (enabled, base_url, model) = match id {
            ProviderId::Spark => (true, "wss://spark-api.xf-yun.com", ""),
            ProviderId::DeepSeek => (false, "https://api.deepseek.com", "deepseek-chat"),
            ProviderId::OpenAi => (false, "https://api.openai.com/v1", "gpt-4-turbo-preview"),
            ProviderId::Doubao => (false, "https://ark-cn-beijing.bytedance.net/api/v3", ""),
            ProviderId::Moonshot => (false, "https://api.moonshot.cn/v1", "moonshot-v1-8k"),
            ProviderId::Glm => (false, "https://open.bigmodel.cn/api/paas/v4", "glm-4-plus"),
            ProviderId::Qwen => (
                false,
                "https://dashscope.aliyuncs.com/compatible-mode/v1",
                "qwen-turbo",
            ),
            ProviderId::Gemini => (
                false,
                "https://generativelanguage.googleapis.com/v1beta",
                "gemini-1.5-flash",
            ),
        };

        let mut extras = HashMap::new();
        match id {
            ProviderId::Spark => {
                extras.insert(DOMAIN.to_owned(), "generalv3.5".to_owned());
            }
            ProviderId::Doubao => {
                extras.insert(REGION.to_owned(), "cn-beijing".to_owned());
            }
            _ => {}
        }

        Self {
            enabled,
            credentials: HashMap::new(),
            base_url: base_url.to_owned(),
            model: model.to_owned(),
            extras,
        }
    }

    /// Non-blank credential value, trimmed.
    pub fn credential(&self, name: &str) -> Option<&str> {
        non_blank(self.credentials.get(name))
    }

    /// Non-blank extra value, trimmed.
    pub fn extra(&self, name: &str) -> Option<&str> {
        non_blank(self.extras.get(name))
    }

    pub fn require_credential(&self, id: ProviderId, name: &str) -> Result<&str, GatewayError> {
        self.credential(name).ok_or_else(|| {
            GatewayError::configuration(format!("{id} requires a non-empty `{name}` credential"))
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }

    pub fn with_credential(mut self, name: &str, value: impl Into<String>) -> Self {
        self.credentials.insert(name.to_owned(), value.into());
        self
    }

    pub fn with_extra(mut self, name: &str, value: impl Into<String>) -> Self {
        self.extras.insert(name.to_owned(), value.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn watchdog(&self) -> Option<Duration> {
        self.extra(WATCHDOG_SECS)
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|value| value.trim()).filter(|value| !value.is_empty())
}

/// Snapshot of every provider plus the active selection.
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySettings {
    pub active: ProviderId,
    pub providers: HashMap<ProviderId, ProviderConfig>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            active: ProviderId::Spark,
            providers: ProviderId::ALL
                .into_iter()
                .map(|id| (id, ProviderConfig::defaults_for(id)))
                .collect(),
        }
    }
}

impl GatewaySettings {
    pub fn from_env() -> Result<Self, GatewayError> {
        let mut settings = Self::default();
        if let Some(active) = read_env("GATEWAY_PROVIDER") {
            settings.active = active.parse()?;
        }

        for id in ProviderId::ALL {
            let prefix = id.env_prefix();
            let config = settings.providers.entry(id).or_default();

            if let Some(enabled) = read_env(&format!("{prefix}_ENABLED")) {
                config.enabled = parse_bool(&enabled);
            }
            for field in CREDENTIAL_FIELDS {
                let name = format!("{prefix}_{}", field.to_ascii_uppercase());
                if let Some(value) = read_env(&name) {
                    config.credentials.insert(field.to_owned(), value);
                }
            }
            if let Some(base_url) = read_env(&format!("{prefix}_BASE_URL")) {
                config.base_url = base_url;
            }
            if let Some(model) = read_env(&format!("{prefix}_MODEL")) {
                config.model = model;
            }
        }

        let extras = [
            (ProviderId::OpenAi, "OPENAI_ORGANIZATION", ORGANIZATION),
            (ProviderId::Doubao, "DOUBAO_ENDPOINT_ID", ENDPOINT_ID),
            (ProviderId::Doubao, "DOUBAO_REGION", REGION),
            (ProviderId::Spark, "SPARK_DOMAIN", DOMAIN),
            (ProviderId::Spark, "SPARK_WATCHDOG_SECS", WATCHDOG_SECS),
        ];
        for (id, name, key) in extras {
            if let Some(value) = read_env(name) {
                settings
                    .providers
                    .entry(id)
                    .or_default()
                    .extras
                    .insert(key.to_owned(), value);
            }
        }

        Ok(settings)
    }

    /// Merges a partial JSON snapshot over the defaults. Fields absent from
    /// the snapshot keep their default values.
    pub fn from_json(json: &str) -> Result<Self, GatewayError> {
        let patch: SettingsPatch = serde_json::from_str(json)
            .map_err(|error| GatewayError::configuration(format!("invalid settings: {error}")))?;

        let mut settings = Self::default();
        if let Some(active) = patch.active {
            settings.active = active;
        }
        for (id, provider) in patch.providers {
            let config = settings.providers.entry(id).or_default();
            if let Some(enabled) = provider.enabled {
                config.enabled = enabled;
            }
            if let Some(base_url) = provider.base_url {
                config.base_url = base_url;
            }
            if let Some(model) = provider.model {
                config.model = model;
            }
            config.credentials.extend(provider.credentials);
            config.extras.extend(provider.extras);
        }
        Ok(settings)
    }

    pub fn provider(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(&id)
    }

    pub fn with_active(&self, id: ProviderId) -> Self {
        Self {
            active: id,
            ..self.clone()
        }
    }

    pub fn with_provider(mut self, id: ProviderId, config: ProviderConfig) -> Self {
        self.providers.insert(id, config);
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsPatch {
    #[serde(default)]
    active: Option<ProviderId>,
    #[serde(default)]
    providers: HashMap<ProviderId, ProviderPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderPatch {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    credentials: HashMap<String, String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    extras: HashMap<String, String>,
}

fn read_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_only_spark() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.active, ProviderId::Spark);
        for id in ProviderId::ALL {
            let config = settings.provider(id).expect("every provider has defaults");
            assert_eq!(config.enabled, id == ProviderId::Spark, "{id}");
        }
    }

    #[test]
    fn json_snapshot_merges_over_defaults() {
        let settings = GatewaySettings::from_json(
            r#"{"active":"qwen","providers":{"qwen":{"enabled":true,"credentials":{"api_key":"sk-1"}}}}"#,
        )
        .expect("valid snapshot");

        let qwen = settings.provider(ProviderId::Qwen).expect("qwen");
        assert_eq!(settings.active, ProviderId::Qwen);
        assert!(qwen.enabled);
        assert_eq!(qwen.credential(API_KEY), Some("sk-1"));
        assert_eq!(qwen.model, "qwen-turbo");
        assert_eq!(
            qwen.base_url(),
            "https://dashscope.aliyuncs.com/compatible-mode/v1"
        );
    }

    #[test]
    fn blank_credentials_count_as_missing() {
        let config = ProviderConfig::defaults_for(ProviderId::DeepSeek).with_credential(API_KEY, "   ");
        assert_eq!(config.credential(API_KEY), None);
        assert!(config.require_credential(ProviderId::DeepSeek, API_KEY).is_err());
    }

    #[test]
    fn provider_ids_parse_case_insensitively() {
        assert_eq!("OpenAI".parse::<ProviderId>().ok(), Some(ProviderId::OpenAi));
        assert!("claude".parse::<ProviderId>().is_err());
    }
}
