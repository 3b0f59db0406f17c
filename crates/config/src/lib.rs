//! Proxy configuration, resolved entirely from the process environment.
//!
//! There is no configuration file: the host (IDE extension or shell) sets
//! environment variables, the binary captures a snapshot once, and
//! everything downstream treats the result as immutable.

#![deny(missing_docs)]

mod env;
mod provider;
mod secrets;

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

pub use env::Env;
pub use provider::ProviderId;
pub use secrets::{ResolvedKey, key_priority, provider_headers, resolve_api_key};

/// Default downstream listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Version header sent with Anthropic-native upstream requests unless
/// `ANTHROPIC_VERSION` overrides it.
pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Classification of an upstream base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointKind {
    /// The upstream speaks the Anthropic Messages API natively.
    #[serde(rename = "anthropic-native", alias = "anthropic")]
    AnthropicNative,
    /// The upstream speaks the OpenAI Chat Completions API.
    #[serde(rename = "openai-compatible", alias = "openai")]
    OpenAiCompatible,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnthropicNative => f.write_str("anthropic-native"),
            Self::OpenAiCompatible => f.write_str("openai-compatible"),
        }
    }
}

/// Default model ids used when the request does not name one.
#[derive(Debug, Clone, Default)]
pub struct ModelDefaults {
    /// Used when the request carries a `thinking` hint (`REASONING_MODEL`).
    pub reasoning: Option<String>,
    /// Used for everything else (`COMPLETION_MODEL`).
    pub completion: Option<String>,
    /// Reserved for the host's cheap-model slot (`VALUE_MODEL`).
    pub value: Option<String>,
}

/// Process-level configuration for the proxy.
#[derive(Debug, Clone)]
pub struct Config {
    /// Downstream listen port (`PORT`).
    pub port: u16,
    /// The provider the proxy fronts (`FORCE_PROVIDER`).
    pub provider: ProviderId,
    /// Upstream base URL without the API prefix (`ANTHROPIC_PROXY_BASE_URL`
    /// or the provider default). Trailing slashes are stripped.
    pub base_url: String,
    /// Explicit endpoint-kind overrides keyed by normalized base URL
    /// (`CUSTOM_ENDPOINT_OVERRIDES`).
    pub endpoint_overrides: BTreeMap<String, EndpointKind>,
    /// `anthropic-version` header value for Anthropic-native upstreams.
    pub anthropic_version: String,
    /// Default model ids.
    pub models: ModelDefaults,
    /// Surface tool-unsupported models as HTTP 400 instead of the text
    /// fallback (`FORCE_TOOL_ERROR`).
    pub force_tool_error: bool,
    /// Verbose logging (`DEBUG`).
    pub debug: bool,
}

/// Errors produced while interpreting the environment.
///
/// These are fatal at startup (exit code 2); they are never produced while
/// serving requests.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `PORT` did not parse as a TCP port.
    #[error("invalid PORT value '{0}'")]
    InvalidPort(String),

    /// A provider without a built-in base URL needs
    /// `ANTHROPIC_PROXY_BASE_URL`.
    #[error("provider '{0}' has no default base URL; set ANTHROPIC_PROXY_BASE_URL")]
    MissingBaseUrl(ProviderId),

    /// `CUSTOM_ENDPOINT_OVERRIDES` was not a JSON object of
    /// `{"<base url>": "anthropic" | "openai"}`.
    #[error("unparseable CUSTOM_ENDPOINT_OVERRIDES: {0}")]
    InvalidEndpointOverrides(String),
}

impl Config {
    /// Build the configuration from an environment snapshot.
    pub fn from_env(env: &Env) -> Result<Config, ConfigError> {
        let port = match env.get("PORT") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidPort(value.to_string()))?,
            None => DEFAULT_PORT,
        };

        let provider = env
            .get("FORCE_PROVIDER")
            .map(ProviderId::parse)
            .unwrap_or(ProviderId::OpenRouter);

        let base_url = match env.get("ANTHROPIC_PROXY_BASE_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => provider
                .default_base_url()
                .ok_or_else(|| ConfigError::MissingBaseUrl(provider.clone()))?
                .to_string(),
        };

        let endpoint_overrides = match env.get("CUSTOM_ENDPOINT_OVERRIDES") {
            Some(json) => {
                let parsed: BTreeMap<String, EndpointKind> = serde_json::from_str(json)
                    .map_err(|err| ConfigError::InvalidEndpointOverrides(err.to_string()))?;

                parsed
                    .into_iter()
                    .map(|(url, kind)| (url.trim_end_matches('/').to_string(), kind))
                    .collect()
            }
            None => BTreeMap::new(),
        };

        let models = ModelDefaults {
            reasoning: env.get("REASONING_MODEL").map(str::to_string),
            completion: env.get("COMPLETION_MODEL").map(str::to_string),
            value: env.get("VALUE_MODEL").map(str::to_string),
        };

        Ok(Config {
            port,
            provider,
            base_url,
            endpoint_overrides,
            anthropic_version: env
                .get("ANTHROPIC_VERSION")
                .unwrap_or(DEFAULT_ANTHROPIC_VERSION)
                .to_string(),
            models,
            force_tool_error: env.is_enabled("FORCE_TOOL_ERROR"),
            debug: env.is_enabled("DEBUG"),
        })
    }
}
