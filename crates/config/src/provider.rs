//! Upstream provider identifiers and their built-in defaults.

use std::fmt;

use crate::EndpointKind;

/// Identifies which upstream provider the proxy fronts.
///
/// The well-known variants carry a default base URL, an API path prefix, and
/// a hint for the endpoint-kind detector. Anything else is accepted as a
/// user-defined id and treated like `custom`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderId {
    /// openrouter.ai aggregation gateway.
    OpenRouter,
    /// api.openai.com.
    OpenAi,
    /// Together AI.
    Together,
    /// DeepSeek.
    DeepSeek,
    /// Z.ai GLM models, served over their Anthropic-compatible endpoint.
    Glm,
    /// Groq.
    Grok,
    /// A user-supplied endpoint configured through `ANTHROPIC_PROXY_BASE_URL`.
    Custom,
    /// User-defined provider id, configured entirely through the environment.
    Other(String),
}

impl ProviderId {
    /// Parse a provider id. Unknown ids become [`ProviderId::Other`].
    pub fn parse(id: &str) -> Self {
        match id.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Self::OpenRouter,
            "openai" => Self::OpenAi,
            "together" => Self::Together,
            "deepseek" => Self::DeepSeek,
            "glm" => Self::Glm,
            "grok" => Self::Grok,
            "custom" => Self::Custom,
            other => Self::Other(other.to_string()),
        }
    }

    /// The canonical lowercase id.
    pub fn as_str(&self) -> &str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::Together => "together",
            Self::DeepSeek => "deepseek",
            Self::Glm => "glm",
            Self::Grok => "grok",
            Self::Custom => "custom",
            Self::Other(id) => id,
        }
    }

    /// Default upstream base URL, without the API path prefix.
    ///
    /// `custom` and user-defined providers have none; they require
    /// `ANTHROPIC_PROXY_BASE_URL`.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenRouter => Some("https://openrouter.ai/api"),
            Self::OpenAi => Some("https://api.openai.com"),
            Self::Together => Some("https://api.together.xyz"),
            Self::DeepSeek => Some("https://api.deepseek.com"),
            Self::Glm => Some("https://api.z.ai/api/anthropic"),
            Self::Grok => Some("https://api.groq.com/openai"),
            Self::Custom | Self::Other(_) => None,
        }
    }

    /// Path prefix inserted between the base URL and the API route.
    pub fn api_prefix(&self) -> &'static str {
        "/v1"
    }

    /// Endpoint-kind hint consulted by the detector's heuristic step.
    pub fn endpoint_hint(&self) -> Option<EndpointKind> {
        match self {
            Self::Glm => Some(EndpointKind::AnthropicNative),
            Self::OpenRouter | Self::OpenAi | Self::Together | Self::DeepSeek | Self::Grok => {
                Some(EndpointKind::OpenAiCompatible)
            }
            Self::Custom | Self::Other(_) => None,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_well_known_ids() {
        assert_eq!(ProviderId::parse("openrouter"), ProviderId::OpenRouter);
        assert_eq!(ProviderId::parse("OpenAI"), ProviderId::OpenAi);
        assert_eq!(ProviderId::parse(" glm "), ProviderId::Glm);
        assert_eq!(ProviderId::parse("custom"), ProviderId::Custom);
    }

    #[test]
    fn unknown_ids_are_user_defined() {
        let id = ProviderId::parse("acme-llm");
        assert_eq!(id, ProviderId::Other("acme-llm".to_string()));
        assert_eq!(id.as_str(), "acme-llm");
        assert_eq!(id.default_base_url(), None);
        assert_eq!(id.endpoint_hint(), None);
    }

    #[test]
    fn glm_hints_anthropic_native() {
        assert_eq!(
            ProviderId::Glm.endpoint_hint(),
            Some(EndpointKind::AnthropicNative)
        );
        assert_eq!(
            ProviderId::OpenRouter.endpoint_hint(),
            Some(EndpointKind::OpenAiCompatible)
        );
    }
}
