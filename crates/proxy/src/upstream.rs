//! Pooled upstream HTTP clients, header construction, and error mapping.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::Duration,
};

use config::{EndpointKind, ProviderId};
use http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    endpoint::normalize_base_url,
    error::{ProxyError, Result},
    messages::openai,
};

/// TCP connect budget.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Budget for the upstream to produce response headers.
pub(crate) const HEADERS_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-body budget for non-streaming responses. Streaming bodies have no
/// total limit, only the idle gap below.
pub(crate) const NON_STREAM_TIMEOUT: Duration = Duration::from_secs(60);
/// Maximum idle gap between upstream SSE events.
pub(crate) const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

fn default_client_builder() -> reqwest::ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::CONNECTION, HeaderValue::from_static("keep-alive"));

    // No global request timeout: streaming responses stay open for as long
    // as the upstream keeps sending. Per-request timeouts are set where the
    // request is issued.
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

/// One keep-alive client per normalized upstream base URL.
pub(crate) struct ClientPool {
    clients: RwLock<HashMap<String, reqwest::Client>>,
}

impl ClientPool {
    pub(crate) fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn client_for(&self, base_url: &str) -> reqwest::Client {
        let key = normalize_base_url(base_url);

        if let Some(client) = self
            .clients
            .read()
            .expect("client pool lock poisoned")
            .get(&key)
        {
            return client.clone();
        }

        let client = default_client_builder()
            .build()
            .expect("Failed to build upstream HTTP client");

        self.clients
            .write()
            .expect("client pool lock poisoned")
            .entry(key)
            .or_insert(client)
            .clone()
    }
}

/// Build the outbound header set for one upstream request.
///
/// OpenAI-compatible upstreams get `Authorization: Bearer`; Anthropic-native
/// upstreams get `x-api-key` plus `anthropic-version`. The two auth styles
/// are mutually exclusive by construction.
pub(crate) fn upstream_headers(
    kind: EndpointKind,
    key: Option<&SecretString>,
    anthropic_version: &str,
    extra: &[(&'static str, String)],
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    match kind {
        EndpointKind::OpenAiCompatible => {
            if let Some(key) = key {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", key.expose_secret()))
                    .map_err(|_| {
                        log::error!("Resolved API key is not a valid header value");
                        ProxyError::Internal(None)
                    })?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }
        EndpointKind::AnthropicNative => {
            if let Some(key) = key {
                let mut value = HeaderValue::from_str(key.expose_secret()).map_err(|_| {
                    log::error!("Resolved API key is not a valid header value");
                    ProxyError::Internal(None)
                })?;
                value.set_sensitive(true);
                headers.insert("x-api-key", value);
            }

            headers.insert(
                "anthropic-version",
                HeaderValue::from_str(anthropic_version).map_err(|_| {
                    log::error!("Configured anthropic-version is not a valid header value");
                    ProxyError::Internal(None)
                })?,
            );
        }
    }

    for (name, value) in extra {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(*name, value);
        } else {
            log::warn!("Skipping provider header {name}: invalid value");
        }
    }

    Ok(headers)
}

/// First 512 characters of an upstream body, for error messages.
pub(crate) fn body_preview(body: &str) -> String {
    body.chars().take(512).collect()
}

/// Map a non-success upstream response into a typed error.
pub(crate) fn map_upstream_error(
    provider: &ProviderId,
    base_url: &str,
    model: &str,
    status: u16,
    body: &str,
) -> ProxyError {
    let message = match serde_json::from_str::<openai::ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => {
            if let Some(kind) = &envelope.error.kind {
                log::debug!("Upstream error type: {kind}");
            }
            envelope.error.message
        }
        _ => body_preview(body),
    };

    if message.contains("does not support tool use")
        || message.contains("does not support tools")
    {
        return ProxyError::ToolUnsupported {
            model: model.to_string(),
        };
    }

    if matches!(status, 401 | 403) {
        return ProxyError::UpstreamAuth {
            status,
            message,
            models_url: format!("{}/v1/models", normalize_base_url(base_url)),
            hint: auth_hint(provider),
        };
    }

    ProxyError::Upstream { status, message }
}

/// Remediation hint for well-known providers on auth failures.
fn auth_hint(provider: &ProviderId) -> Option<String> {
    let hint = match provider {
        ProviderId::Together => {
            "Together AI rejected the key. Create one at api.together.xyz and export TOGETHER_API_KEY."
        }
        ProviderId::OpenRouter => {
            "OpenRouter rejected the key. Create one at openrouter.ai/keys and export OPENROUTER_API_KEY."
        }
        ProviderId::DeepSeek => {
            "DeepSeek rejected the key. Create one at platform.deepseek.com and export DEEPSEEK_API_KEY."
        }
        _ => return None,
    };

    Some(hint.to_string())
}
