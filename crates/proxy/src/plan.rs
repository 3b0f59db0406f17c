//! Builds the upstream request plan for one downstream request.
//!
//! The plan is everything that would go on the wire: URL, headers, body,
//! plus the decisions that produced them. `/v1/messages` executes the
//! plan; `/v1/debug/echo` returns it without any upstream call.

use config::EndpointKind;
use http::HeaderMap;
use serde_json::Value;

use crate::{
    ProxyState,
    endpoint::{EndpointKindRecord, normalize_base_url},
    error::{ProxyError, Result},
    convert::to_openai,
    messages::anthropic,
    model::{self, Selection},
    transformers::{self, ModelProfile},
    upstream,
};

/// `max_tokens` sent to Anthropic-native upstreams when neither the client
/// nor a transformer chose one; the native dialect requires the field.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug)]
pub(crate) struct UpstreamPlan {
    pub url: String,
    pub endpoint: EndpointKindRecord,
    pub selection: Selection,
    pub profile: ModelProfile,
    pub headers: HeaderMap,
    pub body: Value,
    pub stream: bool,
    pub warnings: Vec<String>,
    pub has_api_key: bool,
    pub key_source: Option<&'static str>,
}

pub(crate) async fn build(state: &ProxyState, mut request: anthropic::ChatRequest) -> Result<UpstreamPlan> {
    if request.messages.is_empty() {
        return Err(ProxyError::InvalidRequest(
            "messages must contain at least one entry".to_string(),
        ));
    }

    let config = state.config();
    let resolved = config::resolve_api_key(&config.provider, state.env());

    if resolved.is_none() && upstream_requires_credentials(&config.base_url) {
        return Err(ProxyError::MissingApiKey {
            provider: config.provider.to_string(),
            checked: config::key_priority(&config.provider).join(", "),
        });
    }

    let key = resolved.as_ref().map(|resolved| &resolved.key);
    let endpoint = state.detector().detect(&config.base_url, key).await;

    let thinking = request
        .thinking
        .as_ref()
        .is_some_and(anthropic::ThinkingHint::is_enabled);

    let selection = model::select(
        request.model.as_deref(),
        thinking,
        &state.model_settings(),
    );

    let profile = transformers::profile_for(&selection.model);

    request.model = Some(selection.model.clone());
    let warnings = transformers::pre_transform(&profile, &mut request, config.force_tool_error)?;

    let stream = request.stream.unwrap_or(false);
    let base = normalize_base_url(&config.base_url);
    let prefix = config.provider.api_prefix();

    let (url, body) = match endpoint.kind {
        EndpointKind::AnthropicNative => {
            if request.max_tokens.is_none() {
                request.max_tokens = Some(DEFAULT_MAX_TOKENS);
            }

            let body = serde_json::to_value(&request).map_err(|err| {
                log::error!("Failed to serialize Anthropic-native request: {err}");
                ProxyError::Internal(None)
            })?;

            (format!("{base}{prefix}/messages"), body)
        }
        EndpointKind::OpenAiCompatible => {
            let mut upstream_request = to_openai::chat_completion_request(request);
            upstream_request.stream = Some(stream);
            transformers::shape_openai(&profile, &mut upstream_request);

            let body = serde_json::to_value(&upstream_request).map_err(|err| {
                log::error!("Failed to serialize OpenAI-compatible request: {err}");
                ProxyError::Internal(None)
            })?;

            (format!("{base}{prefix}/chat/completions"), body)
        }
    };

    let provider_headers = config::provider_headers(&config.provider, state.env());
    let headers = upstream::upstream_headers(endpoint.kind, key, &config.anthropic_version, &provider_headers)?;

    Ok(UpstreamPlan {
        url,
        endpoint,
        selection,
        profile,
        headers,
        body,
        stream,
        warnings,
        has_api_key: resolved.is_some(),
        key_source: resolved.map(|resolved| resolved.source),
    })
}

/// Loopback upstreams (local llama.cpp, test servers) work without
/// credentials; everything else requires a resolvable key.
fn upstream_requires_credentials(base_url: &str) -> bool {
    match url::Url::parse(base_url) {
        Ok(url) => match url.host() {
            Some(url::Host::Ipv4(ip)) => !ip.is_loopback(),
            Some(url::Host::Ipv6(ip)) => !ip.is_loopback(),
            Some(url::Host::Domain(domain)) => domain != "localhost",
            None => true,
        },
        Err(_) => true,
    }
}
