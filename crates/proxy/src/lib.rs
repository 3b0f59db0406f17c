//! The proxy core: accepts Anthropic Messages API traffic on loopback and
//! fronts an upstream speaking either the OpenAI Chat Completions dialect
//! or the Anthropic Messages dialect natively.
//!
//! Request flow: resolve credentials, classify the upstream endpoint,
//! select the model, build the upstream body (conversion skipped for
//! Anthropic-native), apply per-model transformers, issue the request, and
//! rewrite the response back into Anthropic shape (streaming or not).

use std::sync::{Arc, RwLock, RwLockReadGuard};

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::{Config, EndpointKind, Env, ModelDefaults};
use http::header::AUTHORIZATION;
use serde_json::{Value, json};

mod control;
mod convert;
mod endpoint;
mod error;
mod messages;
mod model;
mod plan;
mod redact;
mod streaming;
mod transformers;
mod upstream;

pub use control::ControlMessage;
pub use endpoint::{DetectionSource, EndpointDetector, EndpointKindRecord};
pub use error::{ProxyError, Result};
pub use model::{ModelSettings, Selection, SelectionSource};
pub use redact::redact;
pub use transformers::{ModelProfile, Transformer, profile_for};

use crate::{
    endpoint::normalize_base_url,
    messages::anthropic,
    upstream::{ClientPool, HEADERS_TIMEOUT, NON_STREAM_TIMEOUT, body_preview},
};

/// Request body cap, matching Anthropic's own limit.
const BODY_LIMIT_BYTES: usize = 32 << 20;

/// Process-wide proxy state shared by all requests.
///
/// Everything here is either immutable after startup (configuration,
/// environment snapshot) or guarded for the single-writer/many-reader
/// access pattern (model settings, endpoint-kind cache).
pub struct ProxyState {
    config: Config,
    env: Env,
    models: RwLock<ModelSettings>,
    detector: EndpointDetector,
    clients: ClientPool,
}

impl ProxyState {
    pub fn new(config: Config, env: Env) -> Self {
        let clients = ClientPool::new();
        let detector = EndpointDetector::new(
            config.endpoint_overrides.clone(),
            config.provider.endpoint_hint(),
            clients.client_for(&config.base_url),
        );

        Self {
            models: RwLock::new(ModelSettings::new(config.models.clone())),
            detector,
            clients,
            env,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn env(&self) -> &Env {
        &self.env
    }

    pub(crate) fn detector(&self) -> &EndpointDetector {
        &self.detector
    }

    pub(crate) fn model_settings(&self) -> RwLockReadGuard<'_, ModelSettings> {
        self.models.read().expect("model settings lock poisoned")
    }

    /// Handle a message from the host. Idempotent: replaying a message
    /// leaves the same state behind.
    pub fn apply_control(&self, message: ControlMessage) {
        match message {
            ControlMessage::StoreKey { provider, .. } => {
                // Secret storage is the host's concern; keys are re-read
                // from the environment on every request.
                log::info!("Host stored a credential for provider '{provider}'");
            }
            ControlMessage::SaveModels {
                provider_id,
                reasoning,
                completion,
                value,
            } => {
                let mut settings = self.models.write().expect("model settings lock poisoned");
                settings.defaults = ModelDefaults {
                    reasoning,
                    completion,
                    value,
                };
                log::info!("Model defaults updated for provider '{provider_id}'");
            }
            ControlMessage::ToggleTwoModelMode { enabled } => {
                self.models
                    .write()
                    .expect("model settings lock poisoned")
                    .two_model_mode = enabled;
                log::info!("Two-model mode {}", if enabled { "enabled" } else { "disabled" });
            }
            ControlMessage::UpdateEndpointKind {
                base_url,
                endpoint_kind,
            } => {
                self.detector.set_override(&base_url, endpoint_kind);
                log::info!("Endpoint kind for {base_url} pinned to {endpoint_kind}");
            }
            ControlMessage::StartProxy | ControlMessage::StopProxy => {
                // The host process owns the lifecycle; nothing to do here.
            }
        }
    }
}

/// Build the downstream router.
pub fn router(state: Arc<ProxyState>) -> axum::Router {
    axum::Router::new()
        .route("/v1/messages", post(messages))
        .route("/v1/debug/echo", post(debug_echo))
        .route("/health", get(health))
        .with_state(state)
}

/// Read and parse the request body by hand so malformed input yields the
/// proxy's own error envelope instead of a framework rejection.
async fn read_chat_request(request: axum::extract::Request) -> Result<anthropic::ChatRequest> {
    let bytes = axum::body::to_bytes(request.into_body(), BODY_LIMIT_BYTES)
        .await
        .map_err(|err| ProxyError::InvalidRequest(format!("Failed to read request body: {err}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|err| ProxyError::InvalidRequest(format!("Failed to parse request body: {err}")))
}

/// `POST /v1/messages` — the main translation path.
async fn messages(
    State(state): State<Arc<ProxyState>>,
    request: axum::extract::Request,
) -> Result<Response> {
    let chat = read_chat_request(request).await?;

    log::debug!(
        "Handling /v1/messages: {} messages, stream={}",
        chat.messages.len(),
        chat.stream.unwrap_or(false)
    );

    let plan::UpstreamPlan {
        url,
        endpoint,
        selection,
        profile,
        headers,
        body,
        stream,
        warnings,
        ..
    } = plan::build(&state, chat).await?;

    log::debug!(
        "Routing to {url} as {} ({}, {})",
        selection.model,
        endpoint.kind,
        stream.then_some("streaming").unwrap_or("buffered"),
    );

    let client = state.clients.client_for(&state.config.base_url);

    let mut builder = client.post(&url).headers(headers).json(&body);
    if !stream {
        builder = builder.timeout(NON_STREAM_TIMEOUT);
    }

    let response = tokio::time::timeout(HEADERS_TIMEOUT, builder.send())
        .await
        .map_err(|_| {
            ProxyError::Connection("upstream did not produce response headers in time".to_string())
        })?
        .map_err(|err| ProxyError::Connection(format!("Failed to reach upstream: {err}")))?;

    let status = response.status();

    if stream {
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            log::warn!(
                "Upstream failed before streaming started ({status}): {}",
                body_preview(&error_body)
            );
            return Ok(streaming::upstream_error_sse(status.as_u16(), &error_body));
        }

        return Ok(match endpoint.kind {
            EndpointKind::AnthropicNative => streaming::passthrough_response(response),
            EndpointKind::OpenAiCompatible => {
                let machine = streaming::StreamState::new(selection.model.clone(), &profile);
                streaming::openai_sse_response(response, machine)
            }
        });
    }

    let response_body = response.text().await.map_err(|err| {
        log::error!("Failed to read upstream response body: {err}");
        ProxyError::Connection(format!("Failed to read upstream response: {err}"))
    })?;

    if !status.is_success() {
        return Err(upstream::map_upstream_error(
            &state.config.provider,
            &state.config.base_url,
            &selection.model,
            status.as_u16(),
            &response_body,
        ));
    }

    match endpoint.kind {
        EndpointKind::AnthropicNative => {
            let mut value: Value = serde_json::from_str(&response_body).map_err(|err| {
                log::error!("Unparseable Anthropic-native upstream response: {err}");
                ProxyError::Internal(Some("Upstream returned an unparseable response".to_string()))
            })?;

            inject_warnings(&mut value, warnings);

            Ok(Json(value).into_response())
        }
        EndpointKind::OpenAiCompatible => {
            let upstream_response = serde_json::from_str(&response_body).map_err(|err| {
                log::error!("Unparseable OpenAI-compatible upstream response: {err}");
                ProxyError::Internal(Some("Upstream returned an unparseable response".to_string()))
            })?;

            let converted =
                convert::from_openai::chat_response(upstream_response, &selection.model, &profile, warnings);

            Ok(Json(converted).into_response())
        }
    }
}

fn inject_warnings(value: &mut Value, warnings: Vec<String>) {
    if warnings.is_empty() {
        return;
    }

    if let Value::Object(map) = value {
        let entry = map
            .entry("warnings")
            .or_insert_with(|| Value::Array(Vec::new()));

        if let Value::Array(array) = entry {
            array.extend(warnings.into_iter().map(Value::String));
        }
    }
}

/// `POST /v1/debug/echo` — returns the plan without calling upstream.
async fn debug_echo(
    State(state): State<Arc<ProxyState>>,
    request: axum::extract::Request,
) -> Result<Response> {
    let chat = read_chat_request(request).await?;
    let plan = plan::build(&state, chat).await?;

    let mut headers = serde_json::Map::new();
    for (name, value) in &plan.headers {
        let shown = if *name == AUTHORIZATION {
            "Bearer ***REDACTED***".to_string()
        } else if name.as_str() == "x-api-key" {
            "***REDACTED***".to_string()
        } else {
            value.to_str().unwrap_or("<non-ascii>").to_string()
        };

        headers.insert(name.as_str().to_string(), Value::String(shown));
    }

    Ok(Json(json!({
        "url": plan.url,
        "model": plan.selection.model,
        "modelSource": plan.selection.source,
        "endpointKind": plan.endpoint.kind,
        "detectionSource": plan.endpoint.detection_source,
        "headers": headers,
        "body": plan.body,
        "warnings": plan.warnings,
        "configuration": {
            "hasApiKey": plan.has_api_key,
            "keySource": plan.key_source,
        },
    }))
    .into_response())
}

/// `GET /health` — liveness plus the endpoint classification.
async fn health(State(state): State<Arc<ProxyState>>) -> Result<Response> {
    let resolved = config::resolve_api_key(&state.config.provider, &state.env);
    let record = state
        .detector
        .detect(
            &state.config.base_url,
            resolved.as_ref().map(|resolved| &resolved.key),
        )
        .await;

    let mut body = json!({
        "ok": true,
        "baseUrl": normalize_base_url(&state.config.base_url),
        "endpointKind": record.kind,
        "detectionSource": record.detection_source,
    });

    if let Some(at) = record.last_probed_at {
        body["lastProbedAt"] = Value::String(at.to_string());
    }

    Ok(Json(body).into_response())
}
