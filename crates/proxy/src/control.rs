//! Messages from the host (IDE panel / extension process) to the proxy
//! core.
//!
//! Deserialization is the schema validation at this boundary: field names
//! are stable, unknown message types fail loudly, and handling is
//! idempotent. The panel itself is a separate collaborator; only the
//! message contract lives here.

use config::EndpointKind;
use serde::Deserialize;

/// A message from the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// The host stored a credential for a provider. Secret storage is the
    /// host's concern; the proxy re-reads keys from the environment.
    #[serde(rename = "storeKey")]
    StoreKey {
        provider: String,
        #[allow(dead_code)]
        key: String,
    },

    /// Replace the default model ids.
    #[serde(rename = "saveModels")]
    SaveModels {
        #[serde(rename = "providerId")]
        provider_id: String,
        #[serde(default)]
        reasoning: Option<String>,
        #[serde(default)]
        completion: Option<String>,
        #[serde(default)]
        value: Option<String>,
    },

    /// Enable or disable routing `thinking` requests to the reasoning
    /// model.
    #[serde(rename = "toggleTwoModelMode")]
    ToggleTwoModelMode { enabled: bool },

    /// Pin the endpoint kind for a base URL.
    #[serde(rename = "updateEndpointKind")]
    UpdateEndpointKind {
        #[serde(rename = "baseUrl")]
        base_url: String,
        #[serde(rename = "endpointKind")]
        endpoint_kind: EndpointKind,
    },

    /// Lifecycle signals; the host process starts and stops the proxy, the
    /// core only acknowledges them.
    #[serde(rename = "startProxy")]
    StartProxy,
    #[serde(rename = "stopProxy")]
    StopProxy,
}
