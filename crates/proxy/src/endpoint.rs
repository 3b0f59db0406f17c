//! Endpoint-kind detection for upstream base URLs.
//!
//! Decision order: explicit override, then a successful `GET /v1/models`
//! probe, then URL heuristics. The chosen record is cached per normalized
//! base URL for the process lifetime; only an override change or a new
//! successful probe replaces it.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use config::EndpointKind;
use futures::{FutureExt, future::{BoxFuture, Shared}};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::messages::openai;

pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Where an endpoint-kind decision came from.
///
/// Precedence: override > probe > heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Override,
    Probe,
    Heuristic,
}

/// The cached classification of one base URL.
#[derive(Debug, Clone)]
pub struct EndpointKindRecord {
    pub kind: EndpointKind,
    pub detection_source: DetectionSource,
    pub last_probed_at: Option<jiff::Timestamp>,
}

type SharedProbe = Shared<BoxFuture<'static, Option<EndpointKind>>>;

/// Detects and caches the endpoint kind per upstream base URL.
pub struct EndpointDetector {
    overrides: RwLock<BTreeMap<String, EndpointKind>>,
    provider_hint: Option<EndpointKind>,
    client: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, EndpointKindRecord>>>,
    in_flight: Arc<Mutex<HashMap<String, SharedProbe>>>,
}

/// Strip trailing slashes; the cache and override map key on this form.
pub(crate) fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

impl EndpointDetector {
    pub fn new(
        overrides: BTreeMap<String, EndpointKind>,
        provider_hint: Option<EndpointKind>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            overrides: RwLock::new(overrides),
            provider_hint,
            client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Classify a base URL, probing it on first contact.
    ///
    /// Concurrent callers for the same URL share one probe. A probe that
    /// outlives its awaiting caller still installs its result into the
    /// cache when it completes.
    pub async fn detect(&self, base_url: &str, api_key: Option<&SecretString>) -> EndpointKindRecord {
        let normalized = normalize_base_url(base_url);

        if let Some(kind) = self
            .overrides
            .read()
            .expect("endpoint override lock poisoned")
            .get(&normalized)
            .copied()
        {
            let record = EndpointKindRecord {
                kind,
                detection_source: DetectionSource::Override,
                last_probed_at: None,
            };

            self.cache
                .write()
                .expect("endpoint cache lock poisoned")
                .insert(normalized, record.clone());

            return record;
        }

        if let Some(record) = self
            .cache
            .read()
            .expect("endpoint cache lock poisoned")
            .get(&normalized)
        {
            return record.clone();
        }

        let probe = self.spawn_or_join_probe(&normalized, api_key);

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await.ok().flatten() {
            Some(kind) => EndpointKindRecord {
                kind,
                detection_source: DetectionSource::Probe,
                last_probed_at: Some(jiff::Timestamp::now()),
            },
            None => {
                let record = EndpointKindRecord {
                    kind: self.heuristic(&normalized),
                    detection_source: DetectionSource::Heuristic,
                    last_probed_at: None,
                };

                // A probe may have landed a result in the meantime; it wins.
                self.cache
                    .write()
                    .expect("endpoint cache lock poisoned")
                    .entry(normalized)
                    .or_insert_with(|| record.clone())
                    .clone()
            }
        }
    }

    /// Install an explicit override, replacing any cached record.
    pub fn set_override(&self, base_url: &str, kind: EndpointKind) {
        let normalized = normalize_base_url(base_url);

        self.overrides
            .write()
            .expect("endpoint override lock poisoned")
            .insert(normalized.clone(), kind);

        self.cache
            .write()
            .expect("endpoint cache lock poisoned")
            .insert(
                normalized,
                EndpointKindRecord {
                    kind,
                    detection_source: DetectionSource::Override,
                    last_probed_at: None,
                },
            );
    }

    fn spawn_or_join_probe(&self, normalized: &str, api_key: Option<&SecretString>) -> SharedProbe {
        let mut in_flight = self.in_flight.lock().expect("probe map lock poisoned");

        if let Some(existing) = in_flight.get(normalized) {
            return existing.clone();
        }

        let url = format!("{normalized}/v1/models");
        let bearer = api_key.map(|key| key.expose_secret().to_string());
        let client = self.client.clone();
        let cache = Arc::clone(&self.cache);
        let pending = Arc::clone(&self.in_flight);
        let cache_key = normalized.to_string();

        let handle = tokio::spawn(async move {
            let outcome = probe_models(&client, &url, bearer.as_deref()).await;

            if let Some(kind) = outcome {
                let record = EndpointKindRecord {
                    kind,
                    detection_source: DetectionSource::Probe,
                    last_probed_at: Some(jiff::Timestamp::now()),
                };

                cache
                    .write()
                    .expect("endpoint cache lock poisoned")
                    .insert(cache_key.clone(), record);
            }

            pending
                .lock()
                .expect("probe map lock poisoned")
                .remove(&cache_key);

            outcome
        });

        let probe: SharedProbe = async move { handle.await.ok().flatten() }.boxed().shared();
        in_flight.insert(normalized.to_string(), probe.clone());

        probe
    }

    fn heuristic(&self, normalized: &str) -> EndpointKind {
        const ANTHROPIC_NATIVE_HOSTS: &[&str] = &["z.ai", "moonshot", "minimax"];

        if let Ok(url) = url::Url::parse(normalized) {
            if url.path().split('/').any(|segment| segment == "anthropic") {
                return EndpointKind::AnthropicNative;
            }

            if let Some(host) = url.host_str() {
                if ANTHROPIC_NATIVE_HOSTS.iter().any(|needle| host.contains(needle)) {
                    return EndpointKind::AnthropicNative;
                }
            }
        }

        self.provider_hint.unwrap_or(EndpointKind::OpenAiCompatible)
    }
}

/// Probe `GET {base}/v1/models`.
///
/// 2xx classifies the upstream as OpenAI-compatible, as does 401/403 with an
/// OpenAI-style error envelope (the endpoint exists, we just lack access).
/// 404 and network failures yield no classification. 429/5xx are retried
/// once after a short backoff; network failures are not retried.
async fn probe_models(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
) -> Option<EndpointKind> {
    let mut retried = false;

    loop {
        let mut request = client.get(url).timeout(PROBE_TIMEOUT);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                log::debug!("Endpoint probe failed for {url}: {err}");
                return None;
            }
        };

        let status = response.status();

        if status.is_success() {
            return Some(EndpointKind::OpenAiCompatible);
        }

        if (status.as_u16() == 429 || status.is_server_error()) && !retried {
            retried = true;
            tokio::time::sleep(PROBE_RETRY_BACKOFF).await;
            continue;
        }

        if matches!(status.as_u16(), 401 | 403) {
            let body = response.text().await.unwrap_or_default();
            if is_openai_error_envelope(&body) {
                return Some(EndpointKind::OpenAiCompatible);
            }
        }

        log::debug!("Endpoint probe for {url} returned {status}, falling back to heuristics");
        return None;
    }
}

/// Whether an error body looks like the OpenAI envelope.
///
/// Anthropic errors also carry an `error` object but tag the document with
/// a top-level `"type": "error"`; those must not classify the upstream as
/// OpenAI-compatible.
fn is_openai_error_envelope(body: &str) -> bool {
    if serde_json::from_str::<openai::ErrorEnvelope>(body).is_err() {
        return false;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };

    value.get("type").and_then(|kind| kind.as_str()) != Some("error")
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{Json, Router, http::StatusCode, routing::get};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        address
    }

    fn detector() -> EndpointDetector {
        EndpointDetector::new(BTreeMap::new(), None, reqwest::Client::new())
    }

    #[test]
    fn normalization_strips_trailing_slashes() {
        assert_eq!(normalize_base_url("https://api.example.com/"), "https://api.example.com");
        assert_eq!(normalize_base_url("https://api.example.com//"), "https://api.example.com");
        assert_eq!(normalize_base_url("https://api.example.com"), "https://api.example.com");
    }

    #[tokio::test]
    async fn override_wins_regardless_of_prior_probes() {
        let app = Router::new().route(
            "/v1/models",
            get(|| async { Json(json!({"object": "list", "data": []})) }),
        );
        let address = serve(app).await;
        let base_url = format!("http://{address}");

        let detector = detector();

        let record = detector.detect(&base_url, None).await;
        assert_eq!(record.kind, EndpointKind::OpenAiCompatible);
        assert_eq!(record.detection_source, DetectionSource::Probe);

        detector.set_override(&format!("{base_url}/"), EndpointKind::AnthropicNative);

        let record = detector.detect(&base_url, None).await;
        assert_eq!(record.kind, EndpointKind::AnthropicNative);
        assert_eq!(record.detection_source, DetectionSource::Override);
    }

    #[tokio::test]
    async fn successful_probe_classifies_openai_compatible() {
        let app = Router::new().route(
            "/v1/models",
            get(|| async { Json(json!({"object": "list", "data": []})) }),
        );
        let address = serve(app).await;
        let base_url = format!("http://{address}");

        let detector = detector();

        let first = detector.detect(&base_url, None).await;
        assert_eq!(first.kind, EndpointKind::OpenAiCompatible);
        assert_eq!(first.detection_source, DetectionSource::Probe);
        assert!(first.last_probed_at.is_some());

        // Repeated detection returns the cached record with the same kind.
        let second = detector.detect(&base_url, None).await;
        assert_eq!(second.kind, first.kind);
        assert_eq!(second.detection_source, DetectionSource::Probe);
    }

    #[tokio::test]
    async fn unauthorized_with_openai_envelope_still_counts() {
        let app = Router::new().route(
            "/v1/models",
            get(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": {"message": "bad key", "type": "invalid_api_key"}})),
                )
            }),
        );
        let address = serve(app).await;

        let record = detector().detect(&format!("http://{address}"), None).await;
        assert_eq!(record.kind, EndpointKind::OpenAiCompatible);
        assert_eq!(record.detection_source, DetectionSource::Probe);
    }

    #[tokio::test]
    async fn missing_models_route_falls_back_to_heuristics() {
        let app = Router::new();
        let address = serve(app).await;

        let record = detector().detect(&format!("http://{address}"), None).await;
        assert_eq!(record.kind, EndpointKind::OpenAiCompatible);
        assert_eq!(record.detection_source, DetectionSource::Heuristic);
    }

    #[tokio::test]
    async fn anthropic_path_segment_heuristic() {
        // Unresolvable host, so the probe fails and heuristics decide.
        let record = detector()
            .detect("http://upstream.invalid/api/anthropic", None)
            .await;
        assert_eq!(record.kind, EndpointKind::AnthropicNative);
        assert_eq!(record.detection_source, DetectionSource::Heuristic);
    }

    #[tokio::test]
    async fn known_host_registry_heuristic() {
        let record = detector().detect("https://api.z.ai.invalid/paas", None).await;
        // Host containing z.ai is classified native even without a probe.
        assert_eq!(record.kind, EndpointKind::AnthropicNative);
    }

    #[tokio::test]
    async fn provider_hint_applies_when_nothing_else_matches() {
        let detector = EndpointDetector::new(
            BTreeMap::new(),
            Some(EndpointKind::AnthropicNative),
            reqwest::Client::new(),
        );

        let record = detector.detect("http://plain.invalid", None).await;
        assert_eq!(record.kind, EndpointKind::AnthropicNative);
        assert_eq!(record.detection_source, DetectionSource::Heuristic);
    }

    #[test]
    fn anthropic_error_envelopes_are_not_openai() {
        assert!(is_openai_error_envelope(
            r#"{"error": {"message": "bad key", "type": "invalid_api_key"}}"#
        ));
        assert!(!is_openai_error_envelope(
            r#"{"type": "error", "error": {"type": "authentication_error", "message": "x"}}"#
        ));
        assert!(!is_openai_error_envelope("not json"));
    }

    #[tokio::test]
    async fn probe_retries_once_on_server_error() {
        use std::sync::atomic::{AtomicU32, Ordering};

        static HITS: AtomicU32 = AtomicU32::new(0);

        let app = Router::new().route(
            "/v1/models",
            get(|| async {
                if HITS.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "boom"})))
                } else {
                    (StatusCode::OK, Json(json!({"object": "list", "data": []})))
                }
            }),
        );
        let address = serve(app).await;

        let record = detector().detect(&format!("http://{address}"), None).await;
        assert_eq!(record.kind, EndpointKind::OpenAiCompatible);
        assert_eq!(record.detection_source, DetectionSource::Probe);
        assert_eq!(HITS.load(Ordering::SeqCst), 2);
    }
}
