//! Model selection from request fields and configured defaults.

use config::ModelDefaults;
use serde::Serialize;

/// Model used when neither the request nor the environment names one.
pub const FALLBACK_MODEL: &str = "openrouter/auto";

/// Runtime-adjustable model settings.
///
/// Starts from the environment defaults; the host can replace the defaults
/// (`saveModels`) or disable two-model routing (`toggleTwoModelMode`) while
/// the proxy runs.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub defaults: ModelDefaults,
    /// When false, the `thinking` hint no longer routes to the reasoning
    /// default.
    pub two_model_mode: bool,
}

impl ModelSettings {
    pub fn new(defaults: ModelDefaults) -> Self {
        Self {
            defaults,
            two_model_mode: true,
        }
    }
}

/// The outcome of model selection, reported by the debug echo endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub model: String,
    pub source: SelectionSource,
}

/// Which rule picked the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionSource {
    /// The request named a model explicitly.
    Request,
    /// The `thinking` hint routed to the reasoning default.
    ThinkingDefault,
    /// The completion default applied.
    CompletionDefault,
    /// The baked-in fallback.
    Builtin,
}

/// Pick the upstream model id. An explicit request model always wins.
pub fn select(requested: Option<&str>, thinking: bool, settings: &ModelSettings) -> Selection {
    if let Some(model) = requested.map(str::trim).filter(|model| !model.is_empty()) {
        return Selection {
            model: model.to_string(),
            source: SelectionSource::Request,
        };
    }

    if thinking && settings.two_model_mode {
        if let Some(model) = settings.defaults.reasoning.as_deref() {
            return Selection {
                model: model.to_string(),
                source: SelectionSource::ThinkingDefault,
            };
        }
    }

    if let Some(model) = settings.defaults.completion.as_deref() {
        return Selection {
            model: model.to_string(),
            source: SelectionSource::CompletionDefault,
        };
    }

    Selection {
        model: FALLBACK_MODEL.to_string(),
        source: SelectionSource::Builtin,
    }
}
