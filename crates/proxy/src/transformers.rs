//! Per-model request/response adaptations.
//!
//! A static registry maps model-id globs to transformer sets. Every rule
//! whose glob matches contributes; the union becomes the model's
//! [`ModelProfile`]. Request-side adaptations run on the Anthropic-shaped
//! request before dialect conversion, so they apply to both upstream kinds;
//! the OpenAI-only shaping runs after conversion.

use std::fmt::Write as _;

use crate::{
    error::{ProxyError, Result},
    messages::{anthropic, openai},
};

/// A single capability adaptation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformer {
    /// The model rejects tool schemas: strip them and describe the tools in
    /// the prompt instead (or fail with `tool_unsupported` when
    /// `FORCE_TOOL_ERROR` is set).
    ToolFallback,
    /// Force `tool_choice: auto` whenever tools are present.
    ToolUse,
    /// `parallel_tool_calls: false` plus the literal string `"auto"` for
    /// `tool_choice`.
    JsonToolStyle,
    /// Default `max_tokens` to the model's declared ceiling.
    MaxToken(u32),
    /// Map upstream `delta.reasoning` into `thinking` content blocks.
    Reasoning,
    /// Repair unparseable tool-call arguments with `{}` and annotate a
    /// warning.
    EnhanceTool,
}

struct Rule {
    pattern: &'static str,
    transformers: &'static [Transformer],
}

static REGISTRY: &[Rule] = &[
    Rule {
        pattern: "google/gemini-2.0-*",
        transformers: &[Transformer::ToolFallback],
    },
    Rule {
        pattern: "deepseek-reasoner*",
        transformers: &[
            Transformer::Reasoning,
            Transformer::MaxToken(65536),
            Transformer::EnhanceTool,
        ],
    },
    Rule {
        // Provider-prefixed r1 ids, e.g. openrouter's deepseek/deepseek-r1.
        pattern: "*/deepseek-r1*",
        transformers: &[
            Transformer::Reasoning,
            Transformer::MaxToken(65536),
            Transformer::EnhanceTool,
        ],
    },
    Rule {
        pattern: "deepseek*",
        transformers: &[Transformer::EnhanceTool],
    },
    Rule {
        pattern: "glm-*",
        transformers: &[Transformer::ToolUse, Transformer::JsonToolStyle],
    },
    Rule {
        pattern: "zai/*",
        transformers: &[Transformer::ToolUse, Transformer::JsonToolStyle],
    },
    Rule {
        pattern: "moonshot*",
        transformers: &[Transformer::JsonToolStyle, Transformer::EnhanceTool],
    },
    Rule {
        pattern: "kimi*",
        transformers: &[Transformer::JsonToolStyle, Transformer::EnhanceTool],
    },
];

/// The resolved capability profile for one model id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelProfile {
    pub tool_fallback: bool,
    pub force_tool_choice_auto: bool,
    pub json_tool_style: bool,
    pub max_tokens_ceiling: Option<u32>,
    pub reasoning: bool,
    pub enhance_tool: bool,
}

/// Resolve the profile for a model id by glob-matching the registry.
pub fn profile_for(model: &str) -> ModelProfile {
    let mut profile = ModelProfile::default();

    for rule in REGISTRY {
        if !fast_glob::glob_match(rule.pattern, model) {
            continue;
        }

        for transformer in rule.transformers {
            match transformer {
                Transformer::ToolFallback => profile.tool_fallback = true,
                Transformer::ToolUse => profile.force_tool_choice_auto = true,
                Transformer::JsonToolStyle => profile.json_tool_style = true,
                Transformer::MaxToken(ceiling) => {
                    profile.max_tokens_ceiling = Some(*ceiling);
                }
                Transformer::Reasoning => profile.reasoning = true,
                Transformer::EnhanceTool => profile.enhance_tool = true,
            }
        }
    }

    profile
}

/// Apply request-side adaptations to the Anthropic-shaped request.
///
/// Returns warnings to surface on the response. Runs after model selection,
/// so `request.model` is final.
pub(crate) fn pre_transform(
    profile: &ModelProfile,
    request: &mut anthropic::ChatRequest,
    force_tool_error: bool,
) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    let model = request.model.clone().unwrap_or_default();

    let has_tools = request.tools.as_ref().is_some_and(|tools| !tools.is_empty());

    if profile.tool_fallback && has_tools {
        if force_tool_error {
            return Err(ProxyError::ToolUnsupported { model });
        }

        let tools = request.tools.take().unwrap_or_default();
        request.tool_choice = None;
        inject_tool_descriptions(request, &tools);

        warnings.push(format!(
            "Tool definitions were inlined into the prompt because {model} does not support tool calling."
        ));
    } else if profile.force_tool_choice_auto && has_tools && request.tool_choice.is_none() {
        request.tool_choice = Some(anthropic::ToolChoice::Auto);
    }

    if let Some(ceiling) = profile.max_tokens_ceiling {
        if request.max_tokens.is_none() {
            request.max_tokens = Some(ceiling);
        }
    }

    Ok(warnings)
}

/// Apply OpenAI-only shaping after dialect conversion.
pub(crate) fn shape_openai(profile: &ModelProfile, request: &mut openai::ChatCompletionRequest) {
    if profile.json_tool_style {
        request.parallel_tool_calls = Some(false);

        if request.tools.is_some() {
            request.tool_choice = Some(openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto));
        }
    }
}

/// Append a textual rendering of the stripped tools to the last user
/// message, creating one if the transcript has none.
fn inject_tool_descriptions(request: &mut anthropic::ChatRequest, tools: &[anthropic::Tool]) {
    let mut text = String::from(
        "\n\nThe following tools are available to you. To call one, reply with a JSON object \
         giving the tool name and its input.\n",
    );

    for tool in tools {
        let schema = serde_json::to_string(&tool.input_schema).unwrap_or_else(|_| "{}".to_string());
        let _ = writeln!(
            text,
            "- {}: {}\n  input schema: {schema}",
            tool.name,
            tool.description.as_deref().unwrap_or("(no description)"),
        );
    }

    let last_user = request
        .messages
        .iter_mut()
        .rev()
        .find(|message| message.role == anthropic::Role::User);

    match last_user {
        Some(message) => match &mut message.content {
            anthropic::MessageContent::Text(existing) => existing.push_str(&text),
            anthropic::MessageContent::Blocks(blocks) => {
                blocks.push(anthropic::ContentBlock::Text { text });
            }
        },
        None => request.messages.push(anthropic::Message {
            role: anthropic::Role::User,
            content: anthropic::MessageContent::Text(text),
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request_with_tools() -> anthropic::ChatRequest {
        serde_json::from_value(json!({
            "model": "google/gemini-2.0-pro-exp-02-05:free",
            "messages": [{"role": "user", "content": "What's the weather in SF?"}],
            "tools": [{
                "name": "get_weather",
                "description": "Get the weather for a city",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
            }],
            "tool_choice": {"type": "auto"}
        }))
        .unwrap()
    }

    #[test]
    fn registry_globs_union() {
        let profile = profile_for("deepseek-reasoner");
        assert!(profile.reasoning);
        assert!(profile.enhance_tool);
        assert_eq!(profile.max_tokens_ceiling, Some(65536));

        let profile = profile_for("deepseek-chat");
        assert!(!profile.reasoning);
        assert!(profile.enhance_tool);

        let profile = profile_for("openrouter/deepseek-r1-distill");
        assert!(profile.reasoning);

        let profile = profile_for("gpt-4o");
        assert_eq!(profile, ModelProfile::default());
    }

    #[test]
    fn tool_fallback_strips_and_inlines_tools() {
        let mut request = request_with_tools();
        let profile = profile_for("google/gemini-2.0-pro-exp-02-05:free");
        assert!(profile.tool_fallback);

        let warnings = pre_transform(&profile, &mut request, false).unwrap();

        assert!(request.tools.is_none());
        assert!(request.tool_choice.is_none());
        assert_eq!(warnings.len(), 1);

        let anthropic::MessageContent::Text(content) = &request.messages.last().unwrap().content
        else {
            panic!("expected flattened text content");
        };
        assert!(content.contains("get_weather"));
        assert!(content.contains("weather for a city"));
        assert!(content.contains("input schema"));
    }

    #[test]
    fn tool_fallback_with_force_error_is_a_400() {
        let mut request = request_with_tools();
        let profile = profile_for("google/gemini-2.0-pro-exp-02-05:free");

        let error = pre_transform(&profile, &mut request, true).unwrap_err();
        assert!(matches!(error, ProxyError::ToolUnsupported { .. }));
    }

    #[test]
    fn tool_fallback_without_tools_is_inert() {
        let mut request: anthropic::ChatRequest = serde_json::from_value(json!({
            "model": "google/gemini-2.0-flash",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        let profile = profile_for("google/gemini-2.0-flash");
        let warnings = pre_transform(&profile, &mut request, true).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn tooluse_forces_auto_choice() {
        let mut request = request_with_tools();
        request.model = Some("glm-4.7".to_string());
        request.tool_choice = None;

        let profile = profile_for("glm-4.7");
        pre_transform(&profile, &mut request, false).unwrap();

        assert_eq!(request.tool_choice, Some(anthropic::ToolChoice::Auto));
        assert!(request.tools.is_some());
    }

    #[test]
    fn maxtoken_fills_only_when_absent() {
        let profile = profile_for("deepseek-reasoner");

        let mut request: anthropic::ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        pre_transform(&profile, &mut request, false).unwrap();
        assert_eq!(request.max_tokens, Some(65536));

        let mut request: anthropic::ChatRequest = serde_json::from_value(json!({
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        pre_transform(&profile, &mut request, false).unwrap();
        assert_eq!(request.max_tokens, Some(100));
    }

    #[test]
    fn json_tool_style_shapes_openai_request() {
        let profile = profile_for("kimi-k2");
        assert!(profile.json_tool_style);

        let mut request = openai::ChatCompletionRequest {
            model: "kimi-k2".to_string(),
            messages: vec![],
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            stream: None,
            tools: Some(vec![]),
            tool_choice: Some(openai::ToolChoice::Specific {
                kind: openai::ToolType::Function,
                function: openai::FunctionChoice {
                    name: "x".to_string(),
                },
            }),
            parallel_tool_calls: None,
        };

        shape_openai(&profile, &mut request);

        assert_eq!(request.parallel_tool_calls, Some(false));
        let serialized = serde_json::to_value(&request).unwrap();
        assert_eq!(serialized["tool_choice"], "auto");
    }
}
