//! OpenAI Chat Completions response → Anthropic response.

use serde_json::Value;

use crate::{
    messages::{anthropic, openai},
    transformers::ModelProfile,
};

/// Placeholder text inserted when the upstream returns no content at all.
pub(crate) const EMPTY_RESPONSE_TEXT: &str = "Model response was empty";
pub(crate) const EMPTY_RESPONSE_WARNING: &str =
    "Model response was empty and a placeholder message was inserted.";

/// Map an OpenAI finish reason onto an Anthropic stop reason.
pub(crate) fn stop_reason(reason: &openai::FinishReason) -> anthropic::StopReason {
    match reason {
        openai::FinishReason::Stop => anthropic::StopReason::EndTurn,
        openai::FinishReason::Length => anthropic::StopReason::MaxTokens,
        openai::FinishReason::ToolCalls => anthropic::StopReason::ToolUse,
        openai::FinishReason::ContentFilter => anthropic::StopReason::StopSequence,
        openai::FinishReason::Other(reason) => {
            log::warn!("Unknown upstream finish reason '{reason}', mapping to end_turn");
            anthropic::StopReason::EndTurn
        }
    }
}

/// Parse a tool call's arguments string, substituting `{}` when it does not
/// parse as a JSON object.
pub(crate) fn tool_arguments(
    name: &str,
    arguments: &str,
    profile: &ModelProfile,
    warnings: &mut Vec<String>,
) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Default::default());
    }

    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            if profile.enhance_tool {
                warnings.push(format!(
                    "Arguments for tool '{name}' were not a valid JSON object and were replaced with {{}}."
                ));
            } else {
                log::warn!("Discarding malformed arguments for tool '{name}'");
            }

            Value::Object(Default::default())
        }
    }
}

/// Convert a non-streaming OpenAI response into the Anthropic shape.
pub(crate) fn chat_response(
    response: openai::ChatCompletionResponse,
    model: &str,
    profile: &ModelProfile,
    mut warnings: Vec<String>,
) -> anthropic::ChatResponse {
    let choice = response.choices.into_iter().next();

    let mut content = Vec::new();
    let mut finish_reason = None;

    if let Some(choice) = choice {
        let message = choice.message;
        finish_reason = choice.finish_reason;

        if profile.reasoning {
            if let Some(reasoning) = message.reasoning.filter(|text| !text.is_empty()) {
                content.push(anthropic::ContentBlock::Thinking { thinking: reasoning });
            }
        }

        if let Some(text) = message.content.filter(|text| !text.is_empty()) {
            content.push(anthropic::ContentBlock::Text { text });
        }

        for call in message.tool_calls.unwrap_or_default() {
            let input = tool_arguments(
                &call.function.name,
                &call.function.arguments,
                profile,
                &mut warnings,
            );

            content.push(anthropic::ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }
    }

    let has_tool_use = content
        .iter()
        .any(|block| matches!(block, anthropic::ContentBlock::ToolUse { .. }));

    if content.is_empty() {
        content.push(anthropic::ContentBlock::Text {
            text: EMPTY_RESPONSE_TEXT.to_string(),
        });
        warnings.push(EMPTY_RESPONSE_WARNING.to_string());
    }

    let stop = match finish_reason {
        Some(reason) => stop_reason(&reason),
        None if has_tool_use => anthropic::StopReason::ToolUse,
        None => anthropic::StopReason::EndTurn,
    };

    let usage = response.usage.unwrap_or_default();

    anthropic::ChatResponse {
        id: if response.id.is_empty() {
            format!("msg_{}", uuid::Uuid::new_v4().simple())
        } else {
            response.id
        },
        kind: "message".to_string(),
        role: anthropic::Role::Assistant,
        model: model.to_string(),
        content,
        stop_reason: Some(stop),
        stop_sequence: None,
        usage: anthropic::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
        warnings: if warnings.is_empty() { None } else { Some(warnings) },
    }
}
