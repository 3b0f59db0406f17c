//! Anthropic request → OpenAI Chat Completions request.

use crate::messages::{anthropic, openai};

/// Convert an Anthropic-shaped request into the OpenAI dialect.
///
/// System content (the top-level `system` field plus any `system` role
/// messages) collapses into one leading `system` message. Block content is
/// flattened to strings, `tool_use` blocks become `tool_calls`, and
/// `tool_result` blocks become `tool` role messages placed directly after
/// the assistant turn that invoked them.
pub(crate) fn chat_completion_request(request: anthropic::ChatRequest) -> openai::ChatCompletionRequest {
    let model = request.model.unwrap_or_default();

    let mut system_parts = Vec::new();
    if let Some(system) = request.system {
        match system {
            anthropic::SystemPrompt::Text(text) => system_parts.push(text),
            anthropic::SystemPrompt::Blocks(blocks) => {
                for anthropic::SystemBlock::Text { text } in blocks {
                    system_parts.push(text);
                }
            }
        }
    }

    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    for message in request.messages {
        match message.role {
            anthropic::Role::System => system_parts.push(flatten_text(message.content)),
            anthropic::Role::User | anthropic::Role::Tool => {
                convert_user_message(message.content, &mut messages);
            }
            anthropic::Role::Assistant => {
                messages.push(convert_assistant_message(message.content));
            }
        }
    }

    if !system_parts.is_empty() {
        messages.insert(
            0,
            openai::ChatMessage {
                role: openai::ChatRole::System,
                content: Some(system_parts.join("\n")),
                tool_calls: None,
                tool_call_id: None,
            },
        );
    }

    openai::ChatCompletionRequest {
        model,
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences,
        stream: request.stream,
        tools: request.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| openai::Tool {
                    kind: openai::ToolType::Function,
                    function: openai::FunctionDefinition {
                        name: tool.name,
                        description: tool.description,
                        parameters: tool.input_schema,
                    },
                })
                .collect()
        }),
        tool_choice: request.tool_choice.map(convert_tool_choice),
        parallel_tool_calls: None,
    }
}

fn convert_tool_choice(choice: anthropic::ToolChoice) -> openai::ToolChoice {
    match choice {
        anthropic::ToolChoice::Auto => openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto),
        anthropic::ToolChoice::Any => openai::ToolChoice::Mode(openai::ToolChoiceMode::Required),
        anthropic::ToolChoice::None => openai::ToolChoice::Mode(openai::ToolChoiceMode::None),
        anthropic::ToolChoice::Tool { name } => openai::ToolChoice::Specific {
            kind: openai::ToolType::Function,
            function: openai::FunctionChoice { name },
        },
    }
}

/// Flatten block content to a single string, text blocks only.
fn flatten_text(content: anthropic::MessageContent) -> String {
    match content {
        anthropic::MessageContent::Text(text) => text,
        anthropic::MessageContent::Blocks(blocks) => {
            let parts: Vec<String> = blocks
                .into_iter()
                .filter_map(|block| match block {
                    anthropic::ContentBlock::Text { text } => Some(text),
                    _ => None,
                })
                .collect();
            parts.join("\n")
        }
    }
}

/// A user turn can expand into several OpenAI messages: one `tool` message
/// per `tool_result` block (first, answering the previous assistant turn),
/// then a `user` message with the remaining text.
fn convert_user_message(content: anthropic::MessageContent, messages: &mut Vec<openai::ChatMessage>) {
    match content {
        anthropic::MessageContent::Text(text) => messages.push(openai::ChatMessage {
            role: openai::ChatRole::User,
            content: Some(text),
            tool_calls: None,
            tool_call_id: None,
        }),
        anthropic::MessageContent::Blocks(blocks) => {
            let mut text_parts = Vec::new();
            let mut emitted_tool_results = false;

            for block in blocks {
                match block {
                    anthropic::ContentBlock::Text { text } => text_parts.push(text),
                    anthropic::ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => {
                        emitted_tool_results = true;
                        messages.push(openai::ChatMessage {
                            role: openai::ChatRole::Tool,
                            content: Some(tool_result_text(content)),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id),
                        });
                    }
                    // Not valid in user input; dropped.
                    anthropic::ContentBlock::ToolUse { .. } | anthropic::ContentBlock::Thinking { .. } => {}
                }
            }

            if !text_parts.is_empty() || !emitted_tool_results {
                messages.push(openai::ChatMessage {
                    role: openai::ChatRole::User,
                    content: Some(text_parts.join("\n")),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
        }
    }
}

fn convert_assistant_message(content: anthropic::MessageContent) -> openai::ChatMessage {
    let (text_parts, tool_calls) = match content {
        anthropic::MessageContent::Text(text) => (vec![text], Vec::new()),
        anthropic::MessageContent::Blocks(blocks) => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            for block in blocks {
                match block {
                    anthropic::ContentBlock::Text { text } => text_parts.push(text),
                    anthropic::ContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(openai::ToolCall {
                            id,
                            kind: openai::ToolType::Function,
                            function: openai::FunctionCall {
                                name,
                                arguments: serde_json::to_string(&input)
                                    .unwrap_or_else(|_| "{}".to_string()),
                            },
                        });
                    }
                    // Reasoning traces are not replayed upstream.
                    anthropic::ContentBlock::Thinking { .. } => {}
                    anthropic::ContentBlock::ToolResult { .. } => {}
                }
            }

            (text_parts, tool_calls)
        }
    };

    let content = if text_parts.is_empty() {
        if tool_calls.is_empty() {
            Some(String::new())
        } else {
            None
        }
    } else {
        Some(text_parts.join("\n"))
    };

    openai::ChatMessage {
        role: openai::ChatRole::Assistant,
        content,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    }
}

fn tool_result_text(content: Option<anthropic::ToolResultContent>) -> String {
    match content {
        Some(anthropic::ToolResultContent::Text(text)) => text,
        Some(anthropic::ToolResultContent::Blocks(blocks)) => {
            serde_json::to_string(&blocks).unwrap_or_else(|_| "[]".to_string())
        }
        None => String::new(),
    }
}
