//! The streaming engine: consumes upstream SSE in either dialect and emits
//! Anthropic-shaped SSE downstream.
//!
//! For OpenAI-compatible upstreams a [`StreamState`] turns each parsed
//! chunk into zero or more Anthropic stream events, tracking content-block
//! indices, accumulated tool arguments, and the finish reason. For
//! Anthropic-native upstreams the byte stream passes through untouched.
//!
//! Dropping the downstream response stream (client disconnect) drops the
//! upstream `reqwest` response with it, which aborts the upstream request.

use std::{collections::VecDeque, convert::Infallible, pin::Pin};

use axum::response::{IntoResponse, Response, Sse, sse::Event};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::{
    convert::from_openai,
    messages::{anthropic, openai},
    transformers::ModelProfile,
    upstream::{SSE_IDLE_TIMEOUT, body_preview},
};

/// Converts OpenAI streaming chunks into Anthropic stream events.
///
/// Block indices are assigned in first-appearance order and never reused.
/// All opened blocks stay open until the stream finalizes; they are then
/// closed in ascending index order.
pub(crate) struct StreamState {
    message_id: String,
    model: String,
    reasoning: bool,
    enhance_tool: bool,
    next_index: u32,
    text_index: Option<u32>,
    thinking_index: Option<u32>,
    tools: Vec<ToolBlock>,
    usage: anthropic::Usage,
    finish_reason: Option<openai::FinishReason>,
    warnings: Vec<String>,
    finished: bool,
}

struct ToolBlock {
    upstream_index: u32,
    block_index: u32,
    name: String,
    /// Last observed value of the cumulative arguments string.
    arguments: String,
}

impl StreamState {
    pub(crate) fn new(model: String, profile: &ModelProfile) -> Self {
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model,
            reasoning: profile.reasoning,
            enhance_tool: profile.enhance_tool,
            next_index: 0,
            text_index: None,
            thinking_index: None,
            tools: Vec::new(),
            usage: anthropic::Usage::default(),
            finish_reason: None,
            warnings: Vec::new(),
            finished: false,
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Events emitted as soon as the upstream answers 2xx: a placeholder
    /// `message_start` followed by a `ping`.
    pub(crate) fn open_events(&self) -> Vec<anthropic::StreamEvent> {
        vec![
            anthropic::StreamEvent::MessageStart {
                message: anthropic::MessageStart {
                    id: self.message_id.clone(),
                    kind: "message".to_string(),
                    role: anthropic::Role::Assistant,
                    content: Vec::new(),
                    model: self.model.clone(),
                    usage: anthropic::Usage::default(),
                },
            },
            anthropic::StreamEvent::Ping,
        ]
    }

    /// Feed one upstream chunk, producing downstream events.
    pub(crate) fn on_chunk(&mut self, chunk: openai::ChatCompletionChunk) -> Vec<anthropic::StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut events = Vec::new();

        if let Some(usage) = chunk.usage {
            self.usage = anthropic::Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            };
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            // Usage-only chunk.
            return events;
        };

        let delta = choice.delta;

        if self.reasoning {
            if let Some(reasoning) = delta.reasoning.filter(|text| !text.is_empty()) {
                let index = match self.thinking_index {
                    Some(index) => index,
                    None => {
                        let index = self.allocate_index();
                        self.thinking_index = Some(index);
                        events.push(anthropic::StreamEvent::ContentBlockStart {
                            index,
                            content_block: anthropic::ContentBlock::Thinking {
                                thinking: String::new(),
                            },
                        });
                        index
                    }
                };

                events.push(anthropic::StreamEvent::ContentBlockDelta {
                    index,
                    delta: anthropic::ContentDelta::ThinkingDelta { thinking: reasoning },
                });
            }
        }

        if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
            let index = match self.text_index {
                Some(index) => index,
                None => {
                    let index = self.allocate_index();
                    self.text_index = Some(index);
                    events.push(anthropic::StreamEvent::ContentBlockStart {
                        index,
                        content_block: anthropic::ContentBlock::Text { text: String::new() },
                    });
                    index
                }
            };

            events.push(anthropic::StreamEvent::ContentBlockDelta {
                index,
                delta: anthropic::ContentDelta::TextDelta { text },
            });
        }

        for fragment in delta.tool_calls.unwrap_or_default() {
            let position = match self
                .tools
                .iter()
                .position(|tool| tool.upstream_index == fragment.index)
            {
                Some(position) => position,
                None => {
                    let block_index = self.allocate_index();
                    let id = fragment
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));
                    let name = fragment
                        .function
                        .as_ref()
                        .and_then(|function| function.name.clone())
                        .unwrap_or_default();

                    events.push(anthropic::StreamEvent::ContentBlockStart {
                        index: block_index,
                        content_block: anthropic::ContentBlock::ToolUse {
                            id,
                            name: name.clone(),
                            input: Value::Object(Default::default()),
                        },
                    });

                    self.tools.push(ToolBlock {
                        upstream_index: fragment.index,
                        block_index,
                        name,
                        arguments: String::new(),
                    });

                    self.tools.len() - 1
                }
            };

            let slot = &mut self.tools[position];

            if let Some(arguments) = fragment
                .function
                .and_then(|function| function.arguments)
                .filter(|arguments| !arguments.is_empty())
            {
                let partial_json = argument_delta(&mut slot.arguments, &arguments);
                if !partial_json.is_empty() {
                    events.push(anthropic::StreamEvent::ContentBlockDelta {
                        index: slot.block_index,
                        delta: anthropic::ContentDelta::InputJsonDelta { partial_json },
                    });
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
            events.extend(self.finish(false));
        }

        events
    }

    /// Close all open blocks and emit the trailing `message_delta` and
    /// `message_stop`. Idempotent.
    pub(crate) fn finish(&mut self, disconnected: bool) -> Vec<anthropic::StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();

        let mut closers: Vec<(u32, Option<usize>)> = Vec::new();
        if let Some(index) = self.thinking_index {
            closers.push((index, None));
        }
        if let Some(index) = self.text_index {
            closers.push((index, None));
        }
        for (position, tool) in self.tools.iter().enumerate() {
            closers.push((tool.block_index, Some(position)));
        }
        closers.sort_by_key(|(index, _)| *index);

        for (index, tool_position) in closers {
            if let Some(position) = tool_position {
                let tool = &self.tools[position];

                if tool.arguments.is_empty() {
                    // The accumulated input must parse as an object by the
                    // time the block closes.
                    events.push(anthropic::StreamEvent::ContentBlockDelta {
                        index,
                        delta: anthropic::ContentDelta::InputJsonDelta {
                            partial_json: "{}".to_string(),
                        },
                    });
                } else if !parses_as_object(&tool.arguments) {
                    if self.enhance_tool {
                        self.warnings.push(format!(
                            "Streamed arguments for tool '{}' did not form a valid JSON object.",
                            tool.name
                        ));
                    } else {
                        log::warn!(
                            "Streamed arguments for tool '{}' did not form a valid JSON object",
                            tool.name
                        );
                    }
                }
            }

            events.push(anthropic::StreamEvent::ContentBlockStop { index });
        }

        let stop_reason = if disconnected {
            self.warnings.push("upstream_disconnected".to_string());
            anthropic::StopReason::EndTurn
        } else {
            match &self.finish_reason {
                Some(reason) => from_openai::stop_reason(reason),
                None if !self.tools.is_empty() => anthropic::StopReason::ToolUse,
                None => anthropic::StopReason::EndTurn,
            }
        };

        events.push(anthropic::StreamEvent::MessageDelta {
            delta: anthropic::MessageDelta {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
                warnings: if self.warnings.is_empty() {
                    None
                } else {
                    Some(self.warnings.clone())
                },
            },
            usage: self.usage,
        });
        events.push(anthropic::StreamEvent::MessageStop);

        events
    }

    fn allocate_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

/// Compute the `partial_json` fragment to emit for a tool-call arguments
/// update.
///
/// Some upstreams re-send the cumulative arguments string on every chunk;
/// when the update extends what we have seen, only the suffix is emitted.
/// Genuinely incremental fragments are emitted verbatim and appended.
/// Either way, the concatenation of everything emitted equals the final
/// arguments string.
fn argument_delta(seen: &mut String, update: &str) -> String {
    if update.len() >= seen.len() && update.starts_with(seen.as_str()) {
        let delta = update[seen.len()..].to_string();
        *seen = update.to_string();
        delta
    } else {
        seen.push_str(update);
        update.to_string()
    }
}

fn parses_as_object(arguments: &str) -> bool {
    matches!(serde_json::from_str::<Value>(arguments), Ok(Value::Object(_)))
}

type UpstreamEvents = Pin<
    Box<
        dyn Stream<
                Item = Result<
                    eventsource_stream::Event,
                    eventsource_stream::EventStreamError<reqwest::Error>,
                >,
            > + Send,
    >,
>;

struct SseReader {
    events: UpstreamEvents,
    state: StreamState,
    queue: VecDeque<anthropic::StreamEvent>,
    consecutive_parse_errors: u8,
    done: bool,
}

const MAX_CONSECUTIVE_PARSE_ERRORS: u8 = 3;

/// Stream an OpenAI-compatible upstream response downstream as Anthropic
/// SSE.
pub(crate) fn openai_sse_response(upstream: reqwest::Response, state: StreamState) -> Response {
    let initial = state.open_events();

    let reader = SseReader {
        events: Box::pin(upstream.bytes_stream().eventsource()),
        state,
        queue: VecDeque::new(),
        consecutive_parse_errors: 0,
        done: false,
    };

    let translated = futures::stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(event) = reader.queue.pop_front() {
                return Some((Ok::<_, Infallible>(sse_event(&event)), reader));
            }

            if reader.done {
                return None;
            }

            match tokio::time::timeout(SSE_IDLE_TIMEOUT, reader.events.next()).await {
                Err(_) => {
                    log::warn!("Upstream SSE idle timeout, treating as disconnect");
                    reader.queue.extend(reader.state.finish(true));
                    reader.done = true;
                }
                Ok(None) => {
                    reader.queue.extend(reader.state.finish(false));
                    reader.done = true;
                }
                Ok(Some(Err(err))) => {
                    log::warn!("Upstream SSE read error: {err}");
                    reader.queue.extend(reader.state.finish(true));
                    reader.done = true;
                }
                Ok(Some(Ok(event))) => {
                    if event.data.trim() == "[DONE]" {
                        reader.queue.extend(reader.state.finish(false));
                        reader.done = true;
                        continue;
                    }

                    match serde_json::from_str::<openai::ChatCompletionChunk>(&event.data) {
                        Ok(chunk) => {
                            reader.consecutive_parse_errors = 0;
                            reader.queue.extend(reader.state.on_chunk(chunk));
                            if reader.state.is_finished() {
                                reader.done = true;
                            }
                        }
                        Err(err) => {
                            reader.consecutive_parse_errors += 1;
                            log::warn!(
                                "Skipping unparseable upstream chunk ({}/{}): {err}",
                                reader.consecutive_parse_errors,
                                MAX_CONSECUTIVE_PARSE_ERRORS
                            );

                            if reader.consecutive_parse_errors >= MAX_CONSECUTIVE_PARSE_ERRORS {
                                reader.queue.extend(reader.state.finish(true));
                                reader.done = true;
                            }
                        }
                    }
                }
            }
        }
    });

    let opening =
        futures::stream::iter(initial.into_iter().map(|event| Ok::<_, Infallible>(sse_event(&event))));

    Sse::new(opening.chain(translated)).into_response()
}

/// SSE body for an upstream that failed before streaming started: one
/// `error` event, then `message_stop`.
pub(crate) fn upstream_error_sse(status: u16, body: &str) -> Response {
    let events = vec![
        anthropic::StreamEvent::Error {
            error: anthropic::ErrorDetail {
                kind: "upstream_error".to_string(),
                message: body_preview(body),
                status: Some(status),
                hint: None,
            },
        },
        anthropic::StreamEvent::MessageStop,
    ];

    Sse::new(futures::stream::iter(
        events.into_iter().map(|event| Ok::<_, Infallible>(sse_event(&event))),
    ))
    .into_response()
}

/// Forward an Anthropic-native upstream response byte for byte.
///
/// No re-framing, no `[DONE]` injection; hop-by-hop headers are dropped,
/// everything else passes through.
pub(crate) fn passthrough_response(upstream: reqwest::Response) -> Response {
    use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};

    let status = upstream.status();
    let mut builder = Response::builder().status(status);

    for (name, value) in upstream.headers() {
        if *name == TRANSFER_ENCODING || *name == CONTENT_LENGTH || *name == CONNECTION {
            continue;
        }
        builder = builder.header(name, value);
    }

    match builder.body(axum::body::Body::from_stream(upstream.bytes_stream())) {
        Ok(response) => response,
        Err(err) => {
            log::error!("Failed to assemble passthrough response: {err}");
            crate::error::ProxyError::Internal(None).into_response()
        }
    }
}

fn sse_event(event: &anthropic::StreamEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|err| {
        log::error!("Failed to serialize stream event: {err}");
        r#"{"type":"error","error":{"type":"api_error","message":"serialization failed"}}"#.to_string()
    });

    Event::default().event(event.name()).data(data)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::messages::anthropic::{ContentDelta, StreamEvent};

    fn state() -> StreamState {
        StreamState::new("test-model".to_string(), &ModelProfile::default())
    }

    fn chunk(value: serde_json::Value) -> openai::ChatCompletionChunk {
        serde_json::from_value(value).unwrap()
    }

    /// Every appearing index has exactly one start before any delta and
    /// exactly one stop after the last delta.
    fn assert_bracketed(events: &[StreamEvent]) {
        use std::collections::HashMap;

        #[derive(Default)]
        struct BlockLife {
            started: u32,
            stopped: u32,
        }

        let mut blocks: HashMap<u32, BlockLife> = HashMap::new();

        for event in events {
            match event {
                StreamEvent::ContentBlockStart { index, .. } => {
                    let life = blocks.entry(*index).or_default();
                    assert_eq!(life.started, 0, "block {index} started twice");
                    life.started += 1;
                }
                StreamEvent::ContentBlockDelta { index, .. } => {
                    let life = blocks.get(index).unwrap_or_else(|| panic!("delta for unopened block {index}"));
                    assert_eq!(life.started, 1, "delta before start for block {index}");
                    assert_eq!(life.stopped, 0, "delta after stop for block {index}");
                }
                StreamEvent::ContentBlockStop { index } => {
                    let life = blocks.get_mut(index).unwrap_or_else(|| panic!("stop for unopened block {index}"));
                    assert_eq!(life.stopped, 0, "block {index} stopped twice");
                    life.stopped += 1;
                }
                _ => {}
            }
        }

        for (index, life) in blocks {
            assert_eq!(life.started, 1, "block {index} never started");
            assert_eq!(life.stopped, 1, "block {index} never stopped");
        }
    }

    fn collect_tool_json(events: &[StreamEvent], block: u32) -> String {
        events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta { partial_json },
                } if *index == block => Some(partial_json.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn open_events_are_message_start_then_ping() {
        let state = state();
        let events = state.open_events();

        let [StreamEvent::MessageStart { message }, StreamEvent::Ping] = events.as_slice() else {
            panic!("unexpected opening events: {events:?}");
        };
        assert!(message.id.starts_with("msg_"));
        assert_eq!(message.model, "test-model");
        assert!(message.content.is_empty());
    }

    #[test]
    fn plain_text_stream() {
        let mut state = state();
        let mut events = Vec::new();

        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"role": "assistant", "content": "Hel"}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"content": "lo!"}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 2}
        }))));

        assert_bracketed(&events);

        let text: String = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::TextDelta { text },
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello!");

        let Some(StreamEvent::MessageDelta { delta, usage }) = events
            .iter()
            .find(|event| matches!(event, StreamEvent::MessageDelta { .. }))
        else {
            panic!("missing message_delta");
        };
        assert_eq!(delta.stop_reason, Some(anthropic::StopReason::EndTurn));
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 2);

        assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));
    }

    #[test]
    fn cumulative_tool_arguments_are_diffed() {
        let mut state = state();
        let mut events = Vec::new();

        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0,
                "id": "call_1",
                "function": {"name": "get_weather", "arguments": "{\"city\":\""}
            }]}}]
        }))));
        // The upstream re-sends the cumulative arguments string.
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": "{\"city\":\"SF\"}"}
            }]}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}]
        }))));

        assert_bracketed(&events);

        let Some(StreamEvent::ContentBlockStart { index, content_block }) = events
            .iter()
            .find(|event| matches!(event, StreamEvent::ContentBlockStart { .. }))
        else {
            panic!("missing tool block start");
        };
        let anthropic::ContentBlock::ToolUse { id, name, input } = content_block else {
            panic!("expected tool_use start");
        };
        assert_eq!(id, "call_1");
        assert_eq!(name, "get_weather");
        assert_eq!(input, &json!({}));

        assert_eq!(collect_tool_json(&events, *index), r#"{"city":"SF"}"#);

        let Some(StreamEvent::MessageDelta { delta, .. }) = events
            .iter()
            .find(|event| matches!(event, StreamEvent::MessageDelta { .. }))
        else {
            panic!("missing message_delta");
        };
        assert_eq!(delta.stop_reason, Some(anthropic::StopReason::ToolUse));
    }

    #[test]
    fn incremental_tool_arguments_concatenate() {
        let mut state = state();
        let mut events = Vec::new();

        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0, "id": "call_1",
                "function": {"name": "lookup", "arguments": "{\"q\":"}
            }]}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0, "function": {"arguments": "\"rust\"}"}
            }]}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}]
        }))));

        assert_bracketed(&events);
        assert_eq!(collect_tool_json(&events, 0), r#"{"q":"rust"}"#);
    }

    #[test]
    fn text_and_tools_get_distinct_indices_in_emission_order() {
        let mut state = state();
        let mut events = Vec::new();

        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"content": "Let me check."}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "a", "arguments": "{}"}},
                {"index": 1, "id": "call_b", "function": {"name": "b", "arguments": "{}"}}
            ]}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}]
        }))));

        assert_bracketed(&events);

        let starts: Vec<u32> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockStart { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![0, 1, 2], "text first, then tools, in emission order");

        let stops: Vec<u32> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockStop { index } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(stops, vec![0, 1, 2], "blocks close in ascending order");
    }

    #[test]
    fn reasoning_deltas_open_a_thinking_block_when_enabled() {
        let profile = ModelProfile {
            reasoning: true,
            ..Default::default()
        };
        let mut state = StreamState::new("deepseek-reasoner".to_string(), &profile);
        let mut events = Vec::new();

        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"reasoning": "Consider"}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"reasoning": " the problem.", "content": "Answer: 42"}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {}, "finish_reason": "stop"}]
        }))));

        assert_bracketed(&events);

        let thinking: String = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::ThinkingDelta { thinking },
                    ..
                } => Some(thinking.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(thinking, "Consider the problem.");

        // Without the transformer the reasoning field is ignored.
        let mut state = state_without_reasoning();
        let events = state.on_chunk(chunk(json!({
            "choices": [{"delta": {"reasoning": "hidden"}}]
        })));
        assert!(events.is_empty());
    }

    fn state_without_reasoning() -> StreamState {
        StreamState::new("gpt-4o".to_string(), &ModelProfile::default())
    }

    #[test]
    fn empty_tool_arguments_are_completed_at_close() {
        let mut state = state();
        let mut events = Vec::new();

        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0, "id": "call_1", "function": {"name": "ping"}
            }]}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}]
        }))));

        assert_bracketed(&events);
        assert_eq!(collect_tool_json(&events, 0), "{}");
    }

    #[test]
    fn malformed_tool_arguments_warn_on_message_delta() {
        let profile = ModelProfile {
            enhance_tool: true,
            ..Default::default()
        };
        let mut state = StreamState::new("deepseek-chat".to_string(), &profile);
        let mut events = Vec::new();

        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0, "id": "call_1",
                "function": {"name": "get_weather", "arguments": "{\"city\":"}
            }]}}]
        }))));
        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {}, "finish_reason": "tool_calls"}]
        }))));

        let Some(StreamEvent::MessageDelta { delta, .. }) = events
            .iter()
            .find(|event| matches!(event, StreamEvent::MessageDelta { .. }))
        else {
            panic!("missing message_delta");
        };
        assert!(delta.warnings.as_ref().unwrap()[0].contains("get_weather"));
    }

    #[test]
    fn upstream_disconnect_closes_blocks_and_warns() {
        let mut state = state();
        let mut events = Vec::new();

        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"content": "partial answ"}}]
        }))));
        events.extend(state.finish(true));

        assert_bracketed(&events);

        let Some(StreamEvent::MessageDelta { delta, .. }) = events
            .iter()
            .find(|event| matches!(event, StreamEvent::MessageDelta { .. }))
        else {
            panic!("missing message_delta");
        };
        assert_eq!(delta.stop_reason, Some(anthropic::StopReason::EndTurn));
        assert_eq!(
            delta.warnings.as_deref(),
            Some(&["upstream_disconnected".to_string()][..])
        );
    }

    #[test]
    fn finish_is_idempotent_and_chunks_after_done_are_ignored() {
        let mut state = state();

        let events = state.on_chunk(chunk(json!({
            "choices": [{"delta": {"content": "hi"}, "finish_reason": "stop"}]
        })));
        assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));

        assert!(state.finish(false).is_empty());
        assert!(
            state
                .on_chunk(chunk(json!({"choices": [{"delta": {"content": "late"}}]})))
                .is_empty()
        );
    }

    #[test]
    fn eof_without_finish_reason_defaults_like_finish_reason_null() {
        let mut state = state();
        let mut events = Vec::new();

        events.extend(state.on_chunk(chunk(json!({
            "choices": [{"delta": {"content": "trailing"}}]
        }))));
        events.extend(state.finish(false));

        assert_bracketed(&events);

        let Some(StreamEvent::MessageDelta { delta, .. }) = events
            .iter()
            .find(|event| matches!(event, StreamEvent::MessageDelta { .. }))
        else {
            panic!("missing message_delta");
        };
        assert_eq!(delta.stop_reason, Some(anthropic::StopReason::EndTurn));
        assert!(delta.warnings.is_none());
    }

    #[test]
    fn argument_delta_handles_both_styles() {
        let mut seen = String::new();

        assert_eq!(argument_delta(&mut seen, r#"{"city":""#), r#"{"city":""#);
        // Cumulative update extends the seen value.
        assert_eq!(argument_delta(&mut seen, r#"{"city":"SF"}"#), r#"SF"}"#);
        assert_eq!(seen, r#"{"city":"SF"}"#);

        let mut seen = String::new();
        assert_eq!(argument_delta(&mut seen, "{\"q\":"), "{\"q\":");
        // Incremental fragment that is not a prefix extension.
        assert_eq!(argument_delta(&mut seen, "\"x\"}"), "\"x\"}");
        assert_eq!(seen, "{\"q\":\"x\"}");
    }
}
