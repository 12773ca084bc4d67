//! Anthropic `/v1/messages` ⇄ upstream envelope
//!
//! Request mapping turns an Anthropic Messages API body into an
//! `UpstreamRequest`. Response mapping produces either a single
//! `message` object (non-streaming) or the native Anthropic SSE event
//! sequence (`message_start` → `content_block_start`/`_delta`/`_stop`* →
//! `message_delta` → `message_stop`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{
    Candidate, Content, FunctionCall, FunctionCallingConfig, FunctionCallingMode,
    FunctionDeclaration, FunctionResponse, GenerationConfig, Part, Tool, ToolConfig,
    UpstreamRequest, UpstreamResponse, clamp_max_tokens,
};
use crate::tool_schema::filter_schema;

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    #[serde(default)]
    pub system: Option<Value>,
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
}

fn system_text(system: &Value) -> String {
    match system {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn content_blocks(content: &Value) -> Vec<Value> {
    match content {
        Value::String(s) => vec![serde_json::json!({"type": "text", "text": s})],
        Value::Array(blocks) => blocks.clone(),
        _ => Vec::new(),
    }
}

/// Translate an Anthropic Messages request into the upstream envelope.
pub fn to_upstream_request(req: &MessagesRequest) -> UpstreamRequest {
    let system_instruction = req.system.as_ref().map(|s| Content {
        role: "system".into(),
        parts: vec![Part::text(system_text(s))],
    });

    let mut contents = Vec::new();
    for message in &req.messages {
        let role = if message.role == "assistant" {
            "model"
        } else {
            "user"
        };
        let mut parts = Vec::new();
        for block in content_blocks(&message.content) {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        parts.push(Part::text(text));
                    }
                }
                Some("tool_use") => {
                    parts.push(Part {
                        text: None,
                        function_call: Some(FunctionCall {
                            name: block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            args: block.get("input").cloned().unwrap_or(Value::Null),
                            id: block
                                .get("id")
                                .and_then(Value::as_str)
                                .map(String::from),
                        }),
                        function_response: None,
                    });
                }
                Some("tool_result") => {
                    let result_text = match block.get("content") {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Array(blocks)) => blocks
                            .iter()
                            .filter_map(|b| b.get("text").and_then(Value::as_str))
                            .collect::<Vec<_>>()
                            .join(""),
                        _ => String::new(),
                    };
                    parts.push(Part {
                        text: None,
                        function_call: None,
                        function_response: Some(FunctionResponse {
                            name: block
                                .get("tool_use_id")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown")
                                .to_string(),
                            response: serde_json::json!({"result": result_text}),
                            id: block
                                .get("tool_use_id")
                                .and_then(Value::as_str)
                                .map(String::from),
                        }),
                    });
                }
                _ => {}
            }
        }
        contents.push(Content {
            role: role.to_string(),
            parts,
        });
    }

    let generation_config = Some(GenerationConfig {
        max_output_tokens: clamp_max_tokens(Some(req.max_tokens)),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stop_sequences: req.stop_sequences.clone(),
    });

    let tools = req.tools.as_ref().map(|tools| {
        vec![Tool {
            function_declarations: tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: Some(filter_schema(&t.input_schema)),
                })
                .collect(),
        }]
    });

    let tool_config = req.tool_choice.as_ref().map(map_tool_choice);

    UpstreamRequest {
        model: req.model.clone(),
        contents,
        system_instruction,
        generation_config,
        tools,
        tool_config,
    }
}

fn map_tool_choice(choice: &Value) -> ToolConfig {
    let kind = choice.get("type").and_then(Value::as_str).unwrap_or("auto");
    let (mode, allowed) = match kind {
        "any" => (FunctionCallingMode::Any, None),
        "tool" => (
            FunctionCallingMode::Any,
            choice
                .get("name")
                .and_then(Value::as_str)
                .map(|n| vec![n.to_string()]),
        ),
        _ => (FunctionCallingMode::Auto, None),
    };
    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode,
            allowed_function_names: allowed,
        },
    }
}

fn stop_reason(reason: Option<&str>, has_tool_use: bool) -> &'static str {
    if has_tool_use {
        return "tool_use";
    }
    match reason {
        Some("MAX_TOKENS") => "max_tokens",
        Some("SAFETY") | Some("RECITATION") => "stop_sequence",
        _ => "end_turn",
    }
}

fn candidate_to_blocks(candidate: &Candidate) -> Vec<Value> {
    let mut blocks = Vec::new();
    for part in &candidate.content.parts {
        if let Some(text) = &part.text {
            blocks.push(serde_json::json!({"type": "text", "text": text}));
        }
        if let Some(call) = &part.function_call {
            blocks.push(serde_json::json!({
                "type": "tool_use",
                "id": call.id.clone().unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4())),
                "name": call.name,
                "input": call.args,
            }));
        }
    }
    blocks
}

/// Translate a complete upstream response into a non-streaming Anthropic
/// `message` object.
pub fn to_messages_response(response: &UpstreamResponse, id: &str, requested_model: &str) -> Value {
    let candidate = response.candidates.first();
    let blocks = candidate.map(candidate_to_blocks).unwrap_or_default();
    let has_tool_use = blocks.iter().any(|b| b["type"] == "tool_use");
    let reason = stop_reason(
        candidate.and_then(|c| c.finish_reason.as_deref()),
        has_tool_use,
    );

    serde_json::json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": requested_model,
        "content": blocks,
        "stop_reason": reason,
        "stop_sequence": Value::Null,
        "usage": response.usage_metadata.as_ref().map(|u| serde_json::json!({
            "input_tokens": u.prompt_token_count,
            "output_tokens": u.candidates_token_count,
        })).unwrap_or_else(|| serde_json::json!({"input_tokens": 0, "output_tokens": 0})),
    })
}

/// Bookkeeping for translating a sequence of upstream streamed chunks into
/// the native Anthropic SSE event sequence. Anthropic indexes content
/// blocks within a message (`content_block_start`/`_delta`/`_stop` each
/// carry an `index`); this tracks which block is currently open so a run
/// of text deltas reuses one `content_block_start` and a `functionCall`
/// opens a new block.
#[derive(Debug, Default)]
pub struct AnthropicStreamState {
    next_index: u32,
    open_text_block: Option<u32>,
    started: bool,
}

impl AnthropicStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ordered SSE events (as `(event_name, data)` pairs) this
    /// chunk produces. The caller is responsible for serializing each as
    /// `event: {name}\ndata: {data}\n\n`.
    pub fn push(
        &mut self,
        response: &UpstreamResponse,
        id: &str,
        requested_model: &str,
    ) -> Vec<(&'static str, Value)> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            events.push((
                "message_start",
                serde_json::json!({
                    "type": "message_start",
                    "message": {
                        "id": id,
                        "type": "message",
                        "role": "assistant",
                        "model": requested_model,
                        "content": [],
                        "stop_reason": Value::Null,
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    },
                }),
            ));
        }

        let Some(candidate) = response.candidates.first() else {
            return events;
        };

        for part in &candidate.content.parts {
            if let Some(text) = &part.text {
                let index = match self.open_text_block {
                    Some(i) => i,
                    None => {
                        let i = self.next_index;
                        self.next_index += 1;
                        self.open_text_block = Some(i);
                        events.push((
                            "content_block_start",
                            serde_json::json!({
                                "type": "content_block_start",
                                "index": i,
                                "content_block": {"type": "text", "text": ""},
                            }),
                        ));
                        i
                    }
                };
                events.push((
                    "content_block_delta",
                    serde_json::json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "text_delta", "text": text},
                    }),
                ));
            }
            if let Some(call) = &part.function_call {
                self.close_text_block(&mut events);
                let index = self.next_index;
                self.next_index += 1;
                events.push((
                    "content_block_start",
                    serde_json::json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {
                            "type": "tool_use",
                            "id": call.id.clone().unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4())),
                            "name": call.name,
                            "input": {},
                        },
                    }),
                ));
                events.push((
                    "content_block_delta",
                    serde_json::json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {
                            "type": "input_json_delta",
                            "partial_json": call.args.to_string(),
                        },
                    }),
                ));
                events.push((
                    "content_block_stop",
                    serde_json::json!({"type": "content_block_stop", "index": index}),
                ));
            }
        }

        if let Some(reason) = &candidate.finish_reason {
            self.close_text_block(&mut events);
            events.push((
                "message_delta",
                serde_json::json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": stop_reason(Some(reason), false), "stop_sequence": Value::Null},
                    "usage": response.usage_metadata.as_ref().map(|u| serde_json::json!({
                        "output_tokens": u.candidates_token_count,
                    })).unwrap_or_else(|| serde_json::json!({"output_tokens": 0})),
                }),
            ));
            events.push(("message_stop", serde_json::json!({"type": "message_stop"})));
        }

        events
    }

    fn close_text_block(&mut self, events: &mut Vec<(&'static str, Value)>) {
        if let Some(i) = self.open_text_block.take() {
            events.push((
                "content_block_stop",
                serde_json::json!({"type": "content_block_stop", "index": i}),
            ));
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(dead_code)]
enum SseEventName {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta,
    ContentBlockStop,
    MessageDelta,
    MessageStop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::UsageMetadata;
    use serde_json::json;

    fn req(messages: Vec<AnthropicMessage>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-3".into(),
            messages,
            system: None,
            max_tokens: 256,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
        }
    }

    #[test]
    fn system_string_becomes_system_instruction() {
        let mut r = req(vec![]);
        r.system = Some(json!("be helpful"));
        let upstream = to_upstream_request(&r);
        assert!(upstream.system_instruction.is_some());
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let r = req(vec![AnthropicMessage {
            role: "assistant".into(),
            content: json!("hi"),
        }]);
        let upstream = to_upstream_request(&r);
        assert_eq!(upstream.contents[0].role, "model");
    }

    #[test]
    fn tool_use_block_becomes_function_call() {
        let r = req(vec![AnthropicMessage {
            role: "assistant".into(),
            content: json!([{"type": "tool_use", "id": "t1", "name": "get_weather", "input": {}}]),
        }]);
        let upstream = to_upstream_request(&r);
        let call = upstream.contents[0].parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "get_weather");
    }

    #[test]
    fn tool_result_block_becomes_function_response() {
        let r = req(vec![AnthropicMessage {
            role: "user".into(),
            content: json!([{"type": "tool_result", "tool_use_id": "t1", "content": "sunny"}]),
        }]);
        let upstream = to_upstream_request(&r);
        let response = upstream.contents[0].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "t1");
    }

    #[test]
    fn max_tokens_clamped_to_ceiling() {
        let mut r = req(vec![]);
        r.max_tokens = 1_000_000;
        let upstream = to_upstream_request(&r);
        assert_eq!(upstream.generation_config.unwrap().max_output_tokens, Some(64_000));
    }

    #[test]
    fn stream_state_emits_message_start_once() {
        let mut state = AnthropicStreamState::new();
        let response = UpstreamResponse {
            candidates: vec![Candidate {
                content: Content { role: "model".into(), parts: vec![Part::text("hi")] },
                finish_reason: None,
                index: 0,
            }],
            usage_metadata: None,
            model_version: None,
        };
        let first = state.push(&response, "msg_1", "claude-3");
        assert_eq!(first[0].0, "message_start");
        let second = state.push(&response, "msg_1", "claude-3");
        assert!(second.iter().all(|(name, _)| *name != "message_start"));
    }

    #[test]
    fn stream_state_closes_on_finish_reason() {
        let mut state = AnthropicStreamState::new();
        let response = UpstreamResponse {
            candidates: vec![Candidate {
                content: Content { role: "model".into(), parts: vec![Part::text("hi")] },
                finish_reason: Some("STOP".into()),
                index: 0,
            }],
            usage_metadata: Some(UsageMetadata {
                prompt_token_count: 1,
                candidates_token_count: 1,
                total_token_count: 2,
            }),
            model_version: None,
        };
        let events = state.push(&response, "msg_1", "claude-3");
        let names: Vec<_> = events.iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"message_delta"));
        assert!(names.contains(&"message_stop"));
    }

    #[test]
    fn to_messages_response_sets_tool_use_stop_reason() {
        let response = UpstreamResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: "model".into(),
                    parts: vec![Part {
                        text: None,
                        function_call: Some(FunctionCall {
                            name: "f".into(),
                            args: json!({}),
                            id: Some("t1".into()),
                        }),
                        function_response: None,
                    }],
                },
                finish_reason: Some("STOP".into()),
                index: 0,
            }],
            usage_metadata: None,
            model_version: None,
        };
        let message = to_messages_response(&response, "msg_1", "claude-3");
        assert_eq!(message["stop_reason"], "tool_use");
    }
}
