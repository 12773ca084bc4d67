//! OpenAI `/v1/chat/completions` ⇄ upstream envelope
//!
//! Request mapping turns an OpenAI chat-completions body into an
//! `UpstreamRequest`; response mapping turns an `UpstreamResponse` (or a
//! stream of partial ones) back into OpenAI's `chat.completion` /
//! `chat.completion.chunk` shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{
    Candidate, Content, FunctionCallingConfig, FunctionCallingMode, FunctionDeclaration,
    GenerationConfig, Part, Tool, ToolConfig, UpstreamRequest, UpstreamResponse, clamp_max_tokens,
};
use crate::tool_schema::filter_schema;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: OpenAiFunctionDecl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionDecl {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Option<Vec<OpenAiTool>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
}

fn message_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Translate an OpenAI chat-completions request into the upstream envelope.
///
/// Tool calls and tool results are both collapsed to plain text. A model's
/// `tool_calls` already executed by the time their results come back, so the
/// upstream model only needs to see the natural-language follow-up, not a
/// format it could learn to mimic in its own output; an `assistant` message
/// that only carried `tool_calls` is dropped if it has no text left, and a
/// `tool` result message becomes a `user`-role text message.
pub fn to_upstream_request(req: &ChatCompletionRequest) -> UpstreamRequest {
    let mut system_instruction = None;
    let mut contents = Vec::new();

    for message in &req.messages {
        match message.role.as_str() {
            "system" => {
                let text = message
                    .content
                    .as_ref()
                    .map(message_text)
                    .unwrap_or_default();
                system_instruction = Some(Content {
                    role: "system".into(),
                    parts: vec![Part::text(text)],
                });
            }
            "tool" => {
                let text = message
                    .content
                    .as_ref()
                    .map(message_text)
                    .unwrap_or_default();
                if !text.is_empty() {
                    contents.push(Content {
                        role: "user".into(),
                        parts: vec![Part::text(text)],
                    });
                }
            }
            "assistant" if message.tool_calls.is_some() => {
                let text = message
                    .content
                    .as_ref()
                    .map(message_text)
                    .unwrap_or_default();
                if !text.is_empty() {
                    contents.push(Content {
                        role: "model".into(),
                        parts: vec![Part::text(text)],
                    });
                }
            }
            role => {
                let text = message
                    .content
                    .as_ref()
                    .map(message_text)
                    .unwrap_or_default();
                if !text.is_empty() {
                    let mapped_role = if role == "user" { "user" } else { "model" };
                    contents.push(Content {
                        role: mapped_role.into(),
                        parts: vec![Part::text(text)],
                    });
                }
            }
        }
    }

    let max_tokens = clamp_max_tokens(req.max_completion_tokens.or(req.max_tokens));
    let generation_config = Some(GenerationConfig {
        max_output_tokens: max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stop_sequences: req.stop.clone(),
    });

    let tools = req.tools.as_ref().map(|tools| {
        vec![Tool {
            function_declarations: tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    parameters: t.function.parameters.as_ref().map(filter_schema),
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
    let (mode, allowed) = match choice {
        Value::String(s) if s == "none" => (FunctionCallingMode::None, None),
        Value::String(s) if s == "required" => (FunctionCallingMode::Any, None),
        Value::String(_) => (FunctionCallingMode::Auto, None),
        Value::Object(obj) => {
            let name = obj
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .map(String::from);
            (FunctionCallingMode::Any, name.map(|n| vec![n]))
        }
        _ => (FunctionCallingMode::Auto, None),
    };
    ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode,
            allowed_function_names: allowed,
        },
    }
}

fn map_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> &'static str {
    if has_tool_calls {
        return "tool_calls";
    }
    match reason {
        Some("MAX_TOKENS") => "length",
        Some("SAFETY") | Some("RECITATION") => "content_filter",
        _ => "stop",
    }
}

fn candidate_to_message(candidate: &Candidate) -> (Option<String>, Vec<OpenAiToolCall>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in &candidate.content.parts {
        if let Some(t) = &part.text {
            text.push_str(t);
        }
        if let Some(call) = &part.function_call {
            tool_calls.push(OpenAiToolCall {
                id: call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4())),
                kind: "function".into(),
                function: OpenAiFunctionCall {
                    name: call.name.clone(),
                    arguments: call.args.to_string(),
                },
            });
        }
    }
    (if text.is_empty() { None } else { Some(text) }, tool_calls)
}

/// Translate a complete (non-streaming) upstream response into an OpenAI
/// `chat.completion` object.
pub fn to_chat_completion(
    response: &UpstreamResponse,
    id: &str,
    created_unix: u64,
    requested_model: &str,
) -> Value {
    let candidate = response.candidates.first();
    let (text, tool_calls) = candidate
        .map(candidate_to_message)
        .unwrap_or((None, Vec::new()));
    let finish_reason = map_finish_reason(
        candidate.and_then(|c| c.finish_reason.as_deref()),
        !tool_calls.is_empty(),
    );

    let mut message = serde_json::json!({"role": "assistant", "content": text});
    if !tool_calls.is_empty() {
        message["tool_calls"] = serde_json::to_value(&tool_calls).unwrap();
    }

    serde_json::json!({
        "id": id,
        "object": "chat.completion",
        "created": created_unix,
        "model": requested_model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
        "usage": response.usage_metadata.as_ref().map(|u| serde_json::json!({
            "prompt_tokens": u.prompt_token_count,
            "completion_tokens": u.candidates_token_count,
            "total_tokens": u.total_token_count,
        })).unwrap_or(Value::Null),
    })
}

/// Translate one streamed upstream chunk into an OpenAI
/// `chat.completion.chunk` delta event.
pub fn to_chat_completion_chunk(
    response: &UpstreamResponse,
    id: &str,
    created_unix: u64,
    requested_model: &str,
) -> Value {
    let candidate = response.candidates.first();
    let (text, tool_calls) = candidate
        .map(candidate_to_message)
        .unwrap_or((None, Vec::new()));

    let mut delta = serde_json::json!({});
    if let Some(t) = &text {
        delta["content"] = Value::String(t.clone());
    }
    if !tool_calls.is_empty() {
        delta["tool_calls"] = serde_json::to_value(&tool_calls).unwrap();
    }

    let finish_reason = candidate.and_then(|c| c.finish_reason.as_ref()).map(|_| {
        map_finish_reason(
            candidate.and_then(|c| c.finish_reason.as_deref()),
            !tool_calls.is_empty(),
        )
    });

    serde_json::json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created_unix,
        "model": requested_model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req_with_messages(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt-4o".into(),
            messages,
            max_tokens: None,
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            stream: false,
            tools: None,
            tool_choice: None,
        }
    }

    #[test]
    fn system_message_becomes_system_instruction() {
        let req = req_with_messages(vec![ChatMessage {
            role: "system".into(),
            content: Some(json!("be nice")),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }]);
        let upstream = to_upstream_request(&req);
        assert!(upstream.system_instruction.is_some());
        assert!(upstream.contents.is_empty());
    }

    #[test]
    fn user_message_maps_to_user_role() {
        let req = req_with_messages(vec![ChatMessage {
            role: "user".into(),
            content: Some(json!("hi")),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }]);
        let upstream = to_upstream_request(&req);
        assert_eq!(upstream.contents[0].role, "user");
    }

    #[test]
    fn assistant_tool_call_drops_call_and_keeps_text() {
        let req = req_with_messages(vec![ChatMessage {
            role: "assistant".into(),
            content: Some(json!("let me check that")),
            name: None,
            tool_calls: Some(vec![OpenAiToolCall {
                id: "call_1".into(),
                kind: "function".into(),
                function: OpenAiFunctionCall {
                    name: "get_weather".into(),
                    arguments: "{}".into(),
                },
            }]),
            tool_call_id: None,
        }]);
        let upstream = to_upstream_request(&req);
        assert_eq!(upstream.contents.len(), 1);
        assert_eq!(upstream.contents[0].role, "model");
        assert_eq!(upstream.contents[0].parts[0].text.as_deref(), Some("let me check that"));
        assert!(upstream.contents[0].parts[0].function_call.is_none());
    }

    #[test]
    fn assistant_tool_call_with_no_text_is_dropped() {
        let req = req_with_messages(vec![ChatMessage {
            role: "assistant".into(),
            content: None,
            name: None,
            tool_calls: Some(vec![OpenAiToolCall {
                id: "call_1".into(),
                kind: "function".into(),
                function: OpenAiFunctionCall {
                    name: "get_weather".into(),
                    arguments: "{}".into(),
                },
            }]),
            tool_call_id: None,
        }]);
        let upstream = to_upstream_request(&req);
        assert!(upstream.contents.is_empty());
    }

    #[test]
    fn tool_result_maps_to_plain_user_text() {
        let req = req_with_messages(vec![ChatMessage {
            role: "tool".into(),
            content: Some(json!("sunny")),
            name: None,
            tool_calls: None,
            tool_call_id: Some("call_1".into()),
        }]);
        let upstream = to_upstream_request(&req);
        assert_eq!(upstream.contents.len(), 1);
        assert_eq!(upstream.contents[0].role, "user");
        assert_eq!(upstream.contents[0].parts[0].text.as_deref(), Some("sunny"));
        assert!(upstream.contents[0].parts[0].function_response.is_none());
    }

    #[test]
    fn empty_user_message_is_dropped() {
        let req = req_with_messages(vec![ChatMessage {
            role: "user".into(),
            content: Some(json!("")),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }]);
        let upstream = to_upstream_request(&req);
        assert!(upstream.contents.is_empty());
    }

    #[test]
    fn max_tokens_is_clamped() {
        let mut req = req_with_messages(vec![]);
        req.max_tokens = Some(1_000_000);
        let upstream = to_upstream_request(&req);
        assert_eq!(
            upstream.generation_config.unwrap().max_output_tokens,
            Some(64_000)
        );
    }

    #[test]
    fn tool_choice_required_maps_to_any() {
        let config = map_tool_choice(&json!("required"));
        assert!(matches!(
            config.function_calling_config.mode,
            FunctionCallingMode::Any
        ));
    }

    #[test]
    fn tool_choice_named_function_sets_allowlist() {
        let config = map_tool_choice(&json!({"type": "function", "function": {"name": "f"}}));
        assert_eq!(
            config.function_calling_config.allowed_function_names,
            Some(vec!["f".to_string()])
        );
    }

    #[test]
    fn finish_reason_maps_max_tokens_to_length() {
        assert_eq!(map_finish_reason(Some("MAX_TOKENS"), false), "length");
    }

    #[test]
    fn finish_reason_tool_calls_overrides_stop() {
        assert_eq!(map_finish_reason(Some("STOP"), true), "tool_calls");
    }

    #[test]
    fn to_chat_completion_includes_usage() {
        let response = UpstreamResponse {
            candidates: vec![Candidate {
                content: Content {
                    role: "model".into(),
                    parts: vec![Part::text("hello")],
                },
                finish_reason: Some("STOP".into()),
                index: 0,
            }],
            usage_metadata: Some(crate::envelope::UsageMetadata {
                prompt_token_count: 5,
                candidates_token_count: 2,
                total_token_count: 7,
            }),
            model_version: None,
        };
        let completion = to_chat_completion(&response, "chatcmpl-1", 0, "gpt-4o");
        assert_eq!(completion["choices"][0]["message"]["content"], "hello");
        assert_eq!(completion["usage"]["total_tokens"], 7);
    }
}
