//! Request and response translation between the downstream OpenAI-style
//! chat-completions shape and the upstream Anthropic messages shape.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{finish_reason, resolve_model};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("unrecognized tool call shape: {0}")]
    UnrecognizedToolCall(String),
}

/// Message content can be a plain string or an array of multimodal parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// `stop` may be a single string or a list of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    Single(String),
    Many(Vec<String>),
}

/// Downstream OpenAI-compatible chat-completions request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Translate a downstream request into the upstream Anthropic request body.
pub fn translate_request(request: &ChatCompletionRequest) -> Result<Value, TranslateError> {
    let model = resolve_model(&request.model);
    let system = extract_system(&request.messages);
    let messages = convert_messages(&request.messages)?;

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": request.stream,
    });

    if let Some(system) = system {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = request.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(stop) = &request.stop {
        body["stop_sequences"] = match stop {
            StopSequences::Single(s) => json!([s]),
            StopSequences::Many(list) => json!(list),
        };
    }
    if let Some(tools) = &request.tools {
        let converted = convert_tools(tools);
        if !converted.is_empty() {
            body["tools"] = json!(converted);
        }
    }

    Ok(body)
}

/// Concatenate all `system` messages, in order, joined by a blank line.
fn extract_system(messages: &[ChatMessage]) -> Option<String> {
    let parts: Vec<String> = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| content_to_text(&m.content))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

fn content_to_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(t) => t.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| p.text.clone())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Convert non-system messages to Anthropic message objects. `user` and
/// `assistant` messages keep their role and pass string content through
/// unchanged; `tool` messages become `user` messages carrying a
/// `tool_result` block; all other roles are dropped.
fn convert_messages(messages: &[ChatMessage]) -> Result<Vec<Value>, TranslateError> {
    let mut result = Vec::new();

    for message in messages {
        match message.role.as_str() {
            "system" => continue,
            "user" => result.push(json!({
                "role": "user",
                "content": content_to_value(&message.content),
            })),
            "assistant" => {
                match &message.tool_calls {
                    None => result.push(json!({
                        "role": "assistant",
                        "content": content_to_value(&message.content),
                    })),
                    Some(tool_calls) => {
                        let mut blocks = match content_to_blocks(&message.content) {
                            Value::Array(blocks) => blocks
                                .into_iter()
                                .filter(|b| !is_empty_text_block(b))
                                .collect(),
                            _ => Vec::new(),
                        };
                        for call in tool_calls {
                            blocks.push(tool_call_to_tool_use(call)?);
                        }
                        result.push(json!({ "role": "assistant", "content": blocks }));
                    }
                }
            }
            "tool" => {
                let tool_use_id = message.tool_call_id.clone().unwrap_or_default();
                result.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": content_to_text(&message.content),
                    }],
                }));
            }
            _ => continue,
        }
    }

    Ok(result)
}

/// Render content the way it crosses the wire when no block-array form is
/// required: a bare string for plain text, an array of blocks for
/// multimodal parts.
fn content_to_value(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(t) => json!(t),
        MessageContent::Parts(_) => content_to_blocks(content),
    }
}

fn content_to_blocks(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(t) => json!([{"type": "text", "text": t}]),
        MessageContent::Parts(parts) => {
            let blocks: Vec<Value> = parts
                .iter()
                .map(|p| {
                    if let Some(text) = &p.text {
                        json!({"type": "text", "text": text})
                    } else if let Some(image) = &p.image_url {
                        json!({"type": "image", "source": image})
                    } else {
                        json!({"type": "text", "text": ""})
                    }
                })
                .collect();
            Value::Array(blocks)
        }
    }
}

/// True for a `{"type": "text", "text": ""}` block specifically — other
/// block types (e.g. `image`) are never considered empty.
fn is_empty_text_block(block: &Value) -> bool {
    block.get("type").and_then(|v| v.as_str()) == Some("text")
        && block.get("text").and_then(|v| v.as_str()).unwrap_or("").is_empty()
}

/// Convert one OpenAI `tool_calls` entry to an Anthropic `tool_use` block.
fn tool_call_to_tool_use(call: &Value) -> Result<Value, TranslateError> {
    if call.get("type").and_then(|v| v.as_str()).unwrap_or("function") != "function" {
        return Err(TranslateError::UnrecognizedToolCall(call.to_string()));
    }
    let func = call
        .get("function")
        .ok_or_else(|| TranslateError::UnrecognizedToolCall(call.to_string()))?;
    let id = call.get("id").and_then(|v| v.as_str()).unwrap_or("");
    let name = func
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TranslateError::UnrecognizedToolCall(call.to_string()))?;
    let arguments = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
    let input: Value = serde_json::from_str(arguments)
        .map_err(|_| TranslateError::UnrecognizedToolCall(call.to_string()))?;

    Ok(json!({ "type": "tool_use", "id": id, "name": name, "input": input }))
}

/// Convert OpenAI `function` tools to Anthropic tool definitions. Other
/// tool types are skipped.
fn convert_tools(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("function"))
        .filter_map(|tool| {
            let func = tool.get("function")?;
            Some(json!({
                "name": func.get("name")?,
                "description": func.get("description").cloned().unwrap_or(json!("")),
                "input_schema": func.get("parameters").cloned().unwrap_or(json!({})),
            }))
        })
        .collect()
}

/// Translate a non-streaming upstream Anthropic response into the
/// downstream OpenAI-compatible chat-completion response.
pub fn translate_response(upstream: &Value, requested_model: &str) -> Value {
    let empty = Vec::new();
    let blocks = upstream
        .get("content")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for (index, block) in blocks.iter().enumerate() {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{index}"));
                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let arguments = block
                    .get("input")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "{}".to_string());

                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments},
                }));
            }
            _ => {}
        }
    }

    let stop_reason = upstream
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .unwrap_or("end_turn");

    let input_tokens = upstream
        .get("usage")
        .and_then(|u| u.get("input_tokens"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let output_tokens = upstream
        .get("usage")
        .and_then(|u| u.get("output_tokens"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let mut message = json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { json!(text) },
    });
    if !tool_calls.is_empty() {
        message["tool_calls"] = json!(tool_calls);
    }

    json!({
        "id": upstream.get("id").cloned().unwrap_or(json!("chatcmpl-0")),
        "object": "chat.completion",
        "model": requested_model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason(stop_reason),
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(role: &str, text: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: MessageContent::Text(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "claude-sonnet-4".to_string(),
            messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            tools: None,
            stream: false,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn system_messages_lift_and_join_with_blank_line() {
        let req = request(vec![
            text_message("system", "be terse"),
            text_message("user", "hi"),
            text_message("system", "avoid jargon"),
        ]);
        let body = translate_request(&req).unwrap();
        assert_eq!(body["system"], "be terse\n\navoid jargon");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn plain_string_content_passes_through_unchanged() {
        let req = request(vec![text_message("user", "hi")]);
        let body = translate_request(&req).unwrap();
        assert_eq!(body["messages"][0]["content"], json!("hi"));

        let req = request(vec![text_message("assistant", "sure thing")]);
        let body = translate_request(&req).unwrap();
        assert_eq!(body["messages"][0]["content"], json!("sure thing"));
    }

    #[test]
    fn assistant_image_only_content_is_not_dropped_without_tool_calls() {
        let req = request(vec![ChatMessage {
            role: "assistant".to_string(),
            content: MessageContent::Parts(vec![ContentPart {
                content_type: "image_url".to_string(),
                text: None,
                image_url: Some(json!({"url": "https://example.com/a.png"})),
            }]),
            tool_calls: None,
            tool_call_id: None,
        }]);
        let body = translate_request(&req).unwrap();
        let blocks = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["type"], "image");
    }

    #[test]
    fn assistant_image_block_survives_alongside_tool_call() {
        let req = request(vec![ChatMessage {
            role: "assistant".to_string(),
            content: MessageContent::Parts(vec![ContentPart {
                content_type: "image_url".to_string(),
                text: None,
                image_url: Some(json!({"url": "https://example.com/a.png"})),
            }]),
            tool_calls: Some(vec![json!({
                "id": "call_1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{}"},
            })]),
            tool_call_id: None,
        }]);
        let body = translate_request(&req).unwrap();
        let blocks = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "image");
        assert_eq!(blocks[1]["type"], "tool_use");
    }

    #[test]
    fn system_concatenation_is_associative_with_pre_joined_message() {
        let separate = request(vec![
            text_message("system", "a"),
            text_message("system", "b"),
        ]);
        let joined = request(vec![text_message("system", "a\n\nb")]);

        assert_eq!(
            translate_request(&separate).unwrap()["system"],
            translate_request(&joined).unwrap()["system"]
        );
    }

    #[test]
    fn missing_max_tokens_defaults_to_4096() {
        let req = request(vec![text_message("user", "hi")]);
        let body = translate_request(&req).unwrap();
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn single_stop_string_becomes_list() {
        let mut req = request(vec![text_message("user", "hi")]);
        req.stop = Some(StopSequences::Single("END".to_string()));
        let body = translate_request(&req).unwrap();
        assert_eq!(body["stop_sequences"], json!(["END"]));
    }

    #[test]
    fn tool_message_becomes_user_tool_result() {
        let req = request(vec![ChatMessage {
            role: "tool".to_string(),
            content: MessageContent::Text("42".to_string()),
            tool_calls: None,
            tool_call_id: Some("call_1".to_string()),
        }]);
        let body = translate_request(&req).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"][0]["type"], "tool_result");
        assert_eq!(messages[0]["content"][0]["tool_use_id"], "call_1");
    }

    #[test]
    fn function_tool_round_trips_to_anthropic_shape() {
        let mut req = request(vec![text_message("user", "hi")]);
        req.tools = Some(vec![json!({
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "look up weather",
                "parameters": {"type": "object", "properties": {}},
            },
        })]);
        let body = translate_request(&req).unwrap();
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "get_weather");
    }

    #[test]
    fn response_maps_stop_reason_to_finish_reason() {
        let upstream = json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": "hello"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let downstream = translate_response(&upstream, "gpt-4o");
        assert_eq!(downstream["choices"][0]["finish_reason"], "length");
        assert_eq!(downstream["usage"]["total_tokens"], 15);
    }

    #[test]
    fn assistant_tool_calls_become_tool_use_blocks() {
        let req = request(vec![ChatMessage {
            role: "assistant".to_string(),
            content: MessageContent::Text(String::new()),
            tool_calls: Some(vec![json!({
                "id": "call_1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"city\":\"nyc\"}"},
            })]),
            tool_call_id: None,
        }]);
        let body = translate_request(&req).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["content"][0]["type"], "tool_use");
        assert_eq!(messages[0]["content"][0]["name"], "get_weather");
        assert_eq!(messages[0]["content"][0]["input"]["city"], "nyc");
    }

    #[test]
    fn unrecognized_tool_call_type_is_a_typed_error() {
        let req = request(vec![ChatMessage {
            role: "assistant".to_string(),
            content: MessageContent::Text(String::new()),
            tool_calls: Some(vec![json!({"id": "call_1", "type": "retrieval"})]),
            tool_call_id: None,
        }]);
        assert!(translate_request(&req).is_err());
    }

    #[test]
    fn response_translates_tool_use_block_to_tool_call() {
        let upstream = json!({
            "id": "msg_2",
            "content": [{
                "type": "tool_use",
                "id": "toolu_1",
                "name": "get_weather",
                "input": {"city": "nyc"},
            }],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 3, "output_tokens": 2},
        });
        let downstream = translate_response(&upstream, "gpt-4o");
        let tool_calls = downstream["choices"][0]["message"]["tool_calls"].as_array().unwrap();
        assert_eq!(tool_calls[0]["function"]["name"], "get_weather");
        assert_eq!(downstream["choices"][0]["finish_reason"], "tool_calls");
    }
}
