//! Classifies raw response fragments into typed output items and folds them into a summary.
//!
//! Classification is total: every fragment produces zero or more items, and anything the
//! inspector does not recognize becomes [`OutputItem::Unknown`] rather than an error.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use serde_json::Value;

use crate::types::{
    ExternalOperation, OutputItem, OutputKind, ResponseFragment, TextChannel, TokenUsage,
};

/// Fields that reveal a backend returned reasoning content.
const REASONING_FIELDS: [&str; 4] = ["reasoning", "reasoning_content", "summary", "encrypted_content"];

const BUILTIN_CALLS: [&str; 6] = [
    "web_search_call",
    "file_search_call",
    "code_interpreter_call",
    "image_generation_call",
    "computer_call",
    "local_shell_call",
];

pub fn classify(fragment: &ResponseFragment) -> Vec<OutputItem> {
    match fragment {
        ResponseFragment::Complete(body) => classify_complete(body),
        ResponseFragment::Delta(body) => classify_delta(body),
    }
}

fn classify_complete(body: &Value) -> Vec<OutputItem> {
    if let Some(output) = body.get("output").and_then(Value::as_array) {
        return output.iter().map(classify_output_item).collect();
    }
    if let Some(choices) = body.get("choices").and_then(Value::as_array) {
        return choices.iter().flat_map(classify_choice).collect();
    }
    vec![unknown(body)]
}

fn classify_delta(body: &Value) -> Vec<OutputItem> {
    if let Some(event_type) = body.get("type").and_then(Value::as_str) {
        return match event_type {
            "response.output_item.done" => body
                .get("item")
                .map(|item| vec![classify_output_item(item)])
                .unwrap_or_default(),
            "error" | "response.failed" => vec![unknown(body)],
            other if other.starts_with("response.") => Vec::new(),
            _ => vec![unknown(body)],
        };
    }
    if let Some(choices) = body.get("choices").and_then(Value::as_array) {
        return choices.iter().flat_map(classify_chunk_choice).collect();
    }
    vec![unknown(body)]
}

/// One element of a responses `output` array (or a streamed `item`).
fn classify_output_item(item: &Value) -> OutputItem {
    let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();

    match item_type {
        "message" => {
            let parts = item
                .get("content")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let text = parts
                .iter()
                .filter_map(|part| part.get("text").or_else(|| part.get("refusal")))
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("");
            let logprobs = parts
                .iter()
                .filter_map(|part| part.get("logprobs").and_then(Value::as_array))
                .map(Vec::len)
                .sum();

            OutputItem::Text {
                channel: TextChannel::Message,
                text,
                logprobs,
            }
        }
        "reasoning" => {
            let text = ["summary", "content"]
                .iter()
                .filter_map(|field| item.get(*field).and_then(Value::as_array))
                .flatten()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");

            OutputItem::Text {
                channel: TextChannel::Reasoning,
                text,
                logprobs: 0,
            }
        }
        "function_call" | "custom_tool_call" => OutputItem::FunctionCall {
            call_id: string_field(item, "call_id"),
            name: string_field(item, "name").unwrap_or_default(),
            arguments: item
                .get("arguments")
                .or_else(|| item.get("input"))
                .map(argument_string)
                .unwrap_or_default(),
        },
        builtin if BUILTIN_CALLS.contains(&builtin) => OutputItem::BuiltinToolCall {
            tool: builtin.trim_end_matches("_call").to_string(),
            id: string_field(item, "id"),
            status: string_field(item, "status"),
        },
        "mcp_call" | "mcp_list_tools" | "mcp_approval_request" => OutputItem::ExternalToolCall {
            operation: match item_type {
                "mcp_call" => ExternalOperation::Call,
                "mcp_list_tools" => ExternalOperation::ListTools,
                _ => ExternalOperation::ApprovalRequest,
            },
            server_label: string_field(item, "server_label"),
            name: string_field(item, "name"),
            error: item.get("error").and_then(|error| match error {
                Value::Null => None,
                Value::String(message) => Some(message.clone()),
                other => Some(other.to_string()),
            }),
        },
        _ => unknown(item),
    }
}

fn classify_choice(choice: &Value) -> Vec<OutputItem> {
    let Some(message) = choice.get("message") else {
        return vec![unknown(choice)];
    };

    let mut items = Vec::new();
    if let Some(reasoning) = reasoning_text(message) {
        items.push(OutputItem::Text {
            channel: TextChannel::Reasoning,
            text: reasoning.to_string(),
            logprobs: 0,
        });
    }
    if let Some(content) = message.get("content").and_then(Value::as_str) {
        let logprobs = choice
            .pointer("/logprobs/content")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        items.push(OutputItem::Text {
            channel: TextChannel::Message,
            text: content.to_string(),
            logprobs,
        });
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        items.extend(calls.iter().map(classify_chat_tool_call));
    }
    items
}

fn classify_chunk_choice(choice: &Value) -> Vec<OutputItem> {
    let Some(delta) = choice.get("delta") else {
        return Vec::new();
    };

    let mut items = Vec::new();
    if let Some(reasoning) = reasoning_text(delta).filter(|text| !text.is_empty()) {
        items.push(OutputItem::Text {
            channel: TextChannel::Reasoning,
            text: reasoning.to_string(),
            logprobs: 0,
        });
    }
    if let Some(content) = delta
        .get("content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
    {
        let logprobs = choice
            .pointer("/logprobs/content")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        items.push(OutputItem::Text {
            channel: TextChannel::Message,
            text: content.to_string(),
            logprobs,
        });
    }
    if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
        // Continuation chunks carry argument text only; the call is counted once, on its name.
        items.extend(
            calls
                .iter()
                .filter(|call| call.pointer("/function/name").and_then(Value::as_str).is_some())
                .map(classify_chat_tool_call),
        );
    }
    items
}

fn is_function_call(call: &Value) -> bool {
    call.get("type")
        .and_then(Value::as_str)
        .map_or(call.get("function").is_some(), |kind| kind == "function")
}

fn classify_chat_tool_call(call: &Value) -> OutputItem {
    if !is_function_call(call) {
        return unknown(call);
    }

    OutputItem::FunctionCall {
        call_id: string_field(call, "id"),
        name: call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        arguments: call
            .pointer("/function/arguments")
            .map(argument_string)
            .unwrap_or_default(),
    }
}

fn reasoning_text(message: &Value) -> Option<&str> {
    message
        .get("reasoning_content")
        .or_else(|| message.get("reasoning"))
        .and_then(Value::as_str)
}

fn argument_string(value: &Value) -> String {
    match value {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

fn unknown(raw: &Value) -> OutputItem {
    let item_type = raw
        .get("type")
        .or_else(|| raw.get("object"))
        .and_then(Value::as_str)
        .unwrap_or("unrecognized")
        .to_string();

    OutputItem::Unknown {
        item_type,
        raw: raw.clone(),
    }
}

/// What one probe revealed about a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbeSummary {
    pub fragments: usize,
    pub counts: BTreeMap<OutputKind, usize>,
    /// `mcp_call` items only; tool listings and approval requests are not calls.
    pub external_calls: usize,
    pub text_with_logprobs: usize,
    pub logprob_tokens: usize,
    pub reasoning_fields: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ProbeSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, fragment: &ResponseFragment, items: &[OutputItem]) {
        self.fragments += 1;

        for item in items {
            *self.counts.entry(item.kind()).or_insert(0) += 1;
            match item {
                OutputItem::Text { logprobs, .. } if *logprobs > 0 => {
                    self.text_with_logprobs += 1;
                    self.logprob_tokens += logprobs;
                }
                OutputItem::ExternalToolCall {
                    operation: ExternalOperation::Call,
                    ..
                } => self.external_calls += 1,
                _ => {}
            }
        }

        let body = fragment.body();
        collect_reasoning_fields(body, &mut self.reasoning_fields);
        if let Some(event_type) = fragment.event_type().filter(|kind| kind.contains("reasoning")) {
            self.reasoning_fields.insert(event_type.to_string());
        }

        if let Some(usage) = fragment_usage(body) {
            self.usage = Some(usage);
        }
    }

    pub fn count(&self, kind: OutputKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_items(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn reasoning_seen(&self) -> bool {
        !self.reasoning_fields.is_empty()
    }
}

/// Summarizes a full fragment sequence and returns every classified item in order.
pub fn inspect<'a, I>(fragments: I) -> (Vec<OutputItem>, ProbeSummary)
where
    I: IntoIterator<Item = &'a ResponseFragment>,
{
    let mut summary = ProbeSummary::new();
    let mut items = Vec::new();
    let mut open_calls = HashMap::new();
    for fragment in fragments {
        let classified = classify(fragment);
        summary.record(fragment, &classified);
        let start = items.len();
        items.extend(classified);
        if let ResponseFragment::Delta(body) = fragment {
            stitch_chunk_arguments(body, &mut items, start, &mut open_calls);
        }
    }
    (items, summary)
}

/// Chat chunks stream a tool call's arguments in pieces after the chunk naming it. Appends
/// each piece to the call item opened under the same choice and call index.
fn stitch_chunk_arguments(
    body: &Value,
    items: &mut [OutputItem],
    start: usize,
    open_calls: &mut HashMap<(u64, u64), usize>,
) {
    let Some(choices) = body.get("choices").and_then(Value::as_array) else {
        return;
    };

    let mut fresh = (start..items.len())
        .filter(|&position| matches!(items[position], OutputItem::FunctionCall { .. }))
        .collect::<Vec<_>>()
        .into_iter();

    for (choice_position, choice) in choices.iter().enumerate() {
        let choice_index = choice
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or(choice_position as u64);
        let Some(calls) = choice.pointer("/delta/tool_calls").and_then(Value::as_array) else {
            continue;
        };

        for (call_position, call) in calls.iter().enumerate() {
            let key = (
                choice_index,
                call.get("index")
                    .and_then(Value::as_u64)
                    .unwrap_or(call_position as u64),
            );

            if call.pointer("/function/name").and_then(Value::as_str).is_some() {
                if is_function_call(call) {
                    if let Some(position) = fresh.next() {
                        open_calls.insert(key, position);
                    }
                } else {
                    open_calls.remove(&key);
                }
                continue;
            }

            let Some(piece) = call.pointer("/function/arguments").and_then(Value::as_str) else {
                continue;
            };
            if let Some(OutputItem::FunctionCall { arguments, .. }) =
                open_calls.get(&key).and_then(|&position| items.get_mut(position))
            {
                arguments.push_str(piece);
            }
        }
    }
}

fn fragment_usage(body: &Value) -> Option<TokenUsage> {
    body.get("usage")
        .or_else(|| body.pointer("/response/usage"))
        .filter(|usage| !usage.is_null())
        .and_then(TokenUsage::from_value)
}

/// Records non-empty reasoning-related fields anywhere in the body.
fn collect_reasoning_fields(value: &Value, seen: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if REASONING_FIELDS.contains(&key.as_str()) && !is_empty(child) {
                    seen.insert(key.clone());
                }
                if key == "type" && child.as_str() == Some("reasoning") {
                    seen.insert("reasoning".to_string());
                }
                collect_reasoning_fields(child, seen);
            }
        }
        Value::Array(values) => {
            for child in values {
                collect_reasoning_fields(child, seen);
            }
        }
        _ => {}
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(values) => values.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn responses_output_items_map_to_kinds() {
        let fragment = ResponseFragment::Complete(json!({
            "object": "response",
            "output": [
                { "type": "mcp_list_tools", "server_label": "github", "tools": [] },
                { "type": "web_search_call", "id": "ws_1", "status": "completed" },
                { "type": "mcp_call", "server_label": "github", "name": "list_branches", "error": null },
                { "type": "function_call", "call_id": "call_1", "name": "get_weather",
                  "arguments": "{\"location\":\"Paris\"}" },
                { "type": "message", "role": "assistant", "content": [
                    { "type": "output_text", "text": "Sunny, ", "logprobs": [{}, {}] },
                    { "type": "output_text", "text": "68F.", "logprobs": [{}] }
                ]},
                { "type": "brand_new_call" }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 5, "total_tokens": 15 }
        }));

        let items = classify(&fragment);
        let kinds: Vec<_> = items.iter().map(OutputItem::kind).collect();
        assert_eq!(
            kinds,
            vec![
                OutputKind::ExternalToolCall,
                OutputKind::BuiltinToolCall,
                OutputKind::ExternalToolCall,
                OutputKind::FunctionCall,
                OutputKind::Text,
                OutputKind::Unknown,
            ]
        );
        assert_eq!(
            items[1],
            OutputItem::BuiltinToolCall {
                tool: "web_search".into(),
                id: Some("ws_1".into()),
                status: Some("completed".into()),
            }
        );
        assert_eq!(
            items[4],
            OutputItem::Text {
                channel: TextChannel::Message,
                text: "Sunny, 68F.".into(),
                logprobs: 3,
            }
        );

        let mut summary = ProbeSummary::new();
        summary.record(&fragment, &items);
        assert_eq!(summary.count(OutputKind::ExternalToolCall), 2);
        assert_eq!(summary.external_calls, 1);
        assert_eq!(summary.text_with_logprobs, 1);
        assert_eq!(summary.logprob_tokens, 3);
        assert_eq!(summary.usage.as_ref().map(|u| u.total_tokens), Some(15));
        assert!(!summary.reasoning_seen());
    }

    #[test]
    fn reasoning_items_land_on_the_reasoning_channel() {
        let fragment = ResponseFragment::Complete(json!({
            "output": [
                { "type": "reasoning", "summary": [], "content": [
                    { "type": "reasoning_text", "text": "s-t-r-a-w-b-e-r-r-y" }
                ]},
                { "type": "message", "content": [{ "type": "output_text", "text": "3" }] }
            ]
        }));

        let (items, summary) = inspect([&fragment]);
        assert_eq!(
            items[0],
            OutputItem::Text {
                channel: TextChannel::Reasoning,
                text: "s-t-r-a-w-b-e-r-r-y".into(),
                logprobs: 0,
            }
        );
        assert!(summary.reasoning_seen());
        assert!(summary.reasoning_fields.contains("reasoning"));
        assert!(!summary.reasoning_fields.contains("summary"));
    }

    #[test]
    fn chat_completion_choices_are_classified() {
        let fragment = ResponseFragment::Complete(json!({
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "There are three.",
                    "reasoning_content": "count the r letters",
                    "tool_calls": [
                        { "id": "call_1", "type": "function",
                          "function": { "name": "get_time", "arguments": "{\"location\":\"Tokyo\"}" } },
                        { "id": "call_2", "type": "retrieval" }
                    ]
                }
            }],
            "usage": { "prompt_tokens": 20, "completion_tokens": 40,
                       "completion_tokens_details": { "reasoning_tokens": 32 } }
        }));

        let (items, summary) = inspect([&fragment]);
        assert_eq!(items.len(), 4);
        assert_eq!(summary.count(OutputKind::Text), 2);
        assert_eq!(summary.count(OutputKind::FunctionCall), 1);
        assert_eq!(summary.count(OutputKind::Unknown), 1);
        assert!(summary.reasoning_fields.contains("reasoning_content"));
        assert_eq!(summary.usage.and_then(|u| u.reasoning_tokens), Some(32));
    }

    #[test]
    fn streamed_responses_events_only_count_finished_items() {
        let events = [
            json!({ "type": "response.created", "response": { "id": "resp_1" } }),
            json!({ "type": "response.reasoning_text.delta", "delta": "r" }),
            json!({ "type": "response.output_text.delta", "delta": "Three" }),
            json!({ "type": "response.output_item.done", "item": {
                "type": "message", "content": [{ "type": "output_text", "text": "Three" }]
            }}),
            json!({ "type": "response.completed", "response": {
                "usage": { "input_tokens": 7, "output_tokens": 3, "total_tokens": 10 }
            }}),
        ];
        let fragments: Vec<_> = events.into_iter().map(ResponseFragment::Delta).collect();

        let (items, summary) = inspect(&fragments);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message_text(), Some("Three"));
        assert_eq!(summary.fragments, 5);
        assert!(summary.reasoning_fields.contains("response.reasoning_text.delta"));
        assert_eq!(summary.usage.map(|u| u.total_tokens), Some(10));
    }

    #[test]
    fn chat_chunks_count_tool_calls_once() {
        let chunks = [
            json!({ "object": "chat.completion.chunk", "choices": [{ "delta": { "role": "assistant", "content": "" } }] }),
            json!({ "choices": [{ "delta": { "tool_calls": [
                { "index": 0, "id": "call_1", "type": "function",
                  "function": { "name": "get_weather", "arguments": "" } }
            ]}}]}),
            json!({ "choices": [{ "delta": { "tool_calls": [
                { "index": 0, "function": { "arguments": "{\"location\":\"Paris\"}" } }
            ]}}]}),
            json!({ "choices": [{ "delta": { "content": "Done" } }] }),
        ];
        let fragments: Vec<_> = chunks.into_iter().map(ResponseFragment::Delta).collect();

        let (_, summary) = inspect(&fragments);
        assert_eq!(summary.count(OutputKind::FunctionCall), 1);
        assert_eq!(summary.count(OutputKind::Text), 1);
    }

    #[test]
    fn chat_chunk_arguments_are_joined_per_call_index() {
        let chunks = [
            json!({ "choices": [{ "index": 0, "delta": { "tool_calls": [
                { "index": 0, "id": "call_1", "type": "function",
                  "function": { "name": "get_weather", "arguments": "" } },
                { "index": 1, "id": "call_2", "type": "function",
                  "function": { "name": "get_time", "arguments": "{\"loc" } }
            ]}}]}),
            json!({ "choices": [{ "index": 0, "delta": { "tool_calls": [
                { "index": 0, "function": { "arguments": "{\"location\":" } },
                { "index": 1, "function": { "arguments": "ation\":\"Tokyo\"}" } }
            ]}}]}),
            json!({ "choices": [{ "index": 0, "delta": { "tool_calls": [
                { "index": 0, "function": { "arguments": "\"Paris\"}" } }
            ]}}]}),
        ];
        let fragments: Vec<_> = chunks.into_iter().map(ResponseFragment::Delta).collect();

        let (items, _) = inspect(&fragments);
        let arguments: Vec<_> = items
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall { name, arguments, .. } => {
                    Some((name.as_str(), arguments.as_str()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            arguments,
            vec![
                ("get_weather", "{\"location\":\"Paris\"}"),
                ("get_time", "{\"location\":\"Tokyo\"}"),
            ]
        );
    }

    #[test]
    fn classification_is_total() {
        let odd = [
            ResponseFragment::Complete(json!(null)),
            ResponseFragment::Complete(json!("plain text")),
            ResponseFragment::Complete(json!({ "detail": "weird" })),
            ResponseFragment::Delta(json!([1, 2, 3])),
            ResponseFragment::Delta(json!({ "type": "error", "message": "boom" })),
        ];

        for fragment in &odd {
            let items = classify(fragment);
            assert_eq!(items.len(), 1, "{fragment:?}");
            assert_eq!(items[0].kind(), OutputKind::Unknown);
        }
    }
}
