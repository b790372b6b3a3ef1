use std::fmt;
use std::pin::Pin;

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<ResponseFragment, crate::ProbeError>> + Send>>;

/// One unit of backend output: a whole response object, or one streamed event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "fragment", content = "body", rename_all = "snake_case")]
pub enum ResponseFragment {
    Complete(Value),
    Delta(Value),
}

impl ResponseFragment {
    pub fn body(&self) -> &Value {
        match self {
            ResponseFragment::Complete(body) | ResponseFragment::Delta(body) => body,
        }
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, ResponseFragment::Delta(_))
    }

    /// The `type` field of a streamed responses event, if there is one.
    pub fn event_type(&self) -> Option<&str> {
        match self {
            ResponseFragment::Delta(body) => body.get("type").and_then(Value::as_str),
            ResponseFragment::Complete(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Text,
    FunctionCall,
    BuiltinToolCall,
    ExternalToolCall,
    Unknown,
}

impl OutputKind {
    pub const ALL: [OutputKind; 5] = [
        OutputKind::Text,
        OutputKind::FunctionCall,
        OutputKind::BuiltinToolCall,
        OutputKind::ExternalToolCall,
        OutputKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Text => "text",
            OutputKind::FunctionCall => "function_call",
            OutputKind::BuiltinToolCall => "builtin_tool_call",
            OutputKind::ExternalToolCall => "external_tool_call",
            OutputKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextChannel {
    Message,
    Reasoning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalOperation {
    Call,
    ListTools,
    ApprovalRequest,
}

/// A classified element of a response fragment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputItem {
    Text {
        channel: TextChannel,
        text: String,
        /// Number of token logprob entries attached to the text.
        logprobs: usize,
    },
    FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        name: String,
        /// Raw argument string; streamed calls may carry only a prefix.
        arguments: String,
    },
    BuiltinToolCall {
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    ExternalToolCall {
        operation: ExternalOperation,
        #[serde(skip_serializing_if = "Option::is_none")]
        server_label: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Unknown {
        item_type: String,
        raw: Value,
    },
}

impl OutputItem {
    pub fn kind(&self) -> OutputKind {
        match self {
            OutputItem::Text { .. } => OutputKind::Text,
            OutputItem::FunctionCall { .. } => OutputKind::FunctionCall,
            OutputItem::BuiltinToolCall { .. } => OutputKind::BuiltinToolCall,
            OutputItem::ExternalToolCall { .. } => OutputKind::ExternalToolCall,
            OutputItem::Unknown { .. } => OutputKind::Unknown,
        }
    }

    pub fn message_text(&self) -> Option<&str> {
        match self {
            OutputItem::Text {
                channel: TextChannel::Message,
                text,
                ..
            } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl TokenUsage {
    /// Reads both the responses (`input_tokens`) and chat (`prompt_tokens`) usage shapes.
    pub fn from_value(usage: &Value) -> Option<Self> {
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| usage.get(*name).and_then(Value::as_u64))
        };

        let input_tokens = field(&["input_tokens", "prompt_tokens"])?;
        let output_tokens = field(&["output_tokens", "completion_tokens"]).unwrap_or(0);
        let total_tokens =
            field(&["total_tokens"]).unwrap_or(input_tokens.saturating_add(output_tokens));
        let reasoning_tokens = ["output_tokens_details", "completion_tokens_details"]
            .iter()
            .find_map(|details| usage.get(*details))
            .and_then(|details| details.get("reasoning_tokens"))
            .and_then(Value::as_u64);

        Some(Self {
            input_tokens,
            output_tokens,
            total_tokens,
            reasoning_tokens,
        })
    }
}
