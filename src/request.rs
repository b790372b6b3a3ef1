use serde_json::{json, Map, Value};

use crate::config::{Credentials, Secret};
use crate::functions::FunctionDefinition;
use crate::scenario::{ApiSurface, InputMessage, Knobs, Scenario, ToolDeclaration};
use crate::ProbeError;

/// A tool declaration with credentials resolved, ready to be rendered for either API surface.
#[derive(Debug, Clone, PartialEq)]
pub enum WireTool {
    Function(FunctionDefinition),
    Builtin {
        name: String,
        options: Map<String, Value>,
    },
    Mcp {
        server_label: String,
        server_url: String,
        require_approval: String,
        authorization: Option<Secret>,
    },
}

impl WireTool {
    fn to_responses(&self) -> Value {
        match self {
            WireTool::Function(definition) => {
                let mut tool = json!({
                    "type": "function",
                    "name": definition.name,
                    "parameters": definition.parameters,
                });
                if let Some(description) = &definition.description {
                    tool["description"] = Value::String(description.clone());
                }
                tool
            }
            WireTool::Builtin { name, options } => {
                let mut tool = options.clone();
                tool.insert("type".to_string(), Value::String(name.clone()));
                Value::Object(tool)
            }
            WireTool::Mcp {
                server_label,
                server_url,
                require_approval,
                authorization,
            } => {
                let mut tool = json!({
                    "type": "mcp",
                    "server_label": server_label,
                    "server_url": server_url,
                    "require_approval": require_approval,
                });
                if let Some(token) = authorization {
                    tool["headers"] = json!({
                        "Authorization": format!("Bearer {}", token.expose())
                    });
                }
                tool
            }
        }
    }

    fn to_chat(&self) -> Value {
        match self {
            WireTool::Function(definition) => json!({
                "type": "function",
                "function": definition,
            }),
            // Chat completions has no native shape for these; forward and let the backend judge.
            other => other.to_responses(),
        }
    }
}

/// Backend-agnostic request: normalized messages, resolved tools, untouched knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbePayload {
    pub api: ApiSurface,
    pub model: String,
    pub messages: Vec<InputMessage>,
    pub tools: Vec<WireTool>,
    pub knobs: Knobs,
}

impl ProbePayload {
    pub fn stream(&self) -> bool {
        self.knobs.stream
    }

    /// JSON body for the payload's API surface. `extra` knobs are applied last.
    pub fn to_wire(&self) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(self.model.clone()));

        let knobs = &self.knobs;
        match self.api {
            ApiSurface::Responses => {
                body.insert("input".to_string(), json!(self.messages));
                if !self.tools.is_empty() {
                    let tools = self.tools.iter().map(WireTool::to_responses).collect();
                    body.insert("tools".to_string(), Value::Array(tools));
                }
                if let Some(effort) = &knobs.reasoning_effort {
                    body.insert("reasoning".to_string(), json!({ "effort": effort }));
                }
                if let Some(limit) = knobs.max_output_tokens {
                    body.insert("max_output_tokens".to_string(), json!(limit));
                }
            }
            ApiSurface::ChatCompletions => {
                body.insert("messages".to_string(), json!(self.messages));
                if !self.tools.is_empty() {
                    let tools = self.tools.iter().map(WireTool::to_chat).collect();
                    body.insert("tools".to_string(), Value::Array(tools));
                }
                if let Some(effort) = &knobs.reasoning_effort {
                    body.insert("reasoning_effort".to_string(), json!(effort));
                }
                if let Some(limit) = knobs.max_output_tokens {
                    body.insert("max_completion_tokens".to_string(), json!(limit));
                }
            }
        }

        if let Some(limit) = knobs.max_tool_calls {
            body.insert("max_tool_calls".to_string(), json!(limit));
        }
        if !knobs.include.is_empty() {
            body.insert("include".to_string(), json!(knobs.include));
        }
        if knobs.stream {
            body.insert("stream".to_string(), Value::Bool(true));
        }
        for (key, value) in &knobs.extra {
            body.insert(key.clone(), value.clone());
        }

        Value::Object(body)
    }
}

/// Turns scenarios into payloads. Knob semantics are left to the backend.
pub struct RequestBuilder<'a> {
    credentials: &'a Credentials,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(credentials: &'a Credentials) -> Self {
        Self { credentials }
    }

    pub fn build(&self, scenario: &Scenario) -> Result<ProbePayload, ProbeError> {
        let tools = scenario
            .tools
            .iter()
            .map(|tool| self.wire_tool(tool))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProbePayload {
            api: scenario.api,
            model: scenario.model.clone(),
            messages: scenario.input.to_messages(),
            tools,
            knobs: scenario.knobs.clone(),
        })
    }

    fn wire_tool(&self, tool: &ToolDeclaration) -> Result<WireTool, ProbeError> {
        Ok(match tool {
            ToolDeclaration::Function(definition) => WireTool::Function(definition.clone()),
            ToolDeclaration::Builtin { name, options } => WireTool::Builtin {
                name: name.clone(),
                options: options.clone(),
            },
            ToolDeclaration::External(server) => WireTool::Mcp {
                server_label: server.server_label.clone(),
                server_url: server.server_url.clone(),
                require_approval: server.require_approval.clone(),
                authorization: match &server.token_env {
                    Some(name) => Some(self.credentials.get(name)?.clone()),
                    None => None,
                },
            },
        })
    }
}
