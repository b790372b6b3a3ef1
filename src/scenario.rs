use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::functions::FunctionDefinition;
use crate::inspector::ProbeSummary;
use crate::types::OutputKind;

/// Which request shape a scenario speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiSurface {
    #[default]
    Responses,
    ChatCompletions,
}

impl ApiSurface {
    pub fn path(&self) -> &'static str {
        match self {
            ApiSurface::Responses => "responses",
            ApiSurface::ChatCompletions => "chat/completions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    Developer,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: MessageRole,
    pub content: String,
}

impl InputMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScenarioInput {
    Text(String),
    Messages(Vec<InputMessage>),
}

impl ScenarioInput {
    /// Always an ordered message list; a bare string becomes a single user message.
    pub fn to_messages(&self) -> Vec<InputMessage> {
        match self {
            ScenarioInput::Text(text) => vec![InputMessage::user(text.clone())],
            ScenarioInput::Messages(messages) => messages.clone(),
        }
    }

    /// User-authored text, used for input shielding.
    pub fn user_text(&self) -> String {
        match self {
            ScenarioInput::Text(text) => text.clone(),
            ScenarioInput::Messages(messages) => messages
                .iter()
                .filter(|message| message.role == MessageRole::User)
                .map(|message| message.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for ScenarioInput {
    fn from(value: &str) -> Self {
        ScenarioInput::Text(value.to_string())
    }
}

impl From<Vec<InputMessage>> for ScenarioInput {
    fn from(value: Vec<InputMessage>) -> Self {
        ScenarioInput::Messages(value)
    }
}

/// A remote tool server reached through the provider (MCP).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolServer {
    pub server_label: String,
    pub server_url: String,
    #[serde(default = "default_approval")]
    pub require_approval: String,
    /// Credential name holding the bearer token sent as the `Authorization` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

fn default_approval() -> String {
    "never".to_string()
}

impl ExternalToolServer {
    pub fn new(server_label: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            server_label: server_label.into(),
            server_url: server_url.into(),
            require_approval: default_approval(),
            token_env: None,
        }
    }

    pub fn with_token_env(mut self, name: impl Into<String>) -> Self {
        self.token_env = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolDeclaration {
    Function(FunctionDefinition),
    Builtin {
        name: String,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        options: Map<String, Value>,
    },
    External(ExternalToolServer),
}

impl ToolDeclaration {
    pub fn builtin(name: impl Into<String>) -> Self {
        ToolDeclaration::Builtin {
            name: name.into(),
            options: Map::new(),
        }
    }

    pub fn web_search() -> Self {
        Self::builtin("web_search")
    }

    /// The output kind this declaration produces when the model triggers it.
    pub fn output_kind(&self) -> OutputKind {
        match self {
            ToolDeclaration::Function(_) => OutputKind::FunctionCall,
            ToolDeclaration::Builtin { .. } => OutputKind::BuiltinToolCall,
            ToolDeclaration::External(_) => OutputKind::ExternalToolCall,
        }
    }
}

impl From<FunctionDefinition> for ToolDeclaration {
    fn from(definition: FunctionDefinition) -> Self {
        ToolDeclaration::Function(definition)
    }
}

/// Optional request parameters. Unknown keys go in `extra` and are forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Knobs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Knobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tool_calls(mut self, value: u32) -> Self {
        self.max_tool_calls = Some(value);
        self
    }

    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    pub fn with_include(mut self, flag: impl Into<String>) -> Self {
        self.include.push(flag.into());
        self
    }

    pub fn with_max_output_tokens(mut self, value: u32) -> Self {
        self.max_output_tokens = Some(value);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A documented expectation about how many items of one kind a backend returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    pub kind: OutputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_least: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_most: Option<usize>,
}

impl Expectation {
    pub fn at_most(kind: OutputKind, max: usize) -> Self {
        Self {
            kind,
            at_least: None,
            at_most: Some(max),
        }
    }

    pub fn at_least(kind: OutputKind, min: usize) -> Self {
        Self {
            kind,
            at_least: Some(min),
            at_most: None,
        }
    }

    pub fn deviation(&self, summary: &ProbeSummary) -> Option<String> {
        let observed = summary.count(self.kind);
        if let Some(min) = self.at_least {
            if observed < min {
                return Some(format!(
                    "expected at least {min} {} item(s), observed {observed}",
                    self.kind
                ));
            }
        }
        if let Some(max) = self.at_most {
            if observed > max {
                return Some(format!(
                    "expected at most {max} {} item(s), observed {observed}",
                    self.kind
                ));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldPolicy {
    #[serde(default)]
    pub input: bool,
    #[serde(default)]
    pub output: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub backend: String,
    #[serde(default)]
    pub api: ApiSurface,
    pub model: String,
    pub input: ScenarioInput,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclaration>,
    #[serde(default)]
    pub knobs: Knobs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect: Vec<Expectation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shield: Option<ShieldPolicy>,
    #[serde(default)]
    pub resolve_functions: bool,
}

impl Scenario {
    pub fn new(
        name: impl Into<String>,
        backend: impl Into<String>,
        model: impl Into<String>,
        input: impl Into<ScenarioInput>,
    ) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            api: ApiSurface::Responses,
            model: model.into(),
            input: input.into(),
            tools: Vec::new(),
            knobs: Knobs::default(),
            observation: None,
            expect: Vec::new(),
            shield: None,
            resolve_functions: false,
        }
    }

    pub fn with_api(mut self, api: ApiSurface) -> Self {
        self.api = api;
        self
    }

    pub fn with_tool(mut self, tool: impl Into<ToolDeclaration>) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn with_tools<I>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = ToolDeclaration>,
    {
        self.tools.extend(tools);
        self
    }

    pub fn with_knobs(mut self, knobs: Knobs) -> Self {
        self.knobs = knobs;
        self
    }

    pub fn with_observation(mut self, note: impl Into<String>) -> Self {
        self.observation = Some(note.into());
        self
    }

    pub fn expecting(mut self, expectation: Expectation) -> Self {
        self.expect.push(expectation);
        self
    }

    pub fn with_shield(mut self, policy: ShieldPolicy) -> Self {
        self.shield = Some(policy);
        self
    }

    pub fn resolving_functions(mut self) -> Self {
        self.resolve_functions = true;
        self
    }

    pub fn function_definitions(&self) -> impl Iterator<Item = &FunctionDefinition> {
        self.tools.iter().filter_map(|tool| match tool {
            ToolDeclaration::Function(definition) => Some(definition),
            _ => None,
        })
    }

    /// Credential names the scenario's external tools need at build time.
    pub fn required_credentials(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().filter_map(|tool| match tool {
            ToolDeclaration::External(server) => server.token_env.as_deref(),
            _ => None,
        })
    }
}
