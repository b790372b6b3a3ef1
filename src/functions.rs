use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ProbeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A function call emitted by a model, with arguments already decoded from the wire string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            raw_arguments: None,
        }
    }

    /// Decodes the JSON-encoded argument string the way backends send it. An empty string
    /// decodes to an empty object.
    pub fn from_raw(name: impl Into<String>, raw: &str) -> Result<Self, ProbeError> {
        let arguments = if raw.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(raw)
                .map_err(|error| ProbeError::InvalidFunctionArguments(error.to_string()))?
        };

        Ok(Self {
            name: name.into(),
            arguments,
            raw_arguments: Some(raw.to_string()),
        })
    }
}

#[async_trait]
pub trait KernelFunction: Send + Sync {
    fn definition(&self) -> FunctionDefinition;

    async fn invoke(&self, arguments: &Value) -> Result<Value, ProbeError>;
}

pub type DynKernelFunction = Arc<dyn KernelFunction>;

#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, DynKernelFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: DynKernelFunction) {
        let name = function.definition().name;
        self.functions.insert(name, function);
    }

    pub fn register_all<I>(&mut self, functions: I)
    where
        I: IntoIterator<Item = DynKernelFunction>,
    {
        for function in functions {
            self.register(function);
        }
    }

    pub fn get(&self, name: &str) -> Option<&DynKernelFunction> {
        self.functions.get(name)
    }

    pub async fn invoke(&self, call: &FunctionCall) -> Result<Value, ProbeError> {
        let function = self
            .get(&call.name)
            .ok_or_else(|| ProbeError::UnknownFunction(call.name.clone()))?;
        function.invoke(&call.arguments).await
    }
}

/// Compiled argument validators keyed by function name.
pub struct ArgumentValidators {
    validators: HashMap<String, JSONSchema>,
}

impl ArgumentValidators {
    pub fn compile<'a, I>(definitions: I) -> Result<Self, ProbeError>
    where
        I: IntoIterator<Item = &'a FunctionDefinition>,
    {
        let mut validators = HashMap::new();
        for definition in definitions {
            let compiled = JSONSchema::options()
                .with_draft(Draft::Draft7)
                .compile(&definition.parameters)
                .map_err(|e| ProbeError::InvalidFunctionArguments(e.to_string()))?;
            validators.insert(definition.name.clone(), compiled);
        }
        Ok(Self { validators })
    }

    /// Returns the list of schema violations; empty means the call is valid.
    pub fn validate(&self, call: &FunctionCall) -> Vec<String> {
        let Some(schema) = self.validators.get(&call.name) else {
            return vec![format!("undeclared function: {}", call.name)];
        };
        match schema.validate(&call.arguments) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.map(|e| e.to_string()).collect(),
        }
    }
}

/// JSON schema for `T`, inlined and without the root title so it can be sent as tool
/// parameters.
pub fn json_schema_for<T: JsonSchema>() -> Value {
    let generator = schemars::gen::SchemaSettings::draft07()
        .with(|settings| settings.inline_subschemas = true)
        .into_generator();
    let schema = generator.into_root_schema_for::<T>();

    let mut value = serde_json::to_value(schema.schema).unwrap_or_else(|_| json!({ "type": "object" }));
    if let Some(object) = value.as_object_mut() {
        object.remove("title");
    }
    value
}
