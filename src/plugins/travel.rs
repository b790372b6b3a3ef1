use std::sync::Arc;

use async_trait::async_trait;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::functions::{
    json_schema_for, DynKernelFunction, FunctionDefinition, FunctionRegistry, KernelFunction,
};
use crate::mock::{lookup_distance, lookup_time, lookup_weather};
use crate::scenario::ToolDeclaration;
use crate::ProbeError;

/// Arguments for `get_weather`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WeatherArgs {
    /// The city name (e.g., 'New York', 'London')
    pub location: String,
    /// Temperature unit
    #[serde(default)]
    #[schemars(schema_with = "temperature_unit_schema")]
    pub unit: Option<String>,
}

/// Arguments for `get_time`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TimeArgs {
    /// The city name (e.g., 'New York', 'London')
    pub location: String,
}

/// Arguments for `calculate_distance`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DistanceArgs {
    /// Starting city name
    pub from_location: String,
    /// Destination city name
    pub to_location: String,
}

fn temperature_unit_schema(_: &mut SchemaGenerator) -> Schema {
    SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        enum_values: Some(vec!["fahrenheit".into(), "celsius".into()]),
        ..Default::default()
    }
    .into()
}

fn decode<T: DeserializeOwned>(function: &str, arguments: &Value) -> Result<T, ProbeError> {
    serde_json::from_value(arguments.clone())
        .map_err(|error| ProbeError::InvalidFunctionArguments(format!("{function}: {error}")))
}

pub struct GetWeather;

#[async_trait]
impl KernelFunction for GetWeather {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new("get_weather")
            .with_description("Get current weather information for a specific location")
            .with_parameters(json_schema_for::<WeatherArgs>())
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, ProbeError> {
        let args: WeatherArgs = decode("get_weather", arguments)?;
        Ok(serde_json::to_value(lookup_weather(
            &args.location,
            args.unit.as_deref(),
        ))?)
    }
}

pub struct GetTime;

#[async_trait]
impl KernelFunction for GetTime {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new("get_time")
            .with_description("Get current time for a specific location")
            .with_parameters(json_schema_for::<TimeArgs>())
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, ProbeError> {
        let args: TimeArgs = decode("get_time", arguments)?;
        Ok(serde_json::to_value(lookup_time(&args.location))?)
    }
}

pub struct CalculateDistance;

#[async_trait]
impl KernelFunction for CalculateDistance {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition::new("calculate_distance")
            .with_description("Calculate distance between two locations")
            .with_parameters(json_schema_for::<DistanceArgs>())
    }

    async fn invoke(&self, arguments: &Value) -> Result<Value, ProbeError> {
        let args: DistanceArgs = decode("calculate_distance", arguments)?;
        Ok(serde_json::to_value(lookup_distance(
            &args.from_location,
            &args.to_location,
        ))?)
    }
}

pub fn travel_functions() -> Vec<DynKernelFunction> {
    vec![
        Arc::new(GetWeather),
        Arc::new(GetTime),
        Arc::new(CalculateDistance),
    ]
}

pub fn register_travel_functions(registry: &mut FunctionRegistry) {
    registry.register_all(travel_functions());
}

pub fn travel_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    register_travel_functions(&mut registry);
    registry
}

/// Tool declaration for one of the travel functions, by name.
pub fn travel_tool(name: &str) -> Option<ToolDeclaration> {
    travel_functions()
        .into_iter()
        .map(|function| function.definition())
        .find(|definition| definition.name == name)
        .map(ToolDeclaration::Function)
}
