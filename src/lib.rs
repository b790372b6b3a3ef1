pub mod error;
pub mod config;
pub mod mock;
pub mod functions;
pub mod plugins;
pub mod types;
pub mod scenario;
pub mod request;
pub mod providers;
pub mod inspector;
pub mod safety;
pub mod runner;
pub mod report;
pub mod catalog;

pub use error::ProbeError;
pub use config::{BackendConfig, Credentials, ProbeConfig, SafetyConfig, SafetyMode};
pub use providers::{Backend, BackendRegistry};
pub use types::{
    ExternalOperation, FragmentStream, OutputItem, OutputKind, ResponseFragment, TextChannel,
    TokenUsage,
};
pub use functions::{
    ArgumentValidators, DynKernelFunction, FunctionCall, FunctionDefinition, FunctionRegistry,
    KernelFunction,
};
pub use scenario::{
    ApiSurface, Expectation, ExternalToolServer, InputMessage, Knobs, MessageRole, Scenario,
    ScenarioInput, ShieldPolicy, ToolDeclaration,
};
pub use request::{ProbePayload, RequestBuilder, WireTool};
pub use inspector::{classify, inspect, ProbeSummary};
pub use safety::{safety_from_config, ContentSafety, SafetyVerdict};
pub use runner::{CaseReport, ProbeOutcome, ProbeReport, ProbeRunner, ProbeStatus, ToolInvocation};
pub use catalog::{builtin_catalog, filter_scenarios, load_catalog};
pub use schemars::JsonSchema;
