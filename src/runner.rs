use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::functions::{ArgumentValidators, FunctionCall, FunctionRegistry};
use crate::inspector::{inspect, ProbeSummary};
use crate::plugins::travel::travel_registry;
use crate::providers::BackendRegistry;
use crate::request::RequestBuilder;
use crate::safety::{ContentSafety, SafetyVerdict};
use crate::scenario::Scenario;
use crate::types::{OutputItem, ResponseFragment};
use crate::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Completed,
    /// The input shield rejected the prompt; nothing was dispatched.
    Blocked,
    /// The backend returned data but the run could not finish. `error` says why.
    Partial,
}

/// A function call the model emitted, checked against its schema and run on the mock registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub name: String,
    pub arguments: Value,
    pub schema_errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub scenario: String,
    pub backend: String,
    pub model: String,
    pub status: ProbeStatus,
    pub fragments: Vec<ResponseFragment>,
    pub items: Vec<OutputItem>,
    pub summary: ProbeSummary,
    pub deviations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<ToolInvocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_verdict: Option<SafetyVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_verdict: Option<SafetyVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl ProbeOutcome {
    fn new(scenario: &Scenario) -> Self {
        Self {
            scenario: scenario.name.clone(),
            backend: scenario.backend.clone(),
            model: scenario.model.clone(),
            status: ProbeStatus::Completed,
            fragments: Vec::new(),
            items: Vec::new(),
            summary: ProbeSummary::default(),
            deviations: Vec::new(),
            invocations: Vec::new(),
            input_verdict: None,
            output_verdict: None,
            observation: scenario.observation.clone(),
            error: None,
            elapsed_ms: 0,
        }
    }

    fn interrupt(&mut self, error: &ProbeError) {
        self.status = ProbeStatus::Partial;
        self.error = Some(error.to_string());
    }

    /// Concatenated assistant message text across all items.
    pub fn message_text(&self) -> String {
        self.items
            .iter()
            .filter_map(OutputItem::message_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug)]
pub struct CaseReport {
    pub name: String,
    pub backend: String,
    pub result: Result<ProbeOutcome, ProbeError>,
}

impl CaseReport {
    pub fn is_completed(&self) -> bool {
        matches!(&self.result, Ok(outcome) if outcome.status != ProbeStatus::Partial)
    }
}

#[derive(Debug, Default)]
pub struct ProbeReport {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cases: Vec<CaseReport>,
}

/// Runs scenarios one at a time. Failures are recorded per scenario and never retried.
pub struct ProbeRunner {
    backends: BackendRegistry,
    credentials: Credentials,
    functions: FunctionRegistry,
    safety: Option<Arc<dyn ContentSafety>>,
}

impl ProbeRunner {
    pub fn new(backends: BackendRegistry, credentials: Credentials) -> Self {
        Self {
            backends,
            credentials,
            functions: travel_registry(),
            safety: None,
        }
    }

    pub fn with_safety(mut self, safety: Arc<dyn ContentSafety>) -> Self {
        self.safety = Some(safety);
        self
    }

    pub async fn run(&self, scenario: &Scenario) -> Result<ProbeOutcome, ProbeError> {
        let started = Instant::now();
        let mut outcome = ProbeOutcome::new(scenario);
        let shield = scenario.shield.unwrap_or_default();
        let safety = self.safety.as_deref();
        if safety.is_none() && (shield.input || shield.output) {
            return Err(ProbeError::configuration(
                "scenario requests shielding but no safety collaborator is set",
            ));
        }

        if let Some(safety) = safety.filter(|_| shield.input) {
            let verdict = check_safety(safety, &scenario.input.user_text()).await?;
            let blocked = verdict.violation;
            outcome.input_verdict = Some(verdict);
            if blocked {
                info!(scenario = %scenario.name, "input shield blocked the prompt");
                outcome.status = ProbeStatus::Blocked;
                outcome.elapsed_ms = started.elapsed().as_millis() as u64;
                return Ok(outcome);
            }
        }

        let payload = RequestBuilder::new(&self.credentials).build(scenario)?;
        let backend = self.backends.get(&scenario.backend)?;
        let validators = if scenario.resolve_functions {
            Some(ArgumentValidators::compile(scenario.function_definitions())?)
        } else {
            None
        };

        info!(
            scenario = %scenario.name,
            backend = %scenario.backend,
            model = %scenario.model,
            api = scenario.api.path(),
            "running probe"
        );

        let mut stream = backend.dispatch(&payload).await?;
        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => outcome.fragments.push(fragment),
                Err(error) if outcome.fragments.is_empty() => return Err(error),
                Err(error) => {
                    warn!(
                        scenario = %scenario.name,
                        received = outcome.fragments.len(),
                        %error,
                        "response stream broke off"
                    );
                    outcome.interrupt(&error);
                    break;
                }
            }
        }

        let (items, summary) = inspect(&outcome.fragments);
        debug!(
            scenario = %scenario.name,
            fragments = summary.fragments,
            items = summary.total_items(),
            "classified response"
        );
        outcome.items = items;
        outcome.summary = summary;

        outcome.deviations = scenario
            .expect
            .iter()
            .filter_map(|expectation| expectation.deviation(&outcome.summary))
            .collect();
        for deviation in &outcome.deviations {
            warn!(scenario = %scenario.name, %deviation, "backend deviated from expectation");
        }

        if let Some(validators) = &validators {
            outcome.invocations = self
                .resolve_functions(scenario, validators, &outcome.items)
                .await;
        }

        if let Some(safety) = safety.filter(|_| shield.output) {
            let text = outcome.message_text();
            if !text.is_empty() {
                match check_safety(safety, &text).await {
                    Ok(verdict) => outcome.output_verdict = Some(verdict),
                    Err(error) => {
                        warn!(scenario = %scenario.name, %error, "output shield failed");
                        outcome.interrupt(&error);
                    }
                }
            }
        }

        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(outcome)
    }

    /// Runs every scenario in order, handing each case to `on_case` as soon as it finishes.
    pub async fn run_each<F>(&self, scenarios: &[Scenario], mut on_case: F) -> ProbeReport
    where
        F: FnMut(&CaseReport),
    {
        let mut report = ProbeReport {
            total: scenarios.len(),
            ..ProbeReport::default()
        };

        for scenario in scenarios {
            let result = self.run(scenario).await;
            match &result {
                Ok(outcome) if outcome.status == ProbeStatus::Partial => report.failed += 1,
                Ok(_) => report.completed += 1,
                Err(error) => {
                    warn!(scenario = %scenario.name, backend = %scenario.backend, %error, "probe failed");
                    report.failed += 1;
                }
            }

            let case = CaseReport {
                name: scenario.name.clone(),
                backend: scenario.backend.clone(),
                result,
            };
            on_case(&case);
            report.cases.push(case);
        }

        report
    }

    pub async fn run_all(&self, scenarios: &[Scenario]) -> ProbeReport {
        self.run_each(scenarios, |_| {}).await
    }

    async fn resolve_functions(
        &self,
        scenario: &Scenario,
        validators: &ArgumentValidators,
        items: &[OutputItem],
    ) -> Vec<ToolInvocation> {
        let mut invocations = Vec::new();

        for item in items {
            let OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } = item
            else {
                continue;
            };

            let mut invocation = ToolInvocation {
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: Value::Null,
                schema_errors: Vec::new(),
                result: None,
                error: None,
            };

            match FunctionCall::from_raw(name.clone(), arguments) {
                Ok(call) => {
                    invocation.schema_errors = validators.validate(&call);
                    invocation.arguments = call.arguments.clone();
                    match self.functions.invoke(&call).await {
                        Ok(result) => invocation.result = Some(result),
                        Err(error) => invocation.error = Some(error.to_string()),
                    }
                }
                Err(error) => invocation.error = Some(error.to_string()),
            }

            debug!(
                scenario = %scenario.name,
                function = %invocation.name,
                valid = invocation.schema_errors.is_empty(),
                "resolved function call"
            );
            invocations.push(invocation);
        }

        invocations
    }
}

async fn check_safety(safety: &dyn ContentSafety, text: &str) -> Result<SafetyVerdict, ProbeError> {
    let verdict = safety.check(text).await?;
    debug!(safety = safety.name(), violation = verdict.violation, "safety check");
    Ok(verdict)
}
