//! Process-wide configuration, assembled once at startup and passed explicitly to the
//! transport and safety layers.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::scenario::Scenario;
use crate::ProbeError;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const LOCAL_PLACEHOLDER_KEY: &str = "random";

/// Default backend table: (name, default base URL, base URL override variable, credential).
const BACKENDS: &[(&str, &str, &str, Option<&str>)] = &[
    ("openai", "https://api.openai.com/v1", "OPENAI_BASE_URL", Some(OPENAI_API_KEY)),
    ("ollama", "http://localhost:11434/v1", "OLLAMA_BASE_URL", None),
    ("vllm", "http://localhost:8000/v1", "VLLM_BASE_URL", None),
    ("llama-stack", "http://localhost:8321/v1", "LLAMA_STACK_BASE_URL", None),
    (
        "llama-stack-openai",
        "http://localhost:8321/v1/openai/v1",
        "LLAMA_STACK_OPENAI_BASE_URL",
        None,
    ),
];

/// A credential value that never shows up in debug output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<Secret>,
    /// Variable the key was read from; `None` for local servers that ignore the key.
    pub credential_env: Option<String>,
    pub request_timeout: Duration,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: Some(Secret::new(LOCAL_PLACEHOLDER_KEY)),
            credential_env: None,
            request_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(Secret::new(api_key));
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn api_key(&self) -> Result<&Secret, ProbeError> {
        self.api_key.as_ref().ok_or_else(|| {
            ProbeError::MissingCredential(
                self.credential_env
                    .clone()
                    .unwrap_or_else(|| format!("{} api key", self.name)),
            )
        })
    }
}

/// Named secrets used while building requests (tool-server tokens).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    values: BTreeMap<String, Secret>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), Secret::new(value));
    }

    pub fn get(&self, name: &str) -> Result<&Secret, ProbeError> {
        self.values
            .get(name)
            .ok_or_else(|| ProbeError::MissingCredential(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SafetyMode {
    #[default]
    Mock,
    Moderations,
    Shield,
}

impl SafetyMode {
    pub fn parse(value: &str) -> Result<Self, ProbeError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(SafetyMode::Mock),
            "moderations" => Ok(SafetyMode::Moderations),
            "shield" => Ok(SafetyMode::Shield),
            other => Err(ProbeError::configuration(format!(
                "unknown safety mode '{other}' (expected mock, moderations or shield)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub mode: SafetyMode,
    /// Backend hosting the moderations route.
    pub backend: String,
    /// Moderation model, or the shield id in shield mode.
    pub model: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            mode: SafetyMode::Mock,
            backend: "llama-stack-openai".to_string(),
            model: "llama-guard3:1b".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub backends: BTreeMap<String, BackendConfig>,
    pub credentials: Credentials,
    pub safety: SafetyConfig,
}

impl ProbeConfig {
    pub fn from_env() -> Result<Self, ProbeError> {
        Self::from_lookup(env_value)
    }

    /// Builds the configuration from a variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProbeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let request_timeout = match lookup("PROBE_REQUEST_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(raw.parse::<u64>().map_err(|_| {
                ProbeError::configuration(format!("PROBE_REQUEST_TIMEOUT_MS is not a number: {raw}"))
            })?),
            None => DEFAULT_TIMEOUT,
        };

        let mut backends = BTreeMap::new();
        for &(name, default_url, url_var, credential) in BACKENDS {
            let base_url = lookup(url_var).unwrap_or_else(|| default_url.to_string());
            let mut backend = BackendConfig::new(name, base_url).with_timeout(request_timeout);
            if let Some(var) = credential {
                backend.api_key = lookup(var).map(Secret::new);
                backend.credential_env = Some(var.to_string());
            }
            backends.insert(name.to_string(), backend);
        }

        let mut credentials = Credentials::new();
        if let Some(token) = lookup(GITHUB_TOKEN) {
            credentials.insert(GITHUB_TOKEN, token);
        }

        let mut safety = SafetyConfig::default();
        if let Some(mode) = lookup("SAFETY_MODE") {
            safety.mode = SafetyMode::parse(&mode)?;
        }
        if let Some(backend) = lookup("SAFETY_BACKEND") {
            safety.backend = backend;
        }
        if let Some(model) = lookup("SAFETY_MODEL") {
            safety.model = model;
        }

        Ok(Self {
            backends,
            credentials,
            safety,
        })
    }

    /// Captures any extra tool-server tokens the scenarios reference.
    pub fn with_credentials_for(self, scenarios: &[Scenario]) -> Self {
        self.with_credentials_from(scenarios, env_value)
    }

    pub fn with_credentials_from<F>(mut self, scenarios: &[Scenario], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in scenarios.iter().flat_map(Scenario::required_credentials) {
            if self.credentials.contains(name) {
                continue;
            }
            if let Some(value) = lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                self.credentials.insert(name, value);
            }
        }
        self
    }

    pub fn backend(&self, name: &str) -> Result<&BackendConfig, ProbeError> {
        self.backends
            .get(name)
            .ok_or_else(|| ProbeError::configuration(format!("unknown backend '{name}'")))
    }

    /// Checks every backend and credential the scenarios need before anything is sent.
    pub fn preflight(&self, scenarios: &[Scenario]) -> Result<(), ProbeError> {
        for scenario in scenarios {
            self.backend(&scenario.backend)?.api_key()?;
            for name in scenario.required_credentials() {
                self.credentials.get(name)?;
            }
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::scenario::{ExternalToolServer, ToolDeclaration};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn default_backends_cover_hosted_and_local_servers() {
        let config = ProbeConfig::from_lookup(lookup(&[(OPENAI_API_KEY, "sk-test")])).unwrap();

        assert_eq!(config.backend("openai").unwrap().base_url, "https://api.openai.com/v1");
        assert_eq!(config.backend("ollama").unwrap().base_url, "http://localhost:11434/v1");
        assert_eq!(config.backend("openai").unwrap().api_key().unwrap().expose(), "sk-test");
        assert_eq!(config.backend("vllm").unwrap().api_key().unwrap().expose(), "random");
        assert!(config.backend("bedrock").is_err());
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let config = ProbeConfig::from_lookup(lookup(&[(OPENAI_API_KEY, "   ")])).unwrap();
        let scenarios = vec![Scenario::new("s", "openai", "gpt-4o", "hi")];

        let error = config.preflight(&scenarios).unwrap_err();
        assert!(matches!(error, ProbeError::MissingCredential(ref name) if name == OPENAI_API_KEY));
        assert!(error.is_fatal());
    }

    #[test]
    fn preflight_requires_tool_server_tokens() {
        let config = ProbeConfig::from_lookup(lookup(&[])).unwrap();
        let scenario = Scenario::new("mcp", "ollama", "gpt-oss:latest", "list branches").with_tool(
            ToolDeclaration::External(
                ExternalToolServer::new("github", "https://example.test/mcp")
                    .with_token_env(GITHUB_TOKEN),
            ),
        );
        let scenarios = vec![scenario];

        assert!(matches!(
            config.preflight(&scenarios),
            Err(ProbeError::MissingCredential(ref name)) if name == GITHUB_TOKEN
        ));

        let config = config.with_credentials_from(&scenarios, lookup(&[(GITHUB_TOKEN, "ghp")]));
        assert!(config.preflight(&scenarios).is_ok());
    }

    #[test]
    fn overrides_are_read_from_the_environment() {
        let config = ProbeConfig::from_lookup(lookup(&[
            ("OLLAMA_BASE_URL", "http://gpu-box:11434/v1"),
            ("PROBE_REQUEST_TIMEOUT_MS", "1500"),
            ("SAFETY_MODE", "Shield"),
        ]))
        .unwrap();

        let ollama = config.backend("ollama").unwrap();
        assert_eq!(ollama.base_url, "http://gpu-box:11434/v1");
        assert_eq!(ollama.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.safety.mode, SafetyMode::Shield);

        assert!(ProbeConfig::from_lookup(lookup(&[("SAFETY_MODE", "strict")])).is_err());
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let credentials = Credentials::new().with(GITHUB_TOKEN, "ghp_secret");
        assert!(!format!("{credentials:?}").contains("ghp_secret"));
    }
}
