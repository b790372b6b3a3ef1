use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing credential: set the {0} environment variable")]
    MissingCredential(String),

    #[error("backend unavailable ({backend}): {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("authentication rejected by {backend}: {message}")]
    Authentication { backend: String, message: String },

    #[error("invalid request rejected by {backend} (status {status}): {message}")]
    InvalidRequest {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("catalog parse error: {0}")]
    Catalog(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("invalid function arguments: {0}")]
    InvalidFunctionArguments(String),
}

impl ProbeError {
    /// Configuration problems abort the whole run before any request is sent.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProbeError::Configuration(_)
                | ProbeError::MissingCredential(_)
                | ProbeError::Catalog(_)
                | ProbeError::Io(_)
        )
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ProbeError::Configuration(message.into())
    }

    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        ProbeError::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }
}
