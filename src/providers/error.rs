use thiserror::Error;

/// Errors raised while talking to a generation or mastering provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing API key: {env_var} is not set for provider {provider}")]
    MissingApiKey {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Provider returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Returns true for failures worth retrying later (network trouble,
    /// throttling, provider side 5xx). Configuration and request problems are
    /// permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Connection(_) | ProviderError::Timeout => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::MissingApiKey { .. }
            | ProviderError::InvalidResponse(_)
            | ProviderError::InvalidRequest(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else {
            ProviderError::Connection(e.to_string())
        }
    }
}

/// Why a cancellation did not happen.
#[derive(Debug, Error)]
pub enum CancellationError {
    #[error("{0} does not support job cancellation")]
    Unsupported(&'static str),

    #[error("Cancellation rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
