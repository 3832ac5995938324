//! Error types for the Azure management provider.

use crate::config::ConfigError;
use crate::provider::SpecError;
use thiserror::Error;

/// Errors raised by the Azure provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AzureProviderError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a spec fails local validation before any remote call.
    #[error("invalid resource spec: {0}")]
    Spec(String),
    /// Raised when token acquisition fails.
    #[error("authentication failed against {authority}: {message}")]
    Auth {
        /// Token authority the request was sent to.
        authority: String,
        /// Message returned by the authority or transport.
        message: String,
    },
    /// Raised when the management API rejects a request.
    #[error("management API returned {status} for {operation}: {message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// Operation being attempted.
        operation: String,
        /// Response body, when one was returned.
        message: String,
    },
    /// Raised when a resource creation request is rejected.
    #[error("failed to create {kind} '{name}': {message}")]
    CreateFailed {
        /// Resource kind being created.
        kind: String,
        /// Requested resource name.
        name: String,
        /// Error detail from the provider.
        message: String,
    },
    /// Raised on transport level failures.
    #[error("transport error: {message}")]
    Transport {
        /// Message from the HTTP client.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode response for {operation}: {message}")]
    Decode {
        /// Operation whose response could not be decoded.
        operation: String,
        /// Decoder error message.
        message: String,
    },
}

impl AzureProviderError {
    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

impl From<ConfigError> for AzureProviderError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<SpecError> for AzureProviderError {
    fn from(value: SpecError) -> Self {
        Self::Spec(value.to_string())
    }
}
