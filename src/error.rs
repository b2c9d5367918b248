//! Error types for the Selectel provider.

use std::time::Duration;

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors that can occur while serving a provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP request could not be sent or its body could not be read.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status code.
    #[error("got the {status} status code from the server: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body as returned by the API.
        message: String,
    },

    /// A state wait exhausted its deadline.
    #[error(
        "timeout while waiting for state to become '{target}' (last state: '{last_state}', timeout: {timeout:?})"
    )]
    WaitTimeout {
        /// Comma-separated target statuses.
        target: String,
        /// The last status observed before the deadline.
        last_state: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A state wait observed a status that is neither pending nor target.
    #[error("unexpected state '{state}', wanted target '{target}'")]
    UnexpectedState {
        /// The status returned by the API.
        state: String,
        /// Comma-separated target statuses.
        target: String,
    },

    /// The operation was cancelled by the host.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Invalid request from the host.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// An error with the operation that produced it.
    #[error("{context}: {source}")]
    Context {
        /// What was being done.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::Cancelled(msg)
            | Self::FailedPrecondition(msg)
            | Self::InvalidRequest(msg)
            | Self::Unimplemented(msg) => msg.clone(),
            Self::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns true when the error means the remote object does not exist.
    ///
    /// Looks through [`ProviderError::Context`] wrappers.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api { status, .. } => *status == 404,
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Returns true when the host stopped the operation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Wrap the error with a description of the failed operation.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Adds [`ProviderError::context`] to results.
pub trait ResultExt<T> {
    /// Wrap the error, if any, with a lazily built context message.
    fn with_context<F, S>(self, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<ProviderError>,
{
    fn with_context<F, S>(self, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

impl From<ProviderError> for Diagnostic {
    fn from(err: ProviderError) -> Self {
        let summary = match &err {
            ProviderError::Validation(_) | ProviderError::InvalidRequest(_) => {
                "Invalid configuration"
            },
            ProviderError::Configuration(_) => "Provider configuration error",
            ProviderError::FailedPrecondition(_) => "Precondition failed",
            ProviderError::WaitTimeout { .. } | ProviderError::UnexpectedState { .. } => {
                "Error waiting for resource state"
            },
            ProviderError::Cancelled(_) => "Operation cancelled",
            _ => "Provider error",
        };
        Diagnostic::error(summary).with_detail(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DiagnosticSeverity;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("plan-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: plan-123");

        let err = ProviderError::UnknownResource("selectel_vpc_project_v2".to_string());
        assert_eq!(
            format!("{}", err),
            "Unknown resource type: selectel_vpc_project_v2"
        );
    }

    #[test]
    fn test_api_error_display() {
        let err = ProviderError::Api {
            status: 404,
            message: "Not Found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "got the 404 status code from the server: Not Found"
        );
        assert!(err.is_not_found());

        let err = ProviderError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_wait_errors_display() {
        let err = ProviderError::WaitTimeout {
            target: "started".to_string(),
            last_state: "suspended".to_string(),
            timeout: Duration::from_secs(30),
        };
        let display = err.to_string();
        assert!(display.contains("'started'"));
        assert!(display.contains("last state: 'suspended'"));

        let err = ProviderError::UnexpectedState {
            state: "error".to_string(),
            target: "ACTIVE".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected state 'error', wanted target 'ACTIVE'"
        );
    }

    #[test]
    fn test_context_wraps_and_keeps_not_found() {
        let err = ProviderError::Api {
            status: 404,
            message: "Not Found".to_string(),
        }
        .context("failed to read server abc");

        assert_eq!(
            err.to_string(),
            "failed to read server abc: got the 404 status code from the server: Not Found"
        );
        assert!(err.is_not_found());
        assert!(!err.is_cancelled());

        let err = ProviderError::Cancelled("provider is stopped".to_string())
            .context("error waiting for the plan plan-1");
        assert!(err.is_cancelled());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_result_with_context() {
        let result: Result<(), ProviderError> =
            Err(ProviderError::Validation("bad".to_string()));
        let err = result.with_context(|| "loading OS").unwrap_err();
        assert_eq!(err.to_string(), "loading OS: Validation error: bad");
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::Configuration("auth_token is not set".to_string());
        assert_eq!(err.message(), "auth_token is not set");

        let err = ProviderError::Api {
            status: 400,
            message: "bad body".to_string(),
        };
        assert_eq!(err.message(), "bad body");
    }

    #[test]
    fn test_error_to_diagnostic() {
        let diag: Diagnostic = ProviderError::FailedPrecondition("no balance".to_string()).into();
        assert_eq!(diag.severity, DiagnosticSeverity::Error);
        assert_eq!(diag.summary, "Precondition failed");
        assert_eq!(
            diag.detail,
            Some("Failed precondition: no balance".to_string())
        );
    }
}
