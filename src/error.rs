//! Error types for the TFE provider.

use thiserror::Error;

use crate::client::ClientError;

/// Errors that can occur while reconciling a resource.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The target object was not found where it had to exist (e.g. during update).
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The desired state violates the resource schema.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An object referenced by the desired state does not exist.
    #[error("{kind} {name} not found")]
    DependencyNotFound {
        /// Kind of the referenced object (e.g. `team`, `workspace`).
        kind: &'static str,
        /// Name or identifier used for the lookup.
        name: String,
    },

    /// The remote API rejected a call.
    #[error("Error {action} {kind} {id}: {source}")]
    Remote {
        /// What the provider was doing (e.g. `creating`, `reading`).
        action: &'static str,
        /// Human-readable resource kind (e.g. `sentinel policy`).
        kind: &'static str,
        /// Remote identifier, or the name when no identifier exists yet.
        id: String,
        /// Underlying client error.
        #[source]
        source: ClientError,
    },

    /// A provider configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error on the protocol streams.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from the orchestrator.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Wrap a client error with the action, resource kind and identity it concerns.
    pub fn remote(
        action: &'static str,
        kind: &'static str,
        id: impl Into<String>,
        source: ClientError,
    ) -> Self {
        Self::Remote {
            action,
            kind,
            id: id.into(),
            source,
        }
    }

    /// Like [`ProviderError::remote`], except that absence of the target object
    /// becomes [`ProviderError::NotFound`].
    pub fn remote_or_not_found(
        action: &'static str,
        kind: &'static str,
        id: impl Into<String>,
        source: ClientError,
    ) -> Self {
        match source {
            ClientError::NotFound => Self::NotFound(format!("{} {}", kind, id.into())),
            source => Self::remote(action, kind, id, source),
        }
    }

    /// Stable machine-readable code for this error, reported over the protocol.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::DependencyNotFound { .. } => "dependency_not_found",
            Self::Remote { .. } => "remote",
            Self::Configuration(_) => "configuration",
            Self::UnknownResource(_) => "unknown_resource",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::FailedPrecondition(_) => "failed_precondition",
            Self::Unimplemented(_) => "unimplemented",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("pol-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: pol-123");

        let err = ProviderError::Validation("invalid input".to_string());
        assert_eq!(format!("{}", err), "Validation error: invalid input");

        let err = ProviderError::UnknownResource("tfe_workspace".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: tfe_workspace");
    }

    #[test]
    fn test_dependency_not_found_display() {
        let err = ProviderError::DependencyNotFound {
            kind: "workspace",
            name: "my-org/missing".to_string(),
        };
        assert_eq!(format!("{}", err), "workspace my-org/missing not found");
        assert_eq!(err.code(), "dependency_not_found");
    }

    #[test]
    fn test_remote_error_wraps_source() {
        let err = ProviderError::remote(
            "creating",
            "sentinel policy",
            "policy-test",
            ClientError::Api {
                status: 422,
                message: "name has already been taken".to_string(),
            },
        );
        let display = format!("{}", err);
        assert!(display.starts_with("Error creating sentinel policy policy-test:"));
        assert!(display.contains("name has already been taken"));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.code(), "remote");
    }

    #[test]
    fn test_remote_or_not_found() {
        let err = ProviderError::remote_or_not_found(
            "updating",
            "variable",
            "var-1",
            ClientError::NotFound,
        );
        assert_eq!(format!("{}", err), "Resource not found: variable var-1");

        let err = ProviderError::remote_or_not_found(
            "updating",
            "variable",
            "var-1",
            ClientError::Unauthorized,
        );
        assert_eq!(err.code(), "remote");
    }

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            ProviderError::NotFound(String::new()),
            ProviderError::Validation(String::new()),
            ProviderError::Configuration(String::new()),
            ProviderError::UnknownResource(String::new()),
            ProviderError::DeadlineExceeded(String::new()),
            ProviderError::FailedPrecondition(String::new()),
            ProviderError::Unimplemented(String::new()),
            ProviderError::InvalidRequest(String::new()),
        ];
        let mut codes: Vec<_> = errors.iter().map(ProviderError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
