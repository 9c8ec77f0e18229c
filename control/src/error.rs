use crate::cloud::ApplyError;
use crate::compiler::resolver::{ResolutionCause, ResolutionError};
use crate::compiler::CompileError;
use std::fmt;
use thiserror::Error;

/// Step of an apply or teardown cycle, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStep {
    Location,
    Subnet,
    PublicAddress,
    Gateway,
    ReadAddress,
    DeleteGateway,
    DeletePublicAddress,
}

impl fmt::Display for ApplyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            ApplyStep::Location => "resolve location",
            ApplyStep::Subnet => "put subnet",
            ApplyStep::PublicAddress => "put public address",
            ApplyStep::Gateway => "put gateway",
            ApplyStep::ReadAddress => "read allocated address",
            ApplyStep::DeleteGateway => "delete gateway",
            ApplyStep::DeletePublicAddress => "delete public address",
        };
        f.write_str(step)
    }
}

/// Controller errors
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("{feature} is not supported")]
    Unsupported { feature: String },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("{step} failed: {source}")]
    Apply {
        step: ApplyStep,
        #[source]
        source: ApplyError,
    },

    #[error("attaching {attachment} to backend pool failed ({succeeded}/{total} attachments updated): {source}")]
    PartialAttachment {
        attachment: String,
        succeeded: usize,
        total: usize,
        #[source]
        source: ApplyError,
    },

    #[error("gateway {gateway} is already served for {owner}")]
    NameConflict { gateway: String, owner: String },

    #[error("compute inventory error: {0}")]
    Inventory(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),
}

impl ControllerError {
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    pub fn apply(step: ApplyStep, source: ApplyError) -> Self {
        Self::Apply { step, source }
    }

    /// Event reason code surfaced on the intent
    pub fn reason(&self) -> &'static str {
        match self {
            ControllerError::Unsupported { .. } => "UnsupportedFeature",
            ControllerError::Resolution(_) => "BackendResolutionFailed",
            ControllerError::Apply { .. } => "ApplyFailed",
            ControllerError::PartialAttachment { .. } => "BackendPoolAttachmentFailed",
            ControllerError::NameConflict { .. } => "GatewayNameConflict",
            ControllerError::Inventory(_) => "InventoryFailed",
            ControllerError::Kubernetes(_) => "KubernetesError",
        }
    }

    /// Whether retrying the same cycle can succeed without an intent change
    ///
    /// A missing service or port needs a change to resolve; a registry that
    /// could not be reached may answer on the next attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::Resolution(err) => matches!(err.cause, ResolutionCause::Registry(_)),
            ControllerError::Unsupported { .. } | ControllerError::NameConflict { .. } => false,
            ControllerError::Apply { .. }
            | ControllerError::PartialAttachment { .. }
            | ControllerError::Inventory(_)
            | ControllerError::Kubernetes(_) => true,
        }
    }
}

impl From<CompileError> for ControllerError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::Unsupported { feature } => ControllerError::Unsupported { feature },
            CompileError::Resolution(err) => ControllerError::Resolution(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_errors_are_not_retried() {
        let unsupported = ControllerError::unsupported("tls");
        assert!(!unsupported.is_retryable());
        assert_eq!(unsupported.reason(), "UnsupportedFeature");
        assert_eq!(unsupported.to_string(), "tls is not supported");

        let resolution = ControllerError::from(ResolutionError::new(
            "web",
            ResolutionCause::ServiceNotFound,
        ));
        assert!(!resolution.is_retryable());

        let no_port = ControllerError::from(ResolutionError::new(
            "web",
            ResolutionCause::NoExternalPort(80),
        ));
        assert!(!no_port.is_retryable());
    }

    #[test]
    fn test_registry_outage_is_retried() {
        let err = ControllerError::from(ResolutionError::new(
            "web",
            ResolutionCause::Registry("connection refused".to_string()),
        ));
        assert!(err.is_retryable());
        assert_eq!(err.reason(), "BackendResolutionFailed");
    }

    #[test]
    fn test_apply_errors_are_retried() {
        let err = ControllerError::apply(
            ApplyStep::Gateway,
            ApplyError::Transport("connection reset".to_string()),
        );
        assert!(err.is_retryable());
        assert_eq!(err.reason(), "ApplyFailed");
        assert!(err.to_string().starts_with("put gateway failed"));
    }
}
