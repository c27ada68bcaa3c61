//! Policy engine error types.
//!
//! This module defines the errors that cross the public boundary of the
//! engine. Expression parse and evaluation failures are deliberately absent:
//! they are absorbed at the evaluation boundary and surface only as a `false`
//! decision.

use std::fmt;

/// Errors that can occur during policy retrieval and enforcement.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The policy store could not be reached or returned malformed data.
    ///
    /// Retrieval failures are fatal for the current operation and are never
    /// retried internally.
    #[error("Policy retrieval failed: {message}")]
    Retrieval {
        /// Description of the storage failure.
        message: String,
    },

    /// The decision for a request or invocation was negative.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of why access was denied.
        message: String,
        /// ID of the policy that produced the denial, if any.
        policy_id: Option<String>,
    },

    /// The engine configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// The authority resolver failed to resolve a subject.
    #[error("Authority resolution failed: {message}")]
    Authority {
        /// Description of the resolution failure.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl PolicyError {
    /// Creates a new `Retrieval` error.
    #[must_use]
    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::Retrieval {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error without a policy reference.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
            policy_id: None,
        }
    }

    /// Creates a new `AccessDenied` error attributed to a policy.
    #[must_use]
    pub fn denied_by_policy(policy_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
            policy_id: Some(policy_id.into()),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Authority` error.
    #[must_use]
    pub fn authority(message: impl Into<String>) -> Self {
        Self::Authority {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error represents a negative access decision.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    /// Returns the error category used for logging and HTTP mapping.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Retrieval { .. } => ErrorCategory::Storage,
            Self::AccessDenied { .. } => ErrorCategory::Authorization,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Authority { .. } | Self::Internal { .. } => ErrorCategory::Server,
        }
    }

    /// Returns the machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Retrieval { .. } => "policy-retrieval-failed",
            Self::AccessDenied { .. } => "access-denied",
            Self::Configuration { .. } => "configuration-error",
            Self::Authority { .. } => "authority-resolution-failed",
            Self::Internal { .. } => "internal-error",
        }
    }
}

/// Broad classification of [`PolicyError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Negative authorization decision.
    Authorization,
    /// Policy store failure.
    Storage,
    /// Invalid configuration.
    Configuration,
    /// Unexpected server-side failure.
    Server,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authorization => write!(f, "authorization"),
            Self::Storage => write!(f, "storage"),
            Self::Configuration => write!(f, "configuration"),
            Self::Server => write!(f, "server"),
        }
    }
}

impl From<crate::config::ConfigError> for PolicyError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}
