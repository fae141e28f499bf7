//! Error types for the KubeVirt machine actuator
//!
//! Errors are structured by kind so callers branch on the variant rather than
//! on message text. Remote "not found" in particular is always a dedicated
//! variant, never a substring of some other error.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for actuator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that was not translated into a more specific kind
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Machine or credential configuration that can never succeed as-is
    #[error("invalid configuration for machine {machine}: {message}")]
    InvalidConfiguration {
        /// Name of the machine with the invalid configuration
        machine: String,
        /// Description of what's invalid
        message: String,
    },

    /// A remote object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kind of the missing object (e.g., "VirtualMachine")
        kind: String,
        /// Object name
        name: String,
        /// Object namespace
        namespace: String,
    },

    /// A remote object already exists and cannot be created again
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Kind of the existing object
        kind: String,
        /// Object name
        name: String,
        /// Object namespace
        namespace: String,
    },

    /// Optimistic-concurrency failure: the version token no longer matches
    #[error("conflict updating {kind} {namespace}/{name}: {message}")]
    Conflict {
        /// Kind of the conflicting object
        kind: String,
        /// Object name
        name: String,
        /// Object namespace
        namespace: String,
        /// Message reported by the API server
        message: String,
    },

    /// Any other failure reported by the remote VM API
    #[error("remote error during {operation}: {message}")]
    Remote {
        /// Remote operation that failed (e.g., "create VirtualMachine")
        operation: String,
        /// Message reported by the remote side
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// An error wrapped with the operation that produced it
    #[error("{context}: {source}")]
    Context {
        /// What the actuator was doing when the error occurred
        context: String,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a configuration error without machine context
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            machine: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a configuration error for a specific machine
    pub fn invalid_configuration_for(machine: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            machine: machine.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a remote failure error
    pub fn remote(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Wrap this error with the operation that produced it
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through any context wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if the remote object was reported as missing
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Configuration and serialization errors need a human to fix the
    /// Machine or its secrets. Everything else may clear up on its own.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Error::InvalidConfiguration { .. } => false,
            Error::Serialization { .. } => false,
            _ => true,
        }
    }
}

/// Translate a kube error for a named object into the matching error kind
///
/// 404 becomes [`Error::NotFound`], 409 becomes [`Error::AlreadyExists`] for
/// creates and [`Error::Conflict`] otherwise. Every other API error keeps the
/// HTTP message and becomes [`Error::Remote`].
pub fn classify_kube_error(
    err: kube::Error,
    operation: &str,
    kind: &str,
    name: &str,
    namespace: &str,
) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind, name, namespace),
        kube::Error::Api(ae) if ae.code == 409 && operation == "create" => Error::AlreadyExists {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            message: ae.message,
        },
        kube::Error::Api(ae) => Error::remote(format!("{} {}", operation, kind), ae.message),
        other => Error::remote(format!("{} {}", operation, kind), other.to_string()),
    }
}
