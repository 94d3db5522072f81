//! Error types for the federation control plane
//!
//! Errors are structured with fields to aid debugging in production.
//! Per-cluster failures always name the member cluster so a failing member
//! can be told apart from a failing control plane.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Armada operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The cluster is not registered, not ready, or has no active watch
    #[error("cluster {cluster:?} not found")]
    ClusterNotFound {
        /// Name of the member cluster
        cluster: String,
    },

    /// Connection configuration for a member cluster could not be resolved
    #[error("failed to resolve config for cluster {cluster}: {message}")]
    ClusterConfig {
        /// Name of the member cluster
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// A client for a member cluster could not be constructed
    #[error("client creation failed for cluster {cluster}: {message}")]
    ClientCreation {
        /// Name of the member cluster
        cluster: String,
        /// Description of what failed
        message: String,
    },

    /// A store key that cannot be mapped to an object identity
    #[error("invalid store key {key:?}: {message}")]
    InvalidKey {
        /// The offending key
        key: String,
        /// Why the key was rejected
        message: String,
    },

    /// A direct read against a member cluster failed
    #[error("failed to get object {object} from cluster {cluster}: {message}")]
    Fetch {
        /// Name of the member cluster
        cluster: String,
        /// Qualified name of the object
        object: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "registry", "watch", "config")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for a member cluster
    pub fn cluster_not_found(cluster: impl Into<String>) -> Self {
        Self::ClusterNotFound {
            cluster: cluster.into(),
        }
    }

    /// Create a config resolution error for a member cluster
    pub fn cluster_config(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ClusterConfig {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a client construction error for a member cluster
    pub fn client_creation(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ClientCreation {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a direct-fetch error
    pub fn fetch(
        cluster: impl Into<String>,
        object: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Fetch {
            cluster: cluster.into(),
            object: object.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    ///
    /// For simple internal errors without specific context.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error means "does not exist" rather than "could not determine"
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ClusterNotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Key and not-found errors need a state change before a retry can succeed.
    /// Kubernetes errors depend on the error type.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::ClusterNotFound { .. } => false,
            Error::ClusterConfig { .. } => true,
            Error::ClientCreation { .. } => true,
            Error::InvalidKey { .. } => false,
            Error::Fetch { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::ClusterNotFound { cluster }
            | Error::ClusterConfig { cluster, .. }
            | Error::ClientCreation { cluster, .. }
            | Error::Fetch { cluster, .. } => Some(cluster),
            Error::Kube { .. } | Error::InvalidKey { .. } | Error::Internal { .. } => None,
        }
    }
}
