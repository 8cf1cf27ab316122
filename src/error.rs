//! Error types for the injector
//!
//! Every failure is scoped to a single admission request. Variants carry the
//! operation that failed so logs point at the exact cluster call.

use std::time::Duration;

use thiserror::Error;

/// Main error type for injection operations
#[derive(Debug, Error)]
pub enum Error {
    /// A cluster metadata lookup failed
    #[error("cluster unreachable during {operation}: {message}")]
    ClusterUnreachable {
        /// Lookup that failed (e.g. "namespace_labels")
        operation: String,
        /// Description of the underlying failure
        message: String,
    },

    /// A cluster metadata lookup did not finish within the request deadline
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Lookup that timed out
        operation: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// Invalid or unreadable configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is invalid
        message: String,
    },
}

impl Error {
    /// Create a cluster-unreachable error for the given lookup
    pub fn cluster_unreachable(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ClusterUnreachable {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error for the given lookup
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether the error came from talking to the cluster
    ///
    /// These are the failures governed by the fail-open policy.
    pub fn is_cluster_failure(&self) -> bool {
        matches!(self, Self::ClusterUnreachable { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: lookup failures name the call that failed
    #[test]
    fn story_cluster_errors_carry_operation() {
        let err = Error::cluster_unreachable("namespace_labels", "connection refused");
        assert!(err.to_string().contains("namespace_labels"));
        assert!(err.to_string().contains("connection refused"));

        let err = Error::timeout("list_services", Duration::from_secs(5));
        assert!(err.to_string().contains("list_services"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn cluster_failures_are_distinguished_from_local_errors() {
        assert!(Error::cluster_unreachable("op", "down").is_cluster_failure());
        assert!(Error::timeout("op", Duration::from_millis(1)).is_cluster_failure());
        assert!(!Error::config("bad port").is_cluster_failure());
    }

    #[test]
    fn constructors_accept_str_and_string() {
        let port = 0;
        let err = Error::config(format!("secure port {} is invalid", port));
        match err {
            Error::Config { message } => assert_eq!(message, "secure port 0 is invalid"),
            _ => panic!("Expected Config variant"),
        }
    }
}
