//! Error types for the controllers.
//!
//! Platform (Kubernetes API) errors abort the pass and requeue with error.
//! Member-level protocol and exec errors are soft failures: reconcilers log
//! them, skip the step and let the next scheduled pass retry, since every
//! topology operation is safe to re-evaluate.

use std::time::Duration;
use thiserror::Error;

use crate::cluster::TopologyError;
use crate::replication::FailoverError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Cluster topology operation error
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Replication failover error
    #[error("failover error: {0}")]
    Failover(#[from] FailoverError),

    /// Referenced Secret missing or lacking the expected key
    #[error("secret {name}: {reason}")]
    Secret { name: String, reason: String },

    /// Validation error in resource spec
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            // Member-level failures clear up as pods come and go.
            Error::Topology(_) | Error::Failover(_) | Error::Secret { .. } => true,
            Error::Validation(_) | Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
