//! Redis (standalone) Custom Resource Definition.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ImageSpec, SecretKeyRef, StorageSpec, TlsSpec, default_port};

/// Redis deploys a single standalone Redis instance.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redisoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "Redis",
    plural = "redis",
    status = "RedisStatus",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    /// Redis client port (default 6379).
    #[serde(default = "default_port")]
    pub port: i32,

    /// Redis container image configuration.
    #[serde(default)]
    pub image: ImageSpec,

    /// Reference to a Secret containing the AUTH password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<SecretKeyRef>,

    /// TLS configuration for member connections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,

    /// Persistence configuration.
    #[serde(default)]
    pub storage: StorageSpec,

    /// Additional labels applied to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for RedisSpec {
    fn default() -> Self {
        Self {
            port: default_port(),
            image: ImageSpec::default(),
            auth: None,
            tls: None,
            storage: StorageSpec::default(),
            labels: BTreeMap::new(),
        }
    }
}

/// Status of a standalone Redis.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatus {
    /// Current lifecycle state.
    #[serde(default)]
    pub state: StandaloneState,
}

/// Lifecycle state of a standalone Redis.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum StandaloneState {
    /// Pod is being created or is not yet ready.
    #[default]
    Initializing,
    /// Pod is ready and serving.
    Ready,
}

impl std::fmt::Display for StandaloneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StandaloneState::Initializing => write!(f, "Initializing"),
            StandaloneState::Ready => write!(f, "Ready"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec = RedisSpec::default();
        assert_eq!(spec.port, 6379);
        assert!(spec.storage.enabled);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(StandaloneState::Initializing.to_string(), "Initializing");
        assert_eq!(StandaloneState::Ready.to_string(), "Ready");
    }
}
