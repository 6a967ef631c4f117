//! RedisReplication Custom Resource Definition.
//!
//! A replication set is a group of Redis pods with one writable master and
//! N-1 replicas, kept converged by the operator without a sentinel quorum.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ImageSpec, SecretKeyRef, StorageSpec, TlsSpec, default_port};

/// RedisReplication deploys a master/replica group with operator-driven
/// failover.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redisoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "RedisReplication",
    plural = "redisreplications",
    shortname = "rdr",
    status = "RedisReplicationStatus",
    namespaced,
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Master", "type":"string", "jsonPath":".status.masterNode"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisReplicationSpec {
    /// Total number of pods in the replication set (default 3).
    #[serde(default = "default_size")]
    pub size: i32,

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

impl Default for RedisReplicationSpec {
    fn default() -> Self {
        Self {
            size: default_size(),
            port: default_port(),
            image: ImageSpec::default(),
            auth: None,
            tls: None,
            storage: StorageSpec::default(),
            labels: BTreeMap::new(),
        }
    }
}

fn default_size() -> i32 {
    3
}

/// Status of a RedisReplication.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisReplicationStatus {
    /// Pod name of the current master, once resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_node: Option<String>,
}
