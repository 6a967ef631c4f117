//! RedisSentinel Custom Resource Definition.
//!
//! A sentinel group monitors a companion RedisReplication resource in the
//! same namespace and arbitrates failover for it.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{DEFAULT_SENTINEL_PORT, ImageSpec, SecretKeyRef};

/// RedisSentinel deploys a sentinel quorum monitoring a RedisReplication.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redisoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "RedisSentinel",
    plural = "redissentinels",
    shortname = "rds",
    namespaced,
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Monitors", "type":"string", "jsonPath":".spec.replicationRef"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelSpec {
    /// Number of sentinel pods. Must be odd for a usable quorum (default 3).
    #[serde(default = "default_size")]
    pub size: i32,

    /// Name of the RedisReplication resource this sentinel group monitors.
    pub replication_ref: String,

    /// Sentinel master group name (default: myMaster).
    #[serde(default = "default_master_group_name")]
    pub master_group_name: String,

    /// Number of sentinels that must agree a master is down (default 2).
    #[serde(default = "default_quorum")]
    pub quorum: i32,

    /// Sentinel client port (default 26379).
    #[serde(default = "default_sentinel_port")]
    pub port: i32,

    /// Redis container image configuration.
    #[serde(default)]
    pub image: ImageSpec,

    /// Reference to a Secret containing the AUTH password of the monitored
    /// replication set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<SecretKeyRef>,

    /// Additional labels applied to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_size() -> i32 {
    3
}

fn default_master_group_name() -> String {
    "myMaster".to_string()
}

fn default_quorum() -> i32 {
    2
}

fn default_sentinel_port() -> i32 {
    DEFAULT_SENTINEL_PORT
}

impl RedisSentinelSpec {
    /// A sentinel quorum is only usable with an odd member count.
    pub fn has_odd_quorum(&self) -> bool {
        self.size % 2 == 1
    }
}
