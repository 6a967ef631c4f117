//! RedisCluster Custom Resource Definition.
//!
//! Defines the RedisCluster CRD for deploying and managing sharded Redis
//! clusters on Kubernetes. Leaders own disjoint ranges of the 16384 hash
//! slots; followers replicate their paired leader.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ImageSpec, SecretKeyRef, StorageSpec, TlsSpec, default_port};

/// RedisCluster is a custom resource for deploying sharded Redis clusters.
///
/// Example:
/// ```yaml
/// apiVersion: redisoperator.smoketurner.com/v1alpha1
/// kind: RedisCluster
/// metadata:
///   name: my-cluster
/// spec:
///   leaderReplicas: 3
///   followerReplicas: 3
///   auth:
///     name: redis-auth
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redisoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "RedisCluster",
    plural = "redisclusters",
    shortname = "rdc",
    status = "RedisClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Leaders", "type":"integer", "jsonPath":".spec.leaderReplicas"}"#,
    printcolumn = r#"{"name":"Followers", "type":"integer", "jsonPath":".spec.followerReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterSpec {
    /// Number of leader (slot-owning) nodes (default 3).
    #[serde(default = "default_leader_replicas")]
    pub leader_replicas: i32,

    /// Number of follower nodes. Follower i replicates leader i mod leaders
    /// (default 3).
    #[serde(default = "default_follower_replicas")]
    pub follower_replicas: i32,

    /// Redis client port (default 6379). The cluster bus port is this + 10000.
    #[serde(default = "default_port")]
    pub port: i32,

    /// Cluster protocol generation. V7 announces pod hostnames to peers,
    /// V6 announces pod IPs (default: v7).
    #[serde(default)]
    pub cluster_version: ClusterVersion,

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

    /// CONFIG SET parameters applied to every member once the cluster is
    /// healthy.
    #[serde(default)]
    pub additional_config: BTreeMap<String, String>,

    /// Additional labels applied to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for RedisClusterSpec {
    fn default() -> Self {
        Self {
            leader_replicas: default_leader_replicas(),
            follower_replicas: default_follower_replicas(),
            port: default_port(),
            cluster_version: ClusterVersion::default(),
            image: ImageSpec::default(),
            auth: None,
            tls: None,
            storage: StorageSpec::default(),
            additional_config: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }
}

fn default_leader_replicas() -> i32 {
    3
}

fn default_follower_replicas() -> i32 {
    3
}

/// Cluster protocol generation. Determines how members announce themselves
/// to the rest of the cluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum ClusterVersion {
    /// Members announce pod IPs.
    #[serde(rename = "v6")]
    V6,
    /// Members announce pod DNS hostnames.
    #[default]
    #[serde(rename = "v7")]
    V7,
}

/// Status of a RedisCluster.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterStatus {
    /// Current lifecycle state.
    #[serde(default)]
    pub state: ClusterState,

    /// Human-readable reason tied to the current state.
    #[serde(default)]
    pub reason: String,

    /// Number of ready leader pods.
    #[serde(default)]
    pub ready_leader_replicas: i32,

    /// Number of ready follower pods.
    #[serde(default)]
    pub ready_follower_replicas: i32,
}

/// Lifecycle state of a RedisCluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterState {
    /// Leader pods are being created and are not yet all ready.
    #[default]
    InitializingLeader,
    /// Leaders are ready, follower pods are being created.
    InitializingFollower,
    /// All pods ready, cluster creation / joining in progress.
    Bootstrapping,
    /// Cluster healthy, node count matches the spec.
    Ready,
    /// Reconciliation cannot proceed without intervention.
    Failed,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::InitializingLeader => write!(f, "InitializingLeader"),
            ClusterState::InitializingFollower => write!(f, "InitializingFollower"),
            ClusterState::Bootstrapping => write!(f, "Bootstrapping"),
            ClusterState::Ready => write!(f, "Ready"),
            ClusterState::Failed => write!(f, "Failed"),
        }
    }
}

impl RedisCluster {
    /// Desired replica count for a role.
    pub fn replica_count(&self, role: ClusterRole) -> i32 {
        match role {
            ClusterRole::Leader => self.spec.leader_replicas,
            ClusterRole::Follower => self.spec.follower_replicas,
        }
    }

    /// Desired total node count (leaders + followers).
    pub fn total_nodes(&self) -> i32 {
        self.spec.leader_replicas + self.spec.follower_replicas
    }
}

/// Role of a cluster member pod within its StatefulSet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ClusterRole {
    Leader,
    Follower,
}

impl ClusterRole {
    /// Both roles, in workload creation order.
    pub const ALL: [ClusterRole; 2] = [ClusterRole::Leader, ClusterRole::Follower];
}

impl std::fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterRole::Leader => write!(f, "leader"),
            ClusterRole::Follower => write!(f, "follower"),
        }
    }
}
