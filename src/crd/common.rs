//! Spec fragments shared by all Redis custom resources.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Container image specification.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Container image repository (default: redis).
    #[serde(default = "default_image_repository")]
    pub repository: String,

    /// Image tag (default: 7.4-alpine).
    #[serde(default = "default_image_tag")]
    pub tag: String,

    /// Image pull policy (default: IfNotPresent).
    #[serde(default = "default_image_pull_policy")]
    pub pull_policy: String,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            repository: default_image_repository(),
            tag: default_image_tag(),
            pull_policy: default_image_pull_policy(),
        }
    }
}

fn default_image_repository() -> String {
    "redis".to_string()
}

fn default_image_tag() -> String {
    "7.4-alpine".to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

/// Reference to a key within a Secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Name of the Secret.
    pub name: String,

    /// Key within the Secret containing the password (default: password).
    #[serde(default = "default_password_key")]
    pub key: String,
}

fn default_password_key() -> String {
    "password".to_string()
}

/// TLS configuration. The referenced secret carries `ca.crt`, `tls.crt`
/// and `tls.key` entries mounted into every member pod.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// Name of the Secret carrying the certificates.
    pub secret_name: String,
}

/// Persistent storage configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Enable persistent volumes (default: true).
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,

    /// Keep PersistentVolumeClaims when the resource is deleted (default: false).
    #[serde(default)]
    pub keep_after_delete: bool,

    /// Mount a dedicated volume for the cluster node configuration file.
    /// Only meaningful for cluster members (default: false).
    #[serde(default)]
    pub node_conf_volume: bool,

    /// Size of the PersistentVolumeClaim (default: 1Gi).
    #[serde(default = "default_storage_size")]
    pub size: String,

    /// Storage class name. If not set, uses the cluster default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            keep_after_delete: false,
            node_conf_volume: false,
            size: default_storage_size(),
            storage_class_name: None,
        }
    }
}

fn default_storage_enabled() -> bool {
    true
}

fn default_storage_size() -> String {
    "1Gi".to_string()
}

/// Default client port for Redis.
pub const DEFAULT_CLIENT_PORT: i32 = 6379;

/// Default client port for Redis Sentinel.
pub const DEFAULT_SENTINEL_PORT: i32 = 26379;

/// Total number of hash slots in a Redis cluster.
pub const TOTAL_HASH_SLOTS: i32 = 16384;

pub(crate) fn default_port() -> i32 {
    DEFAULT_CLIENT_PORT
}
