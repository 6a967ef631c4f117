//! Shared label, naming and ownership helpers for generated resources.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

/// Pod label carrying the observed replication role ("master" / "slave"),
/// maintained by the replication reconciler and selected on by the
/// role-specific services.
pub const ROLE_LABEL: &str = "redis-role";

/// Standard labels applied to all managed resources.
pub fn standard_labels(
    name: &str,
    component: &str,
    user_labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), name.to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "redis-operator".to_string(),
    );
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.to_string(),
    );

    for (key, value) in user_labels {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// Labels used to select the pods of one workload. A strict subset of
/// [`standard_labels`] so user labels cannot break the selector.
pub fn pod_selector_labels(name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), name.to_string());
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.to_string(),
    );
    labels
}

/// Controller owner reference pointing dependents at their custom resource.
pub fn owner_reference<K>(resource: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_labels_merge_user_labels() {
        let mut user = BTreeMap::new();
        user.insert("team".to_string(), "platform".to_string());

        let labels = standard_labels("my-redis", "standalone", &user);
        assert_eq!(
            labels.get("app.kubernetes.io/name"),
            Some(&"my-redis".to_string())
        );
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by"),
            Some(&"redis-operator".to_string())
        );
        assert_eq!(labels.get("team"), Some(&"platform".to_string()));
    }

    #[test]
    fn test_selector_is_subset_of_standard() {
        let labels = standard_labels("my-redis", "replication", &BTreeMap::new());
        let selector = pod_selector_labels("my-redis", "replication");
        for (k, v) in &selector {
            assert_eq!(labels.get(k), Some(v));
        }
        assert!(!selector.contains_key("app.kubernetes.io/managed-by"));
    }
}
