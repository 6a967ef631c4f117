//! Finalizer handling and PVC teardown.
//!
//! StatefulSet deletion leaves claims behind, so each resource carries a
//! finalizer under which the operator deletes the claims it created, unless
//! retention is requested. Teardown is idempotent: claims already gone and
//! finalizers already removed are no-ops.

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{
    Api, Resource, ResourceExt,
    api::{DeleteParams, Patch, PatchParams},
};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::controller::error::Error;
use crate::crd::{ClusterRole, Redis, RedisCluster, RedisReplication};

pub const STANDALONE_FINALIZER: &str = "redisFinalizer";
pub const CLUSTER_FINALIZER: &str = "redisClusterFinalizer";
pub const REPLICATION_FINALIZER: &str = "redisReplicationFinalizer";
pub const SENTINEL_FINALIZER: &str = "redisSentinelFinalizer";

/// Add a finalizer to a resource if not already present. Returns whether a
/// patch was issued.
pub async fn ensure_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<bool, Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = api.get(name).await?;
    let mut finalizers = resource.finalizers().to_vec();
    if finalizers.iter().any(|f| f == finalizer) {
        return Ok(false);
    }

    finalizers.push(finalizer.to_string());
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(true)
}

/// Remove a specific finalizer from a resource. Gone resources and absent
/// finalizers are both fine.
pub async fn remove_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = match api.get(name).await {
        Ok(r) => r,
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut finalizers = resource.finalizers().to_vec();
    if let Some(pos) = finalizers.iter().position(|f| f == finalizer) {
        finalizers.remove(pos);
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Delete the named claims, treating 404 as success.
pub async fn delete_pvcs(
    client: kube::Client,
    namespace: &str,
    names: &[String],
) -> Result<(), Error> {
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client, namespace);
    for name in names {
        match pvcs.delete(name, &DeleteParams::default()).await {
            Ok(_) => info!(pvc = %name, "Deleted PVC"),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(pvc = %name, "PVC already gone");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Every claim a RedisCluster's StatefulSets create: one data claim per pod
/// per role, plus the node-conf claims when that volume is enabled.
pub fn cluster_pvc_names(resource: &RedisCluster) -> Vec<String> {
    let name = resource.name_any();
    let mut names = Vec::new();
    for role in ClusterRole::ALL {
        let workload = format!("{}-{}", name, role);
        for i in 0..resource.replica_count(role) {
            names.push(format!("{}-{}-{}", workload, workload, i));
            if resource.spec.storage.node_conf_volume {
                names.push(format!("node-conf-{}-{}", workload, i));
            }
        }
    }
    names
}

/// Data claims of a RedisReplication group.
pub fn replication_pvc_names(resource: &RedisReplication) -> Vec<String> {
    let name = resource.name_any();
    (0..resource.spec.size)
        .map(|i| format!("{}-{}-{}", name, name, i))
        .collect()
}

/// The single data claim of a standalone Redis.
pub fn standalone_pvc_names(resource: &Redis) -> Vec<String> {
    let name = resource.name_any();
    vec![format!("{}-{}-0", name, name)]
}
