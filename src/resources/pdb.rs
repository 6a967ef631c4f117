//! PodDisruptionBudget generation.
//!
//! Voluntary disruptions (node drains, upgrades) must not take out enough
//! members to lose cluster majority or the last replication master.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{ClusterRole, RedisCluster, RedisReplication, RedisSentinel};
use crate::resources::common::{owner_reference, pod_selector_labels, standard_labels};

/// PDB for one role of a RedisCluster.
///
/// For leaders, maxUnavailable = floor(leaders / 2) keeps a slot-owning
/// majority through any voluntary disruption.
pub fn generate_cluster_pdb(resource: &RedisCluster, role: ClusterRole) -> PodDisruptionBudget {
    let name = resource.name_any();
    let component = match role {
        ClusterRole::Leader => "cluster-leader",
        ClusterRole::Follower => "cluster-follower",
    };
    let replicas = resource.replica_count(role);
    let max_unavailable = (replicas / 2).max(1);

    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", name, role)),
            namespace: resource.namespace(),
            labels: Some(standard_labels(&name, component, &resource.spec.labels)),
            owner_references: Some(vec![owner_reference(resource)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(max_unavailable)),
            selector: Some(LabelSelector {
                match_labels: Some(pod_selector_labels(&name, component)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// PDB for a RedisReplication group. At most one member may be down
/// voluntarily so a replica is always available to promote.
pub fn generate_replication_pdb(resource: &RedisReplication) -> PodDisruptionBudget {
    let name = resource.name_any();

    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: resource.namespace(),
            labels: Some(standard_labels(
                &name,
                "replication",
                &resource.spec.labels,
            )),
            owner_references: Some(vec![owner_reference(resource)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(1)),
            selector: Some(LabelSelector {
                match_labels: Some(pod_selector_labels(&name, "replication")),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// PDB for a sentinel group: keep a quorum majority through drains.
pub fn generate_sentinel_pdb(resource: &RedisSentinel) -> PodDisruptionBudget {
    let name = resource.name_any();
    let max_unavailable = (resource.spec.size / 2).max(1);

    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(format!("{}-sentinel", name)),
            namespace: resource.namespace(),
            labels: Some(standard_labels(&name, "sentinel", &resource.spec.labels)),
            owner_references: Some(vec![owner_reference(resource)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(max_unavailable)),
            selector: Some(LabelSelector {
                match_labels: Some(pod_selector_labels(&name, "sentinel")),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
