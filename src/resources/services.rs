//! Service generation.
//!
//! Each workload gets a headless service for stable pod DNS, a regular
//! ClusterIP service for clients and an `-additional` service users can
//! repoint at other service types without touching the managed ones.
//! Replication groups additionally get role-routed services selecting on
//! the role label the reconciler writes.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{ClusterRole, Redis, RedisCluster, RedisReplication, RedisSentinel};
use crate::resources::common::{ROLE_LABEL, owner_reference, pod_selector_labels, standard_labels};

/// Headless service name for a single-workload resource.
pub fn headless_service_name(name: &str) -> String {
    format!("{}-headless", name)
}

/// Headless service name for one role of a cluster.
pub fn cluster_headless_service_name(name: &str, role: ClusterRole) -> String {
    format!("{}-{}-headless", name, role)
}

struct ServiceParams {
    service_name: String,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
    port: i32,
    port_name: &'static str,
    headless: bool,
    owner: OwnerReference,
}

/// Services for one role of a RedisCluster: headless for peer discovery,
/// ClusterIP for clients.
pub fn generate_cluster_services(resource: &RedisCluster, role: ClusterRole) -> Vec<Service> {
    let name = resource.name_any();
    let component = match role {
        ClusterRole::Leader => "cluster-leader",
        ClusterRole::Follower => "cluster-follower",
    };
    let labels = standard_labels(&name, component, &resource.spec.labels);
    let selector = pod_selector_labels(&name, component);

    vec![
        build_service(ServiceParams {
            service_name: cluster_headless_service_name(&name, role),
            namespace: resource.namespace(),
            labels: labels.clone(),
            selector: selector.clone(),
            port: resource.spec.port,
            port_name: "client",
            headless: true,
            owner: owner_reference(resource),
        }),
        build_service(ServiceParams {
            service_name: format!("{}-{}", name, role),
            namespace: resource.namespace(),
            labels: labels.clone(),
            selector: selector.clone(),
            port: resource.spec.port,
            port_name: "client",
            headless: false,
            owner: owner_reference(resource),
        }),
        build_service(ServiceParams {
            service_name: format!("{}-{}-additional", name, role),
            namespace: resource.namespace(),
            labels,
            selector,
            port: resource.spec.port,
            port_name: "client",
            headless: false,
            owner: owner_reference(resource),
        }),
    ]
}

/// Services for a RedisReplication group. Besides the usual pair, clients
/// get `{name}-master` for writes and `{name}-replica` for reads, routed by
/// the role label.
pub fn generate_replication_services(resource: &RedisReplication) -> Vec<Service> {
    let name = resource.name_any();
    let labels = standard_labels(&name, "replication", &resource.spec.labels);
    let selector = pod_selector_labels(&name, "replication");

    let mut master_selector = selector.clone();
    master_selector.insert(ROLE_LABEL.to_string(), "master".to_string());
    let mut replica_selector = selector.clone();
    replica_selector.insert(ROLE_LABEL.to_string(), "slave".to_string());

    vec![
        build_service(ServiceParams {
            service_name: headless_service_name(&name),
            namespace: resource.namespace(),
            labels: labels.clone(),
            selector: selector.clone(),
            port: resource.spec.port,
            port_name: "client",
            headless: true,
            owner: owner_reference(resource),
        }),
        build_service(ServiceParams {
            service_name: name.clone(),
            namespace: resource.namespace(),
            labels: labels.clone(),
            selector: selector.clone(),
            port: resource.spec.port,
            port_name: "client",
            headless: false,
            owner: owner_reference(resource),
        }),
        build_service(ServiceParams {
            service_name: format!("{}-additional", name),
            namespace: resource.namespace(),
            labels: labels.clone(),
            selector,
            port: resource.spec.port,
            port_name: "client",
            headless: false,
            owner: owner_reference(resource),
        }),
        build_service(ServiceParams {
            service_name: format!("{}-master", name),
            namespace: resource.namespace(),
            labels: labels.clone(),
            selector: master_selector,
            port: resource.spec.port,
            port_name: "client",
            headless: false,
            owner: owner_reference(resource),
        }),
        build_service(ServiceParams {
            service_name: format!("{}-replica", name),
            namespace: resource.namespace(),
            labels,
            selector: replica_selector,
            port: resource.spec.port,
            port_name: "client",
            headless: false,
            owner: owner_reference(resource),
        }),
    ]
}

/// Services for a standalone Redis.
pub fn generate_standalone_services(resource: &Redis) -> Vec<Service> {
    let name = resource.name_any();
    let labels = standard_labels(&name, "standalone", &resource.spec.labels);
    let selector = pod_selector_labels(&name, "standalone");

    vec![
        build_service(ServiceParams {
            service_name: headless_service_name(&name),
            namespace: resource.namespace(),
            labels: labels.clone(),
            selector: selector.clone(),
            port: resource.spec.port,
            port_name: "client",
            headless: true,
            owner: owner_reference(resource),
        }),
        build_service(ServiceParams {
            service_name: name.clone(),
            namespace: resource.namespace(),
            labels: labels.clone(),
            selector: selector.clone(),
            port: resource.spec.port,
            port_name: "client",
            headless: false,
            owner: owner_reference(resource),
        }),
        build_service(ServiceParams {
            service_name: format!("{}-additional", name),
            namespace: resource.namespace(),
            labels,
            selector,
            port: resource.spec.port,
            port_name: "client",
            headless: false,
            owner: owner_reference(resource),
        }),
    ]
}

/// Services for a RedisSentinel group.
pub fn generate_sentinel_services(resource: &RedisSentinel) -> Vec<Service> {
    let name = resource.name_any();
    let workload_name = format!("{}-sentinel", name);
    let labels = standard_labels(&name, "sentinel", &resource.spec.labels);
    let selector = pod_selector_labels(&name, "sentinel");

    vec![
        build_service(ServiceParams {
            service_name: headless_service_name(&workload_name),
            namespace: resource.namespace(),
            labels: labels.clone(),
            selector: selector.clone(),
            port: resource.spec.port,
            port_name: "sentinel",
            headless: true,
            owner: owner_reference(resource),
        }),
        build_service(ServiceParams {
            service_name: workload_name,
            namespace: resource.namespace(),
            labels,
            selector,
            port: resource.spec.port,
            port_name: "sentinel",
            headless: false,
            owner: owner_reference(resource),
        }),
    ]
}

fn build_service(params: ServiceParams) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(params.service_name),
            namespace: params.namespace,
            labels: Some(params.labels),
            owner_references: Some(vec![params.owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            // Headless services resolve pods before readiness so members can
            // discover each other during bootstrap.
            cluster_ip: params.headless.then(|| "None".to_string()),
            publish_not_ready_addresses: params.headless.then_some(true),
            selector: Some(params.selector),
            ports: Some(vec![ServicePort {
                name: Some(params.port_name.to_string()),
                port: params.port,
                target_port: Some(IntOrString::Int(params.port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
