//! StatefulSet generation for all four topologies.
//!
//! Every topology shares the same skeleton: stable identity through a
//! headless service, a single redis container configured through command
//! flags, optional persistent storage and optional TLS mounts. The
//! per-topology generators only differ in naming, replica counts and the
//! flag set.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource, ExecAction,
    ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSecurityContext,
    PodSpec, PodTemplateSpec, Probe, SecretKeySelector, SecretVolumeSource, SecurityContext,
    Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::crd::{
    ClusterRole, ClusterVersion, ImageSpec, Redis, RedisCluster, RedisReplication, RedisSentinel,
    SecretKeyRef, StorageSpec,
};
use crate::resources::common::{owner_reference, pod_selector_labels, standard_labels};
use crate::resources::services;

/// Redis user ID in the official container image.
const REDIS_USER_ID: i64 = 999;
/// Termination grace period, allowing an in-flight save to finish.
const TERMINATION_GRACE_PERIOD: i64 = 30;
/// Name of the auxiliary volume holding the cluster node configuration file.
const NODE_CONF_VOLUME: &str = "node-conf";

/// Everything the shared StatefulSet skeleton needs, collected per topology.
struct WorkloadParams<'a> {
    /// StatefulSet name, also the data PVC template name.
    workload_name: String,
    resource_name: String,
    namespace: Option<String>,
    component: &'a str,
    replicas: i32,
    port: i32,
    image: &'a ImageSpec,
    auth: Option<&'a SecretKeyRef>,
    tls_secret: Option<&'a str>,
    storage: Option<&'a StorageSpec>,
    node_conf_volume: bool,
    user_labels: &'a BTreeMap<String, String>,
    owner: OwnerReference,
    headless_service: String,
    /// Container command; `$(VAR)` references resolve against the pod env.
    command: Vec<String>,
}

/// StatefulSet for one role of a RedisCluster.
pub fn generate_cluster_statefulset(resource: &RedisCluster, role: ClusterRole) -> StatefulSet {
    let name = resource.name_any();
    let workload_name = format!("{}-{}", name, role);
    let headless_service = services::cluster_headless_service_name(&name, role);
    let namespace = resource.namespace().unwrap_or_default();

    let mut flags = base_redis_flags(
        resource.spec.port,
        resource.spec.auth.is_some(),
        resource.spec.tls.is_some(),
        resource.spec.storage.enabled,
    );
    flags.push("--cluster-enabled yes".to_string());
    let conf_dir = if resource.spec.storage.node_conf_volume {
        "/node-conf"
    } else {
        "/data"
    };
    flags.push(format!("--cluster-config-file {}/nodes.conf", conf_dir));
    flags.push("--cluster-node-timeout 5000".to_string());
    if resource.spec.cluster_version == ClusterVersion::V7 {
        // Peers are announced by stable DNS name, surviving pod IP churn.
        flags.push(format!(
            "--cluster-announce-hostname $(POD_NAME).{}.{}.svc",
            headless_service, namespace
        ));
        flags.push("--cluster-preferred-endpoint-type hostname".to_string());
    }

    let params = WorkloadParams {
        workload_name,
        resource_name: name,
        namespace: resource.namespace(),
        component: cluster_component(role),
        replicas: resource.replica_count(role),
        port: resource.spec.port,
        image: &resource.spec.image,
        auth: resource.spec.auth.as_ref(),
        tls_secret: resource.spec.tls.as_ref().map(|t| t.secret_name.as_str()),
        storage: Some(&resource.spec.storage),
        node_conf_volume: resource.spec.storage.node_conf_volume,
        user_labels: &resource.spec.labels,
        owner: owner_reference(resource),
        headless_service,
        command: redis_server_command(flags),
    };
    build_statefulset(params)
}

/// StatefulSet for a RedisReplication group.
pub fn generate_replication_statefulset(resource: &RedisReplication) -> StatefulSet {
    let name = resource.name_any();
    let flags = base_redis_flags(
        resource.spec.port,
        resource.spec.auth.is_some(),
        resource.spec.tls.is_some(),
        resource.spec.storage.enabled,
    );

    let params = WorkloadParams {
        workload_name: name.clone(),
        resource_name: name.clone(),
        namespace: resource.namespace(),
        component: "replication",
        replicas: resource.spec.size,
        port: resource.spec.port,
        image: &resource.spec.image,
        auth: resource.spec.auth.as_ref(),
        tls_secret: resource.spec.tls.as_ref().map(|t| t.secret_name.as_str()),
        storage: Some(&resource.spec.storage),
        node_conf_volume: false,
        user_labels: &resource.spec.labels,
        owner: owner_reference(resource),
        headless_service: services::headless_service_name(&name),
        command: redis_server_command(flags),
    };
    build_statefulset(params)
}

/// StatefulSet for a standalone Redis.
pub fn generate_standalone_statefulset(resource: &Redis) -> StatefulSet {
    let name = resource.name_any();
    let flags = base_redis_flags(
        resource.spec.port,
        resource.spec.auth.is_some(),
        resource.spec.tls.is_some(),
        resource.spec.storage.enabled,
    );

    let params = WorkloadParams {
        workload_name: name.clone(),
        resource_name: name.clone(),
        namespace: resource.namespace(),
        component: "standalone",
        replicas: 1,
        port: resource.spec.port,
        image: &resource.spec.image,
        auth: resource.spec.auth.as_ref(),
        tls_secret: resource.spec.tls.as_ref().map(|t| t.secret_name.as_str()),
        storage: Some(&resource.spec.storage),
        node_conf_volume: false,
        user_labels: &resource.spec.labels,
        owner: owner_reference(resource),
        headless_service: services::headless_service_name(&name),
        command: redis_server_command(flags),
    };
    build_statefulset(params)
}

/// StatefulSet for a RedisSentinel group monitoring `monitor_host`.
pub fn generate_sentinel_statefulset(
    resource: &RedisSentinel,
    monitor_host: &str,
    monitor_port: i32,
) -> StatefulSet {
    let name = resource.name_any();
    let workload_name = format!("{}-sentinel", name);

    let params = WorkloadParams {
        workload_name: workload_name.clone(),
        resource_name: name,
        namespace: resource.namespace(),
        component: "sentinel",
        replicas: resource.spec.size,
        port: resource.spec.port,
        image: &resource.spec.image,
        auth: resource.spec.auth.as_ref(),
        tls_secret: None,
        storage: None,
        node_conf_volume: false,
        user_labels: &resource.spec.labels,
        owner: owner_reference(resource),
        headless_service: format!("{}-headless", workload_name),
        command: sentinel_command(resource, monitor_host, monitor_port),
    };
    build_statefulset(params)
}

fn cluster_component(role: ClusterRole) -> &'static str {
    match role {
        ClusterRole::Leader => "cluster-leader",
        ClusterRole::Follower => "cluster-follower",
    }
}

/// Flags shared by every redis-server invocation.
fn base_redis_flags(port: i32, auth: bool, tls: bool, persistence: bool) -> Vec<String> {
    let mut flags = vec!["--bind 0.0.0.0".to_string()];

    if tls {
        flags.push(format!("--tls-port {}", port));
        flags.push("--port 0".to_string());
        flags.push("--tls-cert-file /tls/tls.crt".to_string());
        flags.push("--tls-key-file /tls/tls.key".to_string());
        flags.push("--tls-ca-cert-file /tls/ca.crt".to_string());
        flags.push("--tls-replication yes".to_string());
        flags.push("--tls-auth-clients optional".to_string());
    } else {
        flags.push(format!("--port {}", port));
    }

    if auth {
        flags.push("--requirepass $(REDIS_PASSWORD)".to_string());
        flags.push("--masterauth $(REDIS_PASSWORD)".to_string());
    }

    if persistence {
        flags.push("--appendonly yes".to_string());
        flags.push("--appendfsync everysec".to_string());
    }

    flags
}

fn redis_server_command(flags: Vec<String>) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("exec redis-server {}", flags.join(" ")),
    ]
}

/// Sentinel needs a config file; render a minimal one at startup and exec
/// redis-sentinel on it.
fn sentinel_command(resource: &RedisSentinel, monitor_host: &str, monitor_port: i32) -> Vec<String> {
    let group = &resource.spec.master_group_name;
    let mut conf = vec![
        format!("port {}", resource.spec.port),
        format!(
            "sentinel monitor {} {} {} {}",
            group, monitor_host, monitor_port, resource.spec.quorum
        ),
        format!("sentinel down-after-milliseconds {} 30000", group),
        format!("sentinel failover-timeout {} 180000", group),
        format!("sentinel parallel-syncs {} 1", group),
    ];
    if resource.spec.auth.is_some() {
        conf.push(format!("sentinel auth-pass {} $(REDIS_PASSWORD)", group));
    }

    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "printf '%s\\n' '{}' > /tmp/sentinel.conf && exec redis-sentinel /tmp/sentinel.conf",
            conf.join("' '")
        ),
    ]
}

fn build_statefulset(params: WorkloadParams<'_>) -> StatefulSet {
    let labels = standard_labels(&params.resource_name, params.component, params.user_labels);
    let selector = pod_selector_labels(&params.resource_name, params.component);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(params.workload_name.clone()),
            namespace: params.namespace.clone(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![params.owner.clone()]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(params.replicas),
            service_name: Some(params.headless_service.clone()),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            template: generate_pod_template(&params, &labels),
            volume_claim_templates: generate_pvc_templates(&params),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_pod_template(
    params: &WorkloadParams<'_>,
    labels: &BTreeMap<String, String>,
) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                run_as_user: Some(REDIS_USER_ID),
                fs_group: Some(REDIS_USER_ID),
                ..Default::default()
            }),
            containers: vec![generate_container(params)],
            volumes: generate_volumes(params),
            ..Default::default()
        }),
    }
}

fn generate_container(params: &WorkloadParams<'_>) -> Container {
    Container {
        name: "redis".to_string(),
        image: Some(format!("{}:{}", params.image.repository, params.image.tag)),
        image_pull_policy: Some(params.image.pull_policy.clone()),
        command: Some(params.command.clone()),
        ports: Some(container_ports(params)),
        env: Some(generate_env_vars(params)),
        volume_mounts: Some(generate_volume_mounts(params)),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            run_as_non_root: Some(true),
            run_as_user: Some(REDIS_USER_ID),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        liveness_probe: Some(ping_probe(params, 10)),
        readiness_probe: Some(ping_probe(params, 5)),
        ..Default::default()
    }
}

fn container_ports(params: &WorkloadParams<'_>) -> Vec<ContainerPort> {
    let mut ports = vec![ContainerPort {
        container_port: params.port,
        name: Some("client".to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];

    if params.component.starts_with("cluster-") {
        ports.push(ContainerPort {
            container_port: params.port + 10000,
            name: Some("cluster-bus".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }

    ports
}

fn generate_env_vars(params: &WorkloadParams<'_>) -> Vec<EnvVar> {
    let mut env = vec![
        EnvVar {
            name: "POD_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvVar {
            name: "POD_IP".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "status.podIP".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    if let Some(auth) = params.auth {
        env.push(EnvVar {
            name: "REDIS_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: auth.name.clone(),
                    key: auth.key.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    env
}

/// Liveness and readiness both PING through redis-cli; TLS pods connect
/// locally without certificate validation.
fn ping_probe(params: &WorkloadParams<'_>, period: i32) -> Probe {
    let mut cli = String::new();
    if params.auth.is_some() {
        cli.push_str("REDISCLI_AUTH=$REDIS_PASSWORD ");
    }
    cli.push_str("redis-cli");
    if params.tls_secret.is_some() {
        cli.push_str(" --tls --insecure");
    }
    cli.push_str(&format!(" -p {} ping", params.port));

    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["sh".to_string(), "-c".to_string(), cli]),
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(period),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn generate_volumes(params: &WorkloadParams<'_>) -> Option<Vec<Volume>> {
    let mut volumes = Vec::new();

    if let Some(secret_name) = params.tls_secret {
        volumes.push(Volume {
            name: "tls-certs".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.to_string()),
                default_mode: Some(0o400),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    // Without persistence the data dir is pod-local scratch space.
    if !params.storage.is_some_and(|s| s.enabled) {
        volumes.push(Volume {
            name: params.workload_name.clone(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }

    if volumes.is_empty() {
        None
    } else {
        Some(volumes)
    }
}

fn generate_volume_mounts(params: &WorkloadParams<'_>) -> Vec<VolumeMount> {
    let mut mounts = vec![VolumeMount {
        name: params.workload_name.clone(),
        mount_path: "/data".to_string(),
        ..Default::default()
    }];

    if params.node_conf_volume {
        mounts.push(VolumeMount {
            name: NODE_CONF_VOLUME.to_string(),
            mount_path: "/node-conf".to_string(),
            ..Default::default()
        });
    }

    if params.tls_secret.is_some() {
        mounts.push(VolumeMount {
            name: "tls-certs".to_string(),
            mount_path: "/tls".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    mounts
}

/// PVC templates. The data template is named after the workload so claims
/// come out as `<workload>-<workload>-<ordinal>`, which is what teardown
/// expects to delete.
fn generate_pvc_templates(params: &WorkloadParams<'_>) -> Option<Vec<PersistentVolumeClaim>> {
    let storage = params.storage.filter(|s| s.enabled)?;

    let mut templates = vec![pvc_template(
        &params.workload_name,
        &storage.size,
        storage.storage_class_name.clone(),
    )];

    if params.node_conf_volume {
        templates.push(pvc_template(
            NODE_CONF_VOLUME,
            "1Mi",
            storage.storage_class_name.clone(),
        ));
    }

    Some(templates)
}

fn pvc_template(
    name: &str,
    size: &str,
    storage_class_name: Option<String>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name,
            resources: Some(VolumeResourceRequirements {
                requests: Some(
                    [("storage".to_string(), Quantity(size.to_string()))]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
