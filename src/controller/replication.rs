//! Reconciliation loop for RedisReplication resources.
//!
//! Keeps a master/replica group converged on exactly one master: when zero
//! or several pods report the master role, elects (or promotes) one and
//! points the rest at it, then projects the resolved master into the
//! resource status and per-pod role labels.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::client::exec::PodExecutor;
use crate::cluster::PodMemberAdmin;
use crate::controller::common::{apply, skip_reconcile, statefulset_readiness};
use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::controller::finalizer::{
    REPLICATION_FINALIZER, delete_pvcs, ensure_finalizer, remove_finalizer, replication_pvc_names,
};
use crate::controller::phases::{REQUEUE_CONVERGING, REQUEUE_STEADY};
use crate::controller::status::patch_status_if_changed;
use crate::crd::{RedisReplication, RedisReplicationStatus};
use crate::replication::{FailoverManager, MemberState, ReplicationTarget, real_master};
use crate::resources::{ROLE_LABEL, pdb, services, workload};

const KIND: &str = "RedisReplication";

/// Reconcile a RedisReplication.
pub async fn reconcile(obj: Arc<RedisReplication>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling RedisReplication");
    let api: Api<RedisReplication> = Api::namespaced(ctx.client.clone(), &namespace);

    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx, &api, &namespace).await;
    }

    if skip_reconcile(obj.as_ref()) {
        debug!(name = %name, "Reconciliation suspended by annotation");
        return Ok(Action::requeue(REQUEUE_STEADY));
    }

    if ensure_finalizer(&api, &name, REPLICATION_FINALIZER).await? {
        info!(name = %name, "Added finalizer");
        return Ok(Action::requeue(std::time::Duration::from_secs(1)));
    }

    apply(
        &ctx.client,
        &namespace,
        &workload::generate_replication_statefulset(&obj),
    )
    .await?;
    for service in services::generate_replication_services(&obj) {
        apply(&ctx.client, &namespace, &service).await?;
    }
    apply(&ctx.client, &namespace, &pdb::generate_replication_pdb(&obj)).await?;

    let readiness = statefulset_readiness(&ctx.client, &namespace, &name)
        .await?
        .unwrap_or_default();
    if !readiness.is_ready() || readiness.desired != obj.spec.size {
        debug!(name = %name, ready = readiness.ready, "Waiting for replication pods");
        return finish(&ctx, &obj, start_time, readiness.ready, REQUEUE_CONVERGING);
    }

    let password = ctx
        .resolve_password(&namespace, obj.spec.auth.as_ref())
        .await?;
    let tls_certs = ctx
        .resolve_tls_certs(
            &namespace,
            obj.spec.tls.as_ref().map(|t| t.secret_name.as_str()),
        )
        .await?;

    let executor = PodExecutor::new(ctx.client.clone(), &namespace);
    let admin = PodMemberAdmin::new(executor, obj.spec.port as u16, password, tls_certs);
    let target = ReplicationTarget::from_resource(&obj);
    let manager = FailoverManager::new(&admin, &target);

    // Member errors are soft failures: skip the pass and let the next one
    // retry against fresh state.
    let mut members = match manager.refresh().await {
        Ok(members) => members,
        Err(e) => {
            warn!(name = %name, error = %e, "Unable to observe replication members");
            return finish(&ctx, &obj, start_time, readiness.ready, REQUEUE_STEADY);
        }
    };

    let master_count = members.iter().filter(|m| m.is_master()).count();
    if master_count != 1 {
        info!(name = %name, master_count, "Replication group not converged, reconfiguring");
        match manager.reconfigure().await {
            Ok(_) => match manager.refresh().await {
                Ok(refreshed) => members = refreshed,
                Err(e) => {
                    warn!(name = %name, error = %e, "Unable to re-observe members after reconfigure");
                    return finish(&ctx, &obj, start_time, readiness.ready, REQUEUE_STEADY);
                }
            },
            Err(e) => {
                warn!(name = %name, error = %e, "Replication reconfigure failed, will retry");
                ctx.publish_warning_event(
                    obj.as_ref(),
                    "FailoverFailed",
                    "Reconfiguring",
                    Some(e.to_string()),
                )
                .await;
                return finish(&ctx, &obj, start_time, readiness.ready, REQUEUE_STEADY);
            }
        }
    }

    // The real master is recomputed every pass, converged or not.
    let master = real_master(&members).cloned();
    if let Err(e) = sync_role_labels(&ctx, &namespace, &members).await {
        warn!(name = %name, error = %e, "Updating pod role labels failed, will retry");
    }

    let previous = obj.status.as_ref().and_then(|s| s.master_node.clone());
    let next = RedisReplicationStatus {
        master_node: master.as_ref().map(|m| m.pod.clone()),
    };
    if patch_status_if_changed(&api, &name, obj.status.as_ref(), &next).await?
        && let Some(master) = &master
    {
        if previous.is_some() {
            info!(name = %name, master = %master.pod, "Replication master changed");
            if let Some(ref health_state) = ctx.health_state {
                health_state.metrics.record_master_switch(&namespace, &name);
            }
        }
        ctx.publish_normal_event(
            obj.as_ref(),
            "MasterResolved",
            "Reconciling",
            Some(format!("Master is {}", master.pod)),
        )
        .await;
    }

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .set_has_master(&namespace, &name, master.is_some());
    }

    finish(&ctx, &obj, start_time, readiness.ready, REQUEUE_STEADY)
}

/// Write the observed role of each member onto its pod, patching only pods
/// whose label differs.
async fn sync_role_labels(
    ctx: &Context,
    namespace: &str,
    members: &[MemberState],
) -> Result<(), Error> {
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);

    for member in members {
        let role = if member.is_master() { "master" } else { "slave" };
        let pod = pods.get(&member.pod).await?;
        let current = pod.labels().get(ROLE_LABEL).map(String::as_str);
        if current == Some(role) {
            continue;
        }

        debug!(pod = %member.pod, role, "Updating pod role label");
        let patch = serde_json::json!({
            "metadata": {
                "labels": { ROLE_LABEL: role }
            }
        });
        pods.patch(&member.pod, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

fn finish(
    ctx: &Context,
    obj: &RedisReplication,
    start_time: Instant,
    ready: i32,
    requeue: std::time::Duration,
) -> Result<Action, Error> {
    if let Some(ref health_state) = ctx.health_state {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        health_state.metrics.record_reconcile(
            KIND,
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
        health_state.metrics.set_replicas(
            KIND,
            &namespace,
            &name,
            i64::from(obj.spec.size),
            i64::from(ready),
        );
    }
    Ok(Action::requeue(requeue))
}

async fn handle_deletion(
    obj: &RedisReplication,
    ctx: &Context,
    api: &Api<RedisReplication>,
    namespace: &str,
) -> Result<Action, Error> {
    let name = obj.name_any();
    info!(name = %name, "Handling deletion");

    if obj.finalizers().iter().any(|f| f == REPLICATION_FINALIZER) {
        if obj.spec.storage.enabled && !obj.spec.storage.keep_after_delete {
            delete_pvcs(ctx.client.clone(), namespace, &replication_pvc_names(obj)).await?;
        }
        remove_finalizer(api, &name, REPLICATION_FINALIZER).await?;
    }

    Ok(Action::await_change())
}

/// Error policy for the replication controller
pub fn error_policy(obj: Arc<RedisReplication>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(KIND, &namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
