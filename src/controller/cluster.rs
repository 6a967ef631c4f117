//! Reconciliation loop for RedisCluster resources.
//!
//! Scale-down comes before everything else: while the leader StatefulSet
//! still runs more replicas than the spec asks for, the excess leaders are
//! drained out of the live topology and the smaller workload is not written,
//! so Kubernetes never terminates a pod that still owns slots. Once no shrink
//! is pending the workloads are converged role by role, then the topology is
//! steered toward the spec: missing nodes are created or joined, followers
//! attached, damaged clusters repaired, and dynamic config applied once the
//! cluster passes its health check.

use std::sync::Arc;
use std::time::Instant;

use kube::{Api, ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::client::exec::PodExecutor;
use crate::cluster::{ClusterTarget, PodMemberAdmin, TopologyManager};
use crate::controller::common::{
    WorkloadReadiness, apply, skip_reconcile, statefulset_readiness,
};
use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::controller::finalizer::{
    CLUSTER_FINALIZER, cluster_pvc_names, delete_pvcs, ensure_finalizer, remove_finalizer,
};
use crate::controller::phases::{REQUEUE_CONVERGING, REQUEUE_IDLE, REQUEUE_STEADY};
use crate::controller::status::patch_status_if_changed;
use crate::crd::{ClusterRole, ClusterState, RedisCluster, RedisClusterStatus};
use crate::resources::{pdb, services, workload};

const KIND: &str = "RedisCluster";

/// Reconcile a RedisCluster.
pub async fn reconcile(obj: Arc<RedisCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling RedisCluster");
    let api: Api<RedisCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx, &api, &namespace).await;
    }

    if skip_reconcile(obj.as_ref()) {
        debug!(name = %name, "Reconciliation suspended by annotation");
        return Ok(Action::requeue(REQUEUE_STEADY));
    }

    if ensure_finalizer(&api, &name, CLUSTER_FINALIZER).await? {
        info!(name = %name, "Added finalizer");
        return Ok(Action::requeue(std::time::Duration::from_secs(1)));
    }

    if obj.spec.leader_replicas == 0 {
        warn!(name = %name, "Cluster has zero desired leaders, nothing to manage");
        return Ok(Action::requeue(REQUEUE_IDLE));
    }

    // A pending leader shrink must drain the topology before the smaller
    // StatefulSet is written; terminated pods take their slots with them.
    let existing_leaders =
        statefulset_readiness(&ctx.client, &namespace, &format!("{}-leader", name)).await?;
    if leader_shrink_pending(existing_leaders, obj.spec.leader_replicas) {
        let existing = existing_leaders.unwrap_or_default();
        let follower_ready =
            statefulset_readiness(&ctx.client, &namespace, &format!("{}-follower", name))
                .await?
                .unwrap_or_default();
        let ready_counts = (existing.ready, follower_ready.ready);

        let (admin, target) = member_admin(&ctx, &obj, &namespace).await?;
        let manager = TopologyManager::new(&admin, &target);
        match manager.node_count(Some(ClusterRole::Leader)).await {
            Ok(live) if live as i32 > obj.spec.leader_replicas => {
                info!(
                    name = %name,
                    live,
                    desired = obj.spec.leader_replicas,
                    "Scaling cluster leaders down"
                );
                write_status(
                    &ctx,
                    &api,
                    &obj,
                    ClusterState::Bootstrapping,
                    "Scaling down leader nodes",
                    ready_counts,
                )
                .await?;
                if let Err(e) = manager.scale_down(obj.spec.leader_replicas).await {
                    warn!(name = %name, error = %e, "Scale-down step failed, will retry");
                }
                return finish(&ctx, &obj, start_time, ready_counts, REQUEUE_STEADY);
            }
            Ok(_) => {
                debug!(name = %name, "Topology drained, leader workload may shrink");
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Unable to query leader node count");
                write_status(
                    &ctx,
                    &api,
                    &obj,
                    ClusterState::Bootstrapping,
                    "Cluster members not yet reachable",
                    ready_counts,
                )
                .await?;
                return finish(&ctx, &obj, start_time, ready_counts, REQUEUE_STEADY);
            }
        }
    }

    // Converge the workloads role by role before touching the topology.
    for role in ClusterRole::ALL {
        apply(
            &ctx.client,
            &namespace,
            &workload::generate_cluster_statefulset(&obj, role),
        )
        .await?;
        for service in services::generate_cluster_services(&obj, role) {
            apply(&ctx.client, &namespace, &service).await?;
        }
        apply(&ctx.client, &namespace, &pdb::generate_cluster_pdb(&obj, role)).await?;
    }

    let leader_ready = statefulset_readiness(&ctx.client, &namespace, &format!("{}-leader", name))
        .await?
        .unwrap_or_default();
    let follower_ready =
        statefulset_readiness(&ctx.client, &namespace, &format!("{}-follower", name))
            .await?
            .unwrap_or_default();
    let ready_counts = (leader_ready.ready, follower_ready.ready);

    if !leader_ready.is_ready() || leader_ready.desired != obj.spec.leader_replicas {
        write_status(
            &ctx,
            &api,
            &obj,
            ClusterState::InitializingLeader,
            "Waiting for leader pods to become ready",
            ready_counts,
        )
        .await?;
        return finish(&ctx, &obj, start_time, ready_counts, REQUEUE_CONVERGING);
    }

    if !follower_ready.is_ready() || follower_ready.desired != obj.spec.follower_replicas {
        write_status(
            &ctx,
            &api,
            &obj,
            ClusterState::InitializingFollower,
            "Waiting for follower pods to become ready",
            ready_counts,
        )
        .await?;
        return finish(&ctx, &obj, start_time, ready_counts, REQUEUE_CONVERGING);
    }

    let (admin, target) = member_admin(&ctx, &obj, &namespace).await?;
    let manager = TopologyManager::new(&admin, &target);

    // All member-level failures from here on are soft: log, skip the step
    // and let the next pass retry against re-observed state.
    let (total, leaders_live) = match observe_counts(&manager).await {
        Some(counts) => counts,
        None => {
            write_status(
                &ctx,
                &api,
                &obj,
                ClusterState::Bootstrapping,
                "Cluster members not yet reachable",
                ready_counts,
            )
            .await?;
            return finish(&ctx, &obj, start_time, ready_counts, REQUEUE_STEADY);
        }
    };
    let desired_total = obj.total_nodes();

    // Scale-down takes precedence over every growth step so a shrinking
    // spec never races slot migration against node creation.
    if leaders_live > obj.spec.leader_replicas {
        info!(
            name = %name,
            live = leaders_live,
            desired = obj.spec.leader_replicas,
            "Scaling cluster leaders down"
        );
        write_status(
            &ctx,
            &api,
            &obj,
            ClusterState::Bootstrapping,
            "Scaling down leader nodes",
            ready_counts,
        )
        .await?;
        if let Err(e) = manager.scale_down(obj.spec.leader_replicas).await {
            warn!(name = %name, error = %e, "Scale-down step failed, will retry");
        }
        return finish(&ctx, &obj, start_time, ready_counts, REQUEUE_STEADY);
    }

    if total != desired_total {
        write_status(
            &ctx,
            &api,
            &obj,
            ClusterState::Bootstrapping,
            "Joining cluster nodes",
            ready_counts,
        )
        .await?;
        grow(&obj, &manager, total, leaders_live).await;
        return finish(&ctx, &obj, start_time, ready_counts, REQUEUE_CONVERGING);
    }

    repair_if_degraded(&obj, &manager, total).await;

    if let Err(e) = manager.check_if_empty_masters().await {
        warn!(name = %name, error = %e, "Empty-master check failed, will retry");
    }

    let healthy = match manager.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            warn!(name = %name, error = %e, "Cluster health check failed to run");
            false
        }
    };

    if healthy {
        if !obj.spec.additional_config.is_empty()
            && let Err(e) = manager.set_dynamic_config(&obj.spec.additional_config).await
        {
            warn!(name = %name, error = %e, "Applying dynamic config failed, will retry");
        }
        write_status(
            &ctx,
            &api,
            &obj,
            ClusterState::Ready,
            "RedisCluster is healthy",
            ready_counts,
        )
        .await?;
    } else {
        write_status(
            &ctx,
            &api,
            &obj,
            ClusterState::Bootstrapping,
            "Cluster health check not passing",
            ready_counts,
        )
        .await?;
    }

    finish(&ctx, &obj, start_time, ready_counts, REQUEUE_STEADY)
}

/// Whether the leader StatefulSet still runs more replicas than the spec
/// asks for. While true, the workload must not be rewritten; the topology
/// drains first.
fn leader_shrink_pending(existing: Option<WorkloadReadiness>, desired_leaders: i32) -> bool {
    existing.is_some_and(|w| w.desired > desired_leaders)
}

/// Resolve credentials and build the pod-exec admin plus topology target.
async fn member_admin(
    ctx: &Context,
    obj: &RedisCluster,
    namespace: &str,
) -> Result<(PodMemberAdmin, ClusterTarget), Error> {
    let password = ctx
        .resolve_password(namespace, obj.spec.auth.as_ref())
        .await?;
    let tls_certs = ctx
        .resolve_tls_certs(
            namespace,
            obj.spec.tls.as_ref().map(|t| t.secret_name.as_str()),
        )
        .await?;

    let executor = PodExecutor::new(ctx.client.clone(), namespace);
    let admin = PodMemberAdmin::new(executor, obj.spec.port as u16, password.clone(), tls_certs);
    let target = ClusterTarget::from_resource(obj, password);
    Ok((admin, target))
}

/// Observe total and leader node counts from the live topology.
async fn observe_counts(
    manager: &TopologyManager<'_, PodMemberAdmin>,
) -> Option<(i32, i32)> {
    let total = match manager.node_count(None).await {
        Ok(count) => count as i32,
        Err(e) => {
            warn!(error = %e, "Unable to query cluster node count");
            return None;
        }
    };
    let leaders = match manager.node_count(Some(ClusterRole::Leader)).await {
        Ok(count) => count as i32,
        Err(e) => {
            warn!(error = %e, "Unable to query leader node count");
            return None;
        }
    };
    Some((total, leaders))
}

/// Growth path: create the cluster on first contact, join missing leaders
/// into an existing one, then attach followers to their leaders.
async fn grow(
    obj: &RedisCluster,
    manager: &TopologyManager<'_, PodMemberAdmin>,
    total: i32,
    leaders_live: i32,
) {
    let name = obj.name_any();

    if leaders_live < obj.spec.leader_replicas {
        if total <= 1 {
            info!(name = %name, "Creating cluster");
            if let Err(e) = manager.bootstrap().await {
                warn!(name = %name, error = %e, "Cluster creation failed, will retry");
                return;
            }
        } else {
            info!(name = %name, live = leaders_live, "Joining missing leader nodes");
            for _ in leaders_live..obj.spec.leader_replicas {
                if let Err(e) = manager.add_node().await {
                    warn!(name = %name, error = %e, "Joining a leader failed, will retry");
                    return;
                }
            }
            // New leaders own no slots until rebalanced onto them.
            if let Err(e) = manager.check_if_empty_masters().await {
                warn!(name = %name, error = %e, "Rebalance of empty masters failed, will retry");
            }
        }
    }

    if let Err(e) = manager.attach_followers().await {
        warn!(name = %name, error = %e, "Attaching followers failed, will retry");
    }
}

/// When nearly every node is unreachable the cluster topology itself is
/// damaged: re-meet disconnected masters, then reset and rejoin members
/// that stayed broken.
async fn repair_if_degraded(
    obj: &RedisCluster,
    manager: &TopologyManager<'_, PodMemberAdmin>,
    total: i32,
) {
    let name = obj.name_any();
    let unhealthy = match manager.unhealthy_node_count().await {
        Ok(count) => count as i32,
        Err(e) => {
            warn!(name = %name, error = %e, "Unable to query unhealthy node count");
            return;
        }
    };
    if unhealthy == 0 || unhealthy < total - 1 {
        return;
    }

    warn!(name = %name, unhealthy, total, "Cluster badly degraded, attempting repair");
    if let Err(e) = manager.repair_disconnected_masters().await {
        warn!(name = %name, error = %e, "Repairing disconnected masters failed");
    }
    if let Err(e) = manager.node_failover().await {
        warn!(name = %name, error = %e, "Cluster failover failed");
    }
}

async fn write_status(
    ctx: &Context,
    api: &Api<RedisCluster>,
    obj: &RedisCluster,
    state: ClusterState,
    reason: &str,
    (ready_leaders, ready_followers): (i32, i32),
) -> Result<(), Error> {
    let next = RedisClusterStatus {
        state,
        reason: reason.to_string(),
        ready_leader_replicas: ready_leaders,
        ready_follower_replicas: ready_followers,
    };
    let changed = patch_status_if_changed(api, &obj.name_any(), obj.status.as_ref(), &next).await?;
    if changed && state == ClusterState::Ready {
        ctx.publish_normal_event(obj, "Ready", "Reconciling", Some(reason.to_string()))
            .await;
    }
    Ok(())
}

fn finish(
    ctx: &Context,
    obj: &RedisCluster,
    start_time: Instant,
    (ready_leaders, ready_followers): (i32, i32),
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
            i64::from(obj.total_nodes()),
            i64::from(ready_leaders + ready_followers),
        );
    }
    Ok(Action::requeue(requeue))
}

async fn handle_deletion(
    obj: &RedisCluster,
    ctx: &Context,
    api: &Api<RedisCluster>,
    namespace: &str,
) -> Result<Action, Error> {
    let name = obj.name_any();
    info!(name = %name, "Handling deletion");

    if obj.finalizers().iter().any(|f| f == CLUSTER_FINALIZER) {
        if obj.spec.storage.enabled && !obj.spec.storage.keep_after_delete {
            delete_pvcs(ctx.client.clone(), namespace, &cluster_pvc_names(obj)).await?;
        }
        remove_finalizer(api, &name, CLUSTER_FINALIZER).await?;
    }

    Ok(Action::await_change())
}

/// Error policy for the cluster controller
pub fn error_policy(obj: Arc<RedisCluster>, error: &Error, ctx: Arc<Context>) -> Action {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn readiness(desired: i32) -> WorkloadReadiness {
        WorkloadReadiness {
            ready: desired,
            desired,
            settled: true,
        }
    }

    #[test]
    fn test_shrink_pending_while_workload_exceeds_spec() {
        assert!(leader_shrink_pending(Some(readiness(6)), 4));
        assert!(leader_shrink_pending(Some(readiness(4)), 3));
    }

    #[test]
    fn test_no_shrink_pending_at_or_below_spec() {
        assert!(!leader_shrink_pending(Some(readiness(4)), 4));
        assert!(!leader_shrink_pending(Some(readiness(4)), 6));
    }

    #[test]
    fn test_no_shrink_pending_before_first_workload_write() {
        assert!(!leader_shrink_pending(None, 3));
    }
}
