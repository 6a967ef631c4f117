//! Reconciliation loop for RedisSentinel resources.
//!
//! A sentinel group is only deployed once its companion RedisReplication is
//! fully settled with a resolvable master; until then the readiness gate
//! requeues. A watch mapping in the controller wiring re-triggers sentinel
//! reconciles whenever the companion changes, so the gate never needs to
//! poll aggressively.

use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use kube::{Api, ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::common::{apply, skip_reconcile, statefulset_readiness};
use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::controller::finalizer::{SENTINEL_FINALIZER, ensure_finalizer, remove_finalizer};
use crate::controller::phases::{self, REQUEUE_STEADY, Step, StepOutcome};
use crate::crd::{RedisReplication, RedisSentinel};
use crate::resources::{pdb, services, workload};

const KIND: &str = "RedisSentinel";

/// Reconcile a RedisSentinel.
pub async fn reconcile(obj: Arc<RedisSentinel>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    debug!(name = %name, namespace = %namespace, "Reconciling RedisSentinel");

    let steps: &[(&str, Step<RedisSentinel>)] = &[
        ("deletion", deletion_step),
        ("skip-marker", skip_step),
        ("finalizer", finalizer_step),
        ("quorum-check", quorum_step),
        ("replication-gate", replication_gate_step),
        ("workload", workload_step),
        ("disruption-budget", pdb_step),
        ("services", services_step),
    ];

    let action = phases::run(&ctx, &obj, steps, Action::requeue(REQUEUE_STEADY)).await?;

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            KIND,
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
        if let Ok(Some(readiness)) =
            statefulset_readiness(&ctx.client, &namespace, &format!("{}-sentinel", name)).await
        {
            health_state.metrics.set_replicas(
                KIND,
                &namespace,
                &name,
                i64::from(obj.spec.size),
                i64::from(readiness.ready),
            );
        }
    }

    Ok(action)
}

fn deletion_step<'a>(
    ctx: &'a Context,
    obj: &'a Arc<RedisSentinel>,
) -> BoxFuture<'a, Result<StepOutcome, Error>> {
    Box::pin(async move {
        if obj.metadata.deletion_timestamp.is_none() {
            return Ok(StepOutcome::Continue);
        }

        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        info!(name = %name, "Handling deletion");

        // Sentinels are stateless; only the finalizer itself needs removing.
        let api: Api<RedisSentinel> = Api::namespaced(ctx.client.clone(), &namespace);
        remove_finalizer(&api, &name, SENTINEL_FINALIZER).await?;
        Ok(StepOutcome::Done(Action::await_change()))
    })
}

fn skip_step<'a>(
    _ctx: &'a Context,
    obj: &'a Arc<RedisSentinel>,
) -> BoxFuture<'a, Result<StepOutcome, Error>> {
    Box::pin(async move {
        if skip_reconcile(obj.as_ref()) {
            debug!(name = %obj.name_any(), "Reconciliation suspended by annotation");
            return Ok(StepOutcome::Done(Action::requeue(REQUEUE_STEADY)));
        }
        Ok(StepOutcome::Continue)
    })
}

fn finalizer_step<'a>(
    ctx: &'a Context,
    obj: &'a Arc<RedisSentinel>,
) -> BoxFuture<'a, Result<StepOutcome, Error>> {
    Box::pin(async move {
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<RedisSentinel> = Api::namespaced(ctx.client.clone(), &namespace);
        if ensure_finalizer(&api, &name, SENTINEL_FINALIZER).await? {
            info!(name = %name, "Added finalizer");
            return Ok(StepOutcome::Done(Action::requeue(
                std::time::Duration::from_secs(1),
            )));
        }
        Ok(StepOutcome::Continue)
    })
}

fn quorum_step<'a>(
    ctx: &'a Context,
    obj: &'a Arc<RedisSentinel>,
) -> BoxFuture<'a, Result<StepOutcome, Error>> {
    Box::pin(async move {
        if !obj.spec.has_odd_quorum() {
            warn!(name = %obj.name_any(), size = obj.spec.size, "Even sentinel count cannot form a reliable quorum");
            ctx.publish_warning_event(
                obj.as_ref(),
                "EvenQuorum",
                "Validating",
                Some(format!("{} sentinels cannot break ties", obj.spec.size)),
            )
            .await;
        }
        Ok(StepOutcome::Continue)
    })
}

/// The gate: block deployment until the monitored replication group is
/// settled and has a resolvable master.
fn replication_gate_step<'a>(
    ctx: &'a Context,
    obj: &'a Arc<RedisSentinel>,
) -> BoxFuture<'a, Result<StepOutcome, Error>> {
    Box::pin(async move {
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

        match monitored_master(ctx, obj, &namespace).await? {
            Some(_) => Ok(StepOutcome::Continue),
            None => {
                debug!(name = %name, replication = %obj.spec.replication_ref,
                       "Monitored replication group not ready, waiting");
                Ok(StepOutcome::Done(Action::requeue(REQUEUE_STEADY)))
            }
        }
    })
}

fn workload_step<'a>(
    ctx: &'a Context,
    obj: &'a Arc<RedisSentinel>,
) -> BoxFuture<'a, Result<StepOutcome, Error>> {
    Box::pin(async move {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        let Some((host, port)) = monitored_master(ctx, obj, &namespace).await? else {
            // The gate passed moments ago; treat a vanished master as a wait.
            return Ok(StepOutcome::Done(Action::requeue(REQUEUE_STEADY)));
        };

        let sts = workload::generate_sentinel_statefulset(obj, &host, port);
        apply(&ctx.client, &namespace, &sts).await?;
        Ok(StepOutcome::Continue)
    })
}

fn pdb_step<'a>(
    ctx: &'a Context,
    obj: &'a Arc<RedisSentinel>,
) -> BoxFuture<'a, Result<StepOutcome, Error>> {
    Box::pin(async move {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        apply(&ctx.client, &namespace, &pdb::generate_sentinel_pdb(obj)).await?;
        Ok(StepOutcome::Continue)
    })
}

fn services_step<'a>(
    ctx: &'a Context,
    obj: &'a Arc<RedisSentinel>,
) -> BoxFuture<'a, Result<StepOutcome, Error>> {
    Box::pin(async move {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        for service in services::generate_sentinel_services(obj) {
            apply(&ctx.client, &namespace, &service).await?;
        }
        Ok(StepOutcome::Continue)
    })
}

/// Resolve the monitored replication group's master address, or `None`
/// while the group is absent, unsettled or masterless.
async fn monitored_master(
    ctx: &Context,
    obj: &RedisSentinel,
    namespace: &str,
) -> Result<Option<(String, i32)>, Error> {
    let replications: Api<RedisReplication> = Api::namespaced(ctx.client.clone(), namespace);
    let replication = match replications.get(&obj.spec.replication_ref).await {
        Ok(r) => r,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!(
                name = %obj.name_any(),
                replication = %obj.spec.replication_ref,
                "Monitored RedisReplication does not exist"
            );
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let readiness = statefulset_readiness(&ctx.client, namespace, &replication.name_any())
        .await?
        .unwrap_or_default();
    if !readiness.is_ready() || readiness.desired != replication.spec.size {
        return Ok(None);
    }

    let Some(master_pod) = replication
        .status
        .as_ref()
        .and_then(|s| s.master_node.clone())
    else {
        return Ok(None);
    };

    // Stable per-pod DNS name through the replication headless service.
    let host = format!(
        "{}.{}-headless.{}.svc",
        master_pod,
        replication.name_any(),
        namespace
    );
    Ok(Some((host, replication.spec.port)))
}

/// Error policy for the sentinel controller
pub fn error_policy(obj: Arc<RedisSentinel>, error: &Error, ctx: Arc<Context>) -> Action {
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
