//! Reconciliation loop for standalone Redis resources.

use std::sync::Arc;
use std::time::Instant;

use kube::{Api, ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::common::{apply, skip_reconcile, statefulset_readiness};
use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::controller::finalizer::{
    STANDALONE_FINALIZER, delete_pvcs, ensure_finalizer, remove_finalizer, standalone_pvc_names,
};
use crate::controller::phases::{REQUEUE_CONVERGING, REQUEUE_STEADY};
use crate::controller::status::patch_status_if_changed;
use crate::crd::{Redis, RedisStatus, StandaloneState};
use crate::resources::{services, workload};

const KIND: &str = "Redis";

/// Reconcile a standalone Redis.
pub async fn reconcile(obj: Arc<Redis>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling Redis");
    let api: Api<Redis> = Api::namespaced(ctx.client.clone(), &namespace);

    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx, &api, &namespace).await;
    }

    if skip_reconcile(obj.as_ref()) {
        debug!(name = %name, "Reconciliation suspended by annotation");
        return Ok(Action::requeue(REQUEUE_STEADY));
    }

    if ensure_finalizer(&api, &name, STANDALONE_FINALIZER).await? {
        info!(name = %name, "Added finalizer");
        return Ok(Action::requeue(std::time::Duration::from_secs(1)));
    }

    apply(&ctx.client, &namespace, &workload::generate_standalone_statefulset(&obj)).await?;
    for service in services::generate_standalone_services(&obj) {
        apply(&ctx.client, &namespace, &service).await?;
    }

    let readiness = statefulset_readiness(&ctx.client, &namespace, &name)
        .await?
        .unwrap_or_default();
    let state = if readiness.is_ready() && readiness.desired == 1 {
        StandaloneState::Ready
    } else {
        StandaloneState::Initializing
    };

    let next = RedisStatus { state };
    if patch_status_if_changed(&api, &name, obj.status.as_ref(), &next).await?
        && state == StandaloneState::Ready
    {
        ctx.publish_normal_event(obj.as_ref(), "Ready", "Reconciling", None)
            .await;
    }

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            KIND,
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
        health_state
            .metrics
            .set_replicas(KIND, &namespace, &name, 1, i64::from(readiness.ready));
    }

    match state {
        StandaloneState::Ready => Ok(Action::requeue(REQUEUE_STEADY)),
        StandaloneState::Initializing => Ok(Action::requeue(REQUEUE_CONVERGING)),
    }
}

async fn handle_deletion(
    obj: &Redis,
    ctx: &Context,
    api: &Api<Redis>,
    namespace: &str,
) -> Result<Action, Error> {
    let name = obj.name_any();
    info!(name = %name, "Handling deletion");

    if obj.finalizers().iter().any(|f| f == STANDALONE_FINALIZER) {
        if obj.spec.storage.enabled && !obj.spec.storage.keep_after_delete {
            delete_pvcs(ctx.client.clone(), namespace, &standalone_pvc_names(obj)).await?;
        }
        remove_finalizer(api, &name, STANDALONE_FINALIZER).await?;
    }

    Ok(Action::await_change())
}

/// Error policy for the standalone controller
pub fn error_policy(obj: Arc<Redis>, error: &Error, ctx: Arc<Context>) -> Action {
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
