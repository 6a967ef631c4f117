//! Shared controller helpers.

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{Patch, PatchParams},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::controller::context::{FIELD_MANAGER, SKIP_RECONCILE_ANNOTATION};
use crate::controller::error::Error;

/// Server-side apply of a generated resource.
pub async fn apply<K>(client: &Client, namespace: &str, obj: &K) -> Result<(), Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Serialize
        + Clone
        + DeserializeOwned
        + std::fmt::Debug,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    api.patch(
        &obj.name_any(),
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(obj),
    )
    .await?;
    Ok(())
}

/// Observed StatefulSet readiness.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadReadiness {
    pub ready: i32,
    pub desired: i32,
    /// Controller has observed the latest generation and finished rolling.
    pub settled: bool,
}

impl WorkloadReadiness {
    pub fn is_ready(&self) -> bool {
        self.ready >= self.desired && self.settled
    }
}

/// Fetch a StatefulSet's readiness; `None` when it does not exist yet.
pub async fn statefulset_readiness(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Option<WorkloadReadiness>, Error> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let sts = match api.get(name).await {
        Ok(sts) => sts,
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let status = sts.status.unwrap_or_default();
    let generation_observed = status.observed_generation == sts.metadata.generation;
    let revision_settled = status.update_revision == status.current_revision;

    Ok(Some(WorkloadReadiness {
        ready: status.ready_replicas.unwrap_or(0),
        desired,
        settled: generation_observed && revision_settled,
    }))
}

/// Whether reconciliation of this resource is suspended by annotation.
pub fn skip_reconcile<K: Resource>(resource: &K) -> bool {
    resource
        .annotations()
        .get(SKIP_RECONCILE_ANNOTATION)
        .is_some_and(|v| v == "true")
}
