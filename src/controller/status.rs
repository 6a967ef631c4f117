//! Status projection.
//!
//! Status is computed every pass but written only when it differs from the
//! stored value, so steady-state reconciles issue zero status writes and
//! cannot hot-loop on their own status updates.

use kube::{
    Api, Resource,
    api::{Patch, PatchParams},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::controller::error::Error;

/// Patch the status subresource when `next` differs from `current`.
/// Returns whether a write was issued.
pub async fn patch_status_if_changed<K, S>(
    api: &Api<K>,
    name: &str,
    current: Option<&S>,
    next: &S,
) -> Result<bool, Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    S: PartialEq + Serialize,
{
    if current == Some(next) {
        debug!(name = %name, "Status unchanged, skipping write");
        return Ok(false);
    }

    let patch = serde_json::json!({ "status": next });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(true)
}
