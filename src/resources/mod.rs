//! Generation of the Kubernetes resources owned by each custom resource.
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | StatefulSet | Stable pod identity per topology |
//! | Headless Service | Peer discovery (publishNotReadyAddresses) |
//! | Client Services | Client access, role-routed for replication |
//! | PodDisruptionBudget | Keep majority / promotable replica during drains |

pub mod common;
pub mod pdb;
pub mod services;
pub mod workload;

pub use common::{ROLE_LABEL, owner_reference, standard_labels};
