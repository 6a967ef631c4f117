//! Controllers for redis-operator.
//!
//! One reconciler per CRD, sharing the same context, error taxonomy, phase
//! pipeline, finalizer handling and change-gated status writes:
//! - `standalone`: Redis
//! - `cluster`: RedisCluster
//! - `replication`: RedisReplication
//! - `sentinel`: RedisSentinel

// Shared modules
pub mod common;
pub mod context;
pub mod error;
pub mod finalizer;
pub mod phases;
pub mod status;

// Per-topology reconcilers
pub mod cluster;
pub mod replication;
pub mod sentinel;
pub mod standalone;
