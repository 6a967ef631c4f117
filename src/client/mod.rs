//! Redis member access for topology management.
//!
//! This module provides the low-level plumbing the topology and failover
//! managers build on:
//!
//! - `redis_client`: per-member admin client (fred) with TLS support
//! - `exec`: `redis-cli` execution inside member pods and pod IP lookup
//! - `types`: parsed CLUSTER NODES output (nodes, flags, slot ranges)
//! - `parsing`: INFO output and `--cluster check` parsing

pub mod exec;
pub mod parsing;
pub mod redis_client;
pub mod types;

pub use exec::{ExecError, PodExecutor};
pub use parsing::{
    ConnectedReplica, ReplicationInfo, cluster_check_healthy, count_cluster_check_ok,
    parse_info_output,
};
pub use redis_client::{RedisClient, RedisError, TlsCertData};
pub use types::{ClusterNode, NodeFlags, NodeTable, ParseError, SlotRange};
