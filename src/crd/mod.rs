//! Custom Resource Definitions (CRDs) for redis-operator.
//!
//! - `Redis`: standalone single-instance deployments
//! - `RedisCluster`: sharded cluster topology (leaders + followers)
//! - `RedisReplication`: master/replica group with operator-driven failover
//! - `RedisSentinel`: sentinel quorum monitoring a RedisReplication

mod common;
mod redis;
mod redis_cluster;
mod redis_replication;
mod redis_sentinel;

pub use common::*;
pub use redis::*;
pub use redis_cluster::*;
pub use redis_replication::*;
pub use redis_sentinel::*;
