//! Replication group failover: quorum-free master election, replica
//! promotion and mass re-pointing for RedisReplication resources.

pub mod admin;
pub mod failover;

pub use failover::{
    FailoverError, FailoverManager, MemberState, PromotionPoll, ReplicaAdmin, ReplicationTarget,
    real_master, select_master,
};
