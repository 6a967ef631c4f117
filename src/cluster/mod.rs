//! Cluster topology management: bootstrap, joins, resharding, rebalancing,
//! scale-down failover and gossip repair for RedisCluster resources.

pub mod admin;
pub mod topology;

pub use admin::PodMemberAdmin;
pub use topology::{ClusterTarget, MemberAdmin, TopologyError, TopologyManager};
