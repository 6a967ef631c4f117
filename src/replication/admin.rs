//! Production [`ReplicaAdmin`] for replication group pods, sharing the pod
//! plumbing of [`PodMemberAdmin`].

use fred::types::InfoKind;

use crate::cluster::PodMemberAdmin;
use crate::cluster::topology::TopologyError;
use crate::replication::failover::{FailoverError, ReplicaAdmin};

fn into_failover(e: TopologyError) -> FailoverError {
    match e {
        TopologyError::Member { pod, reason } => FailoverError::Member { pod, reason },
        other => FailoverError::Member {
            pod: "<unknown>".to_string(),
            reason: other.to_string(),
        },
    }
}

impl ReplicaAdmin for PodMemberAdmin {
    async fn replication_info(&self, pod: &str) -> Result<String, FailoverError> {
        self.with_client(pod, async |c| c.info(Some(InfoKind::Replication)).await)
            .await
            .map_err(into_failover)
    }

    async fn replica_of(&self, pod: &str, host: &str, port: u16) -> Result<(), FailoverError> {
        self.with_client(pod, async |c| {
            c.slave_of(host, port).await?;
            c.client_kill_normal().await
        })
        .await
        .map_err(into_failover)
    }

    async fn promote(&self, pod: &str) -> Result<(), FailoverError> {
        self.with_client(pod, async |c| {
            c.slave_of_no_one().await?;
            c.client_kill_normal().await
        })
        .await
        .map_err(into_failover)
    }

    async fn pod_ip(&self, pod: &str) -> Result<String, FailoverError> {
        crate::cluster::topology::MemberAdmin::pod_ip(self, pod)
            .await
            .map_err(into_failover)
    }
}
