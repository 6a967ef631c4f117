//! Master election and failover for replication groups.
//!
//! A replication group has no sentinel quorum; the operator itself detects a
//! lost master, promotes the best replica and re-points everyone else. All
//! member access goes through [`ReplicaAdmin`] so election and promotion
//! ordering can be tested against canned member states.

use std::time::Duration;

use futures::future::join_all;
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::client::parsing::ReplicationInfo;
use crate::crd::RedisReplication;

/// Errors from replication failover operations.
#[derive(Error, Debug)]
pub enum FailoverError {
    #[error("Member {pod} operation failed: {reason}")]
    Member { pod: String, reason: String },

    #[error("{} member operations failed: [{}]", .0.len(), .0.join("; "))]
    Aggregate(Vec<String>),

    #[error("No replica is eligible for promotion (all have priority 0)")]
    NoPromotionCandidate,

    #[error("Replica {pod} did not report master role within {elapsed:?}")]
    PromotionTimeout { pod: String, elapsed: Duration },
}

/// Administrative access to members of a replication group.
pub trait ReplicaAdmin {
    /// Raw INFO REPLICATION output of the member.
    fn replication_info(
        &self,
        pod: &str,
    ) -> impl std::future::Future<Output = Result<String, FailoverError>> + Send;

    /// SLAVEOF host port followed by a normal-client disconnect, so regular
    /// clients re-discover the topology on reconnect.
    fn replica_of(
        &self,
        pod: &str,
        host: &str,
        port: u16,
    ) -> impl std::future::Future<Output = Result<(), FailoverError>> + Send;

    /// SLAVEOF NO ONE followed by a normal-client disconnect.
    fn promote(&self, pod: &str)
    -> impl std::future::Future<Output = Result<(), FailoverError>> + Send;

    /// Current IP address of the member pod.
    fn pod_ip(&self, pod: &str)
    -> impl std::future::Future<Output = Result<String, FailoverError>> + Send;
}

/// Immutable description of the replication group, captured once per pass.
#[derive(Debug, Clone)]
pub struct ReplicationTarget {
    pub name: String,
    pub namespace: String,
    pub port: u16,
    pub size: i32,
}

impl ReplicationTarget {
    pub fn from_resource(replication: &RedisReplication) -> Self {
        Self {
            name: replication.name_any(),
            namespace: replication.namespace().unwrap_or_default(),
            port: replication.spec.port as u16,
            size: replication.spec.size,
        }
    }

    pub fn pod(&self, index: i32) -> String {
        format!("{}-{}", self.name, index)
    }
}

/// One member's observed replication state, derived per pass.
#[derive(Debug, Clone)]
pub struct MemberState {
    pub pod: String,
    /// Pod IP, the address masters list their replicas under.
    pub address: String,
    pub info: ReplicationInfo,
}

impl MemberState {
    pub fn is_master(&self) -> bool {
        self.info.is_master()
    }

    pub fn is_replica(&self) -> bool {
        self.info.is_replica()
    }
}

/// Pick the authoritative master: the first master-role member with at least
/// one connected replica.
///
/// `None` with eligible replicas present signals a lost master needing
/// promotion. With no eligible replica anywhere (initial bootstrap, all
/// standalone masters) the first member in list order is chosen.
pub fn select_master(members: &[MemberState]) -> Option<&MemberState> {
    for member in members {
        if member.is_replica() {
            continue;
        }
        if member.info.connected_slaves > 0 {
            return Some(member);
        }
    }

    // Priority 0 marks a replica that must never be promoted.
    if members
        .iter()
        .any(|m| m.is_replica() && m.info.priority() != 0)
    {
        return None;
    }

    members.first()
}

/// Real-master discovery for status projection: like [`select_master`] but
/// falling back to the first master-role member instead of the first member.
pub fn real_master(members: &[MemberState]) -> Option<&MemberState> {
    members
        .iter()
        .filter(|m| m.is_master())
        .find(|m| m.info.connected_slaves > 0)
        .or_else(|| members.iter().find(|m| m.is_master()))
}

/// Promotion candidates in promotion order: ascending priority, then
/// descending replication offset.
fn promotion_candidates(members: &[MemberState]) -> Vec<&MemberState> {
    let mut candidates: Vec<&MemberState> = members
        .iter()
        .filter(|m| m.is_replica() && m.info.priority() != 0)
        .collect();
    candidates.sort_by(|a, b| {
        a.info
            .priority()
            .cmp(&b.info.priority())
            .then(b.info.replication_offset().cmp(&a.info.replication_offset()))
    });
    candidates
}

/// Bounded polling parameters for promotion confirmation. Injectable so
/// tests can shrink the window.
#[derive(Debug, Clone, Copy)]
pub struct PromotionPoll {
    pub initial: Duration,
    pub max_elapsed: Duration,
}

impl Default for PromotionPoll {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max_elapsed: Duration::from_secs(5),
        }
    }
}

/// Failover manager for one replication group, valid for one reconcile pass.
pub struct FailoverManager<'a, A: ReplicaAdmin> {
    admin: &'a A,
    target: &'a ReplicationTarget,
    poll: PromotionPoll,
}

impl<'a, A: ReplicaAdmin> FailoverManager<'a, A> {
    pub fn new(admin: &'a A, target: &'a ReplicationTarget) -> Self {
        Self {
            admin,
            target,
            poll: PromotionPoll::default(),
        }
    }

    pub fn with_poll(mut self, poll: PromotionPoll) -> Self {
        self.poll = poll;
        self
    }

    /// Query every member's replication info concurrently. Individual
    /// failures are collected and reported in aggregate; one slow or dead
    /// member does not abort the refresh of the others.
    #[instrument(skip(self), fields(group = %self.target.name))]
    pub async fn refresh(&self) -> Result<Vec<MemberState>, FailoverError> {
        let fetches = (0..self.target.size).map(|i| {
            let pod = self.target.pod(i);
            async move {
                let address = self.admin.pod_ip(&pod).await.map_err(|e| e.to_string())?;
                let raw = self
                    .admin
                    .replication_info(&pod)
                    .await
                    .map_err(|e| e.to_string())?;
                let info = ReplicationInfo::parse(&raw);
                if info.role.is_none() {
                    return Err(format!("{}: no role in replication info", pod));
                }
                Ok(MemberState { pod, address, info })
            }
        });

        let mut members = Vec::with_capacity(self.target.size as usize);
        let mut failures = Vec::new();
        for result in join_all(fetches).await {
            match result {
                Ok(member) => members.push(member),
                Err(e) => failures.push(e),
            }
        }

        if failures.is_empty() {
            Ok(members)
        } else {
            Err(FailoverError::Aggregate(failures))
        }
    }

    /// Promote the best eligible replica and wait until it reports the
    /// master role, under a bounded exponential backoff.
    #[instrument(skip(self, members))]
    pub async fn promote_replica_to_master(
        &self,
        members: &[MemberState],
    ) -> Result<MemberState, FailoverError> {
        let candidates = promotion_candidates(members);
        let chosen = candidates
            .first()
            .copied()
            .ok_or(FailoverError::NoPromotionCandidate)?;

        info!(pod = %chosen.pod, priority = chosen.info.priority(),
              offset = chosen.info.replication_offset(), "Promoting replica to master");
        self.admin.promote(&chosen.pod).await?;

        let mut delay = self.poll.initial;
        let mut elapsed = Duration::ZERO;
        loop {
            let raw = self.admin.replication_info(&chosen.pod).await?;
            let info = ReplicationInfo::parse(&raw);
            if info.is_master() {
                return Ok(MemberState {
                    pod: chosen.pod.clone(),
                    address: chosen.address.clone(),
                    info,
                });
            }

            if elapsed >= self.poll.max_elapsed {
                return Err(FailoverError::PromotionTimeout {
                    pod: chosen.pod.clone(),
                    elapsed,
                });
            }

            debug!(pod = %chosen.pod, ?delay, "Waiting for promoted replica to report master role");
            tokio::time::sleep(delay).await;
            elapsed += delay;
            delay = (delay * 2).min(self.poll.max_elapsed);
        }
    }

    /// Point every member not already replicating from `master` at it,
    /// concurrently. Per-member failures are aggregated, never
    /// short-circuited.
    #[instrument(skip(self, members, master), fields(master = %master.pod))]
    pub async fn reconfigure_as_replicas_of(
        &self,
        members: &[MemberState],
        master: &MemberState,
    ) -> Result<(), FailoverError> {
        let connected: Vec<&str> = master
            .info
            .replicas
            .iter()
            .map(|r| r.host.as_str())
            .collect();

        let orphans: Vec<&MemberState> = members
            .iter()
            .filter(|m| m.pod != master.pod && !connected.contains(&m.address.as_str()))
            .collect();

        let reconfigures = orphans.iter().map(|member| async {
            self.admin
                .replica_of(&member.pod, &master.address, self.target.port)
                .await
                .map_err(|e| format!("{}: {}", member.pod, e))
        });

        let failures: Vec<String> = join_all(reconfigures)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FailoverError::Aggregate(failures))
        }
    }

    /// Top-level convergence: select the master, promote a replica when the
    /// master is lost, then re-point every orphaned member. Returns the
    /// converged master, if the group has any members at all.
    #[instrument(skip(self), fields(group = %self.target.name))]
    pub async fn reconfigure(&self) -> Result<Option<MemberState>, FailoverError> {
        let members = self.refresh().await?;
        if members.is_empty() {
            return Ok(None);
        }

        let master = match select_master(&members) {
            Some(master) => master.clone(),
            None => {
                warn!(group = %self.target.name, "Master lost, electing a replacement");
                self.promote_replica_to_master(&members).await?
            }
        };

        self.reconfigure_as_replicas_of(&members, &master).await?;
        Ok(Some(master))
    }
}
