//! Redis Cluster topology management.
//!
//! All convergence actions for the cluster topology live here: slot
//! bootstrap, node joins, resharding, rebalancing, scale-down failover and
//! gossip repair. Operations are issued through a [`MemberAdmin`] so tests
//! can run the exact production sequencing against a recording fake.
//!
//! Leader-0 is the anchor member: node listings, joins and removals are
//! always issued against it, so every pass observes one consistent view of
//! the cluster.

use std::collections::BTreeMap;

use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::client::parsing::{ReplicationInfo, cluster_check_healthy};
use crate::client::types::{NodeTable, ParseError};
use crate::crd::{ClusterRole, ClusterVersion, RedisCluster, TOTAL_HASH_SLOTS};

/// Errors from topology operations.
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Member {pod} operation failed: {reason}")]
    Member { pod: String, reason: String },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{} member operations failed: [{}]", .0.len(), .0.join("; "))]
    Aggregate(Vec<String>),
}

/// Administrative access to individual cluster members.
///
/// One implementation talks to live pods (RESP commands plus `redis-cli`
/// execution inside the pod); tests substitute a recording fake.
pub trait MemberAdmin {
    /// PING the member; true on PONG.
    fn ping(&self, pod: &str) -> impl std::future::Future<Output = Result<bool, TopologyError>> + Send;

    /// CLUSTER MYID of the member.
    fn node_id(&self, pod: &str)
    -> impl std::future::Future<Output = Result<String, TopologyError>> + Send;

    /// Raw CLUSTER NODES output as seen by the member.
    fn cluster_nodes(
        &self,
        pod: &str,
    ) -> impl std::future::Future<Output = Result<String, TopologyError>> + Send;

    /// CLUSTER MEET issued on the member.
    fn cluster_meet(
        &self,
        pod: &str,
        ip: &str,
        port: u16,
    ) -> impl std::future::Future<Output = Result<(), TopologyError>> + Send;

    /// CLUSTER RESET (soft) on the member.
    fn cluster_reset(
        &self,
        pod: &str,
    ) -> impl std::future::Future<Output = Result<(), TopologyError>> + Send;

    /// FLUSHALL on the member.
    fn flushall(&self, pod: &str)
    -> impl std::future::Future<Output = Result<(), TopologyError>> + Send;

    /// Raw INFO REPLICATION output of the member.
    fn replication_info(
        &self,
        pod: &str,
    ) -> impl std::future::Future<Output = Result<String, TopologyError>> + Send;

    /// CONFIG SET on the member.
    fn config_set(
        &self,
        pod: &str,
        parameter: &str,
        value: &str,
    ) -> impl std::future::Future<Output = Result<(), TopologyError>> + Send;

    /// Run a `redis-cli` invocation inside the member pod, returning stdout.
    fn run_cli(
        &self,
        pod: &str,
        args: Vec<String>,
    ) -> impl std::future::Future<Output = Result<String, TopologyError>> + Send;

    /// Current IP address of the member pod.
    fn pod_ip(&self, pod: &str)
    -> impl std::future::Future<Output = Result<String, TopologyError>> + Send;
}

/// Immutable description of the cluster a manager operates on, captured once
/// per reconcile pass.
#[derive(Debug, Clone)]
pub struct ClusterTarget {
    pub name: String,
    pub namespace: String,
    pub port: u16,
    /// v7 announces hostnames, so CLI addresses use pod FQDNs instead of IPs.
    pub hostname_addressing: bool,
    pub password: Option<String>,
    pub tls: bool,
    pub desired_leaders: i32,
    pub desired_followers: i32,
}

impl ClusterTarget {
    pub fn from_resource(cluster: &RedisCluster, password: Option<String>) -> Self {
        Self {
            name: cluster.name_any(),
            namespace: cluster.namespace().unwrap_or_default(),
            port: cluster.spec.port as u16,
            hostname_addressing: cluster.spec.cluster_version == ClusterVersion::V7,
            password,
            tls: cluster.spec.tls.is_some(),
            desired_leaders: cluster.spec.leader_replicas,
            desired_followers: cluster.spec.follower_replicas,
        }
    }

    pub fn leader_pod(&self, index: i32) -> String {
        format!("{}-leader-{}", self.name, index)
    }

    pub fn follower_pod(&self, index: i32) -> String {
        format!("{}-follower-{}", self.name, index)
    }

    pub fn pod(&self, role: ClusterRole, index: i32) -> String {
        match role {
            ClusterRole::Leader => self.leader_pod(index),
            ClusterRole::Follower => self.follower_pod(index),
        }
    }

    pub fn desired_replicas(&self, role: ClusterRole) -> i32 {
        match role {
            ClusterRole::Leader => self.desired_leaders,
            ClusterRole::Follower => self.desired_followers,
        }
    }

    /// Headless-service FQDN for a member pod.
    pub fn pod_fqdn(&self, pod: &str, role: ClusterRole) -> String {
        format!(
            "{}.{}-{}-headless.{}.svc",
            pod, self.name, role, self.namespace
        )
    }

    fn auth_args(&self) -> Vec<String> {
        match &self.password {
            Some(pass) => vec!["-a".to_string(), pass.clone()],
            None => Vec::new(),
        }
    }

    fn tls_args(&self, client_host: &str) -> Vec<String> {
        if self.tls {
            vec![
                "--tls".to_string(),
                "--cacert".to_string(),
                "/tls/ca.crt".to_string(),
                "-h".to_string(),
                client_host.to_string(),
            ]
        } else {
            Vec::new()
        }
    }
}

/// Topology manager for one cluster resource, valid for one reconcile pass.
pub struct TopologyManager<'a, A: MemberAdmin> {
    admin: &'a A,
    target: &'a ClusterTarget,
}

impl<'a, A: MemberAdmin> TopologyManager<'a, A> {
    pub fn new(admin: &'a A, target: &'a ClusterTarget) -> Self {
        Self { admin, target }
    }

    fn anchor(&self) -> String {
        self.target.leader_pod(0)
    }

    /// CLI address of a member: FQDN for hostname-announcing clusters, pod
    /// IP otherwise.
    async fn address(&self, pod: &str, role: ClusterRole) -> Result<String, TopologyError> {
        let host = if self.target.hostname_addressing {
            self.target.pod_fqdn(pod, role)
        } else {
            self.admin.pod_ip(pod).await?
        };
        Ok(format!("{}:{}", host, self.target.port))
    }

    /// Parsed node table as seen by the anchor.
    pub async fn node_table(&self) -> Result<NodeTable, TopologyError> {
        let raw = self.admin.cluster_nodes(&self.anchor()).await?;
        Ok(NodeTable::parse(&raw)?)
    }

    /// Count of cluster members; `None` counts every node.
    #[instrument(skip(self))]
    pub async fn node_count(&self, role: Option<ClusterRole>) -> Result<usize, TopologyError> {
        let table = self.node_table().await?;
        let count = match role {
            Some(ClusterRole::Leader) => table.count_role("master"),
            Some(ClusterRole::Follower) => table.count_role("slave"),
            None => table.count_role(""),
        };
        debug!(count, ?role, "Counted cluster nodes");
        Ok(count)
    }

    /// Nodes flagged failed or with a disconnected bus link.
    pub async fn unhealthy_node_count(&self) -> Result<usize, TopologyError> {
        Ok(self.node_table().await?.unhealthy_count())
    }

    /// Bootstrap the cluster once every member pod is ready.
    ///
    /// A single-leader cluster gets all slots assigned to leader-0 in one
    /// command; with more leaders desired, a `--cluster create` covers
    /// every leader at once. Followers attach afterwards either way.
    #[instrument(skip(self), fields(cluster = %self.target.name))]
    pub async fn bootstrap(&self) -> Result<(), TopologyError> {
        if self.target.desired_leaders <= 1 {
            self.assign_all_slots().await
        } else {
            self.create_cluster().await
        }
    }

    /// Assign the full slot space to leader-0.
    async fn assign_all_slots(&self) -> Result<(), TopologyError> {
        // The lone leader may carry cluster state from a previous life.
        self.admin.cluster_reset(&self.anchor()).await?;

        let mut cmd = vec![
            "redis-cli".to_string(),
            "CLUSTER".to_string(),
            "ADDSLOTS".to_string(),
        ];
        for slot in 0..TOTAL_HASH_SLOTS {
            cmd.push(slot.to_string());
        }
        cmd.extend(self.target.auth_args());
        cmd.extend(self.target.tls_args(&self.anchor()));

        info!(slots = TOTAL_HASH_SLOTS, "Assigning all slots to leader-0");
        self.admin.run_cli(&self.anchor(), cmd).await?;
        Ok(())
    }

    /// `--cluster create` over every desired leader address.
    async fn create_cluster(&self) -> Result<(), TopologyError> {
        let mut cmd = vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "create".to_string(),
        ];
        for i in 0..self.target.desired_leaders {
            let pod = self.target.leader_pod(i);
            cmd.push(self.address(&pod, ClusterRole::Leader).await?);
        }
        cmd.push("--cluster-yes".to_string());
        cmd.extend(self.target.auth_args());
        cmd.extend(self.target.tls_args(&self.anchor()));

        info!(
            leaders = self.target.desired_leaders,
            "Creating cluster over all leaders"
        );
        self.admin.run_cli(&self.anchor(), cmd).await?;
        Ok(())
    }

    /// Join the next leader (index = current live leader count) to the
    /// cluster through the anchor.
    #[instrument(skip(self))]
    pub async fn add_node(&self) -> Result<(), TopologyError> {
        let live_leaders = self.node_count(Some(ClusterRole::Leader)).await? as i32;
        let new_pod = self.target.leader_pod(live_leaders);
        let new_addr = self.address(&new_pod, ClusterRole::Leader).await?;
        let anchor_addr = self.address(&self.anchor(), ClusterRole::Leader).await?;

        let mut cmd = vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "add-node".to_string(),
            new_addr,
            anchor_addr,
        ];
        cmd.extend(self.target.auth_args());
        cmd.extend(self.target.tls_args(&self.anchor()));

        info!(pod = %new_pod, "Adding leader node to cluster");
        self.admin.run_cli(&self.anchor(), cmd).await?;
        Ok(())
    }

    /// Attach every follower to a leader chosen by index modulo leader
    /// count. Followers already present in the node table, or not answering
    /// PING yet, are skipped.
    #[instrument(skip(self))]
    pub async fn attach_followers(&self) -> Result<(), TopologyError> {
        let table = self.node_table().await?;

        for idx in 0..self.target.desired_followers {
            let follower_pod = self.target.follower_pod(idx);
            let leader_pod = self
                .target
                .leader_pod(idx % self.target.desired_leaders.max(1));

            let follower_ip = self.admin.pod_ip(&follower_pod).await?;
            let follower_fqdn = self.target.pod_fqdn(&follower_pod, ClusterRole::Follower);
            if table.get_by_host(&follower_ip).is_some()
                || table.get_by_host(&follower_fqdn).is_some()
            {
                debug!(pod = %follower_pod, "Follower already joined, skipping");
                continue;
            }

            if !self.admin.ping(&follower_pod).await.unwrap_or(false) {
                debug!(pod = %follower_pod, "Follower not answering PING, skipping");
                continue;
            }

            let follower_addr = self.address(&follower_pod, ClusterRole::Follower).await?;
            let leader_addr = self.address(&leader_pod, ClusterRole::Leader).await?;

            let mut cmd = vec![
                "redis-cli".to_string(),
                "--cluster".to_string(),
                "add-node".to_string(),
                follower_addr,
                leader_addr,
                "--cluster-slave".to_string(),
            ];
            cmd.extend(self.target.auth_args());
            cmd.extend(self.target.tls_args(&self.anchor()));

            info!(follower = %follower_pod, leader = %leader_pod, "Attaching follower");
            self.admin.run_cli(&self.anchor(), cmd).await?;
        }
        Ok(())
    }

    /// Move every slot owned by the highest-indexed leader to leader-0.
    ///
    /// A removal target owning zero slots makes the reshard a logged no-op;
    /// with `remove` set, node removal follows the transfer.
    #[instrument(skip(self))]
    pub async fn reshard(&self, remove: bool) -> Result<(), TopologyError> {
        let live_leaders = self.node_count(Some(ClusterRole::Leader)).await? as i32;
        let remove_pod = self.target.leader_pod(live_leaders - 1);

        let remove_id = self.admin.node_id(&remove_pod).await?;
        let transfer_id = self.admin.node_id(&self.anchor()).await?;
        let slots = self.node_table().await?.slot_count_of(&remove_id);

        if slots == 0 {
            info!(pod = %remove_pod, "Removal target owns no slots, skipping reshard");
        } else {
            let anchor_addr = self.address(&self.anchor(), ClusterRole::Leader).await?;
            let mut cmd = vec![
                "redis-cli".to_string(),
                "--cluster".to_string(),
                "reshard".to_string(),
                anchor_addr,
            ];
            cmd.extend(self.target.auth_args());
            cmd.extend(self.target.tls_args(&self.anchor()));
            cmd.extend([
                "--cluster-from".to_string(),
                remove_id.clone(),
                "--cluster-to".to_string(),
                transfer_id,
                "--cluster-slots".to_string(),
                slots.to_string(),
                "--cluster-yes".to_string(),
            ]);

            info!(from = %remove_pod, slots, "Resharding slots to leader-0");
            self.admin.run_cli(&self.anchor(), cmd).await?;
        }

        if remove {
            self.remove_node(&remove_pod).await?;
        }
        Ok(())
    }

    /// Detach every replica of the highest-indexed leader.
    #[instrument(skip(self))]
    pub async fn remove_follower_nodes(&self) -> Result<(), TopologyError> {
        let live_leaders = self.node_count(Some(ClusterRole::Leader)).await? as i32;
        let last_leader = self.target.leader_pod(live_leaders - 1);

        let leader_id = self.admin.node_id(&last_leader).await?;
        let table = self.node_table().await?;
        let follower_ids: Vec<String> = table
            .replicas_of(&leader_id)
            .iter()
            .map(|n| n.node_id.clone())
            .collect();

        let anchor_addr = self.address(&self.anchor(), ClusterRole::Leader).await?;
        for follower_id in follower_ids {
            let mut cmd = vec![
                "redis-cli".to_string(),
                "--cluster".to_string(),
                "del-node".to_string(),
                anchor_addr.clone(),
                follower_id.clone(),
            ];
            cmd.extend(self.target.auth_args());
            cmd.extend(self.target.tls_args(&self.anchor()));

            info!(leader = %last_leader, follower_id = %follower_id, "Removing follower node");
            self.admin.run_cli(&self.anchor(), cmd).await?;
        }
        Ok(())
    }

    /// Remove a node from the cluster. Guarded: a node still owning slots is
    /// never removed.
    #[instrument(skip(self))]
    pub async fn remove_node(&self, pod: &str) -> Result<(), TopologyError> {
        let node_id = self.admin.node_id(pod).await?;
        let slots = self.node_table().await?.slot_count_of(&node_id);
        if slots != 0 {
            warn!(pod = %pod, slots, "Node still owns slots, refusing removal");
            return Ok(());
        }

        let anchor_addr = self.address(&self.anchor(), ClusterRole::Leader).await?;
        let mut cmd = vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "del-node".to_string(),
            anchor_addr,
            node_id,
        ];
        cmd.extend(self.target.auth_args());
        cmd.extend(self.target.tls_args(&self.anchor()));

        info!(pod = %pod, "Removing node from cluster");
        self.admin.run_cli(&self.anchor(), cmd).await?;
        Ok(())
    }

    /// Rebalance slot ownership. The empty-masters variant only moves slots
    /// onto masters owning zero slots and is the cheap post-scale-up repair.
    #[instrument(skip(self))]
    pub async fn rebalance(&self, use_empty_masters: bool) -> Result<(), TopologyError> {
        // Anchored at leader-1 so the rebalance coordinator is not also the
        // usual transfer target.
        let pod = if self.target.desired_leaders > 1 {
            self.target.leader_pod(1)
        } else {
            self.anchor()
        };
        let addr = self.address(&pod, ClusterRole::Leader).await?;

        let mut cmd = vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "rebalance".to_string(),
            addr,
        ];
        if use_empty_masters {
            cmd.push("--cluster-use-empty-masters".to_string());
        }
        cmd.extend(self.target.auth_args());
        cmd.extend(self.target.tls_args(&self.anchor()));

        info!(use_empty_masters, "Rebalancing cluster");
        self.admin.run_cli(&pod, cmd).await?;
        Ok(())
    }

    /// Trigger the empty-masters rebalance when any master owns zero slots.
    #[instrument(skip(self))]
    pub async fn check_if_empty_masters(&self) -> Result<(), TopologyError> {
        let table = self.node_table().await?;
        if !table.empty_masters().is_empty() {
            info!(
                empty = table.empty_masters().len(),
                "Found masters owning no slots"
            );
            self.rebalance(true).await?;
        }
        Ok(())
    }

    /// True when the highest-indexed live leader currently has the master
    /// role.
    #[instrument(skip(self))]
    pub async fn verify_last_leader_is_master(&self) -> Result<bool, TopologyError> {
        let live_leaders = self.node_count(Some(ClusterRole::Leader)).await? as i32;
        let pod = self.target.leader_pod(live_leaders - 1);
        let info = self.admin.replication_info(&pod).await?;
        Ok(ReplicationInfo::parse(&info).is_master())
    }

    /// CLUSTER FAILOVER on the highest-indexed live leader, promoting it
    /// back to master before shrink removes it.
    #[instrument(skip(self))]
    pub async fn cluster_failover(&self) -> Result<(), TopologyError> {
        let live_leaders = self.node_count(Some(ClusterRole::Leader)).await? as i32;
        let pod = self.target.leader_pod(live_leaders - 1);
        let addr = self.address(&pod, ClusterRole::Leader).await?;

        let mut cmd = vec![
            "redis-cli".to_string(),
            "cluster".to_string(),
            "failover".to_string(),
            addr,
        ];
        cmd.extend(self.target.auth_args());
        cmd.extend(self.target.tls_args(&pod));

        info!(pod = %pod, "Issuing cluster failover");
        self.admin.run_cli(&pod, cmd).await?;
        Ok(())
    }

    /// Scale down to the desired leader count.
    ///
    /// Per excess leader, highest index first: ensure it is currently
    /// master (failover if not), detach its followers, then reshard its
    /// slots to leader-0 and remove it. One full rebalance closes the
    /// sequence.
    #[instrument(skip(self), fields(desired = desired_leaders))]
    pub async fn scale_down(&self, desired_leaders: i32) -> Result<(), TopologyError> {
        let live_leaders = self.node_count(Some(ClusterRole::Leader)).await? as i32;
        let excess = live_leaders - desired_leaders;
        if excess <= 0 {
            return Ok(());
        }

        for _ in 0..excess {
            if !self.verify_last_leader_is_master().await? {
                self.cluster_failover().await?;
            }
            self.remove_follower_nodes().await?;
            self.reshard(true).await?;
        }

        self.rebalance(false).await
    }

    /// Full cluster reset across every member, used when most of the
    /// cluster is failed. FLUSHALL clears members that refuse a reset while
    /// still holding keys.
    #[instrument(skip(self))]
    pub async fn node_failover(&self) -> Result<(), TopologyError> {
        for role in ClusterRole::ALL {
            for i in 0..self.target.desired_replicas(role) {
                let pod = self.target.pod(role, i);
                if self.admin.cluster_reset(&pod).await.is_err() {
                    self.admin.flushall(&pod).await?;
                    self.admin.cluster_reset(&pod).await?;
                }
            }
        }
        Ok(())
    }

    /// Re-introduce failed or disconnected masters via CLUSTER MEET with
    /// their re-resolved pod IPs, healing stale gossip after pod restarts.
    #[instrument(skip(self))]
    pub async fn repair_disconnected_masters(&self) -> Result<(), TopologyError> {
        let table = self.node_table().await?;
        let mut failures = Vec::new();

        for node in table.unhealthy_masters() {
            // The announced host may be a bare pod name or a FQDN.
            let pod = match node.host.split('.').next() {
                Some(pod) if !pod.is_empty() => pod.to_string(),
                _ => {
                    failures.push(format!(
                        "node {} has no resolvable host: {}",
                        node.node_id, node.host
                    ));
                    continue;
                }
            };

            let result = async {
                let ip = self.admin.pod_ip(&pod).await?;
                self.admin
                    .cluster_meet(&self.anchor(), &ip, self.target.port)
                    .await
            }
            .await;

            if let Err(e) = result {
                warn!(pod = %pod, error = %e, "Failed to repair master, continuing");
                failures.push(format!("{}: {}", pod, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TopologyError::Aggregate(failures))
        }
    }

    /// Cluster self-check through `--cluster check`; healthy iff exactly
    /// three `[OK]` assertions appear.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<bool, TopologyError> {
        let mut cmd = vec![
            "redis-cli".to_string(),
            "--cluster".to_string(),
            "check".to_string(),
            format!("127.0.0.1:{}", self.target.port),
        ];
        cmd.extend(self.target.auth_args());
        cmd.extend(self.target.tls_args(&self.anchor()));

        let output = self.admin.run_cli(&self.anchor(), cmd).await?;
        Ok(cluster_check_healthy(&output))
    }

    /// Apply dynamic configuration parameters to every member.
    #[instrument(skip(self, parameters))]
    pub async fn set_dynamic_config(
        &self,
        parameters: &BTreeMap<String, String>,
    ) -> Result<(), TopologyError> {
        if parameters.is_empty() {
            return Ok(());
        }

        let mut failures = Vec::new();
        for role in ClusterRole::ALL {
            for i in 0..self.target.desired_replicas(role) {
                let pod = self.target.pod(role, i);
                for (parameter, value) in parameters {
                    if let Err(e) = self.admin.config_set(&pod, parameter, value).await {
                        failures.push(format!("{} {}: {}", pod, parameter, e));
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TopologyError::Aggregate(failures))
        }
    }
}
