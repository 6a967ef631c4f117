//! Parsed representations of Redis cluster command output.
//!
//! The topology manager never looks at raw `CLUSTER NODES` text; everything
//! goes through [`NodeTable`].

use thiserror::Error;

/// Errors that can occur when parsing cluster data.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid cluster nodes format: {0}")]
    InvalidClusterNodes(String),
    #[error("Invalid slot range: {0}")]
    InvalidSlotRange(String),
}

/// Flags column of a `CLUSTER NODES` row.
#[derive(Debug, Clone, Default)]
pub struct NodeFlags {
    /// This is the node that produced the listing.
    pub myself: bool,
    /// Node is a master.
    pub master: bool,
    /// Node is a replica.
    pub slave: bool,
    /// Node is in PFAIL state (suspected failed).
    pub pfail: bool,
    /// Node is in FAIL state (agreed failed).
    pub fail: bool,
    /// Node is in handshake state.
    pub handshake: bool,
    /// Node has no known address.
    pub noaddr: bool,
}

impl NodeFlags {
    /// Parse the comma-separated flags column.
    pub fn parse(flags_str: &str) -> Self {
        let mut flags = NodeFlags::default();
        for flag in flags_str.split(',') {
            match flag.trim() {
                "myself" => flags.myself = true,
                "master" => flags.master = true,
                "slave" => flags.slave = true,
                "pfail" => flags.pfail = true,
                "fail" => flags.fail = true,
                "handshake" => flags.handshake = true,
                "noaddr" => flags.noaddr = true,
                _ => {}
            }
        }
        flags
    }
}

/// A contiguous hash slot range owned by a master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    /// Start of the range (inclusive).
    pub start: i32,
    /// End of the range (inclusive).
    pub end: i32,
}

impl SlotRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn single(slot: i32) -> Self {
        Self {
            start: slot,
            end: slot,
        }
    }

    /// Number of slots in this range.
    pub fn count(&self) -> i32 {
        self.end - self.start + 1
    }

    /// Parse a slot range token ("0-5460" or "5461").
    ///
    /// Migration markers ("[slot->-node]" / "[slot-<-node]") are rejected;
    /// a slot mid-migration does not count as owned.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if s.starts_with('[') {
            return Err(ParseError::InvalidSlotRange(format!(
                "slot in migration: {}",
                s
            )));
        }

        if let Some((start_str, end_str)) = s.split_once('-') {
            let start = start_str.parse().map_err(|_| {
                ParseError::InvalidSlotRange(format!("invalid start slot: {}", start_str))
            })?;
            let end = end_str.parse().map_err(|_| {
                ParseError::InvalidSlotRange(format!("invalid end slot: {}", end_str))
            })?;
            Ok(SlotRange::new(start, end))
        } else {
            let slot = s
                .parse()
                .map_err(|_| ParseError::InvalidSlotRange(format!("invalid slot: {}", s)))?;
            Ok(SlotRange::single(slot))
        }
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// One row of `CLUSTER NODES` output.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    /// Unique node ID (40 hex characters).
    pub node_id: String,
    /// Host (IP or announced hostname) without ports.
    pub host: String,
    /// Client port.
    pub port: i32,
    /// Node flags.
    pub flags: NodeFlags,
    /// Master node ID if this is a replica.
    pub master_id: Option<String>,
    /// Ping sent timestamp.
    pub ping_sent: i64,
    /// Pong received timestamp.
    pub pong_recv: i64,
    /// Config epoch.
    pub config_epoch: i64,
    /// Link state column ("connected" or "disconnected").
    pub link_state: String,
    /// Slot ranges owned by this node (masters only).
    pub slots: Vec<SlotRange>,
}

impl ClusterNode {
    pub fn is_master(&self) -> bool {
        self.flags.master
    }

    pub fn is_replica(&self) -> bool {
        self.flags.slave
    }

    /// A node is unhealthy when its peers agree it failed or the cluster
    /// bus link to it is down. This is what drives the repair path.
    pub fn is_unhealthy(&self) -> bool {
        self.flags.fail || self.link_state.contains("disconnected")
    }

    /// Total number of slots owned by this node.
    pub fn slot_count(&self) -> i32 {
        self.slots.iter().map(|r| r.count()).sum()
    }

    /// Parse a single `CLUSTER NODES` row.
    ///
    /// Row format: `id host:port@busport flags master-id ping pong epoch
    /// link-state slot-range...`
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(ParseError::InvalidClusterNodes(format!(
                "not enough fields in line: {}",
                line
            )));
        }

        let node_id = parts[0].to_string();

        // Address column: host:port@busport, where host may be an announced
        // hostname containing dots.
        let host_port = parts[1].split('@').next().unwrap_or(parts[1]);
        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str.parse().map_err(|_| {
                    ParseError::InvalidClusterNodes(format!("invalid port: {}", port_str))
                })?;
                (host.to_string(), port)
            }
            None => {
                return Err(ParseError::InvalidClusterNodes(format!(
                    "invalid address format: {}",
                    host_port
                )));
            }
        };

        let flags = NodeFlags::parse(parts[2]);

        let master_id = if parts[3] == "-" {
            None
        } else {
            Some(parts[3].to_string())
        };

        let ping_sent = parts[4].parse().unwrap_or(0);
        let pong_recv = parts[5].parse().unwrap_or(0);
        let config_epoch = parts[6].parse().unwrap_or(0);
        let link_state = parts[7].to_string();

        let slots: Vec<SlotRange> = parts[8..]
            .iter()
            .filter_map(|s| SlotRange::parse(s).ok())
            .collect();

        Ok(ClusterNode {
            node_id,
            host,
            port,
            flags,
            master_id,
            ping_sent,
            pong_recv,
            config_epoch,
            link_state,
            slots,
        })
    }
}

/// Parsed output of the `CLUSTER NODES` command.
#[derive(Debug, Clone)]
pub struct NodeTable {
    /// All known nodes, in listing order.
    pub nodes: Vec<ClusterNode>,
}

impl NodeTable {
    /// Parse the full `CLUSTER NODES` output.
    pub fn parse(output: &str) -> Result<Self, ParseError> {
        let nodes: Vec<ClusterNode> = output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(ClusterNode::parse_line)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NodeTable { nodes })
    }

    /// All master nodes.
    pub fn masters(&self) -> Vec<&ClusterNode> {
        self.nodes.iter().filter(|n| n.is_master()).collect()
    }

    /// All replica nodes.
    pub fn replicas(&self) -> Vec<&ClusterNode> {
        self.nodes.iter().filter(|n| n.is_replica()).collect()
    }

    /// Replicas attached to a specific master.
    pub fn replicas_of(&self, master_id: &str) -> Vec<&ClusterNode> {
        self.nodes
            .iter()
            .filter(|n| n.master_id.as_deref() == Some(master_id))
            .collect()
    }

    /// Look up a node by ID.
    pub fn get(&self, node_id: &str) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Look up a node by its announced host.
    pub fn get_by_host(&self, host: &str) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.host == host)
    }

    /// Node count for a role flag ("master" / "slave"), or total when empty.
    pub fn count_role(&self, role: &str) -> usize {
        match role {
            "master" | "leader" => self.masters().len(),
            "slave" | "follower" => self.replicas().len(),
            _ => self.nodes.len(),
        }
    }

    /// Nodes flagged failed or with a disconnected bus link.
    pub fn unhealthy_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_unhealthy()).count()
    }

    /// Masters flagged failed or with a disconnected bus link.
    pub fn unhealthy_masters(&self) -> Vec<&ClusterNode> {
        self.nodes
            .iter()
            .filter(|n| n.is_master() && n.is_unhealthy())
            .collect()
    }

    /// Slots owned by a node, 0 for unknown nodes.
    pub fn slot_count_of(&self, node_id: &str) -> i32 {
        self.get(node_id).map(|n| n.slot_count()).unwrap_or(0)
    }

    /// Total number of slots assigned across all masters.
    pub fn total_slots_assigned(&self) -> i32 {
        self.masters().iter().map(|m| m.slot_count()).sum()
    }

    /// True when the union of master slot ranges covers the full keyspace.
    pub fn all_slots_assigned(&self) -> bool {
        self.total_slots_assigned() == 16384
    }

    /// Masters owning zero slots.
    pub fn empty_masters(&self) -> Vec<&ClusterNode> {
        self.masters()
            .into_iter()
            .filter(|m| m.slot_count() == 0)
            .collect()
    }
}
