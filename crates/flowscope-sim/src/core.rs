//! Core Types for flowscope-sim
//!
//! Topology, flow, anomaly and alarm records plus the aggregate metrics.
//! Types are co-located here as the single source of truth; every other
//! module produces or transforms them.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Draw a v4-shaped identifier from the engine's random source so that ids
/// stay reproducible under a fixed seed.
pub fn random_id<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

// ============================================================================
// Topology
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Server,
    Router,
    Switch,
    Firewall,
    Other,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Server => "server",
            NodeType::Router => "router",
            NodeType::Switch => "switch",
            NodeType::Firewall => "firewall",
            NodeType::Other => "other",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Normal,
    Warning,
    Critical,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Normal => "normal",
            NodeStatus::Warning => "warning",
            NodeStatus::Critical => "critical",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Active,
    Degraded,
    Down,
}

/// Network element; identity is fixed once the topology is generated
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub ip: Ipv4Addr,
    pub node_type: NodeType,
    pub status: NodeStatus,
}

/// Link between two nodes, referenced by node id
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub status: EdgeStatus,
    pub capacity_mbps: u32,
    /// Fraction of capacity in use, 0.0 to 1.0
    pub utilization: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Topology {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes_of(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    /// Ids of nodes sharing an edge with `id`
    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter_map(|e| {
                if e.source == id {
                    Some(e.target.as_str())
                } else if e.target == id {
                    Some(e.source.as_str())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Addresses of hosts that can terminate a flow (servers and other hosts)
    pub fn host_ips(&self) -> Vec<Ipv4Addr> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.node_type, NodeType::Server | NodeType::Other))
            .map(|n| n.ip)
            .collect()
    }
}

// ============================================================================
// Flows
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Gre,
    Esp,
    Sctp,
}

impl Protocol {
    pub const COMMON: [Protocol; 3] = [Protocol::Tcp, Protocol::Udp, Protocol::Icmp];
    pub const RARE: [Protocol; 3] = [Protocol::Gre, Protocol::Esp, Protocol::Sctp];

    /// How unusual the protocol is on a corporate network, 0.0 to 1.0
    pub fn rarity(&self) -> f64 {
        match self {
            Protocol::Tcp => 0.05,
            Protocol::Udp => 0.1,
            Protocol::Icmp => 0.4,
            Protocol::Gre => 0.85,
            Protocol::Esp => 0.9,
            Protocol::Sctp => 0.95,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Gre => "GRE",
            Protocol::Esp => "ESP",
            Protocol::Sctp => "SCTP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single network conversation record
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Flow {
    pub id: Uuid,
    pub source_ip: Ipv4Addr,
    pub destination_ip: Ipv4Addr,
    pub source_port: u16,
    pub destination_port: u16,
    /// Distinct destination ports the source touched in this flow's window
    pub port_fanout: u32,
    pub bytes: u64,
    pub packets: u64,
    pub protocol: Protocol,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Origin flag: the synthesizer was asked for an anomalous flow
    pub is_anomalous: bool,
}

impl Flow {
    /// Packets per second over the flow's lifetime
    pub fn packet_rate(&self) -> f64 {
        self.packets as f64 / (self.duration_ms.max(1) as f64 / 1000.0)
    }

    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / 1_000_000.0
    }
}

// ============================================================================
// Anomalies
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyType {
    Volume,
    Pattern,
    Protocol,
    Behavioral,
}

impl AnomalyType {
    pub const ALL: [AnomalyType; 4] = [
        AnomalyType::Volume,
        AnomalyType::Pattern,
        AnomalyType::Protocol,
        AnomalyType::Behavioral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Volume => "volume",
            AnomalyType::Pattern => "pattern",
            AnomalyType::Protocol => "protocol",
            AnomalyType::Behavioral => "behavioral",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AnomalyType::Volume => "Volume",
            AnomalyType::Pattern => "Pattern",
            AnomalyType::Protocol => "Protocol",
            AnomalyType::Behavioral => "Behavioral",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered severity scale shared by anomalies and alarms
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One step up the scale, capped at critical
    pub fn escalated(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict derived from exactly one flow
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub id: Uuid,
    pub flow: Flow,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    /// 0.0 to 1.0
    pub confidence: f64,
    /// Largest per-dimension deviation (1.0 = at threshold)
    pub deviation: f64,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Alarms
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    Open,
    Acknowledged,
    Investigating,
    Resolved,
}

impl AlarmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmStatus::Open => "open",
            AlarmStatus::Acknowledged => "acknowledged",
            AlarmStatus::Investigating => "investigating",
            AlarmStatus::Resolved => "resolved",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AlarmStatus::Resolved)
    }
}

impl fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of operator action recorded in an alarm's audit trail
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlarmActionKind {
    Acknowledge,
    Investigate,
    Escalate,
    Resolve,
    Comment,
    Assign,
}

impl AlarmActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmActionKind::Acknowledge => "acknowledge",
            AlarmActionKind::Investigate => "investigate",
            AlarmActionKind::Escalate => "escalate",
            AlarmActionKind::Resolve => "resolve",
            AlarmActionKind::Comment => "comment",
            AlarmActionKind::Assign => "assign",
        }
    }
}

impl fmt::Display for AlarmActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlarmAction {
    pub user: String,
    pub kind: AlarmActionKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Operator-facing incident derived from exactly one anomaly
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Alarm {
    pub id: Uuid,
    pub anomaly_id: Uuid,
    pub anomaly_type: AnomalyType,
    pub status: AlarmStatus,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub tags: BTreeSet<String>,
    pub actions: Vec<AlarmAction>,
}

// ============================================================================
// Aggregate metrics
// ============================================================================

/// Dashboard counters nudged on every tick
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NetworkMetrics {
    pub throughput_mbps: f64,
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
    pub total_flows: u64,
    pub anomalies_detected: u64,
    pub open_alarms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_severity_ordering_and_escalation() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::Low.escalated(), Severity::Medium);
        assert_eq!(Severity::High.escalated(), Severity::Critical);
        assert_eq!(Severity::Critical.escalated(), Severity::Critical);
    }

    #[test]
    fn test_protocol_rarity_split() {
        for p in Protocol::COMMON {
            assert!(p.rarity() < 0.5);
        }
        for p in Protocol::RARE {
            assert!(p.rarity() > 0.8);
        }
    }

    #[test]
    fn test_random_id_reproducible() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        assert_eq!(random_id(&mut a), random_id(&mut b));
        assert_eq!(random_id(&mut a).get_version_num(), 4);
    }

    #[test]
    fn test_enum_serialization() {
        assert_eq!(serde_json::to_string(&AnomalyType::Volume).unwrap(), "\"volume\"");
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
        assert_eq!(serde_json::to_string(&AlarmStatus::Open).unwrap(), "\"open\"");
        assert_eq!(serde_json::to_string(&NodeType::Firewall).unwrap(), "\"firewall\"");
    }

    #[test]
    fn test_topology_neighbors() {
        let node = |id: &str, t| Node {
            id: id.to_string(),
            name: id.to_string(),
            ip: Ipv4Addr::new(10, 0, 0, 1),
            node_type: t,
            status: NodeStatus::Normal,
        };
        let topo = Topology {
            nodes: vec![node("router-1", NodeType::Router), node("server-1", NodeType::Server)],
            edges: vec![Edge {
                id: "link-1".to_string(),
                source: "router-1".to_string(),
                target: "server-1".to_string(),
                status: EdgeStatus::Active,
                capacity_mbps: 1000,
                utilization: 0.2,
            }],
        };
        assert_eq!(topo.neighbors("server-1"), vec!["router-1"]);
        assert_eq!(topo.nodes_of(NodeType::Router).count(), 1);
        assert_eq!(topo.host_ips().len(), 1);
    }
}
