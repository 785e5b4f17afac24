//! Topology Generator
//!
//! Builds the static node/link graph once per session. The shape is fixed by
//! the per-type counts in [`TopologyConfig`]; addresses, capacities,
//! utilization and health are randomized with a skew toward healthy values.
//!
//! ```text
//!   router-1 ════ router-2          (full mesh)
//!      │  ╲          │
//!      │  firewall-1 │              (between core and access)
//!      │       ╲     │
//!   switch-1   switch-2 ...         (round-robin uplinks)
//!    │   │        │
//!  server-1 host-1 server-2 ...     (round-robin attachment)
//! ```

use crate::config::TopologyConfig;
use crate::core::{Edge, EdgeStatus, Node, NodeStatus, NodeType, Topology};
use crate::error::SimError;
use crate::generator::weighted_pick;
use rand::Rng;
use std::net::Ipv4Addr;

const CORE_CAPACITY_MBPS: u32 = 10_000;
const ACCESS_CAPACITY_MBPS: u32 = 1_000;
const MAX_NODES_PER_TYPE: usize = 60_000;

/// Generates topologies from a fixed shape configuration
pub struct TopologyGenerator {
    config: TopologyConfig,
}

impl TopologyGenerator {
    pub fn new(config: TopologyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Topology, SimError> {
        let c = &self.config;
        if c.total_nodes() == 0 {
            return Err(SimError::invalid_config("topology: zero nodes requested"));
        }
        if c.servers + c.others + c.firewalls > 0 && c.routers + c.switches == 0 {
            return Err(SimError::invalid_config(
                "topology: hosts and firewalls need at least one router or switch",
            ));
        }
        for (name, count) in [
            ("routers", c.routers),
            ("switches", c.switches),
            ("firewalls", c.firewalls),
            ("servers", c.servers),
            ("others", c.others),
        ] {
            if count > MAX_NODES_PER_TYPE {
                return Err(SimError::invalid_config(format!(
                    "topology: {count} {name} exceeds the limit of {MAX_NODES_PER_TYPE}"
                )));
            }
        }

        let mut builder = Builder {
            config: c,
            nodes: Vec::with_capacity(c.total_nodes()),
            edges: Vec::new(),
        };

        let routers = builder.add_nodes(rng, NodeType::Router, c.routers)?;
        let firewalls = builder.add_nodes(rng, NodeType::Firewall, c.firewalls)?;
        let switches = builder.add_nodes(rng, NodeType::Switch, c.switches)?;
        let servers = builder.add_nodes(rng, NodeType::Server, c.servers)?;
        let others = builder.add_nodes(rng, NodeType::Other, c.others)?;

        // Core mesh
        for a in 0..routers.len() {
            for b in (a + 1)..routers.len() {
                builder.link(rng, &routers[a], &routers[b], CORE_CAPACITY_MBPS)?;
            }
        }

        // Access layer uplinks; without routers the switches form a chain
        for (j, switch) in switches.iter().enumerate() {
            if !routers.is_empty() {
                builder.link(rng, &routers[j % routers.len()], switch, CORE_CAPACITY_MBPS)?;
            } else if j > 0 {
                builder.link(rng, &switches[j - 1], switch, CORE_CAPACITY_MBPS)?;
            }
        }

        for (i, firewall) in firewalls.iter().enumerate() {
            if !routers.is_empty() {
                builder.link(rng, &routers[i % routers.len()], firewall, CORE_CAPACITY_MBPS)?;
            }
            if !switches.is_empty() {
                builder.link(rng, firewall, &switches[i % switches.len()], CORE_CAPACITY_MBPS)?;
            }
        }

        let attach_points = if switches.is_empty() { &routers } else { &switches };
        for (k, host) in servers.iter().chain(others.iter()).enumerate() {
            let uplink = &attach_points[k % attach_points.len()];
            builder.link(rng, uplink, host, ACCESS_CAPACITY_MBPS)?;
        }

        tracing::debug!(
            nodes = builder.nodes.len(),
            edges = builder.edges.len(),
            "Generated topology"
        );

        Ok(Topology {
            nodes: builder.nodes,
            edges: builder.edges,
        })
    }
}

struct Builder<'a> {
    config: &'a TopologyConfig,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Builder<'_> {
    fn add_nodes<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        node_type: NodeType,
        count: usize,
    ) -> Result<Vec<String>, SimError> {
        let [normal, warning, critical] = self.config.node_status_weights;
        let mut ids = Vec::with_capacity(count);

        for index in 0..count {
            let (prefix, label, tier) = match node_type {
                NodeType::Router => ("router", "Core Router", 0),
                NodeType::Firewall => ("firewall", "Edge Firewall", 1),
                NodeType::Switch => ("switch", "Access Switch", 2),
                NodeType::Server => ("server", "Server", 10),
                NodeType::Other => ("host", "Workstation", 20),
            };
            let status = weighted_pick(
                rng,
                &[
                    (NodeStatus::Normal, normal),
                    (NodeStatus::Warning, warning),
                    (NodeStatus::Critical, critical),
                ],
            )?;

            let id = format!("{}-{}", prefix, index + 1);
            self.nodes.push(Node {
                id: id.clone(),
                name: format!("{} {}", label, index + 1),
                ip: tier_ip(tier, index),
                node_type,
                status,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    fn link<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        source: &str,
        target: &str,
        capacity_mbps: u32,
    ) -> Result<(), SimError> {
        let [active, degraded, down] = self.config.edge_status_weights;
        let status = weighted_pick(
            rng,
            &[
                (EdgeStatus::Active, active),
                (EdgeStatus::Degraded, degraded),
                (EdgeStatus::Down, down),
            ],
        )?;
        let utilization = match status {
            EdgeStatus::Down => 0.0,
            _ => rng.random_range(0.0..=self.config.max_utilization),
        };

        self.edges.push(Edge {
            id: format!("link-{}", self.edges.len() + 1),
            source: source.to_string(),
            target: target.to_string(),
            status,
            capacity_mbps,
            utilization,
        });
        Ok(())
    }
}

/// 10.<tier>.x.y addressing keeps each node type in its own block
fn tier_ip(tier: u8, index: usize) -> Ipv4Addr {
    Ipv4Addr::new(10, tier, (index / 250) as u8, (index % 250 + 1) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn generate(config: TopologyConfig, seed: u64) -> Result<Topology, SimError> {
        TopologyGenerator::new(config).generate(&mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_default_shape() {
        let config = TopologyConfig::default();
        let topo = generate(config.clone(), 1).unwrap();

        assert_eq!(topo.nodes.len(), config.total_nodes());
        assert_eq!(topo.nodes_of(NodeType::Router).count(), config.routers);
        assert_eq!(topo.nodes_of(NodeType::Server).count(), config.servers);

        // mesh(2 routers) = 1, switch uplinks = 4, firewall = 2, hosts = 11
        assert_eq!(topo.edges.len(), 1 + 4 + 2 + 11);
    }

    #[test]
    fn test_edges_reference_existing_nodes() {
        let topo = generate(TopologyConfig::default(), 2).unwrap();
        let ids: HashSet<&str> = topo.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &topo.edges {
            assert!(ids.contains(edge.source.as_str()));
            assert!(ids.contains(edge.target.as_str()));
            assert_ne!(edge.source, edge.target);
            assert!((0.0..=1.0).contains(&edge.utilization));
        }
    }

    #[test]
    fn test_unique_ids_and_ips() {
        let config = TopologyConfig {
            servers: 600,
            ..TopologyConfig::default()
        };
        let topo = generate(config, 3).unwrap();
        let ids: HashSet<&str> = topo.nodes.iter().map(|n| n.id.as_str()).collect();
        let ips: HashSet<Ipv4Addr> = topo.nodes.iter().map(|n| n.ip).collect();
        assert_eq!(ids.len(), topo.nodes.len());
        assert_eq!(ips.len(), topo.nodes.len());
    }

    #[test]
    fn test_every_host_is_attached() {
        let topo = generate(TopologyConfig::default(), 4).unwrap();
        for host in topo.nodes_of(NodeType::Server).chain(topo.nodes_of(NodeType::Other)) {
            assert_eq!(topo.neighbors(&host.id).len(), 1, "{} should have one uplink", host.id);
        }
    }

    #[test]
    fn test_status_skews_normal() {
        let config = TopologyConfig {
            servers: 500,
            ..TopologyConfig::default()
        };
        let topo = generate(config, 5).unwrap();
        let normal = topo.nodes.iter().filter(|n| n.status == NodeStatus::Normal).count();
        assert!(normal * 2 > topo.nodes.len());
    }

    #[test]
    fn test_zero_nodes_rejected() {
        let config = TopologyConfig {
            routers: 0,
            switches: 0,
            firewalls: 0,
            servers: 0,
            others: 0,
            ..TopologyConfig::default()
        };
        assert!(matches!(generate(config, 0), Err(SimError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_single_router() {
        let config = TopologyConfig {
            routers: 1,
            switches: 0,
            firewalls: 0,
            servers: 0,
            others: 0,
            ..TopologyConfig::default()
        };
        let topo = generate(config, 0).unwrap();
        assert_eq!(topo.nodes.len(), 1);
        assert!(topo.edges.is_empty());
    }

    #[test]
    fn test_hosts_fall_back_to_routers() {
        let config = TopologyConfig {
            routers: 2,
            switches: 0,
            firewalls: 0,
            servers: 4,
            others: 0,
            ..TopologyConfig::default()
        };
        let topo = generate(config, 6).unwrap();
        for server in topo.nodes_of(NodeType::Server) {
            let uplink = topo.neighbors(&server.id)[0];
            assert!(uplink.starts_with("router-"));
        }
    }

    #[test]
    fn test_same_seed_same_topology() {
        let a = generate(TopologyConfig::default(), 99).unwrap();
        let b = generate(TopologyConfig::default(), 99).unwrap();
        assert_eq!(a, b);
    }
}
