//! Flow Synthesizer
//!
//! Produces synthetic flow records from two envelopes:
//! - **normal**: every dimension drawn strictly below its classifier threshold
//!   (scaled by `normal_ceiling`), so a normal flow never looks anomalous
//! - **anomalous**: one forcing dimension is drawn from
//!   `[threshold × (1 + margin), threshold × tail]`, the rest stay normal
//!
//! All randomness comes from the caller's rng so a seeded engine replays the
//! same flow sequence.

use crate::config::{ClassifierConfig, FlowConfig};
use crate::core::{AnomalyType, Flow, Protocol, random_id};
use crate::error::{SimError, ensure_in_range};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Distribution;
use rand::seq::IndexedRandom;
use rand_distr::LogNormal;
use std::net::Ipv4Addr;

/// Well-known service ports used as flow destinations
const SERVICE_PORTS: [u16; 10] = [80, 443, 53, 22, 25, 123, 389, 3306, 5432, 8080];

/// First octets of public ranges used for external peers (botnets, collectors)
const EXTERNAL_PREFIXES: [u8; 8] = [23, 45, 61, 77, 89, 103, 141, 185];

/// Smallest byte count a normal flow is drawn with
pub(crate) const MIN_FLOW_BYTES: f64 = 64.0;

/// Pick one item using relative weights
pub(crate) fn weighted_pick<T: Copy, R: Rng + ?Sized>(
    rng: &mut R,
    items: &[(T, f64)],
) -> Result<T, SimError> {
    items
        .choose_weighted(rng, |(_, weight)| *weight)
        .map(|(item, _)| *item)
        .map_err(|e| SimError::invalid_config(format!("weights: {e}")))
}

/// Reject flows whose counters are inconsistent
pub fn validate_flow(flow: Flow) -> Result<Flow, SimError> {
    ensure_in_range("bytes", flow.bytes as f64, 1.0, u64::MAX as f64)?;
    ensure_in_range("packets", flow.packets as f64, 1.0, flow.bytes as f64)?;
    Ok(flow)
}

/// Synthesizes flows between hosts of the current topology
#[derive(Debug, Clone)]
pub struct FlowSynthesizer {
    flows: FlowConfig,
    thresholds: ClassifierConfig,
    hosts: Vec<Ipv4Addr>,
}

impl FlowSynthesizer {
    pub fn new(flows: FlowConfig, thresholds: ClassifierConfig, hosts: Vec<Ipv4Addr>) -> Self {
        Self {
            flows,
            thresholds,
            hosts,
        }
    }

    /// Replace the address pool after the topology is regenerated
    pub fn set_hosts(&mut self, hosts: Vec<Ipv4Addr>) {
        self.hosts = hosts;
    }

    pub fn hosts(&self) -> &[Ipv4Addr] {
        &self.hosts
    }

    pub fn flow_config(&self) -> &FlowConfig {
        &self.flows
    }

    /// Generate one flow from the normal or anomalous envelope
    pub fn generate_flow<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        anomalous: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<Flow, SimError> {
        if anomalous {
            let dimension = self.pick_dimension(rng)?;
            self.generate_forced(rng, dimension, timestamp)
        } else {
            let flow = self.normal_flow(rng, timestamp)?;
            validate_flow(flow)
        }
    }

    /// Choose which dimension an anomalous flow pushes past its threshold
    pub fn pick_dimension<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<AnomalyType, SimError> {
        let [volume, pattern, protocol, behavioral] = self.flows.dimension_weights;
        weighted_pick(
            rng,
            &[
                (AnomalyType::Volume, volume),
                (AnomalyType::Pattern, pattern),
                (AnomalyType::Protocol, protocol),
                (AnomalyType::Behavioral, behavioral),
            ],
        )
    }

    /// Generate an anomalous flow whose `dimension` sits above its threshold
    pub fn generate_forced<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        dimension: AnomalyType,
        timestamp: DateTime<Utc>,
    ) -> Result<Flow, SimError> {
        let mut flow = self.normal_flow(rng, timestamp)?;
        flow.is_anomalous = true;

        let c = &self.thresholds;
        match dimension {
            AnomalyType::Volume => {
                flow.bytes = self.anomalous_draw(rng, c.volume_threshold_bytes).ceil() as u64;
                flow.packets = packets_for(rng, flow.bytes, 1_000..=1_500);
                flow.duration_ms = self.duration_for_rate(flow.packets, flow.duration_ms);
            }
            AnomalyType::Pattern => {
                flow.port_fanout = self.anomalous_draw(rng, c.fanout_threshold).ceil() as u32;
                flow.protocol = Protocol::Tcp;
            }
            AnomalyType::Protocol => {
                flow.protocol = Protocol::RARE[rng.random_range(0..Protocol::RARE.len())];
                flow.source_port = 0;
                flow.destination_port = 0;
            }
            AnomalyType::Behavioral => {
                // Short bursts of small packets; byte volume stays moderate
                let pps = self.anomalous_draw(rng, c.pps_threshold);
                let duration_ms = rng.random_range(self.flows.min_duration_ms..=self.burst_ceiling_ms());
                flow.duration_ms = duration_ms;
                flow.packets = ((pps * duration_ms as f64) / 1000.0).ceil().max(1.0) as u64;
                flow.bytes = flow.packets * rng.random_range(64..=100);
            }
        }

        tracing::trace!(dimension = %dimension, bytes = flow.bytes, fanout = flow.port_fanout, "Forced anomalous flow");
        validate_flow(flow)
    }

    /// Address of an internal host, taken from the topology when available
    pub fn internal_ip<R: Rng + ?Sized>(&self, rng: &mut R) -> Ipv4Addr {
        match self.hosts.choose(rng) {
            Some(ip) => *ip,
            None => match rng.random_range(0..3) {
                0 => Ipv4Addr::new(10, rng.random(), rng.random(), rng.random_range(1..=254)),
                1 => Ipv4Addr::new(172, rng.random_range(16..=31), rng.random(), rng.random_range(1..=254)),
                _ => Ipv4Addr::new(192, 168, rng.random(), rng.random_range(1..=254)),
            },
        }
    }

    /// Public address outside the corporate ranges
    pub fn external_ip<R: Rng + ?Sized>(rng: &mut R) -> Ipv4Addr {
        let first = EXTERNAL_PREFIXES[rng.random_range(0..EXTERNAL_PREFIXES.len())];
        Ipv4Addr::new(first, rng.random(), rng.random(), rng.random_range(1..=254))
    }

    pub fn service_port<R: Rng + ?Sized>(rng: &mut R) -> u16 {
        SERVICE_PORTS[rng.random_range(0..SERVICE_PORTS.len())]
    }

    pub fn ephemeral_port<R: Rng + ?Sized>(rng: &mut R) -> u16 {
        rng.random_range(49_152..=65_535)
    }

    fn normal_flow<R: Rng + ?Sized>(&self, rng: &mut R, timestamp: DateTime<Utc>) -> Result<Flow, SimError> {
        let f = &self.flows;
        let c = &self.thresholds;

        let dist = LogNormal::new(f.normal_bytes_median.ln(), f.normal_bytes_sigma)
            .map_err(|e| SimError::invalid_config(format!("flows.normal_bytes: {e}")))?;
        let byte_cap = (c.volume_threshold_bytes * f.normal_ceiling).floor().max(1.0);
        let bytes = dist.sample(rng).clamp(MIN_FLOW_BYTES.min(byte_cap), byte_cap) as u64;
        let packets = packets_for(rng, bytes, 64..=1_500);

        let fanout_cap = ((c.fanout_threshold * f.normal_ceiling).ceil() as u32).saturating_sub(1);
        let port_fanout = rng.random_range(1..=f.normal_max_fanout.min(fanout_cap).max(1));

        let protocol = Protocol::COMMON[rng.random_range(0..Protocol::COMMON.len())];
        let base_duration = rng.random_range(f.min_duration_ms..=f.max_duration_ms);
        let duration_ms = self.duration_for_rate(packets, base_duration);

        let source_ip = self.internal_ip(rng);
        let mut destination_ip = self.internal_ip(rng);
        if destination_ip == source_ip && self.hosts.len() > 1 {
            destination_ip = self.internal_ip(rng);
        }

        let (source_port, destination_port) = match protocol {
            Protocol::Icmp => (0, 0),
            _ => (Self::ephemeral_port(rng), Self::service_port(rng)),
        };

        Ok(Flow {
            id: random_id(rng),
            source_ip,
            destination_ip,
            source_port,
            destination_port,
            port_fanout,
            bytes,
            packets,
            protocol,
            duration_ms,
            timestamp,
            is_anomalous: false,
        })
    }

    /// Uniform draw from the anomalous band of a threshold
    fn anomalous_draw<R: Rng + ?Sized>(&self, rng: &mut R, threshold: f64) -> f64 {
        let low = threshold * (1.0 + self.flows.anomaly_margin);
        let high = threshold * self.flows.anomaly_tail;
        rng.random_range(low..=high)
    }

    /// Stretch `duration_ms` until the packet rate sits below the normal ceiling
    fn duration_for_rate(&self, packets: u64, duration_ms: u64) -> u64 {
        let max_pps = self.thresholds.pps_threshold * self.flows.normal_ceiling;
        let needed = (packets as f64 * 1000.0 / max_pps).ceil() as u64 + 1;
        duration_ms.max(needed)
    }

    fn burst_ceiling_ms(&self) -> u64 {
        let f = &self.flows;
        f.max_duration_ms.min(2_000).max(f.min_duration_ms)
    }
}

/// Packet count for `bytes` using an average packet size drawn from `sizes`
fn packets_for<R: Rng + ?Sized>(rng: &mut R, bytes: u64, sizes: std::ops::RangeInclusive<u64>) -> u64 {
    let avg = rng.random_range(sizes);
    bytes.div_ceil(avg).clamp(1, bytes.max(1))
}
