//! Simulation configuration
//!
//! Every distribution parameter, threshold and timing constant the engine
//! uses lives here. Sections default independently, so a TOML file only has
//! to name the values it changes.

use crate::core::Protocol;
use crate::error::SimError;
use crate::generator::MIN_FLOW_BYTES;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for one simulation engine
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for the engine's random source; `None` seeds from the OS
    pub seed: Option<u64>,
    pub topology: TopologyConfig,
    pub flows: FlowConfig,
    pub classifier: ClassifierConfig,
    pub scenario: ScenarioConfig,
    pub clock: ClockConfig,
    pub metrics: MetricsConfig,
}

/// Node counts per type and attribute skew for generated topologies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopologyConfig {
    pub routers: usize,
    pub switches: usize,
    pub firewalls: usize,
    pub servers: usize,
    pub others: usize,
    /// Relative weights for node status: normal, warning, critical
    pub node_status_weights: [f64; 3],
    /// Relative weights for link status: active, degraded, down
    pub edge_status_weights: [f64; 3],
    /// Upper bound for randomized link utilization
    pub max_utilization: f64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            routers: 2,
            switches: 4,
            firewalls: 1,
            servers: 8,
            others: 3,
            node_status_weights: [0.85, 0.12, 0.03],
            edge_status_weights: [0.9, 0.08, 0.02],
            max_utilization: 0.85,
        }
    }
}

impl TopologyConfig {
    pub fn total_nodes(&self) -> usize {
        self.routers + self.switches + self.firewalls + self.servers + self.others
    }
}

/// Statistical envelope for synthesized flows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlowConfig {
    /// Median byte count of a normal flow (log-normal)
    pub normal_bytes_median: f64,
    /// Log-space spread of normal byte counts
    pub normal_bytes_sigma: f64,
    /// Normal draws stay below this fraction of every classifier threshold
    pub normal_ceiling: f64,
    pub normal_max_fanout: u32,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    /// Anomalous draws start this far above the threshold (0.25 = 1.25x)
    pub anomaly_margin: f64,
    /// Anomalous draws end at this multiple of the threshold
    pub anomaly_tail: f64,
    /// Relative odds of each forcing dimension: volume, pattern, protocol, behavioral
    pub dimension_weights: [f64; 4],
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            normal_bytes_median: 250_000.0,
            normal_bytes_sigma: 1.0,
            normal_ceiling: 0.8,
            normal_max_fanout: 3,
            min_duration_ms: 200,
            max_duration_ms: 30_000,
            anomaly_margin: 0.25,
            anomaly_tail: 8.0,
            dimension_weights: [0.4, 0.25, 0.15, 0.2],
        }
    }
}

/// Thresholds and scoring for the anomaly classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub volume_threshold_bytes: f64,
    pub fanout_threshold: f64,
    pub rarity_threshold: f64,
    pub pps_threshold: f64,
    /// Deviation at which severity becomes medium, high, critical
    pub severity_bands: [f64; 3],
    /// How quickly confidence saturates with deviation
    pub confidence_steepness: f64,
    /// Measurement noise for a single-packet flow; shrinks with sqrt(packets)
    pub noise_scale: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            volume_threshold_bytes: 10_000_000.0,
            fanout_threshold: 20.0,
            rarity_threshold: 0.8,
            pps_threshold: 5_000.0,
            severity_bands: [1.0, 2.0, 4.0],
            confidence_steepness: 1.2,
            noise_scale: 0.5,
        }
    }
}

/// Scripted attack scenario parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Spacing between consecutive units
    pub stagger_ms: u64,
    pub default_units: usize,
    pub max_units: usize,
    /// Pinned confidence band for scenario anomalies
    pub confidence_band: [f64; 2],
    /// Extreme byte range as multiples of the volume threshold
    pub extreme_volume_factor: [f64; 2],
    /// Extreme fan-out range for port scans
    pub scan_fanout: [u32; 2],
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            stagger_ms: 450,
            default_units: 10,
            max_units: 64,
            confidence_band: [0.95, 1.0],
            extreme_volume_factor: [20.0, 50.0],
            scan_fanout: [500, 4_000],
        }
    }
}

/// Periodic driver settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClockConfig {
    pub tick_interval_ms: u64,
    /// Probability that a tick produces an anomalous flow
    pub anomaly_probability: f64,
    /// Anomalies below this confidence are dropped before correlation
    pub min_confidence: f64,
    pub history_capacity: usize,
    pub normal_flows_per_tick: usize,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2_500,
            anomaly_probability: 0.12,
            min_confidence: 0.0,
            history_capacity: 20,
            normal_flows_per_tick: 1,
            command_buffer: 64,
            event_buffer: 256,
        }
    }
}

/// Bounded random walk for one dashboard metric
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub initial: f64,
    pub min: f64,
    pub max: f64,
    pub max_delta: f64,
}

impl Envelope {
    pub const fn new(initial: f64, min: f64, max: f64, max_delta: f64) -> Self {
        Self {
            initial,
            min,
            max,
            max_delta,
        }
    }

    fn validate(&self, name: &str) -> Result<(), SimError> {
        if !(self.min <= self.initial && self.initial <= self.max) {
            return Err(SimError::invalid_config(format!(
                "metrics.{name}: initial value {} outside [{}, {}]",
                self.initial, self.min, self.max
            )));
        }
        if self.max_delta < 0.0 {
            return Err(SimError::invalid_config(format!(
                "metrics.{name}: max_delta must not be negative"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Background flows counted per tick, inclusive range
    pub flows_per_tick: [u64; 2],
    pub throughput_mbps: Envelope,
    pub latency_ms: Envelope,
    pub packet_loss_pct: Envelope,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            flows_per_tick: [50, 250],
            throughput_mbps: Envelope::new(850.0, 100.0, 2_000.0, 25.0),
            latency_ms: Envelope::new(12.0, 1.0, 250.0, 1.5),
            packet_loss_pct: Envelope::new(0.1, 0.0, 5.0, 0.05),
        }
    }
}

fn require(cond: bool, msg: impl FnOnce() -> String) -> Result<(), SimError> {
    if cond {
        Ok(())
    } else {
        Err(SimError::InvalidConfiguration(msg()))
    }
}

fn require_weights(name: &str, weights: &[f64]) -> Result<(), SimError> {
    require(
        weights.iter().all(|w| w.is_finite() && *w >= 0.0) && weights.iter().sum::<f64>() > 0.0,
        || format!("{name}: weights must be non-negative with a positive sum"),
    )
}

impl SimConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let contents = std::fs::read_to_string(path)?;
        let config: SimConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject parameter combinations the generators cannot honor
    pub fn validate(&self) -> Result<(), SimError> {
        let t = &self.topology;
        require(t.total_nodes() > 0, || "topology: at least one node is required".into())?;
        require(
            t.servers + t.others + t.firewalls == 0 || t.routers + t.switches > 0,
            || "topology: hosts and firewalls need at least one router or switch".into(),
        )?;
        require_weights("topology.node_status_weights", &t.node_status_weights)?;
        require_weights("topology.edge_status_weights", &t.edge_status_weights)?;
        require((0.0..=1.0).contains(&t.max_utilization), || {
            "topology.max_utilization must be within [0, 1]".into()
        })?;

        let f = &self.flows;
        require(f.normal_bytes_median >= 1.0, || {
            "flows.normal_bytes_median must be at least 1 byte".into()
        })?;
        require(f.normal_bytes_sigma > 0.0, || "flows.normal_bytes_sigma must be positive".into())?;
        require(f.normal_ceiling > 0.0 && f.normal_ceiling < 1.0, || {
            "flows.normal_ceiling must be within (0, 1)".into()
        })?;
        require(f.normal_max_fanout >= 1, || "flows.normal_max_fanout must be at least 1".into())?;
        require(f.min_duration_ms >= 1 && f.min_duration_ms <= f.max_duration_ms, || {
            "flows: need 1 <= min_duration_ms <= max_duration_ms".into()
        })?;
        require(f.anomaly_margin > 0.0, || "flows.anomaly_margin must be positive".into())?;
        require(f.anomaly_tail > 1.0 + f.anomaly_margin, || {
            "flows.anomaly_tail must exceed 1 + anomaly_margin".into()
        })?;
        require_weights("flows.dimension_weights", &f.dimension_weights)?;

        let c = &self.classifier;
        require(
            c.volume_threshold_bytes > 0.0
                && c.fanout_threshold > 0.0
                && c.rarity_threshold > 0.0
                && c.pps_threshold > 0.0,
            || "classifier: thresholds must be positive".into(),
        )?;
        require(c.fanout_threshold * f.normal_ceiling > 1.0, || {
            "classifier.fanout_threshold x flows.normal_ceiling must exceed 1 so a single-port flow stays normal".into()
        })?;
        require(c.volume_threshold_bytes * f.normal_ceiling >= MIN_FLOW_BYTES, || {
            format!("classifier.volume_threshold_bytes x flows.normal_ceiling must be at least {MIN_FLOW_BYTES} bytes")
        })?;
        require(
            Protocol::RARE.iter().all(|p| p.rarity() > c.rarity_threshold),
            || "classifier.rarity_threshold leaves no room for anomalous protocols".into(),
        )?;
        require(
            Protocol::COMMON.iter().all(|p| p.rarity() < c.rarity_threshold * f.normal_ceiling),
            || "classifier.rarity_threshold would flag common protocols".into(),
        )?;
        let [medium, high, critical] = c.severity_bands;
        require(medium > 0.0 && medium < high && high < critical, || {
            "classifier.severity_bands must be positive and strictly increasing".into()
        })?;
        require(medium <= 1.0, || {
            "classifier.severity_bands: medium must start at or below the threshold (1.0)".into()
        })?;
        require(c.confidence_steepness > 0.0, || {
            "classifier.confidence_steepness must be positive".into()
        })?;
        require((0.0..1.0).contains(&c.noise_scale), || {
            "classifier.noise_scale must be within [0, 1)".into()
        })?;

        let s = &self.scenario;
        require(s.stagger_ms > 0, || "scenario.stagger_ms must be positive".into())?;
        require(s.max_units > 0 && s.default_units > 0 && s.default_units <= s.max_units, || {
            "scenario: need 0 < default_units <= max_units".into()
        })?;
        let [lo, hi] = s.confidence_band;
        require(0.0 <= lo && lo <= hi && hi <= 1.0, || {
            "scenario.confidence_band must satisfy 0 <= low <= high <= 1".into()
        })?;
        let [vlo, vhi] = s.extreme_volume_factor;
        require(vlo > f.anomaly_tail && vlo <= vhi, || {
            "scenario.extreme_volume_factor must sit above flows.anomaly_tail".into()
        })?;
        let [flo, fhi] = s.scan_fanout;
        require(flo as f64 > c.fanout_threshold && flo <= fhi, || {
            "scenario.scan_fanout must sit above classifier.fanout_threshold".into()
        })?;

        let k = &self.clock;
        require(k.tick_interval_ms > 0, || "clock.tick_interval_ms must be positive".into())?;
        require((0.0..=1.0).contains(&k.anomaly_probability), || {
            "clock.anomaly_probability must be within [0, 1]".into()
        })?;
        require((0.0..=1.0).contains(&k.min_confidence), || {
            "clock.min_confidence must be within [0, 1]".into()
        })?;
        require(k.history_capacity > 0, || "clock.history_capacity must be positive".into())?;
        require(k.command_buffer > 0 && k.event_buffer > 0, || {
            "clock: channel buffers must be positive".into()
        })?;

        let m = &self.metrics;
        m.throughput_mbps.validate("throughput_mbps")?;
        m.latency_ms.validate("latency_ms")?;
        m.packet_loss_pct.validate("packet_loss_pct")?;
        require(m.flows_per_tick[0] <= m.flows_per_tick[1], || {
            "metrics.flows_per_tick must be an ascending range".into()
        })?;

        Ok(())
    }
}
