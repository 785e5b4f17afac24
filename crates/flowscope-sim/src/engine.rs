//! Simulation Engine
//!
//! Owns everything a session mutates: the random source, the topology, the
//! bounded histories and the dashboard metrics. All generation goes through
//! here so a fixed seed replays the same session.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SimulationEngine                      │
//! │  ┌────────────┐   ┌────────────┐   ┌─────────────────┐   │
//! │  │ Synthesizer│──▶│ Classifier │──▶│ Alarm correlator│   │
//! │  └────────────┘   └────────────┘   └─────────────────┘   │
//! │         │                │                  │            │
//! │         ▼                ▼                  ▼            │
//! │   History<Flow>   History<Anomaly>   History<Alarm>      │
//! │                                                          │
//! │   StdRng (seeded)   Topology   NetworkMetrics   Stats    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine itself is synchronous; [`crate::session`] drives it from a
//! single tokio task.

use crate::alarm::{self, AlarmCommand};
use crate::classifier::AnomalyClassifier;
use crate::config::{Envelope, SimConfig};
use crate::core::{Alarm, Anomaly, Flow, NetworkMetrics, Topology, random_id};
use crate::error::SimError;
use crate::generator::FlowSynthesizer;
use crate::history::History;
use crate::scenarios::{AttackPlan, ScenarioId, ScenarioKind};
use crate::topology::TopologyGenerator;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Anomaly and the alarm correlated from it
type Verdict = (Anomaly, Alarm);

/// Engine running state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Running,
}

/// Engine statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub tick_count: u64,
    pub failed_ticks: u64,
    pub flows_generated: u64,
    pub anomalies_recorded: u64,
    pub alarms_raised: u64,
    pub low_confidence_discarded: u64,
    pub scenarios_started: u64,
    pub scenarios_completed: u64,
    pub scenarios_cancelled: u64,
    pub scenario_units_emitted: u64,
}

/// Everything one tick produced, in derivation order
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub flows: Vec<Flow>,
    pub anomaly: Option<Anomaly>,
    pub alarm: Option<Alarm>,
    pub metrics: NetworkMetrics,
}

/// Flow, anomaly and alarm emitted for one scenario unit
#[derive(Debug, Clone)]
pub struct ScenarioUnit {
    pub index: usize,
    pub flow: Flow,
    pub anomaly: Anomaly,
    pub alarm: Alarm,
}

/// Node and link counts for dashboards
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologySummary {
    pub nodes: usize,
    pub edges: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub nodes_by_status: BTreeMap<String, usize>,
}

impl TopologySummary {
    pub fn of(topology: &Topology) -> Self {
        let mut nodes_by_type = BTreeMap::new();
        let mut nodes_by_status = BTreeMap::new();
        for node in &topology.nodes {
            *nodes_by_type.entry(node.node_type.to_string()).or_insert(0) += 1;
            *nodes_by_status.entry(node.status.as_str().to_string()).or_insert(0) += 1;
        }
        Self {
            nodes: topology.nodes.len(),
            edges: topology.edges.len(),
            nodes_by_type,
            nodes_by_status,
        }
    }
}

/// Point-in-time view of a running session
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub taken_at: DateTime<Utc>,
    pub state: EngineState,
    pub topology: TopologySummary,
    pub flows: Vec<Flow>,
    pub anomalies: Vec<Anomaly>,
    pub alarms: Vec<Alarm>,
    pub metrics: NetworkMetrics,
    pub stats: EngineStats,
}

/// Synchronous simulation engine
pub struct SimulationEngine {
    config: SimConfig,
    rng: StdRng,
    topology_generator: TopologyGenerator,
    topology: Topology,
    synthesizer: FlowSynthesizer,
    classifier: AnomalyClassifier,
    flows: History<Flow>,
    anomalies: History<Anomaly>,
    alarms: History<Alarm>,
    metrics: NetworkMetrics,
    state: EngineState,
    stats: EngineStats,
}

impl SimulationEngine {
    /// Validate `config`, seed the random source and build the topology
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let topology_generator = TopologyGenerator::new(config.topology.clone());
        let topology = topology_generator.generate(&mut rng)?;
        let synthesizer = FlowSynthesizer::new(
            config.flows.clone(),
            config.classifier.clone(),
            topology.host_ips(),
        );
        let classifier = AnomalyClassifier::new(config.classifier.clone());
        let capacity = config.clock.history_capacity;

        let metrics = NetworkMetrics {
            throughput_mbps: config.metrics.throughput_mbps.initial,
            latency_ms: config.metrics.latency_ms.initial,
            packet_loss_pct: config.metrics.packet_loss_pct.initial,
            ..NetworkMetrics::default()
        };

        tracing::debug!(
            seed = ?config.seed,
            nodes = topology.nodes.len(),
            edges = topology.edges.len(),
            "Simulation engine created"
        );

        Ok(Self {
            rng,
            topology_generator,
            topology,
            synthesizer,
            classifier,
            flows: History::new(capacity),
            anomalies: History::new(capacity),
            alarms: History::new(capacity),
            metrics,
            state: EngineState::Stopped,
            stats: EngineStats::default(),
            config,
        })
    }

    /// Regenerate the topology; later flows use the new host addresses
    pub fn generate_topology(&mut self) -> Result<&Topology, SimError> {
        let topology = self.topology_generator.generate(&mut self.rng)?;
        self.synthesizer.set_hosts(topology.host_ips());
        self.topology = topology;
        Ok(&self.topology)
    }

    /// Synthesize one flow without recording it
    pub fn generate_flow(&mut self, anomalous: bool, timestamp: DateTime<Utc>) -> Result<Flow, SimError> {
        self.synthesizer.generate_flow(&mut self.rng, anomalous, timestamp)
    }

    /// Classify a flow without recording the result
    pub fn generate_anomaly(&mut self, flow: &Flow) -> Result<Anomaly, SimError> {
        self.classifier.classify(&mut self.rng, flow)
    }

    /// Correlate an open alarm for `anomaly` without recording it
    pub fn generate_alarm(&mut self, anomaly: &Anomaly) -> Alarm {
        alarm::correlate(&mut self.rng, anomaly)
    }

    /// Validate and schedule an attack starting at `started_at`
    pub fn plan_attack(
        &mut self,
        target: &str,
        size: Option<usize>,
        kind: ScenarioKind,
        started_at: DateTime<Utc>,
    ) -> Result<AttackPlan, SimError> {
        let id = ScenarioId(random_id(&mut self.rng));
        let plan = AttackPlan::new(id, &self.config.scenario, target, size, kind, started_at)?;
        self.stats.scenarios_started += 1;
        Ok(plan)
    }

    /// Produce and record unit `index` of `plan`
    pub fn emit_scenario_unit(&mut self, plan: &AttackPlan, index: usize) -> Result<ScenarioUnit, SimError> {
        let timestamp = plan.unit_time(index);
        let flow = plan.kind.synthesize(
            &mut self.rng,
            &self.synthesizer,
            &self.config.scenario,
            &self.config.classifier,
            plan.target,
            timestamp,
        )?;

        let mut anomaly = self.classifier.classify(&mut self.rng, &flow)?;
        let deviation = self.classifier.deviations(&flow).get(ScenarioKind::FORCED_TYPE);
        plan.kind
            .pin_anomaly(&mut self.rng, &mut anomaly, deviation, self.config.scenario.confidence_band);

        let mut alarm = alarm::correlate(&mut self.rng, &anomaly);
        plan.kind.label_alarm(&mut alarm, plan.target);

        self.record(vec![flow.clone()], Some((anomaly.clone(), alarm.clone())));
        self.stats.scenario_units_emitted += 1;

        tracing::debug!(
            scenario = %plan.id,
            kind = %plan.kind,
            unit = index,
            confidence = anomaly.confidence,
            "Emitted scenario unit"
        );

        Ok(ScenarioUnit {
            index,
            flow,
            anomaly,
            alarm,
        })
    }

    pub fn scenario_finished(&mut self, cancelled: bool) {
        if cancelled {
            self.stats.scenarios_cancelled += 1;
        } else {
            self.stats.scenarios_completed += 1;
        }
    }

    /// Run one periodic step at `now`.
    ///
    /// The whole derivation completes before any history is touched, so a
    /// failure leaves histories exactly as they were. Metrics move on every
    /// tick, failed or not.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, SimError> {
        let derived = self.derive_tick(now);
        self.nudge_metrics();

        match derived {
            Ok((flows, verdict)) => {
                self.stats.tick_count += 1;
                self.record(flows.clone(), verdict.clone());

                let (anomaly, alarm) = verdict.unzip();
                Ok(TickOutcome {
                    flows,
                    anomaly,
                    alarm,
                    metrics: self.metrics.clone(),
                })
            }
            Err(e) => {
                self.stats.failed_ticks += 1;
                Err(e)
            }
        }
    }

    fn derive_tick(&mut self, now: DateTime<Utc>) -> Result<(Vec<Flow>, Option<Verdict>), SimError> {
        let mut flows = Vec::with_capacity(self.config.clock.normal_flows_per_tick + 1);
        for _ in 0..self.config.clock.normal_flows_per_tick {
            flows.push(self.generate_flow(false, now)?);
        }

        let mut verdict = None;
        if self.rng.random_bool(self.config.clock.anomaly_probability) {
            let flow = self.generate_flow(true, now)?;
            let anomaly = self.generate_anomaly(&flow)?;

            if anomaly.confidence < self.config.clock.min_confidence {
                tracing::warn!(
                    anomaly = %anomaly.id,
                    confidence = anomaly.confidence,
                    min_confidence = self.config.clock.min_confidence,
                    "Discarding low-confidence anomaly"
                );
                self.stats.low_confidence_discarded += 1;
            } else {
                let alarm = self.generate_alarm(&anomaly);
                flows.push(flow);
                verdict = Some((anomaly, alarm));
            }
        }

        tracing::debug!(flows = flows.len(), anomalous = verdict.is_some(), "Tick derived");
        Ok((flows, verdict))
    }

    fn record(&mut self, flows: Vec<Flow>, verdict: Option<Verdict>) {
        let flow_count = flows.len() as u64;
        for flow in flows {
            self.flows.push(flow);
        }
        self.stats.flows_generated += flow_count;
        self.metrics.total_flows += flow_count;

        if let Some((anomaly, alarm)) = verdict {
            self.anomalies.push(anomaly);
            self.alarms.push(alarm);
            self.stats.anomalies_recorded += 1;
            self.stats.alarms_raised += 1;
            self.metrics.anomalies_detected += 1;
        }
        self.refresh_open_alarms();
    }

    /// Bounded random walk on the dashboard gauges plus background flow volume
    fn nudge_metrics(&mut self) {
        let m = &self.config.metrics;
        let rng = &mut self.rng;

        self.metrics.throughput_mbps = walk(rng, self.metrics.throughput_mbps, &m.throughput_mbps);
        self.metrics.latency_ms = walk(rng, self.metrics.latency_ms, &m.latency_ms);
        self.metrics.packet_loss_pct = walk(rng, self.metrics.packet_loss_pct, &m.packet_loss_pct);

        let [lo, hi] = m.flows_per_tick;
        self.metrics.total_flows += rng.random_range(lo..=hi);
    }

    fn refresh_open_alarms(&mut self) {
        self.metrics.open_alarms = self.alarms.iter().filter(|a| a.is_open()).count();
    }

    /// Apply an operator command to an alarm in history
    pub fn transition_alarm(
        &mut self,
        alarm_id: Uuid,
        command: AlarmCommand,
        user: &str,
        at: DateTime<Utc>,
    ) -> Result<Alarm, SimError> {
        let alarm = self
            .alarms
            .find_mut(|a| a.id == alarm_id)
            .ok_or(SimError::AlarmNotFound(alarm_id))?;
        alarm.apply(command, user, at)?;
        let updated = alarm.clone();
        self.refresh_open_alarms();
        Ok(updated)
    }

    pub fn snapshot(&self, taken_at: DateTime<Utc>) -> DashboardSnapshot {
        DashboardSnapshot {
            taken_at,
            state: self.state,
            topology: TopologySummary::of(&self.topology),
            flows: self.flows.to_vec(),
            anomalies: self.anomalies.to_vec(),
            alarms: self.alarms.to_vec(),
            metrics: self.metrics.clone(),
            stats: self.stats.clone(),
        }
    }

    pub fn set_state(&mut self, state: EngineState) {
        self.state = state;
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn metrics(&self) -> &NetworkMetrics {
        &self.metrics
    }

    pub fn flows(&self) -> &History<Flow> {
        &self.flows
    }

    pub fn anomalies(&self) -> &History<Anomaly> {
        &self.anomalies
    }

    pub fn alarms(&self) -> &History<Alarm> {
        &self.alarms
    }
}

fn walk(rng: &mut StdRng, value: f64, env: &Envelope) -> f64 {
    let delta = rng.random_range(-env.max_delta..=env.max_delta);
    (value + delta).clamp(env.min, env.max)
}
