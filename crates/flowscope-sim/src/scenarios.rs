//! Attack Scenarios
//!
//! Scripted, time-staggered bursts of extreme anomalous flows aimed at one
//! target address:
//! - **ddos**: botnet sources flooding the target (volume)
//! - **port_scan**: one external source sweeping thousands of ports with
//!   a flood of small probes (volume)
//! - **exfiltration**: an internal host shipping bulk data out (volume)
//!
//! Every unit carries an extreme byte count and is reported as a critical
//! volume anomaly, whatever the classifier's dominant dimension was. A
//! scenario is planned up front; the session emits unit `i` at
//! `start + i × stagger`.

use crate::config::{ClassifierConfig, ScenarioConfig};
use crate::core::{Alarm, Anomaly, AnomalyType, Flow, Protocol, Severity, random_id};
use crate::error::SimError;
use crate::generator::{FlowSynthesizer, validate_flow};
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of one launched scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioId(pub Uuid);

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    #[default]
    Ddos,
    PortScan,
    Exfiltration,
}

impl ScenarioKind {
    /// Anomaly type every scenario unit is reported as
    pub const FORCED_TYPE: AnomalyType = AnomalyType::Volume;

    pub const ALL: [ScenarioKind; 3] = [ScenarioKind::Ddos, ScenarioKind::PortScan, ScenarioKind::Exfiltration];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::Ddos => "ddos",
            ScenarioKind::PortScan => "port_scan",
            ScenarioKind::Exfiltration => "exfiltration",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScenarioKind::Ddos => "DDoS attack",
            ScenarioKind::PortScan => "Port scan",
            ScenarioKind::Exfiltration => "Data exfiltration",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioKind::Ddos => "Distributed flood from botnet sources against one target",
            ScenarioKind::PortScan => "External host sweeping thousands of ports on the target",
            ScenarioKind::Exfiltration => "Internal host moving bulk data to the target over long sessions",
        }
    }

    /// Synthesize one unit's flow from the kind's extreme envelope
    pub fn synthesize<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        synth: &FlowSynthesizer,
        scenario: &ScenarioConfig,
        thresholds: &ClassifierConfig,
        target: Ipv4Addr,
        timestamp: DateTime<Utc>,
    ) -> Result<Flow, SimError> {
        let [vlo, vhi] = scenario.extreme_volume_factor;
        let extreme_bytes = |rng: &mut R| (thresholds.volume_threshold_bytes * rng.random_range(vlo..=vhi)).ceil() as u64;

        let flow = match self {
            ScenarioKind::Ddos => {
                let bytes = extreme_bytes(&mut *rng);
                Flow {
                    id: random_id(rng),
                    source_ip: FlowSynthesizer::external_ip(rng),
                    destination_ip: target,
                    source_port: FlowSynthesizer::ephemeral_port(rng),
                    destination_port: if rng.random_bool(0.5) { 80 } else { 443 },
                    port_fanout: 1,
                    bytes,
                    packets: bytes.div_ceil(rng.random_range(64..=512)),
                    protocol: if rng.random_bool(0.7) { Protocol::Udp } else { Protocol::Tcp },
                    duration_ms: rng.random_range(1_000..=5_000),
                    timestamp,
                    is_anomalous: true,
                }
            }
            ScenarioKind::PortScan => {
                let [flo, fhi] = scenario.scan_fanout;
                let fanout = rng.random_range(flo..=fhi);
                let bytes = extreme_bytes(&mut *rng);
                Flow {
                    id: random_id(rng),
                    source_ip: FlowSynthesizer::external_ip(rng),
                    destination_ip: target,
                    source_port: FlowSynthesizer::ephemeral_port(rng),
                    destination_port: rng.random_range(1..=1_024),
                    port_fanout: fanout,
                    bytes,
                    packets: bytes.div_ceil(rng.random_range(60..=120)),
                    protocol: Protocol::Tcp,
                    duration_ms: rng.random_range(2_000..=10_000),
                    timestamp,
                    is_anomalous: true,
                }
            }
            ScenarioKind::Exfiltration => {
                let bytes = extreme_bytes(&mut *rng);
                Flow {
                    id: random_id(rng),
                    source_ip: synth.internal_ip(rng),
                    destination_ip: target,
                    source_port: FlowSynthesizer::ephemeral_port(rng),
                    destination_port: 443,
                    port_fanout: 1,
                    bytes,
                    packets: bytes.div_ceil(rng.random_range(1_200..=1_500)),
                    protocol: Protocol::Tcp,
                    duration_ms: rng.random_range(60_000..=600_000),
                    timestamp,
                    is_anomalous: true,
                }
            }
        };
        validate_flow(flow)
    }

    /// Pin a classified unit to the scenario's verdict
    pub fn pin_anomaly<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        anomaly: &mut Anomaly,
        deviation: f64,
        confidence_band: [f64; 2],
    ) {
        let [lo, hi] = confidence_band;
        anomaly.anomaly_type = Self::FORCED_TYPE;
        anomaly.severity = Severity::Critical;
        anomaly.confidence = rng.random_range(lo..=hi);
        anomaly.deviation = deviation;
        anomaly.description = format!(
            "{}: {}",
            self.label(),
            crate::classifier::describe(anomaly.anomaly_type, &anomaly.flow, deviation)
        );
    }

    /// Tag and title the alarm raised for a unit
    pub fn label_alarm(&self, alarm: &mut Alarm, target: Ipv4Addr) {
        alarm.title = format!("{} targeting {}", self.label(), target);
        alarm.tags.insert(self.as_str().to_string());
        alarm.tags.insert("scenario".to_string());
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ddos" | "ddos_attack" => Ok(ScenarioKind::Ddos),
            "port_scan" | "portscan" | "scan" => Ok(ScenarioKind::PortScan),
            "exfiltration" | "exfil" | "data_exfiltration" => Ok(ScenarioKind::Exfiltration),
            other => Err(SimError::invalid_config(format!("unknown scenario kind '{other}'"))),
        }
    }
}

/// List all available scenario kinds with a one-line description
pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    ScenarioKind::ALL.iter().map(|k| (k.as_str(), k.description())).collect()
}

/// A validated, scheduled attack
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttackPlan {
    pub id: ScenarioId,
    pub kind: ScenarioKind,
    pub target: Ipv4Addr,
    pub units: usize,
    pub stagger: Duration,
    pub started_at: DateTime<Utc>,
}

impl AttackPlan {
    /// Validate `target` and `size` and lay out the schedule
    pub fn new(
        id: ScenarioId,
        config: &ScenarioConfig,
        target: &str,
        size: Option<usize>,
        kind: ScenarioKind,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SimError> {
        let target: Ipv4Addr = target
            .trim()
            .parse()
            .map_err(|_| SimError::invalid_config(format!("attack target '{target}' is not an IPv4 address")))?;

        let units = size.unwrap_or(config.default_units);
        if units == 0 || units > config.max_units {
            return Err(SimError::invalid_config(format!(
                "attack size {units} must be within 1..={}",
                config.max_units
            )));
        }

        Ok(Self {
            id,
            kind,
            target,
            units,
            stagger: Duration::from_millis(config.stagger_ms),
            started_at,
        })
    }

    /// Offset of unit `index` from the scenario start
    pub fn unit_offset(&self, index: usize) -> Duration {
        self.stagger * index as u32
    }

    /// Timestamp stamped on unit `index`
    pub fn unit_time(&self, index: usize) -> DateTime<Utc> {
        self.started_at + TimeDelta::from_std(self.unit_offset(index)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::AnomalyClassifier;
    use crate::config::FlowConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn plan(target: &str, size: Option<usize>) -> Result<AttackPlan, SimError> {
        AttackPlan::new(
            ScenarioId(Uuid::nil()),
            &ScenarioConfig::default(),
            target,
            size,
            ScenarioKind::Ddos,
            start(),
        )
    }

    #[test]
    fn test_plan_defaults_and_schedule() {
        let plan = plan("192.168.1.100", None).unwrap();
        assert_eq!(plan.units, 10);
        assert_eq!(plan.target, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(plan.unit_time(0), start());
        assert_eq!(plan.unit_time(3), start() + TimeDelta::milliseconds(1_350));
        assert_eq!(plan.unit_offset(9), Duration::from_millis(4_050));
    }

    #[test]
    fn test_plan_rejects_bad_input() {
        assert!(matches!(plan("not-an-ip", None), Err(SimError::InvalidConfiguration(_))));
        assert!(matches!(plan("::1", None), Err(SimError::InvalidConfiguration(_))));
        assert!(matches!(plan("10.0.0.1", Some(0)), Err(SimError::InvalidConfiguration(_))));
        assert!(matches!(plan("10.0.0.1", Some(65)), Err(SimError::InvalidConfiguration(_))));
        assert!(plan("10.0.0.1", Some(64)).is_ok());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("ddos".parse::<ScenarioKind>().unwrap(), ScenarioKind::Ddos);
        assert_eq!("Port_Scan".parse::<ScenarioKind>().unwrap(), ScenarioKind::PortScan);
        assert_eq!("exfil".parse::<ScenarioKind>().unwrap(), ScenarioKind::Exfiltration);
        assert!("meteor".parse::<ScenarioKind>().is_err());
        assert_eq!(list_scenarios().len(), 3);
    }

    #[test]
    fn test_units_are_extreme_and_aimed() {
        let synth = FlowSynthesizer::new(FlowConfig::default(), ClassifierConfig::default(), Vec::new());
        let classifier = AnomalyClassifier::new(ClassifierConfig::default());
        let config = ScenarioConfig::default();
        let target = Ipv4Addr::new(192, 168, 1, 100);
        let mut rng = StdRng::seed_from_u64(21);

        for kind in ScenarioKind::ALL {
            for _ in 0..50 {
                let flow = kind
                    .synthesize(&mut rng, &synth, &config, classifier.config(), target, start())
                    .unwrap();
                assert_eq!(flow.destination_ip, target);
                assert!(flow.is_anomalous);

                let [vlo, _] = config.extreme_volume_factor;
                let deviation = classifier.deviations(&flow).get(AnomalyType::Volume);
                assert!(deviation >= vlo, "{kind} unit bytes not extreme: {deviation}");
                assert!(flow.packets <= flow.bytes);
                if kind == ScenarioKind::PortScan {
                    assert!(flow.port_fanout >= config.scan_fanout[0]);
                }

                let mut anomaly = classifier.classify(&mut rng, &flow).unwrap();
                kind.pin_anomaly(&mut rng, &mut anomaly, deviation, config.confidence_band);
                assert_eq!(anomaly.anomaly_type, AnomalyType::Volume);
                assert_eq!(anomaly.deviation, deviation);
                assert_eq!(anomaly.severity, Severity::Critical);
                assert!(anomaly.confidence >= 0.95 && anomaly.confidence <= 1.0);
                assert!(anomaly.description.contains("192.168.1.100"));
            }
        }
    }

    #[test]
    fn test_label_alarm() {
        let classifier = AnomalyClassifier::new(ClassifierConfig::default());
        let synth = FlowSynthesizer::new(FlowConfig::default(), ClassifierConfig::default(), Vec::new());
        let mut rng = StdRng::seed_from_u64(22);
        let target = Ipv4Addr::new(10, 10, 0, 9);

        let flow = ScenarioKind::PortScan
            .synthesize(&mut rng, &synth, &ScenarioConfig::default(), classifier.config(), target, start())
            .unwrap();
        let anomaly = classifier.classify(&mut rng, &flow).unwrap();
        let mut alarm = crate::alarm::correlate(&mut rng, &anomaly);
        ScenarioKind::PortScan.label_alarm(&mut alarm, target);

        assert_eq!(alarm.title, "Port scan targeting 10.10.0.9");
        assert!(alarm.tags.contains("port_scan"));
        assert!(alarm.tags.contains("scenario"));
    }
}
