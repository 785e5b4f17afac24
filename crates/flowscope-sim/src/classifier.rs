//! Anomaly Classifier
//!
//! Scores a flow along four dimensions, each normalized so that 1.0 sits
//! exactly at the dimension's threshold:
//!
//! | dimension  | deviation                         |
//! |------------|-----------------------------------|
//! | volume     | bytes / volume_threshold_bytes    |
//! | pattern    | port fan-out / fanout_threshold   |
//! | protocol   | protocol rarity / rarity_threshold|
//! | behavioral | packets per second / pps_threshold|
//!
//! The largest deviation picks the anomaly type and drives both severity
//! (via the configured bands) and confidence.

use crate::config::ClassifierConfig;
use crate::core::{Anomaly, AnomalyType, Flow, Severity, random_id};
use crate::error::{SimError, ensure_in_range};
use rand::Rng;

/// Per-dimension deviations of one flow
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deviations {
    pub volume: f64,
    pub pattern: f64,
    pub protocol: f64,
    pub behavioral: f64,
}

impl Deviations {
    pub fn get(&self, anomaly_type: AnomalyType) -> f64 {
        match anomaly_type {
            AnomalyType::Volume => self.volume,
            AnomalyType::Pattern => self.pattern,
            AnomalyType::Protocol => self.protocol,
            AnomalyType::Behavioral => self.behavioral,
        }
    }

    /// Dimension with the largest deviation; ties go to the earlier dimension
    pub fn dominant(&self) -> (AnomalyType, f64) {
        let mut best = (AnomalyType::Volume, self.volume);
        for anomaly_type in AnomalyType::ALL.into_iter().skip(1) {
            let value = self.get(anomaly_type);
            if value > best.1 {
                best = (anomaly_type, value);
            }
        }
        best
    }
}

pub struct AnomalyClassifier {
    config: ClassifierConfig,
}

impl AnomalyClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn deviations(&self, flow: &Flow) -> Deviations {
        let c = &self.config;
        Deviations {
            volume: flow.bytes as f64 / c.volume_threshold_bytes,
            pattern: flow.port_fanout as f64 / c.fanout_threshold,
            protocol: flow.protocol.rarity() / c.rarity_threshold,
            behavioral: flow.packet_rate() / c.pps_threshold,
        }
    }

    /// Map a deviation magnitude onto the severity scale
    pub fn severity_for(&self, deviation: f64) -> Severity {
        let [medium, high, critical] = self.config.severity_bands;
        if deviation < medium {
            Severity::Low
        } else if deviation < high {
            Severity::Medium
        } else if deviation < critical {
            Severity::High
        } else {
            Severity::Critical
        }
    }

    /// Saturating confidence, discounted by per-flow measurement noise
    pub fn confidence(&self, deviation: f64, packets: u64) -> f64 {
        let c = &self.config;
        let signal = 1.0 - (-c.confidence_steepness * deviation).exp();
        let noise = c.noise_scale / (packets.max(1) as f64).sqrt();
        (signal * (1.0 - noise)).clamp(0.0, 1.0)
    }

    /// Classify one flow. Every flow yields an anomaly; low deviations simply
    /// come out as low severity.
    pub fn classify<R: Rng + ?Sized>(&self, rng: &mut R, flow: &Flow) -> Result<Anomaly, SimError> {
        let (anomaly_type, deviation) = self.deviations(flow).dominant();
        let deviation = ensure_in_range("deviation", deviation, 0.0, f64::MAX)?;
        let confidence = ensure_in_range("confidence", self.confidence(deviation, flow.packets), 0.0, 1.0)?;
        let severity = self.severity_for(deviation);

        Ok(Anomaly {
            id: random_id(rng),
            flow: flow.clone(),
            anomaly_type,
            severity,
            confidence,
            deviation,
            description: describe(anomaly_type, flow, deviation),
            timestamp: flow.timestamp,
        })
    }
}

/// Operator-facing summary; always names the destination address
pub fn describe(anomaly_type: AnomalyType, flow: &Flow, deviation: f64) -> String {
    let detail = match anomaly_type {
        AnomalyType::Volume => format!(
            "{:.1} MB transferred from {} ({:.1}x threshold)",
            flow.megabytes(),
            flow.source_ip,
            deviation
        ),
        AnomalyType::Pattern => format!(
            "{} touched {} distinct ports",
            flow.source_ip, flow.port_fanout
        ),
        AnomalyType::Protocol => format!("unusual {} traffic from {}", flow.protocol, flow.source_ip),
        AnomalyType::Behavioral => format!(
            "{:.0} packets/s from {} over {} ms",
            flow.packet_rate(),
            flow.source_ip,
            flow.duration_ms
        ),
    };
    format!(
        "{} anomaly detected toward {}: {}",
        anomaly_type.title(),
        flow.destination_ip,
        detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::core::Protocol;
    use crate::generator::FlowSynthesizer;
    use chrono::DateTime;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::net::Ipv4Addr;

    fn flow(bytes: u64, packets: u64, fanout: u32, protocol: Protocol, duration_ms: u64) -> Flow {
        Flow {
            id: uuid::Uuid::nil(),
            source_ip: Ipv4Addr::new(10, 10, 0, 5),
            destination_ip: Ipv4Addr::new(192, 168, 1, 100),
            source_port: 51_000,
            destination_port: 443,
            port_fanout: fanout,
            bytes,
            packets,
            protocol,
            duration_ms,
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            is_anomalous: false,
        }
    }

    fn classifier() -> AnomalyClassifier {
        AnomalyClassifier::new(ClassifierConfig::default())
    }

    #[test]
    fn test_dominant_dimension_picks_type() {
        let c = classifier();
        let mut rng = StdRng::seed_from_u64(1);

        // 50 MB over 60 s: volume deviation 5.0
        let anomaly = c.classify(&mut rng, &flow(50_000_000, 40_000, 1, Protocol::Tcp, 60_000)).unwrap();
        assert_eq!(anomaly.anomaly_type, AnomalyType::Volume);
        assert_eq!(anomaly.severity, Severity::Critical);
        assert!((anomaly.deviation - 5.0).abs() < 1e-9);

        let anomaly = c.classify(&mut rng, &flow(10_000, 100, 60, Protocol::Tcp, 5_000)).unwrap();
        assert_eq!(anomaly.anomaly_type, AnomalyType::Pattern);
        assert_eq!(anomaly.severity, Severity::High);

        let anomaly = c.classify(&mut rng, &flow(10_000, 100, 1, Protocol::Sctp, 5_000)).unwrap();
        assert_eq!(anomaly.anomaly_type, AnomalyType::Protocol);
        assert_eq!(anomaly.severity, Severity::Medium);

        // 15,000 packets in 1 s
        let anomaly = c.classify(&mut rng, &flow(1_000_000, 15_000, 1, Protocol::Udp, 1_000)).unwrap();
        assert_eq!(anomaly.anomaly_type, AnomalyType::Behavioral);
        assert_eq!(anomaly.severity, Severity::High);
    }

    #[test]
    fn test_severity_bands() {
        let c = classifier();
        assert_eq!(c.severity_for(0.2), Severity::Low);
        assert_eq!(c.severity_for(1.0), Severity::Medium);
        assert_eq!(c.severity_for(1.99), Severity::Medium);
        assert_eq!(c.severity_for(2.0), Severity::High);
        assert_eq!(c.severity_for(4.0), Severity::Critical);
        assert_eq!(c.severity_for(100.0), Severity::Critical);
    }

    #[test]
    fn test_confidence_bounds_and_noise() {
        let c = classifier();
        for deviation in [0.0, 0.5, 1.0, 3.0, 50.0] {
            for packets in [1, 10, 10_000] {
                let conf = c.confidence(deviation, packets);
                assert!((0.0..=1.0).contains(&conf));
            }
        }
        // More packets means less noise
        assert!(c.confidence(2.0, 10_000) > c.confidence(2.0, 1));
        // Larger deviation means more confidence
        assert!(c.confidence(4.0, 100) > c.confidence(1.0, 100));
    }

    #[test]
    fn test_description_names_destination() {
        let c = classifier();
        let mut rng = StdRng::seed_from_u64(2);
        let anomaly = c.classify(&mut rng, &flow(50_000_000, 40_000, 1, Protocol::Tcp, 60_000)).unwrap();
        assert!(anomaly.description.starts_with("Volume anomaly detected toward 192.168.1.100"));
        assert_eq!(anomaly.timestamp, anomaly.flow.timestamp);
    }

    #[test]
    fn test_forced_flows_never_low() {
        let c = classifier();
        let synth = FlowSynthesizer::new(FlowConfig::default(), ClassifierConfig::default(), Vec::new());
        let mut rng = StdRng::seed_from_u64(3);
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        for _ in 0..1_000 {
            let flow = synth.generate_flow(&mut rng, true, now).unwrap();
            let anomaly = c.classify(&mut rng, &flow).unwrap();
            assert!(anomaly.severity > Severity::Low, "{anomaly:?}");
            assert!((0.0..=1.0).contains(&anomaly.confidence));
        }
    }

    #[test]
    fn test_normal_flows_classify_low() {
        let c = classifier();
        let synth = FlowSynthesizer::new(FlowConfig::default(), ClassifierConfig::default(), Vec::new());
        let mut rng = StdRng::seed_from_u64(4);
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        for _ in 0..1_000 {
            let flow = synth.generate_flow(&mut rng, false, now).unwrap();
            let anomaly = c.classify(&mut rng, &flow).unwrap();
            assert_eq!(anomaly.severity, Severity::Low);
        }
    }

    #[test]
    fn test_tightest_valid_thresholds_keep_normal_flows_low() {
        let mut config = crate::config::SimConfig::default();
        config.classifier.fanout_threshold = 2.0;
        config.classifier.volume_threshold_bytes = 80.0;
        config.validate().unwrap();

        let c = AnomalyClassifier::new(config.classifier.clone());
        let synth = FlowSynthesizer::new(config.flows.clone(), config.classifier.clone(), Vec::new());
        let mut rng = StdRng::seed_from_u64(5);
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        for _ in 0..500 {
            let flow = synth.generate_flow(&mut rng, false, now).unwrap();
            assert_eq!(flow.port_fanout, 1);
            let deviations = c.deviations(&flow);
            assert!(deviations.pattern < 1.0 && deviations.volume < 1.0);
            assert_eq!(c.classify(&mut rng, &flow).unwrap().severity, Severity::Low);
        }
    }
}
