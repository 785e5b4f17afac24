//! Session-level behavior under paused tokio time

use chrono::TimeDelta;
use flowscope_sim::{
    AlarmCommand, AlarmStatus, AnomalyType, EngineState, ScenarioKind, Severity, SimConfig,
    SimError, SimEvent, SimulationEngine,
};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use uuid::Uuid;

const TARGET: &str = "192.168.1.100";

/// Ticks never produce anomalies, so every anomaly seen comes from a scenario
fn quiet_config() -> SimConfig {
    let mut config = SimConfig::default().with_seed(42);
    config.clock.anomaly_probability = 0.0;
    config
}

fn drain(events: &mut broadcast::Receiver<SimEvent>) -> Vec<SimEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn test_ddos_scenario_emits_staggered_critical_units() {
    let mut session = SimulationEngine::new(quiet_config()).unwrap().start();
    let mut events = session.subscribe();

    let id = session
        .generate_attack_scenario(TARGET, Some(10), ScenarioKind::Ddos)
        .await
        .unwrap();

    let mut started = false;
    let mut anomalies = Vec::new();
    let mut alarms = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            SimEvent::ScenarioStarted { id: sid, units, .. } => {
                assert_eq!(sid, id);
                assert_eq!(units, 10);
                started = true;
            }
            SimEvent::Anomaly(anomaly) => anomalies.push(anomaly),
            SimEvent::Alarm(alarm) => alarms.push(alarm),
            SimEvent::ScenarioCompleted { id: done, emitted } => {
                assert_eq!(done, id);
                assert_eq!(emitted, 10);
                break;
            }
            _ => {}
        }
    }

    assert!(started);
    assert_eq!(anomalies.len(), 10);
    assert_eq!(alarms.len(), 10);

    let target: Ipv4Addr = TARGET.parse().unwrap();
    for anomaly in &anomalies {
        assert_eq!(anomaly.anomaly_type, AnomalyType::Volume);
        assert_eq!(anomaly.severity, Severity::Critical);
        assert!(anomaly.confidence >= 0.95 && anomaly.confidence <= 1.0);
        assert!(anomaly.description.contains(TARGET));
        assert_eq!(anomaly.flow.destination_ip, target);
        assert!(anomaly.flow.is_anomalous);
    }
    for pair in anomalies.windows(2) {
        assert_eq!(pair[1].timestamp - pair[0].timestamp, TimeDelta::milliseconds(450));
    }
    for (alarm, anomaly) in alarms.iter().zip(&anomalies) {
        assert_eq!(alarm.anomaly_id, anomaly.id);
        assert_eq!(alarm.status, AlarmStatus::Open);
        assert!(alarm.title.contains(TARGET));
    }

    let engine = session.stop().await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.stats().scenarios_started, 1);
    assert_eq!(engine.stats().scenarios_completed, 1);
    assert_eq!(engine.stats().scenario_units_emitted, 10);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_fill_capped_histories() {
    let mut config = SimConfig::default().with_seed(9);
    config.clock.tick_interval_ms = 100;
    config.clock.anomaly_probability = 1.0;
    let session = SimulationEngine::new(config).unwrap().start();

    sleep(Duration::from_millis(3_050)).await;
    let snapshot = session.snapshot().await.unwrap();

    assert_eq!(snapshot.state, EngineState::Running);
    assert_eq!(snapshot.stats.tick_count, 30);
    assert_eq!(snapshot.stats.failed_ticks, 0);
    assert_eq!(snapshot.stats.anomalies_recorded, 30);
    assert_eq!(snapshot.anomalies.len(), 20);
    assert_eq!(snapshot.alarms.len(), 20);
    assert_eq!(snapshot.flows.len(), 20);
    assert_eq!(snapshot.metrics.open_alarms, 20);
    assert!(snapshot.anomalies.iter().all(|a| a.severity > Severity::Low));

    // Newest first
    for pair in snapshot.anomalies.windows(2) {
        assert!(pair[0].timestamp > pair[1].timestamp);
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_waits_one_interval() {
    let session = SimulationEngine::new(quiet_config()).unwrap().start();
    let mut events = session.subscribe();

    sleep(Duration::from_millis(2_400)).await;
    assert!(drain(&mut events).is_empty());

    sleep(Duration::from_millis(200)).await;
    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(e, SimEvent::Flow(f) if !f.is_anomalous)));
    assert!(matches!(seen.last(), Some(SimEvent::Metrics(_))));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_scenario_drops_remaining_units() {
    let mut session = SimulationEngine::new(quiet_config()).unwrap().start();
    let mut events = session.subscribe();

    let id = session
        .generate_attack_scenario(TARGET, Some(10), ScenarioKind::Ddos)
        .await
        .unwrap();

    // Units 0, 1 and 2 are due at 0, 450 and 900 ms
    sleep(Duration::from_millis(910)).await;
    assert!(session.cancel_scenario(id));
    assert!(!session.cancel_scenario(id));

    // Reported well before unit 3 would have been due at 1350 ms
    sleep(Duration::from_millis(10)).await;
    let seen = drain(&mut events);
    let anomalies = seen.iter().filter(|e| matches!(e, SimEvent::Anomaly(_))).count();
    assert_eq!(anomalies, 3);
    assert!(matches!(
        seen.last(),
        Some(SimEvent::ScenarioCancelled { id: cid, emitted: 3 }) if *cid == id
    ));
    assert_eq!(session.snapshot().await.unwrap().stats.scenarios_cancelled, 1);

    sleep(Duration::from_millis(2_000)).await;
    let engine = session.stop().await.unwrap();

    assert_eq!(engine.stats().scenario_units_emitted, 3);
    assert_eq!(engine.stats().scenarios_cancelled, 1);
    assert_eq!(engine.stats().scenarios_completed, 0);

    let seen = drain(&mut events);
    assert!(!seen.iter().any(|e| matches!(e, SimEvent::Anomaly(_))));
    assert!(!seen.iter().any(|e| matches!(e, SimEvent::ScenarioCompleted { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_stop_abandons_pending_units() {
    let mut session = SimulationEngine::new(quiet_config()).unwrap().start();
    let mut events = session.subscribe();

    session
        .generate_attack_scenario(TARGET, Some(10), ScenarioKind::PortScan)
        .await
        .unwrap();
    sleep(Duration::from_millis(500)).await;

    let engine = session.stop().await.unwrap();
    assert_eq!(engine.stats().scenario_units_emitted, 2);
    assert_eq!(engine.stats().scenarios_cancelled, 1);

    // The stream ends once the loop exits
    let mut scan_anomalies = 0;
    loop {
        match events.recv().await {
            Ok(SimEvent::Anomaly(a)) => {
                assert_eq!(a.anomaly_type, AnomalyType::Volume);
                assert!(a.flow.port_fanout >= 500);
                scan_anomalies += 1;
            }
            Ok(SimEvent::ScenarioCompleted { .. }) => panic!("scenario should not complete"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Closed) => break,
            Err(e) => panic!("unexpected receive error: {e}"),
        }
    }
    assert_eq!(scan_anomalies, 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_attack_rejected() {
    let mut session = SimulationEngine::new(quiet_config()).unwrap().start();

    for (target, size) in [("not-an-ip", None), (TARGET, Some(0)), (TARGET, Some(1_000))] {
        let result = session
            .generate_attack_scenario(target, size, ScenarioKind::Ddos)
            .await;
        assert!(matches!(result, Err(SimError::InvalidConfiguration(_))));
    }

    assert!(session.is_running());
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.stats.scenarios_started, 0);
    assert!(snapshot.anomalies.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_alarm_transitions_through_session() {
    let mut session = SimulationEngine::new(quiet_config()).unwrap().start();
    let mut events = session.subscribe();

    session
        .generate_attack_scenario(TARGET, Some(1), ScenarioKind::Exfiltration)
        .await
        .unwrap();

    let alarm = loop {
        if let SimEvent::Alarm(alarm) = events.recv().await.unwrap() {
            break alarm;
        }
    };
    assert_eq!(alarm.status, AlarmStatus::Open);

    let acked = session
        .transition_alarm(alarm.id, AlarmCommand::Acknowledge, "alice")
        .await
        .unwrap();
    assert_eq!(acked.status, AlarmStatus::Acknowledged);

    let updated = loop {
        if let SimEvent::AlarmUpdated(updated) = events.recv().await.unwrap() {
            break updated;
        }
    };
    assert_eq!(updated.id, alarm.id);
    assert_eq!(updated.actions.len(), 1);
    assert_eq!(updated.actions[0].user, "alice");

    let resolved = session
        .transition_alarm(
            alarm.id,
            AlarmCommand::Resolve {
                note: Some("blocked upstream".to_string()),
            },
            "bob",
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, AlarmStatus::Resolved);

    let err = session
        .transition_alarm(alarm.id, AlarmCommand::Acknowledge, "alice")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SimError::InvalidTransition {
            from: AlarmStatus::Resolved,
            ..
        }
    ));

    let err = session
        .transition_alarm(Uuid::nil(), AlarmCommand::Investigate, "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, SimError::AlarmNotFound(id) if id.is_nil()));

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.metrics.open_alarms, 0);
    assert_eq!(snapshot.alarms[0].actions.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_engine_restarts_after_stop() {
    let session = SimulationEngine::new(quiet_config()).unwrap().start();
    let engine = session.stop().await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);

    let session = engine.start();
    sleep(Duration::from_millis(2_600)).await;
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.stats.tick_count, 1);
}
