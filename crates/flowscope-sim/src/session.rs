//! Simulation Session
//!
//! Drives a [`SimulationEngine`] from one cooperative tokio task:
//!
//! ```text
//!   SimulationSession ──commands (mpsc)──▶ ┌───────────────────────┐
//!                                          │      event loop       │
//!   subscribers ◀──SimEvent (broadcast)─── │  select! {            │
//!                                          │    cancelled,         │
//!                                          │    tick interval,     │
//!                                          │    command,           │
//!                                          │    scenario cancelled,│
//!                                          │    next unit deadline │
//!                                          │  }                    │
//!                                          └───────────────────────┘
//! ```
//!
//! The engine never leaves the loop while the session runs; `stop` hands it
//! back with its histories intact. Every scenario carries a child of the
//! session's cancellation token, checked right before each unit is emitted.

use crate::alarm::AlarmCommand;
use crate::core::{Alarm, Anomaly, Flow, NetworkMetrics};
use crate::engine::{DashboardSnapshot, EngineState, SimulationEngine};
use crate::error::SimError;
use crate::scenarios::{AttackPlan, ScenarioId, ScenarioKind};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything a running session publishes
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    Flow(Flow),
    Anomaly(Anomaly),
    Alarm(Alarm),
    AlarmUpdated(Alarm),
    Metrics(NetworkMetrics),
    ScenarioStarted {
        id: ScenarioId,
        kind: ScenarioKind,
        target: Ipv4Addr,
        units: usize,
    },
    ScenarioCompleted {
        id: ScenarioId,
        emitted: usize,
    },
    ScenarioCancelled {
        id: ScenarioId,
        emitted: usize,
    },
}

enum SessionCommand {
    StartScenario {
        target: String,
        size: Option<usize>,
        kind: ScenarioKind,
        token: CancellationToken,
        reply: oneshot::Sender<Result<ScenarioId, SimError>>,
    },
    TransitionAlarm {
        alarm_id: Uuid,
        command: AlarmCommand,
        user: String,
        reply: oneshot::Sender<Result<Alarm, SimError>>,
    },
    Snapshot {
        reply: oneshot::Sender<DashboardSnapshot>,
    },
}

/// Maps the tokio clock onto wall-clock timestamps, so paused test time
/// moves record timestamps too
#[derive(Debug, Clone, Copy)]
struct SessionClock {
    base: DateTime<Utc>,
    origin: Instant,
}

impl SessionClock {
    fn new() -> Self {
        Self {
            base: Utc::now(),
            origin: Instant::now(),
        }
    }

    fn at(&self, instant: Instant) -> DateTime<Utc> {
        let elapsed = instant.saturating_duration_since(self.origin);
        self.base + TimeDelta::from_std(elapsed).unwrap_or_default()
    }

    fn now(&self) -> DateTime<Utc> {
        self.at(Instant::now())
    }
}

struct ActiveScenario {
    plan: AttackPlan,
    origin: Instant,
    next: usize,
    emitted: usize,
    token: CancellationToken,
}

impl ActiveScenario {
    fn deadline(&self) -> Instant {
        self.origin + self.plan.unit_offset(self.next)
    }

    fn is_done(&self) -> bool {
        self.next >= self.plan.units
    }
}

/// Handle to a running session
pub struct SimulationSession {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SimEvent>,
    token: CancellationToken,
    scenarios: HashMap<ScenarioId, CancellationToken>,
    /// Wakes the loop so a cancelled scenario is reported right away
    scenario_cancelled: Arc<Notify>,
    task: Option<JoinHandle<SimulationEngine>>,
}

impl SimulationEngine {
    /// Spawn the session loop on the current tokio runtime
    pub fn start(self) -> SimulationSession {
        let clock = &self.config().clock;
        let (commands, rx) = mpsc::channel(clock.command_buffer);
        let (events, _) = broadcast::channel(clock.event_buffer);
        let token = CancellationToken::new();
        let scenario_cancelled = Arc::new(Notify::new());

        let task = tokio::spawn(run(
            self,
            rx,
            events.clone(),
            token.clone(),
            scenario_cancelled.clone(),
        ));

        SimulationSession {
            commands,
            events,
            token,
            scenarios: HashMap::new(),
            scenario_cancelled,
            task: Some(task),
        }
    }
}

impl SimulationSession {
    pub fn subscribe(&self) -> broadcast::Receiver<SimEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Launch a staggered attack. Returns once the scenario is scheduled;
    /// units arrive as events.
    pub async fn generate_attack_scenario(
        &mut self,
        target: &str,
        size: Option<usize>,
        kind: ScenarioKind,
    ) -> Result<ScenarioId, SimError> {
        let token = self.token.child_token();
        let id = self
            .request(|reply| SessionCommand::StartScenario {
                target: target.to_string(),
                size,
                kind,
                token: token.clone(),
                reply,
            })
            .await??;

        self.scenarios.retain(|_, t| !t.is_cancelled());
        self.scenarios.insert(id, token);
        Ok(id)
    }

    /// Stop a scenario; units not yet emitted are dropped. Returns false if
    /// the scenario already finished or was never started here.
    pub fn cancel_scenario(&mut self, id: ScenarioId) -> bool {
        match self.scenarios.remove(&id) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                self.scenario_cancelled.notify_one();
                true
            }
            _ => false,
        }
    }

    pub async fn transition_alarm(
        &self,
        alarm_id: Uuid,
        command: AlarmCommand,
        user: &str,
    ) -> Result<Alarm, SimError> {
        self.request(|reply| SessionCommand::TransitionAlarm {
            alarm_id,
            command,
            user: user.to_string(),
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<DashboardSnapshot, SimError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Cancel the loop and wait for it, returning the engine
    pub async fn stop(mut self) -> Result<SimulationEngine, SimError> {
        self.token.cancel();
        let task = self.task.take().ok_or(SimError::SessionClosed)?;
        task.await.map_err(|e| {
            error!(error = %e, "Session task failed");
            SimError::SessionClosed
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SimError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SimError::SessionClosed)?;
        rx.await.map_err(|_| SimError::SessionClosed)
    }
}

impl Drop for SimulationSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    mut engine: SimulationEngine,
    mut commands: mpsc::Receiver<SessionCommand>,
    events: broadcast::Sender<SimEvent>,
    token: CancellationToken,
    scenario_cancelled: Arc<Notify>,
) -> SimulationEngine {
    let clock = SessionClock::new();
    let period = Duration::from_millis(engine.config().clock.tick_interval_ms);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut scenarios: Vec<ActiveScenario> = Vec::new();

    engine.set_state(EngineState::Running);
    info!(tick_interval_ms = period.as_millis() as u64, "Simulation session started");

    loop {
        prune_cancelled(&mut engine, &mut scenarios, &events);
        let next_due = scenarios.iter().map(ActiveScenario::deadline).min();

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            // Pruned at the top of the loop
            _ = scenario_cancelled.notified() => {}
            _ = ticker.tick() => on_tick(&mut engine, &events, clock.now()),
            Some(command) = commands.recv() => {
                handle_command(&mut engine, &mut scenarios, &events, &clock, command);
            }
            _ = unit_due(next_due) => emit_due_units(&mut engine, &mut scenarios, &events),
        }
    }

    for scenario in scenarios {
        warn!(
            scenario = %scenario.plan.id,
            remaining = scenario.plan.units - scenario.next,
            "Session stopped with scenario units pending"
        );
        engine.scenario_finished(true);
    }
    engine.set_state(EngineState::Stopped);
    info!(ticks = engine.stats().tick_count, "Simulation session stopped");
    engine
}

async fn unit_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn publish(events: &broadcast::Sender<SimEvent>, event: SimEvent) {
    // No subscribers is fine
    let _ = events.send(event);
}

fn on_tick(engine: &mut SimulationEngine, events: &broadcast::Sender<SimEvent>, now: DateTime<Utc>) {
    match engine.tick(now) {
        Ok(outcome) => {
            debug!(
                tick = engine.stats().tick_count,
                flows = outcome.flows.len(),
                anomalous = outcome.anomaly.is_some(),
                "Tick"
            );
            for flow in outcome.flows {
                publish(events, SimEvent::Flow(flow));
            }
            if let Some(anomaly) = outcome.anomaly {
                publish(events, SimEvent::Anomaly(anomaly));
            }
            if let Some(alarm) = outcome.alarm {
                publish(events, SimEvent::Alarm(alarm));
            }
            publish(events, SimEvent::Metrics(outcome.metrics));
        }
        Err(e) => {
            error!(error = %e, failed = engine.stats().failed_ticks, "Tick failed; skipping");
        }
    }
}

fn handle_command(
    engine: &mut SimulationEngine,
    scenarios: &mut Vec<ActiveScenario>,
    events: &broadcast::Sender<SimEvent>,
    clock: &SessionClock,
    command: SessionCommand,
) {
    match command {
        SessionCommand::StartScenario {
            target,
            size,
            kind,
            token,
            reply,
        } => {
            let origin = Instant::now();
            let result = engine.plan_attack(&target, size, kind, clock.at(origin));
            let result = result.map(|plan| {
                info!(
                    scenario = %plan.id,
                    kind = %plan.kind,
                    target_ip = %plan.target,
                    units = plan.units,
                    stagger_ms = plan.stagger.as_millis() as u64,
                    "Scenario launched"
                );
                publish(
                    events,
                    SimEvent::ScenarioStarted {
                        id: plan.id,
                        kind: plan.kind,
                        target: plan.target,
                        units: plan.units,
                    },
                );
                let id = plan.id;
                scenarios.push(ActiveScenario {
                    plan,
                    origin,
                    next: 0,
                    emitted: 0,
                    token,
                });
                id
            });
            if let Err(e) = &result {
                warn!(error = %e, target_ip = %target, "Rejected attack scenario");
            }
            let _ = reply.send(result);
        }
        SessionCommand::TransitionAlarm {
            alarm_id,
            command,
            user,
            reply,
        } => {
            let result = engine.transition_alarm(alarm_id, command, &user, clock.now());
            if let Ok(alarm) = &result {
                publish(events, SimEvent::AlarmUpdated(alarm.clone()));
            }
            let _ = reply.send(result);
        }
        SessionCommand::Snapshot { reply } => {
            let _ = reply.send(engine.snapshot(clock.now()));
        }
    }
}

fn emit_due_units(
    engine: &mut SimulationEngine,
    scenarios: &mut Vec<ActiveScenario>,
    events: &broadcast::Sender<SimEvent>,
) {
    let now = Instant::now();

    for scenario in scenarios.iter_mut() {
        while !scenario.is_done() && scenario.deadline() <= now {
            if scenario.token.is_cancelled() {
                break;
            }
            match engine.emit_scenario_unit(&scenario.plan, scenario.next) {
                Ok(unit) => {
                    publish(events, SimEvent::Flow(unit.flow));
                    publish(events, SimEvent::Anomaly(unit.anomaly));
                    publish(events, SimEvent::Alarm(unit.alarm));
                    scenario.emitted += 1;
                }
                Err(e) => {
                    error!(scenario = %scenario.plan.id, unit = scenario.next, error = %e, "Scenario unit failed");
                }
            }
            scenario.next += 1;
        }
    }

    scenarios.retain(|scenario| {
        if !scenario.is_done() {
            return true;
        }
        scenario.token.cancel();
        engine.scenario_finished(false);
        info!(scenario = %scenario.plan.id, emitted = scenario.emitted, "Scenario completed");
        publish(
            events,
            SimEvent::ScenarioCompleted {
                id: scenario.plan.id,
                emitted: scenario.emitted,
            },
        );
        false
    });
}

fn prune_cancelled(
    engine: &mut SimulationEngine,
    scenarios: &mut Vec<ActiveScenario>,
    events: &broadcast::Sender<SimEvent>,
) {
    scenarios.retain(|scenario| {
        if !scenario.token.is_cancelled() {
            return true;
        }
        engine.scenario_finished(true);
        warn!(
            scenario = %scenario.plan.id,
            emitted = scenario.emitted,
            skipped = scenario.plan.units - scenario.next,
            "Scenario cancelled"
        );
        publish(
            events,
            SimEvent::ScenarioCancelled {
                id: scenario.plan.id,
                emitted: scenario.emitted,
            },
        );
        false
    });
}
