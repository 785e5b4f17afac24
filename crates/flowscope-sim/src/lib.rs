//! # flowscope-sim - Network Flow & Anomaly Simulation Engine
//!
//! Synthetic network-monitoring telemetry for driving security dashboards:
//! a static topology, a stream of flows, anomaly verdicts derived from those
//! flows, stateful alarms, and scripted attack bursts.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                         flowscope-sim                             │
//! │                                                                   │
//! │   SimulationSession (tokio task)                                  │
//! │   ┌───────────────────────────────────────────────────────────┐   │
//! │   │                  SimulationEngine                         │   │
//! │   │                                                           │   │
//! │   │  ┌──────────┐  ┌───────────┐  ┌────────────┐  ┌────────┐  │   │
//! │   │  │ topology │  │ generator │─▶│ classifier │─▶│ alarm  │  │   │
//! │   │  └──────────┘  └───────────┘  └────────────┘  └────────┘  │   │
//! │   │                      ▲                                    │   │
//! │   │                ┌───────────┐                              │   │
//! │   │                │ scenarios │  (staggered attack units)    │   │
//! │   │                └───────────┘                              │   │
//! │   │                                                           │   │
//! │   │   History<Flow> · History<Anomaly> · History<Alarm>       │   │
//! │   └───────────────────────────────────────────────────────────┘   │
//! │              │ SimEvent (broadcast)    ▲ commands (mpsc)          │
//! └──────────────┼─────────────────────────┼──────────────────────────┘
//!                ▼                         │
//!           dashboards                  operators
//! ```
//!
//! ## Key Design Principles
//!
//! 1. **Reproducible** - every random draw, identifiers included, comes from
//!    the engine's seeded `StdRng`.
//!
//! 2. **Guaranteed verdicts** - anomalous flows are drawn above the
//!    classifier's thresholds and normal flows below them, so a flow's origin
//!    and its classification always agree.
//!
//! 3. **One loop** - a session is a single cooperative task; histories are
//!    never touched from anywhere else.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowscope_sim::{ScenarioKind, SimConfig, SimEvent, SimulationEngine};
//!
//! # async fn demo() -> Result<(), flowscope_sim::SimError> {
//! let engine = SimulationEngine::new(SimConfig::default().with_seed(7))?;
//! let mut session = engine.start();
//! let mut events = session.subscribe();
//!
//! session
//!     .generate_attack_scenario("192.168.1.100", Some(10), ScenarioKind::Ddos)
//!     .await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let SimEvent::ScenarioCompleted { .. } = event {
//!         break;
//!     }
//! }
//! let engine = session.stop().await?;
//! assert_eq!(engine.stats().scenario_units_emitted, 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Scenarios
//!
//! | Kind           | Forced type | Description                              |
//! |----------------|-------------|------------------------------------------|
//! | `ddos`         | volume      | Botnet flood against one target          |
//! | `port_scan`    | volume      | Thousands of ports probed on the target  |
//! | `exfiltration` | volume      | Bulk transfer from an internal host      |

// Core types - single source of truth
pub mod core;

pub mod config;
pub mod error;
pub mod history;

// Generators
pub mod classifier;
pub mod generator;
pub mod topology;

pub mod alarm;
pub mod scenarios;

// Engine and its async driver
pub mod engine;
pub mod session;

// Re-exports for convenience
pub use core::{
    Alarm, AlarmAction, AlarmActionKind, AlarmStatus, Anomaly, AnomalyType, Edge, EdgeStatus, Flow,
    NetworkMetrics, Node, NodeStatus, NodeType, Protocol, Severity, Topology,
};

pub use alarm::AlarmCommand;
pub use classifier::AnomalyClassifier;
pub use config::SimConfig;
pub use engine::{DashboardSnapshot, EngineState, EngineStats, SimulationEngine, TickOutcome};
pub use error::SimError;
pub use generator::FlowSynthesizer;
pub use history::History;
pub use scenarios::{AttackPlan, ScenarioId, ScenarioKind, list_scenarios};
pub use session::{SimEvent, SimulationSession};
pub use topology::TopologyGenerator;
