//! flowscope-sim - Network Flow & Anomaly Simulator
//!
//! Usage:
//!   flowscope-sim topology
//!   flowscope-sim flows --count 20 --anomalous
//!   flowscope-sim run --duration 30s --attack 192.168.1.100 --attack-kind ddos
//!   flowscope-sim config --output flowscope.toml
//!   flowscope-sim scenarios

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use flowscope_sim::{ScenarioKind, SimConfig, SimError, SimEvent, SimulationEngine, list_scenarios};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::Level;

#[derive(Parser)]
#[command(name = "flowscope-sim")]
#[command(about = "Synthetic network flow, anomaly and alarm simulation")]
struct Cli {
    /// TOML configuration file (defaults are used for anything it omits)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seed for a reproducible run
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a generated topology as JSON
    Topology,

    /// Print synthesized flows with their classification
    Flows {
        /// Number of flows
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Draw from the anomalous envelope
        #[arg(short, long)]
        anomalous: bool,
    },

    /// Run a live session and print its events
    Run {
        /// Duration (e.g., 500ms, 30s, 5m, 1h)
        #[arg(short, long, default_value = "30s")]
        duration: String,

        /// Launch an attack scenario against this IPv4 address
        #[arg(long)]
        attack: Option<String>,

        /// Number of attack units
        #[arg(long)]
        attack_size: Option<usize>,

        /// Attack kind (ddos, port_scan, exfiltration)
        #[arg(long, default_value = "ddos")]
        attack_kind: ScenarioKind,

        /// Delay before the attack starts
        #[arg(long, default_value = "5s")]
        attack_after: String,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        format: OutputFormat,
    },

    /// Write the default configuration file
    Config {
        #[arg(short, long, default_value = "flowscope.toml")]
        output: PathBuf,
    },

    /// List available attack scenarios
    Scenarios,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "flowscope-sim failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), SimError> {
    match cli.command {
        Commands::Topology => {
            let engine = SimulationEngine::new(load_config(cli.config.as_deref(), cli.seed)?)?;
            println!("{}", serde_json::to_string_pretty(engine.topology())?);
        }
        Commands::Flows { count, anomalous } => {
            let engine = SimulationEngine::new(load_config(cli.config.as_deref(), cli.seed)?)?;
            run_flows(engine, count, anomalous)?;
        }
        Commands::Run {
            duration,
            attack,
            attack_size,
            attack_kind,
            attack_after,
            format,
        } => {
            let engine = SimulationEngine::new(load_config(cli.config.as_deref(), cli.seed)?)?;
            let attack = attack.map(|target| Attack {
                target,
                size: attack_size,
                kind: attack_kind,
            });
            run_session(
                engine,
                parse_duration(&duration)?,
                attack,
                parse_duration(&attack_after)?,
                format,
            )
            .await?;
        }
        Commands::Config { output } => {
            let mut config = SimConfig::default();
            if let Some(seed) = cli.seed {
                config = config.with_seed(seed);
            }
            config.to_file(&output)?;
            eprintln!("Wrote default configuration to {}", output.display());
        }
        Commands::Scenarios => run_list(),
    }
    Ok(())
}

fn load_config(path: Option<&Path>, seed: Option<u64>) -> Result<SimConfig, SimError> {
    let mut config = match path {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };
    if let Some(seed) = seed {
        config = config.with_seed(seed);
    }
    Ok(config)
}

fn run_flows(mut engine: SimulationEngine, count: usize, anomalous: bool) -> Result<(), SimError> {
    for _ in 0..count {
        let flow = engine.generate_flow(anomalous, Utc::now())?;
        let anomaly = engine.generate_anomaly(&flow)?;
        let line = serde_json::json!({
            "flow": flow,
            "classification": {
                "type": anomaly.anomaly_type,
                "severity": anomaly.severity,
                "confidence": anomaly.confidence,
                "deviation": anomaly.deviation,
            },
        });
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

struct Attack {
    target: String,
    size: Option<usize>,
    kind: ScenarioKind,
}

async fn run_session(
    engine: SimulationEngine,
    duration: Duration,
    mut attack: Option<Attack>,
    attack_after: Duration,
    format: OutputFormat,
) -> Result<(), SimError> {
    eprintln!("╔══════════════════════════════════════════════════════════════╗");
    eprintln!("║           FLOWSCOPE-SIM Live Session                         ║");
    eprintln!("╠══════════════════════════════════════════════════════════════╣");
    eprintln!("║ Duration: {:50} ║", format!("{duration:?}"));
    eprintln!(
        "║ Attack: {:52} ║",
        attack
            .as_ref()
            .map(|a| format!("{} -> {} after {:?}", a.kind, a.target, attack_after))
            .unwrap_or_else(|| "none".to_string())
    );
    eprintln!("╚══════════════════════════════════════════════════════════════╝");

    let mut session = engine.start();
    let mut events = session.subscribe();

    let deadline = tokio::time::sleep(duration);
    let attack_timer = tokio::time::sleep(attack_after);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(deadline, attack_timer, ctrl_c);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
            _ = &mut attack_timer, if attack.is_some() => {
                if let Some(Attack { target, size, kind }) = attack.take() {
                    match session.generate_attack_scenario(&target, size, kind).await {
                        Ok(id) => tracing::info!(scenario = %id, "Attack scheduled"),
                        Err(e) => tracing::error!(error = %e, "Attack rejected"),
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, format)?,
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Output fell behind; events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let engine = session.stop().await?;
    let stats = engine.stats();
    let metrics = engine.metrics();

    eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
    eprintln!("║                     Session Complete                          ║");
    eprintln!("╠══════════════════════════════════════════════════════════════╣");
    eprintln!("║ Ticks: {:53} ║", stats.tick_count);
    eprintln!("║ Flows (incl. background): {:34} ║", metrics.total_flows);
    eprintln!("║ Anomalies: {:49} ║", stats.anomalies_recorded);
    eprintln!("║ Alarms raised: {:45} ║", stats.alarms_raised);
    eprintln!("║ Open alarms: {:47} ║", metrics.open_alarms);
    eprintln!("║ Scenario units: {:44} ║", stats.scenario_units_emitted);
    eprintln!("╚══════════════════════════════════════════════════════════════╝");
    Ok(())
}

fn print_event(event: &SimEvent, format: OutputFormat) -> Result<(), SimError> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        SimEvent::Flow(flow) => println!(
            "[FLOW]     {}:{} -> {}:{} {} {} bytes{}",
            flow.source_ip,
            flow.source_port,
            flow.destination_ip,
            flow.destination_port,
            flow.protocol,
            flow.bytes,
            if flow.is_anomalous { " [ANOMALOUS]" } else { "" }
        ),
        SimEvent::Anomaly(anomaly) => println!(
            "[ANOMALY]  {:8} {:10} conf={:.2} {}",
            anomaly.severity.as_str(),
            anomaly.anomaly_type.as_str(),
            anomaly.confidence,
            anomaly.description
        ),
        SimEvent::Alarm(alarm) => println!("[ALARM]    {} ({})", alarm.title, alarm.status),
        SimEvent::AlarmUpdated(alarm) => println!("[ALARM]    {} -> {}", alarm.title, alarm.status),
        SimEvent::Metrics(m) => println!(
            "[METRICS]  throughput={:.1} Mbps latency={:.1} ms loss={:.2}% flows={} open_alarms={}",
            m.throughput_mbps, m.latency_ms, m.packet_loss_pct, m.total_flows, m.open_alarms
        ),
        SimEvent::ScenarioStarted {
            id,
            kind,
            target,
            units,
        } => println!("[SCENARIO] {kind} against {target} started ({units} units, id {id})"),
        SimEvent::ScenarioCompleted { id, emitted } => {
            println!("[SCENARIO] {id} completed after {emitted} units")
        }
        SimEvent::ScenarioCancelled { id, emitted } => {
            println!("[SCENARIO] {id} cancelled after {emitted} units")
        }
    }
    Ok(())
}

fn run_list() {
    println!("\n╔══════════════════════════════════════════════════════════════════════════════╗");
    println!("║                       Available Attack Scenarios                             ║");
    println!("╠══════════════════════════════════════════════════════════════════════════════╣");

    for (name, description) in list_scenarios() {
        println!("║ {:14} - {:61} ║", name, description);
    }

    println!("╚══════════════════════════════════════════════════════════════════════════════╝");
    println!("\nUsage: flowscope-sim run --attack <IP> --attack-kind <SCENARIO>");
}

/// Parse `500ms`, `30s`, `5m`, `1h`; a bare number is seconds
fn parse_duration(s: &str) -> Result<Duration, SimError> {
    let s = s.trim();
    let invalid = || SimError::invalid_config(format!("invalid duration '{s}'"));

    let (number, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (s, 1_000)
    };

    let value: u64 = number.trim().parse().map_err(|_| invalid())?;
    Ok(Duration::from_millis(value * unit_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3_600));
        assert_eq!(parse_duration("12").unwrap(), Duration::from_secs(12));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "flowscope-sim",
            "--seed",
            "7",
            "run",
            "--duration",
            "10s",
            "--attack",
            "192.168.1.100",
            "--attack-kind",
            "port_scan",
        ])
        .unwrap();
        assert_eq!(cli.seed, Some(7));
        match cli.command {
            Commands::Run {
                attack, attack_kind, ..
            } => {
                assert_eq!(attack.as_deref(), Some("192.168.1.100"));
                assert_eq!(attack_kind, ScenarioKind::PortScan);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_load_config_applies_seed() {
        let config = load_config(None, Some(3)).unwrap();
        assert_eq!(config.seed, Some(3));
    }
}
