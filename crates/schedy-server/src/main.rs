//! Schedy command line
//!
//! Validates configurations, previews what their schedules evaluate to and
//! runs the engine against the in-process host.

mod states;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand};
use schedy_app::SchedyApp;
use schedy_config::{load_apps, AppDefinition};
use schedy_core::Host;
use schedy_host::{EventBus, MemoryStateStore, ServiceRegistry, SimulatedHost, TokioTimers};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::states::SeedStates;

#[derive(Parser)]
#[command(name = "schedy")]
#[command(about = "Rule-based scheduling for home automation entities")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration and print a summary of its apps
    Check {
        /// Configuration file
        config: PathBuf,
    },

    /// Evaluate every room's schedule at one or more instants
    Simulate {
        /// Configuration file
        config: PathBuf,
        /// First instant, `YYYY-MM-DD HH:MM` or `HH:MM` for today; now if omitted
        #[arg(long, value_parser = parse_datetime)]
        at: Option<NaiveDateTime>,
        /// Last instant; only `--at` is evaluated if omitted
        #[arg(long, value_parser = parse_datetime)]
        until: Option<NaiveDateTime>,
        /// Minutes between evaluated instants
        #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u32).range(1..))]
        step: u32,
        /// YAML file with entity states visible to expressions
        #[arg(long, env = "SCHEDY_STATES")]
        states: Option<PathBuf>,
    },

    /// Run the engine until interrupted
    Run {
        /// Configuration file
        config: PathBuf,
        /// YAML file with initial entity states
        #[arg(long, env = "SCHEDY_STATES")]
        states: Option<PathBuf>,
        /// Make climate and switch service calls update the entities they target
        #[arg(long)]
        emulate_devices: bool,
    },
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, String> {
    let s = s.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(when) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(when);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(s, format) {
            return Ok(Local::now().date_naive().and_time(time));
        }
    }
    Err(format!("expected `YYYY-MM-DD HH:MM` or `HH:MM`, got {s:?}"))
}

fn load(config: &Path) -> Result<Vec<AppDefinition>> {
    let apps =
        load_apps(config).with_context(|| format!("loading configuration {}", config.display()))?;
    if apps.is_empty() {
        warn!(config = %config.display(), "No Schedy apps configured");
    }
    Ok(apps)
}

fn load_states(path: Option<&Path>) -> Result<SeedStates> {
    match path {
        Some(path) => SeedStates::load(path),
        None => Ok(SeedStates::default()),
    }
}

fn check(config: &Path) -> Result<()> {
    let apps = load(config)?;
    let sim = SimulatedHost::new(Local::now().naive_local());
    for definition in &apps {
        SchedyApp::new(definition, sim.host())
            .with_context(|| format!("building app {}", definition.name))?;

        println!(
            "{} (actor type {}, {} rooms)",
            definition.name,
            definition.actor_type.name(),
            definition.rooms.len()
        );
        for room in &definition.rooms {
            println!(
                "  {}: {} actors, {} rules, {} watched entities",
                room.settings.display_name(),
                room.actors.len(),
                room.schedule.rules().len(),
                room.watched_entities.len()
            );
        }
    }
    println!("Configuration OK");
    Ok(())
}

fn simulate(
    config: &Path,
    at: NaiveDateTime,
    until: NaiveDateTime,
    step: Duration,
    states: &SeedStates,
) -> Result<()> {
    if until < at {
        bail!("--until {until} is before --at {at}");
    }
    for definition in load(config)? {
        let sim = SimulatedHost::new(at);
        states.apply(&sim.states);
        let app = SchedyApp::new(&definition, sim.host())
            .with_context(|| format!("building app {}", definition.name))?;

        let mut when = at;
        while when <= until {
            for (room, outcome) in app.evaluate(when) {
                let Some(outcome) = outcome else {
                    println!("{when}  {}/{}  -", app.name(), room.name());
                    continue;
                };
                let value = app
                    .actor_type()
                    .serialize_value(&outcome.value)
                    .unwrap_or_else(|_| outcome.value.to_string());
                let markers = if outcome.markers.is_empty() {
                    String::new()
                } else {
                    format!(" {:?}", outcome.markers)
                };
                println!(
                    "{when}  {}/{}  {value}{markers}  ({})",
                    app.name(),
                    room.name(),
                    outcome.rule
                );
            }
            when += step;
        }
    }
    Ok(())
}

async fn run(config: &Path, states: &SeedStates, emulate_devices: bool) -> Result<()> {
    let apps = load(config)?;

    let bus = Arc::new(EventBus::new());
    let store = Arc::new(MemoryStateStore::new(Arc::clone(&bus)));
    let services = Arc::new(ServiceRegistry::new());
    if emulate_devices {
        services.emulate_devices(Arc::clone(&store));
    }
    states.apply(&store);
    let host = Host::new(store, services, Arc::new(TokioTimers::new()));

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut tasks = Vec::with_capacity(apps.len());
    for definition in &apps {
        let app = Arc::new(
            SchedyApp::new(definition, host.clone())
                .with_context(|| format!("building app {}", definition.name))?,
        );
        let events = bus.subscribe_all();
        app.initialize();
        tasks.push(tokio::spawn(app.run(events, shutdown_tx.subscribe())));
    }
    info!(apps = tasks.len(), "Schedy is running");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutting down");
    // no receivers left means every app already stopped
    let _ = shutdown_tx.send(());
    for task in tasks {
        task.await.context("app task panicked")?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    match cli.command {
        Commands::Check { config } => check(&config),
        Commands::Simulate {
            config,
            at,
            until,
            step,
            states,
        } => {
            let at = at.unwrap_or_else(|| Local::now().naive_local());
            let states = load_states(states.as_deref())?;
            simulate(
                &config,
                at,
                until.unwrap_or(at),
                Duration::minutes(i64::from(step)),
                &states,
            )
        }
        Commands::Run {
            config,
            states,
            emulate_devices,
        } => {
            let states = load_states(states.as_deref())?;
            run(&config, &states, emulate_devices).await
        }
    }
}
