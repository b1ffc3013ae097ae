use anyhow::Context;
use chrono::Utc;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use fms_common::ManualClock;
use fms_core::{IngestionOrchestrator, MemoryStore, ServiceConfig};
use fms_server::routes::{routes, AppState};
use fms_server::simulator::{run_simulation, SimulationConfig};
use fms_server::telemetry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("fms-server")
        .version(fms_core::VERSION)
        .about("Fermenter monitoring service")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file; defaults apply when omitted"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("serve")
                .about("Recover the dead-letter log and serve the HTTP API")
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .default_value("0.0.0.0:8000")
                        .value_parser(value_parser!(SocketAddr))
                        .help("Listen address"),
                )
                .arg(dead_letter_arg()),
        )
        .subcommand(
            Command::new("simulate")
                .about("Feed synthetic sensor data through the pipeline in-process")
                .arg(
                    Arg::new("batches")
                        .long("batches")
                        .default_value("100")
                        .value_parser(value_parser!(u64))
                        .help("Number of batches (one reading per tag each)"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("outage-start")
                        .long("outage-start")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("First batch during which the backend is down"),
                )
                .arg(
                    Arg::new("outage-length")
                        .long("outage-length")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Number of batches the backend stays down"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the summary as JSON"),
                )
                .arg(dead_letter_arg()),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate the configuration and print it with defaults filled in"),
        )
}

fn dead_letter_arg() -> Arg {
    Arg::new("dead-letter")
        .long("dead-letter")
        .value_parser(value_parser!(PathBuf))
        .help("Override the dead-letter log path")
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<ServiceConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    Ok(config)
}

fn apply_overrides(config: ServiceConfig, args: &ArgMatches) -> ServiceConfig {
    match args.get_one::<PathBuf>("dead-letter") {
        Some(path) => config.with_dead_letter_path(path.clone()),
        None => config,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    telemetry::init(telemetry::DEFAULT_FILTER, matches.get_flag("log-json"))?;
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("serve", args)) => {
            let config = apply_overrides(config, args);
            let addr = args
                .get_one::<SocketAddr>("bind")
                .copied()
                .context("missing bind address")?;
            serve(&config, addr).await
        }
        Some(("simulate", args)) => {
            let config = apply_overrides(config, args);
            let start = args.get_one::<u64>("outage-start").copied().unwrap_or(0);
            let length = args.get_one::<u64>("outage-length").copied().unwrap_or(0);
            let sim = SimulationConfig {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
                batches: args.get_one::<u64>("batches").copied().unwrap_or(100),
                outage: start..start.saturating_add(length),
                ..SimulationConfig::default()
            };
            simulate(&config, &sim, args.get_flag("json")).await
        }
        Some(("check-config", _)) => {
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn serve(config: &ServiceConfig, addr: SocketAddr) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new(config.registry().names()));
    let orchestrator = Arc::new(
        IngestionOrchestrator::open(config, store.clone())
            .await
            .context("opening ingestion pipeline")?,
    );
    orchestrator.start().await;

    let api = routes(AppState {
        orchestrator: orchestrator.clone(),
        store,
    });
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for ctrl-c");
        }
    };
    let (bound, server) = warp::serve(api)
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(%bound, "listening");
    server.await;
    tracing::info!("shutting down");

    let drained = orchestrator
        .shutdown()
        .await
        .context("draining retry queue")?;
    tracing::info!(
        written = drained.written,
        already_logged = drained.already_logged,
        failed = drained.failed,
        "retry queue drained"
    );
    Ok(())
}

async fn simulate(config: &ServiceConfig, sim: &SimulationConfig, json: bool) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new(config.registry().names()));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let orchestrator = IngestionOrchestrator::open_with_clock(config, store.clone(), clock.clone())
        .await
        .context("opening ingestion pipeline")?;

    let summary = run_simulation(sim, &orchestrator, &store, &clock).await;
    orchestrator.shutdown().await.context("draining retry queue")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}
