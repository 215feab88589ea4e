//! overlayd - VLAN/VXLAN overlay planner
//!
//! Entry point for the `overlayd` command.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use overlayd::{Blueprint, OverlayConfig, OvsSurface, Session};

/// VLAN/VXLAN overlay binding planner
#[derive(Parser, Debug)]
#[command(name = "overlayd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Topology document (JSON)
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Print commands instead of running them
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the tunnels and rules the topology compiles to
    Plan,
    /// Apply the topology
    Apply {
        /// Keep the overlay up until Ctrl-C, then tear it down
        #[arg(long)]
        hold: bool,
    },
    /// Compare switch flow tables with the plan
    Verify,
    /// Remove everything the topology declares
    Teardown,
}

/// Initializes tracing. `RUST_LOG` takes precedence over `--log-level`.
fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn surface(config: &OverlayConfig, dry_run: bool) -> OvsSurface {
    let surface = OvsSurface::new(&config.settings);
    if dry_run {
        surface.with_dry_run()
    } else {
        surface
    }
}

fn print_rendered(surface: &OvsSurface) {
    if surface.is_dry_run() {
        for cmd in surface.rendered() {
            println!("{}", cmd);
        }
    }
}

fn plan(config: &OverlayConfig) -> Result<bool> {
    let blueprint = Blueprint::build(config).context("Failed to compile topology")?;

    for endpoint in blueprint.endpoints() {
        println!(
            "tunnel {} {} port={} remote={} key={}",
            endpoint.switch,
            endpoint.iface,
            endpoint.port,
            endpoint.remote,
            endpoint.mode.key()
        );
    }
    for vtep in &blueprint.host_vteps {
        println!(
            "vtep {}:{} dev={} vni={} mac={} address={} peers={}",
            vtep.spec.host,
            vtep.spec.iface,
            vtep.spec.link,
            vtep.spec.vni,
            vtep.spec.mac,
            vtep.spec.address,
            vtep.fdb.len()
        );
    }
    for rule in blueprint.plan.rules() {
        println!("flow {}", rule);
    }
    Ok(true)
}

async fn apply(config: &OverlayConfig, dry_run: bool, hold: bool) -> Result<bool> {
    let mut session = Session::setup(config, surface(config, dry_run))
        .await
        .context("Failed to apply overlay")?;

    if hold {
        info!("Overlay up, press Ctrl-C to tear down");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to wait for Ctrl-C")?;
        let report = session.teardown().await;
        print_rendered(session.surface());
        return Ok(report.is_clean());
    }

    print_rendered(session.surface());
    Ok(true)
}

async fn verify(config: &OverlayConfig, dry_run: bool) -> Result<bool> {
    let mut session = Session::attach(config, surface(config, dry_run))?;
    let report = session.verify().await.context("Failed to read flow tables")?;

    let mut converged = true;
    for convergence in &report {
        for rule in &convergence.missing {
            println!("missing {}", rule);
        }
        for rule in &convergence.unexpected {
            println!("unexpected {}", rule);
        }
        converged &= convergence.is_converged();
    }
    print_rendered(session.surface());
    Ok(converged)
}

async fn teardown(config: &OverlayConfig, dry_run: bool) -> Result<bool> {
    let mut session = Session::attach(config, surface(config, dry_run))?;
    let report = session.teardown().await;
    for (entry, err) in &report.failed {
        warn!("Could not remove {}: {}", entry, err);
    }
    print_rendered(session.surface());
    Ok(report.is_clean())
}

async fn run(args: Args) -> Result<bool> {
    let config = OverlayConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    match args.command {
        Command::Plan => plan(&config),
        Command::Apply { hold } => apply(&config, args.dry_run, hold).await,
        Command::Verify => verify(&config, args.dry_run).await,
        Command::Teardown => teardown(&config, args.dry_run).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("--- Starting overlayd ---");

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        // Diverged flow table or incomplete teardown
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
