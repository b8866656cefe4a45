//! burstd — the BurstGrid daemon.
//!
//! Single binary that assembles:
//! - Configuration (burstgrid.toml)
//! - Host load sampling
//! - Synthetic ramp load generator
//! - Scaling controller + reconciler
//! - Fleet backend (gcloud, or an in-memory fleet for `simulate`)
//!
//! # Usage
//!
//! ```text
//! burstd --config burstgrid.toml run
//! burstd --config burstgrid.toml simulate --ticks 30
//! burstd --config burstgrid.toml load
//! burstd --config burstgrid.toml check-config
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use burstgrid_autoscale::Controller;
use burstgrid_core::{ControllerConfig, NodeStatus};
use burstgrid_fleet::{FleetBackend, GcloudBackend, GcloudConfig, MemoryFleet};
use burstgrid_load::{HostLoadSource, LoadGenerator, RampSettings};

#[derive(Parser)]
#[command(name = "burstd", about = "BurstGrid elastic scaling daemon", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, default_value = "burstgrid.toml")]
    config: PathBuf,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller against the gcloud managed instance group.
    Run {
        /// Do not start the local load generator.
        #[arg(long)]
        no_load: bool,
    },
    /// Run the controller against an in-memory fleet.
    Simulate {
        /// Stop after this many ticks.
        #[arg(long)]
        ticks: Option<u64>,

        /// Listings before a grown node becomes visible.
        #[arg(long, default_value = "1")]
        appear_after: u32,

        /// Status polls before a visible node reports running.
        #[arg(long, default_value = "1")]
        ready_after: u32,

        /// Do not start the local load generator.
        #[arg(long)]
        no_load: bool,
    },
    /// Run only the synthetic load generator.
    Load,
    /// Validate the configuration and print it.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = match ControllerConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "invalid configuration");
            return Err(e).context("failed to load configuration");
        }
    };

    match cli.command {
        Command::Run { no_load } => {
            let backend = GcloudBackend::new(GcloudConfig::from_controller_config(&config));
            let state = run_controller(&config, Arc::new(backend), no_load, None).await?;
            info!(state = %serde_json::to_string(&state)?, "final controller state");
            Ok(())
        }
        Command::Simulate {
            ticks,
            appear_after,
            ready_after,
            no_load,
        } => {
            let mut fleet = MemoryFleet::new("sim");
            for i in 1..=config.controller.min_nodes {
                fleet = fleet.with_node(&format!("sim-{i}"), NodeStatus::Running);
            }
            let fleet = fleet.appear_after(appear_after).ready_after(ready_after);
            let state = run_controller(&config, Arc::new(fleet), no_load, ticks).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::Load => run_load_only(&config).await,
        Command::CheckConfig => {
            println!("{}", config.to_toml_string()?);
            info!(path = %cli.config.display(), "configuration is valid");
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,burstd=debug,burstgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn ramp_settings(config: &ControllerConfig) -> RampSettings {
    RampSettings {
        threads: config.load.threads,
        cycle: config.load_cycle(),
        subcycle: config.load_subcycle(),
    }
}

/// Flip the returned receiver to true on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received; stopping after current tick"),
            Err(e) => error!(error = %e, "failed to listen for Ctrl-C"),
        }
        let _ = tx.send(true);
    });
    rx
}

async fn run_controller(
    config: &ControllerConfig,
    backend: Arc<dyn FleetBackend>,
    no_load: bool,
    max_ticks: Option<u64>,
) -> anyhow::Result<burstgrid_state::ControllerState> {
    info!(
        group = %config.group.name,
        zone = %config.group.zone,
        backend = backend.name(),
        "BurstGrid controller starting"
    );

    let mut controller =
        Controller::from_config(config, HostLoadSource::new(Duration::from_secs(1)), backend);
    controller
        .sync_with_group()
        .await
        .context("failed to read the instance group before starting")?;

    let shutdown = shutdown_signal();

    // The generator gets its own stop flag so it also ends when the
    // controller stops on a tick limit.
    let (stop_load, load_stop) = watch::channel(false);
    let generator = if config.load.enabled && !no_load {
        Some(LoadGenerator::spawn(ramp_settings(config), load_stop)?)
    } else {
        None
    };

    controller.run(shutdown, max_ticks).await;
    let state = controller.into_state();

    if let Some(generator) = generator {
        let _ = stop_load.send(true);
        join_generator(generator).await?;
    }
    Ok(state)
}

async fn run_load_only(config: &ControllerConfig) -> anyhow::Result<()> {
    let mut shutdown = shutdown_signal();
    let generator = LoadGenerator::spawn(ramp_settings(config), shutdown.clone())?;
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
    join_generator(generator).await
}

async fn join_generator(generator: LoadGenerator) -> anyhow::Result<()> {
    let threads = generator.thread_count();
    let panicked = tokio::task::spawn_blocking(move || generator.join())
        .await
        .context("load generator join task failed")?;
    info!(threads, panicked, "load generator stopped");
    Ok(())
}
