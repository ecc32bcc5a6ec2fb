//! stackd — the stackgrid control plane binary.
//!
//! Assembles the stackgrid subsystems from `stackgrid.toml`:
//! - State store (redb)
//! - One cluster client per zone
//! - Manifest templates
//! - Health prober
//! - Object storage and tenant database access
//!
//! and runs one orchestrator operation per invocation.
//!
//! # Usage
//!
//! ```text
//! stackd --config /etc/stackgrid/stackgrid.toml deploy inst-42 --timeout 5m
//! stackd probe inst-42 --check-timeout 2s
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use stackgrid_core::{parse_duration, Classify, Deadline, StackgridConfig};
use stackgrid_deploy::{DeployError, DeploySettings, Orchestrator, TemplateSet};
use stackgrid_health::{HealthProber, ProbeClient};
use stackgrid_kube::RegionClientPool;
use stackgrid_migrate::{LocalObjectStorage, PostgresConnector};
use stackgrid_state::StateStore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,stackd=debug,stackgrid=debug";

#[derive(Parser)]
#[command(name = "stackd", about = "stackgrid control plane")]
struct Cli {
    /// Path to stackgrid.toml.
    #[arg(long, global = true, default_value = "/etc/stackgrid/stackgrid.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Render, apply and migrate an instance, then mark it running.
    Deploy {
        instance_id: String,
        /// Upper bound for the whole deploy (default: deploy.timeout).
        #[arg(long, value_parser = duration_arg)]
        timeout: Option<Duration>,
    },
    /// Move a ready instance to running.
    Launch {
        instance_id: String,
        #[arg(long, value_parser = duration_arg)]
        timeout: Option<Duration>,
    },
    /// Move a running instance to ready.
    Stop {
        instance_id: String,
        #[arg(long, value_parser = duration_arg)]
        timeout: Option<Duration>,
    },
    /// Stop, then launch.
    Restart {
        instance_id: String,
        #[arg(long, value_parser = duration_arg)]
        timeout: Option<Duration>,
    },
    /// Probe every health check of an instance once.
    Probe {
        instance_id: String,
        /// Per-check timeout (default: deploy.probe_timeout).
        #[arg(long, value_parser = duration_arg)]
        check_timeout: Option<Duration>,
    },
    /// Apply the platform's tenant migrations to a stack's database.
    MigrateDatabase {
        stack_id: String,
        #[arg(long, value_parser = duration_arg)]
        timeout: Option<Duration>,
    },
}

fn duration_arg(value: &str) -> Result<Duration, String> {
    parse_duration(value).ok_or_else(|| format!("invalid duration '{value}' (e.g. 500ms, 5s, 2m)"))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<DeployError>() {
            Some(deploy) => {
                let kind = deploy.kind();
                error!(kind = %kind, status = kind.status_code().as_u16(), error = %e, "operation failed");
            }
            None => error!(error = %e, "stackd failed"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = StackgridConfig::from_file(&cli.config)?;
    info!(path = %cli.config.display(), "configuration loaded");
    let orchestrator = build_orchestrator(&config).await?;

    let default_timeout = config.deploy.timeout();
    let deadline_for = |timeout: Option<Duration>| {
        let deadline = Deadline::after(timeout.unwrap_or(default_timeout));
        cancel_on_ctrl_c(&deadline);
        deadline
    };

    let output = match cli.command {
        Command::Deploy { instance_id, timeout } => {
            let deadline = deadline_for(timeout);
            let instance = orchestrator.deploy_stack_until(&instance_id, &deadline).await?;
            serde_json::to_value(&instance)?
        }
        Command::Launch { instance_id, timeout } => {
            let instance = orchestrator
                .launch_instance(&instance_id, &deadline_for(timeout))
                .await?;
            serde_json::to_value(&instance)?
        }
        Command::Stop { instance_id, timeout } => {
            let instance = orchestrator
                .stop_instance(&instance_id, &deadline_for(timeout))
                .await?;
            serde_json::to_value(&instance)?
        }
        Command::Restart { instance_id, timeout } => {
            let instance = orchestrator
                .restart_instance(&instance_id, &deadline_for(timeout))
                .await?;
            serde_json::to_value(&instance)?
        }
        Command::Probe {
            instance_id,
            check_timeout,
        } => {
            let per_check = check_timeout.unwrap_or_else(|| config.deploy.probe_timeout());
            let results = orchestrator
                .is_available(&instance_id, per_check, &deadline_for(None))
                .await?;
            serde_json::to_value(&results)?
        }
        Command::MigrateDatabase { stack_id, timeout } => {
            let report = orchestrator
                .migrate_database(&stack_id, &deadline_for(timeout))
                .await?;
            json!({ "applied": report.applied, "skipped": report.skipped })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn build_orchestrator(config: &StackgridConfig) -> anyhow::Result<Orchestrator> {
    let state = StateStore::open(&config.state.path)?;
    info!(path = %config.state.path.display(), "state store opened");

    let regions = RegionClientPool::connect(&config.regions).await?;
    let renderer = TemplateSet::from_dir(&config.templates.dir)?;
    let prober = HealthProber::new(ProbeClient::new()?, config.deploy.probe_timeout());
    let storage = LocalObjectStorage::new(&config.storage.root);

    Ok(Orchestrator::new(
        state,
        regions,
        Arc::new(renderer),
        prober,
        Arc::new(storage),
        Arc::new(PostgresConnector::new()),
        DeploySettings::from_config(config),
    ))
}

fn cancel_on_ctrl_c(deadline: &Deadline) {
    let deadline = deadline.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            deadline.cancel();
        }
    });
}
