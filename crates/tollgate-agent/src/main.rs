//! Tollgate Agent
//!
//! Policy enforcement agent. Evaluates queries against the tiered policy
//! store, refreshes policies in the background, and records every violation
//! to the audit trail.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tollgate_core::{LicenseTier, User, ADMIN_PERMISSION};
use tollgate_policy::SqliteStore;
use tollgate_telemetry::{AuditSink, RecoveryReport};
use tracing::{info, warn};

mod app;
mod config;

use app::{Agent, EvaluationRequest};
use config::AgentConfig;

#[derive(Parser, Debug)]
#[command(name = "tollgate-agent")]
#[command(about = "Tollgate policy enforcement agent", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "tollgate.yaml")]
    config: PathBuf,

    /// Policy database path
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Prometheus scrape address
    #[arg(long)]
    metrics_listen: Option<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate newline-delimited JSON requests from stdin until EOF or a signal
    Run,

    /// Evaluate a single query
    Evaluate {
        query: String,

        #[arg(long, default_value = "cli")]
        user: String,

        #[arg(long, default_value = "")]
        role: String,

        /// Grant the admin permission
        #[arg(long)]
        admin: bool,

        #[arg(long)]
        tenant: Option<String>,

        #[arg(long)]
        organization: Option<String>,

        #[arg(long, default_value = "sql")]
        request_type: String,
    },

    /// Print engine statistics
    Stats {
        /// Print Prometheus text format instead of JSON
        #[arg(long)]
        prometheus: bool,
    },

    /// Replay spooled audit entries into the database
    Recover,

    /// Set a tenant's license tier
    TenantLicense {
        tenant: String,
        /// COMMUNITY, PRO, ENT or PLUS
        tier: LicenseTier,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.json_logs);

    let mut config = AgentConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(addr) = cli.metrics_listen {
        config.metrics_listen = Some(addr);
    }

    let metrics_handle = init_metrics(config.metrics_listen)?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Evaluate {
            query,
            user,
            role,
            admin,
            tenant,
            organization,
            request_type,
        } => {
            let mut user = User::new(user, role);
            if admin {
                user = user.with_permission(ADMIN_PERMISSION);
            }
            user.tenant_id = tenant;
            user.organization_id = organization;
            evaluate(config, EvaluationRequest { user, query, request_type }).await
        }
        Command::Stats { prometheus } => stats(config, prometheus.then_some(metrics_handle)).await,
        Command::Recover => recover(config).await,
        Command::TenantLicense { tenant, tier } => set_license(config, &tenant, tier),
    }
}

async fn run(config: AgentConfig) -> Result<()> {
    let agent = Agent::start(config).await?;
    agent.engine.start();
    info!("Tollgate agent ready, reading requests from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                warn!("Shutdown signal received, stopping agent...");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let output = match serde_json::from_str::<EvaluationRequest>(&line) {
            Ok(request) => serde_json::to_string(&agent.evaluate(&request).await)?,
            Err(e) => {
                warn!(error = %e, "Rejected malformed request");
                serde_json::json!({ "error": format!("invalid request: {e}") }).to_string()
            }
        };
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    agent.stop().await;
    info!("Agent shutdown complete");
    Ok(())
}

async fn evaluate(config: AgentConfig, request: EvaluationRequest) -> Result<()> {
    let agent = Agent::start(config).await?;
    let response = agent.evaluate(&request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    agent.stop().await;
    Ok(())
}

async fn stats(config: AgentConfig, prometheus: Option<PrometheusHandle>) -> Result<()> {
    let agent = Agent::start(config).await?;
    match prometheus {
        Some(handle) => print!("{}", handle.render()),
        None => println!("{}", serde_json::to_string_pretty(&agent.engine.stats())?),
    }
    agent.stop().await;
    Ok(())
}

async fn recover(config: AgentConfig) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)?;
    let sink = AuditSink::new(std::sync::Arc::new(store), config.audit.clone())?;
    let report: RecoveryReport = sink.recover().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    sink.shutdown(config.audit.shutdown_timeout()).await;
    Ok(())
}

fn set_license(config: AgentConfig, tenant: &str, tier: LicenseTier) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)?;
    store.set_license(tenant, tier)?;
    info!(tenant, tier = %tier, "License tier updated");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging. Logs go to stderr so stdout carries results.
fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("tollgate=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tollgate=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Install the Prometheus recorder, serving it on `listen` when given
fn init_metrics(listen: Option<SocketAddr>) -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();
    let handle = match listen {
        Some(addr) => {
            let builder = builder.with_http_listener(addr);
            let (recorder, exporter) = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build metrics exporter: {}", e))?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;
            tokio::spawn(async move {
                // ExporterError implements neither Debug nor Display.
                if exporter.await.is_err() {
                    warn!("Metrics exporter stopped");
                }
            });
            info!(%addr, "Serving Prometheus metrics");
            handle
        }
        None => builder
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?,
    };

    metrics::describe_counter!(
        "tollgate_evaluations_total",
        "Total number of evaluations by outcome"
    );
    metrics::describe_counter!(
        "tollgate_policy_hits_total",
        "Total number of triggered policies"
    );
    metrics::describe_histogram!(
        "tollgate_evaluation_latency_us",
        metrics::Unit::Microseconds,
        "Pipeline evaluation latency in microseconds"
    );
    metrics::describe_counter!(
        "tollgate_policy_refresh_total",
        "Policy refreshes by result"
    );
    metrics::describe_counter!(
        "tollgate_audit_entries_total",
        "Audit entries by delivery outcome"
    );

    Ok(handle)
}
