//! Microcloud Main Binary
//!
//! One subcommand per service of the self-healing control loop:
//! - `engine`: tick-driven simulation, control API, command consumer
//! - `signal`: snapshot consumer, metric persistence, anomaly detection
//! - `agent`: incident consumer, action proposals
//! - `orchestrator`: approval API, SSE stream hub

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use microcloud_agent::Decider;
use microcloud_bus::{BusDriver, NatsBus, Publisher, Subscriber};
use microcloud_core::config::{self, BusConfig, DbConfig, LogConfig};
use microcloud_core::logging;
use microcloud_engine::prelude::{control_router, ControlState, Engine};
use microcloud_orchestrator::prelude::{router, ActionServiceState, StreamHub};
use microcloud_signal::Detector;
use microcloud_storage::PostgresStore;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Microcloud CLI arguments
#[derive(Debug, Parser)]
#[clap(name = "microcloud", version, about = "Self-healing microcloud simulator")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (text, json)
    #[clap(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the simulation engine
    Engine,
    /// Run the signal service (detection)
    Signal,
    /// Run the agent service (decision)
    Agent,
    /// Run the orchestrator (approval + streaming)
    Orchestrator,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&LogConfig {
        level: cli.log_level.clone(),
        format: cli.log_format.parse().context("invalid log format")?,
    })?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            info!("shutting down...");
            cancel.cancel();
        });
    }

    match cli.command {
        Command::Engine => run_engine(cancel).await,
        Command::Signal => run_signal(cancel).await,
        Command::Agent => run_agent(cancel).await,
        Command::Orchestrator => run_orchestrator(cancel).await,
    }
}

async fn connect_bus() -> Result<Arc<dyn BusDriver>> {
    let cfg = BusConfig::from_env();
    let bus = NatsBus::connect(&cfg).await.context("connect to NATS")?;
    info!(url = %cfg.url, stream = %cfg.stream_name, "connected to NATS");
    Ok(Arc::new(bus))
}

async fn connect_db() -> Result<Arc<PostgresStore>> {
    let cfg = DbConfig::from_env();
    let store = PostgresStore::connect(&cfg)
        .await
        .context("connect to database")?;
    info!(host = %cfg.host, database = %cfg.database, "connected to database");
    Ok(Arc::new(store))
}

async fn run_engine(cancel: CancellationToken) -> Result<()> {
    info!(service = %config::service_name("sim-engine"), "starting");

    let bus = connect_bus().await?;
    let publisher = Publisher::new(bus.clone());
    let subscriber = Subscriber::new(bus);
    let engine = Arc::new(Engine::new(publisher));

    let app = control_router(Arc::new(ControlState::new(engine.state())));
    let addr = config::listen_addr("0.0.0.0:8080");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "simulation control API started");

    let mut tasks = JoinSet::new();

    {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { engine.run(cancel).await.map_err(Into::into) });
    }

    {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            subscriber
                .consume_commands("sim-engine", cancel, move |cmd| {
                    let engine = engine.clone();
                    async move { engine.apply_command(cmd).await }
                })
                .await
                .map_err(Into::into)
        });
    }

    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
                .map_err(Into::into)
        });
    }

    supervise(tasks, cancel).await
}

async fn run_signal(cancel: CancellationToken) -> Result<()> {
    info!(service = %config::service_name("signal-service"), "starting");

    let store = connect_db().await?;
    if let Err(err) = store.migrate().await {
        warn!(error = %err, "migration error (may be expected if tables exist)");
    }

    let bus = connect_bus().await?;
    let publisher = Publisher::new(bus.clone());
    let subscriber = Subscriber::new(bus);
    let detector = Arc::new(Detector::new(publisher, store));

    info!("subscribing to metrics");
    let mut tasks = JoinSet::new();
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            subscriber
                .consume_snapshots("signal-service", cancel, move |snapshot| {
                    let detector = detector.clone();
                    async move { detector.process_snapshot(&snapshot).await }
                })
                .await
                .map_err(Into::into)
        });
    }

    supervise(tasks, cancel).await
}

async fn run_agent(cancel: CancellationToken) -> Result<()> {
    info!(service = %config::service_name("agent-service"), "starting");

    let store = connect_db().await?;
    let bus = connect_bus().await?;
    let publisher = Publisher::new(bus.clone());
    let subscriber = Subscriber::new(bus);
    let decider = Arc::new(Decider::new(publisher, store.clone(), store));

    info!("subscribing to incidents");
    let mut tasks = JoinSet::new();
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            subscriber
                .consume_incidents("agent-service", cancel, move |incident| {
                    let decider = decider.clone();
                    async move { decider.process_incident(&incident).await }
                })
                .await
                .map_err(Into::into)
        });
    }

    supervise(tasks, cancel).await
}

async fn run_orchestrator(cancel: CancellationToken) -> Result<()> {
    info!(service = %config::service_name("orchestrator"), "starting");

    let store = connect_db().await?;
    let bus = connect_bus().await?;
    let publisher = Publisher::new(bus.clone());
    let subscriber = Subscriber::new(bus);

    let actions = Arc::new(ActionServiceState::new(store, publisher));
    let hub = StreamHub::new(subscriber);

    let app = router(actions, hub.clone());
    let addr = config::listen_addr("0.0.0.0:8081");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "orchestrator API started");

    let mut tasks = JoinSet::new();

    {
        let cancel = cancel.clone();
        tasks.spawn(async move { hub.run(cancel).await.map_err(Into::into) });
    }

    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
                .map_err(Into::into)
        });
    }

    supervise(tasks, cancel).await
}

/// Wait for every task; the first to finish cancels the rest, and the first
/// error wins.
async fn supervise(mut tasks: JoinSet<Result<()>>, cancel: CancellationToken) -> Result<()> {
    let mut first_err = None;
    while let Some(joined) = tasks.join_next().await {
        cancel.cancel();
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                first_err.get_or_insert(err);
            }
            Err(err) => {
                first_err.get_or_insert_with(|| anyhow::anyhow!("task panicked: {err}"));
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Wait for shutdown signal (SIGTERM or CTRL+C)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}
