//! hoistd: the hoist daemon.
//!
//! Serves the management API and, in proxy mode, the app proxy:
//! - Release registry (redb)
//! - Deployer driving tar, the package managers, and pm2
//! - Management API behind its access gate
//! - Path-prefix proxy behind its own gate
//!
//! # Usage
//!
//! ```text
//! hoistd serve --config /etc/hoist/hoist.toml
//! hoistd serve --data-dir /srv/hoist --port 7070 --proxy-port 8080
//! hoistd config --config /etc/hoist/hoist.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};

use hoist_state::Registry;
use hoistd::{Collaborators, Overrides, build_daemon, load_config};

#[derive(Parser)]
#[command(name = "hoistd", about = "hoist deploy daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
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
    /// Run the daemon.
    Serve {
        /// Path to hoist.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for apps and the registry.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Management API port.
        #[arg(long)]
        port: Option<u16>,

        /// Proxy port; enables proxy mode.
        #[arg(long)]
        proxy_port: Option<u16>,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            data_dir,
            port,
            proxy_port,
        } => {
            let overrides = Overrides {
                data_dir,
                management_port: port,
                proxy_port,
            };
            run_serve(config, overrides).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hoistd=debug,hoist_deploy=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run_serve(config_path: Option<PathBuf>, overrides: Overrides) -> anyhow::Result<()> {
    let mut config = load_config(config_path.as_deref())?;
    overrides.apply(&mut config);

    info!(
        data_dir = %config.data_dir.display(),
        management = %config.management.listen,
        proxy = ?config.proxy.as_ref().map(|p| p.listen),
        "starting hoistd"
    );

    // ── Initialize subsystems ──────────────────────────────────────

    std::fs::create_dir_all(config.apps_dir())
        .with_context(|| format!("failed to create {}", config.apps_dir().display()))?;

    let registry = Registry::open(&config.registry_path())
        .with_context(|| format!("failed to open {}", config.registry_path().display()))?;
    info!(path = %config.registry_path().display(), apps = registry.len(), "registry opened");

    let daemon = build_daemon(&config, registry, Collaborators::system(&config))?;

    // ── Start servers ──────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut servers = JoinSet::new();

    servers.spawn(serve(
        "management",
        config.management.listen,
        daemon.management,
        shutdown_rx.clone(),
    ));

    if let (Some(proxy_config), Some(router)) = (&config.proxy, daemon.proxy) {
        servers.spawn(serve("proxy", proxy_config.listen, router, shutdown_rx));
    }

    // ── Wait for shutdown ──────────────────────────────────────────

    // A server that stops on its own (usually a bind failure) takes the
    // daemon down with it.
    let mut outcome = Ok(());
    tokio::select! {
        _ = shutdown_signal() => info!("shutdown signal received"),
        Some(joined) = servers.join_next() => outcome = flatten(joined),
    }
    let _ = shutdown_tx.send(true);

    while let Some(joined) = servers.join_next().await {
        if let Err(e) = flatten(joined) {
            warn!(error = %e, "server exited with error");
        }
    }

    info!("hoistd stopped");
    outcome
}

fn flatten(joined: Result<anyhow::Result<()>, JoinError>) -> anyhow::Result<()> {
    joined.map_err(|e| anyhow::anyhow!("server task failed: {e}"))?
}

/// Serve one surface until `shutdown` flips to true.
async fn serve(
    surface: &'static str,
    addr: SocketAddr,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {surface} listener on {addr}"))?;
    info!(surface, %addr, "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    })
    .await
    .with_context(|| format!("{surface} server failed"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
