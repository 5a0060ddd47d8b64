//! hoistd: assembles the hoist crates into one daemon.
//!
//! The binary in `main.rs` only parses flags, sets up logging, and serves
//! what [`build_daemon`] returns, so the wiring can be exercised in tests
//! with in-process collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::middleware;
use tracing::{debug, info};

use hoist_core::{AccessGate, HoistConfig, ProxyConfig};
use hoist_deploy::{DeploySettings, Deployer};
use hoist_process::{
    ArchiveExtractor, DependencyInstaller, PackageInstaller, Pm2Supervisor, ProcessSupervisor,
    TarExtractor,
};
use hoist_proxy::ProxyState;
use hoist_state::Registry;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub management_port: Option<u16>,
    /// Also turns proxy mode on when the file leaves it off.
    pub proxy_port: Option<u16>,
}

impl Overrides {
    pub fn apply(&self, config: &mut HoistConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(port) = self.management_port {
            config.management.listen.set_port(port);
        }
        if let Some(port) = self.proxy_port {
            config
                .proxy
                .get_or_insert_with(ProxyConfig::default)
                .listen
                .set_port(port);
        }
    }
}

/// Read the config file, or fall back to defaults when none was given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<HoistConfig> {
    match path {
        Some(path) => HoistConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            debug!("no config file given, using defaults");
            Ok(HoistConfig::default())
        }
    }
}

/// External programs the deployer drives.
#[derive(Clone)]
pub struct Collaborators {
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub extractor: Arc<dyn ArchiveExtractor>,
    pub installer: Arc<dyn DependencyInstaller>,
}

impl Collaborators {
    /// pm2, tar, and the package managers named in `[tools]`.
    pub fn system(config: &HoistConfig) -> Self {
        let tools = &config.tools;
        Self {
            supervisor: Arc::new(Pm2Supervisor::new(
                tools.pm2_bin.clone(),
                config.deploy.supervisor_timeout(),
            )),
            extractor: Arc::new(TarExtractor::new(tools.tar_bin.clone())),
            installer: Arc::new(PackageInstaller::new(tools.clone())),
        }
    }
}

/// Both HTTP surfaces plus the handles behind them.
pub struct Daemon {
    pub deployer: Deployer,
    pub management: Router,
    /// Present only in proxy mode.
    pub proxy: Option<Router>,
}

/// Build the gate for the management API.
pub fn management_gate(config: &HoistConfig) -> anyhow::Result<AccessGate> {
    let m = &config.management;
    AccessGate::from_settings(m.allowed_ips.as_deref(), m.token.as_deref(), m.rate_limit)
        .context("invalid management.allowed_ips")
}

/// Build the gate for proxied traffic. Rate limiting is a management concern.
pub fn proxy_gate(proxy: &ProxyConfig) -> anyhow::Result<AccessGate> {
    AccessGate::from_settings(proxy.allowed_ips.as_deref(), proxy.token.as_deref(), false)
        .context("invalid proxy.allowed_ips")
}

/// Wire registry, deployer, gates, and routers from `config`.
pub fn build_daemon(
    config: &HoistConfig,
    registry: Registry,
    collaborators: Collaborators,
) -> anyhow::Result<Daemon> {
    let deployer = Deployer::new(
        DeploySettings::from_config(config),
        registry.clone(),
        collaborators.supervisor,
        collaborators.extractor,
        collaborators.installer,
    );

    let management = hoist_api::build_router(deployer.clone(), Arc::new(management_gate(config)?));

    let proxy = match &config.proxy {
        Some(proxy_config) => {
            let gate = Arc::new(proxy_gate(proxy_config)?);
            let router = hoist_proxy::build_router(ProxyState::new(registry, proxy_config))
                .layer(middleware::from_fn_with_state(gate, hoist_api::gate::enforce));
            Some(router)
        }
        None => None,
    };

    info!(
        apps = deployer.registry().len(),
        proxy = proxy.is_some(),
        "daemon assembled"
    );

    Ok(Daemon {
        deployer,
        management,
        proxy,
    })
}
