//! hoist.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working single-host setup with the management surface on localhost and
//! proxy mode disabled.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoistConfig {
    /// Root for the registry file and per-app directories.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub management: ManagementConfig,
    /// Proxy mode is enabled iff this section is present.
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementConfig {
    #[serde(default = "default_management_listen")]
    pub listen: SocketAddr,
    /// Comma-separated literal addresses, or `*`. Unset allows everyone.
    pub allowed_ips: Option<String>,
    /// Shared secret expected as `Authorization: Bearer <token>`.
    pub token: Option<String>,
    #[serde(default = "default_true")]
    pub rate_limit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_listen")]
    pub listen: SocketAddr,
    pub allowed_ips: Option<String>,
    pub token: Option<String>,
    /// Lowest port handed out to apps.
    #[serde(default = "default_port_base")]
    pub port_base: u16,
    #[serde(default)]
    pub root: RootMode,
    /// App that receives root traffic when `root = "home"`.
    #[serde(default = "default_home_app")]
    pub home_app: String,
}

/// What the proxy serves at `/`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootMode {
    /// Minimal HTML page listing deployed apps.
    #[default]
    Listing,
    /// Delegate the whole request to the home app.
    Home,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Wait between process (re)start and the existence check.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Port health checks target when proxy mode is off.
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    /// Keep the `previous` release on commit so manual rollback stays available.
    #[serde(default)]
    pub retain_previous: bool,
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_supervisor_timeout_secs")]
    pub supervisor_timeout_secs: u64,
    #[serde(default = "default_health_attempt_timeout_ms")]
    pub health_attempt_timeout_ms: u64,
    /// Delay before each health-check attempt.
    #[serde(default = "default_health_schedule_ms")]
    pub health_schedule_ms: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_pm2_bin")]
    pub pm2_bin: String,
    #[serde(default = "default_tar_bin")]
    pub tar_bin: String,
    #[serde(default = "default_npm_bin")]
    pub npm_bin: String,
    #[serde(default = "default_yarn_bin")]
    pub yarn_bin: String,
    #[serde(default = "default_pnpm_bin")]
    pub pnpm_bin: String,
    /// Interpreter for entry-file launches.
    #[serde(default = "default_node_bin")]
    pub node_bin: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/hoist")
}
fn default_management_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7171))
}
fn default_proxy_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_true() -> bool {
    true
}
fn default_port_base() -> u16 {
    4000
}
fn default_home_app() -> String {
    "home".to_string()
}
fn default_settle_delay_ms() -> u64 {
    2000
}
fn default_app_port() -> u16 {
    3000
}
fn default_extract_timeout_secs() -> u64 {
    60
}
fn default_install_timeout_secs() -> u64 {
    300
}
fn default_supervisor_timeout_secs() -> u64 {
    30
}
fn default_health_attempt_timeout_ms() -> u64 {
    5000
}
fn default_health_schedule_ms() -> Vec<u64> {
    let mut schedule = vec![1000, 2000];
    schedule.extend([4000; 8]);
    schedule
}
fn default_pm2_bin() -> String {
    "pm2".to_string()
}
fn default_tar_bin() -> String {
    "tar".to_string()
}
fn default_npm_bin() -> String {
    "npm".to_string()
}
fn default_yarn_bin() -> String {
    "yarn".to_string()
}
fn default_pnpm_bin() -> String {
    "pnpm".to_string()
}
fn default_node_bin() -> String {
    "node".to_string()
}

impl Default for HoistConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            management: ManagementConfig::default(),
            proxy: None,
            deploy: DeployConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            listen: default_management_listen(),
            allowed_ips: None,
            token: None,
            rate_limit: true,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_proxy_listen(),
            allowed_ips: None,
            token: None,
            port_base: default_port_base(),
            root: RootMode::default(),
            home_app: default_home_app(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            app_port: default_app_port(),
            retain_previous: false,
            extract_timeout_secs: default_extract_timeout_secs(),
            install_timeout_secs: default_install_timeout_secs(),
            supervisor_timeout_secs: default_supervisor_timeout_secs(),
            health_attempt_timeout_ms: default_health_attempt_timeout_ms(),
            health_schedule_ms: default_health_schedule_ms(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pm2_bin: default_pm2_bin(),
            tar_bin: default_tar_bin(),
            npm_bin: default_npm_bin(),
            yarn_bin: default_yarn_bin(),
            pnpm_bin: default_pnpm_bin(),
            node_bin: default_node_bin(),
        }
    }
}

impl DeployConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn supervisor_timeout(&self) -> Duration {
        Duration::from_secs(self.supervisor_timeout_secs)
    }

    pub fn health_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.health_attempt_timeout_ms)
    }

    pub fn health_schedule(&self) -> Vec<Duration> {
        self.health_schedule_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}

impl HoistConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HoistConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Directory holding one subdirectory per app.
    pub fn apps_dir(&self) -> PathBuf {
        self.data_dir.join("apps")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.redb")
    }
}
