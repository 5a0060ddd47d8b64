//! Process supervisor seam and the pm2-backed implementation.
//!
//! The deploy pipeline only needs a handful of supervisor verbs; they are
//! expressed as an object-safe trait returning boxed futures so the daemon
//! can hold an `Arc<dyn ProcessSupervisor>` and tests can swap in a fake.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use hoist_core::LaunchCommand;

use crate::command::{EnvMode, run_command};
use crate::error::{ProcessError, ProcessResult};
use crate::{BoxFuture, ProcessEnv};

/// One entry of the supervisor's process listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    /// Supervisor-reported lifecycle status, e.g. `online` or `stopped`.
    pub status: String,
    pub pid: Option<u32>,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    /// Unix milliseconds when the process was last started.
    pub started_at: Option<u64>,
    pub restarts: u32,
}

/// Capability interface over the external process supervisor.
pub trait ProcessSupervisor: Send + Sync {
    /// Look up a process by name. `Ok(None)` when no entry exists.
    fn describe<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProcessResult<Option<ProcessInfo>>>;

    /// Start the processes declared in a config artifact.
    fn start<'a>(&'a self, config: &'a Path) -> BoxFuture<'a, ProcessResult<()>>;

    /// Restart in place, replacing the process environment with `env`.
    fn restart<'a>(&'a self, name: &'a str, env: &'a ProcessEnv) -> BoxFuture<'a, ProcessResult<()>>;

    fn stop<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProcessResult<()>>;

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProcessResult<()>>;

    fn list(&self) -> BoxFuture<'_, ProcessResult<Vec<ProcessInfo>>>;

    /// Last `lines` lines of the process's output.
    fn logs<'a>(&'a self, name: &'a str, lines: u32) -> BoxFuture<'a, ProcessResult<String>>;
}

// ── Config artifact ────────────────────────────────────────────────

/// File name of the config artifact written into each app's base dir.
pub const SUPERVISOR_CONFIG_FILE: &str = "ecosystem.config.json";

/// Supervisor config artifact declaring one app process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub apps: Vec<ProcessDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub name: String,
    /// Working directory; the app's `current` symlink so restarts follow activation.
    pub cwd: PathBuf,
    pub script: String,
    pub args: Vec<String>,
    /// `none` makes the supervisor exec `script` directly.
    pub interpreter: String,
    pub env: ProcessEnv,
    pub autorestart: bool,
}

impl SupervisorConfig {
    pub fn single(name: &str, cwd: PathBuf, launch: &LaunchCommand, env: ProcessEnv) -> Self {
        Self {
            apps: vec![ProcessDefinition {
                name: name.to_string(),
                cwd,
                script: launch.program.clone(),
                args: launch.args.clone(),
                interpreter: "none".to_string(),
                env,
                autorestart: true,
            }],
        }
    }

    /// Serialize to `path`, replacing any previous artifact.
    pub fn write_to(&self, path: &Path) -> ProcessResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| ProcessError::Parse {
            what: "supervisor config".to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// ── pm2 ────────────────────────────────────────────────────────────

/// `ProcessSupervisor` driving the `pm2` CLI.
#[derive(Debug, Clone)]
pub struct Pm2Supervisor {
    bin: String,
    timeout: Duration,
}

impl Pm2Supervisor {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    async fn pm2(&self, args: &[&str], env: EnvMode<'_>) -> ProcessResult<String> {
        let output = run_command(&self.bin, args, None, env, Some(self.timeout)).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Selects which pm2 daemon the CLI talks to.
const PM2_HOME: &str = "PM2_HOME";

/// Environment for `pm2 restart`: the app's variables plus the daemon's
/// `PM2_HOME`, so the CLI reaches the same pm2 daemon as every other call.
fn restart_env(app_env: &ProcessEnv, pm2_home: Option<String>) -> ProcessEnv {
    let mut env = app_env.clone();
    if let Some(home) = pm2_home {
        env.entry(PM2_HOME.to_string()).or_insert(home);
    }
    env
}

/// Shape of one `pm2 jlist` entry; unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct Pm2Entry {
    name: String,
    pid: Option<u32>,
    #[serde(default)]
    pm2_env: Pm2Env,
    #[serde(default)]
    monit: Pm2Monit,
}

#[derive(Debug, Default, Deserialize)]
struct Pm2Env {
    status: Option<String>,
    pm_uptime: Option<u64>,
    restart_time: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct Pm2Monit {
    memory: Option<u64>,
    cpu: Option<f64>,
}

impl From<Pm2Entry> for ProcessInfo {
    fn from(entry: Pm2Entry) -> Self {
        Self {
            name: entry.name,
            status: entry.pm2_env.status.unwrap_or_else(|| "unknown".to_string()),
            pid: entry.pid.filter(|p| *p != 0),
            cpu_percent: entry.monit.cpu.unwrap_or(0.0),
            memory_bytes: entry.monit.memory.unwrap_or(0),
            started_at: entry.pm2_env.pm_uptime,
            restarts: entry.pm2_env.restart_time.unwrap_or(0),
        }
    }
}

/// Parse `pm2 jlist` output.
///
/// pm2 may print `[PM2] ...` banner lines before the JSON array, so every
/// `[` is tried as a start position until one parses.
pub fn parse_jlist(output: &str) -> ProcessResult<Vec<ProcessInfo>> {
    let mut last_error = "no JSON array in output".to_string();
    for (start, _) in output.match_indices('[') {
        match serde_json::from_str::<Vec<Pm2Entry>>(output[start..].trim_end()) {
            Ok(entries) => return Ok(entries.into_iter().map(ProcessInfo::from).collect()),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(ProcessError::Parse {
        what: "pm2 jlist".to_string(),
        message: last_error,
    })
}

impl ProcessSupervisor for Pm2Supervisor {
    fn describe<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProcessResult<Option<ProcessInfo>>> {
        Box::pin(async move {
            let all = self.list().await?;
            Ok(all.into_iter().find(|p| p.name == name))
        })
    }

    fn start<'a>(&'a self, config: &'a Path) -> BoxFuture<'a, ProcessResult<()>> {
        Box::pin(async move {
            let path = config.to_string_lossy();
            self.pm2(&["start", path.as_ref()], EnvMode::Inherit).await?;
            debug!(config = %path, "pm2 start");
            Ok(())
        })
    }

    fn restart<'a>(&'a self, name: &'a str, env: &'a ProcessEnv) -> BoxFuture<'a, ProcessResult<()>> {
        Box::pin(async move {
            // --update-env takes the environment of the pm2 CLI itself.
            let env = restart_env(env, std::env::var(PM2_HOME).ok());
            self.pm2(&["restart", name, "--update-env"], EnvMode::Exact(&env))
                .await?;
            debug!(%name, "pm2 restart");
            Ok(())
        })
    }

    fn stop<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProcessResult<()>> {
        Box::pin(async move {
            self.pm2(&["stop", name], EnvMode::Inherit).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProcessResult<()>> {
        Box::pin(async move {
            self.pm2(&["delete", name], EnvMode::Inherit).await?;
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, ProcessResult<Vec<ProcessInfo>>> {
        Box::pin(async move {
            let out = self.pm2(&["jlist"], EnvMode::Inherit).await?;
            parse_jlist(&out)
        })
    }

    fn logs<'a>(&'a self, name: &'a str, lines: u32) -> BoxFuture<'a, ProcessResult<String>> {
        Box::pin(async move {
            let lines = lines.to_string();
            self.pm2(
                &["logs", name, "--nostream", "--raw", "--lines", &lines],
                EnvMode::Inherit,
            )
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_jlist_extracts_fields() {
        let out = r#"[PM2] some warning
[{"pid":4242,"name":"demo","pm2_env":{"status":"online","pm_uptime":1700000000000,"restart_time":3,"env":{}},"monit":{"memory":52428800,"cpu":1.5}},
 {"pid":0,"name":"idle","pm2_env":{"status":"stopped"},"monit":{}}]
"#;
        let list = parse_jlist(out).unwrap();
        assert_eq!(list.len(), 2);

        let demo = &list[0];
        assert_eq!(demo.name, "demo");
        assert_eq!(demo.status, "online");
        assert_eq!(demo.pid, Some(4242));
        assert_eq!(demo.memory_bytes, 52_428_800);
        assert_eq!(demo.restarts, 3);
        assert_eq!(demo.started_at, Some(1_700_000_000_000));

        let idle = &list[1];
        assert_eq!(idle.pid, None);
        assert_eq!(idle.cpu_percent, 0.0);
    }

    #[test]
    fn restart_env_keeps_the_daemon_pm2_home() {
        let mut app_env = ProcessEnv::new();
        app_env.insert("PORT".to_string(), "4000".to_string());

        let env = restart_env(&app_env, Some("/srv/pm2".to_string()));
        assert_eq!(env["PM2_HOME"], "/srv/pm2");
        assert_eq!(env["PORT"], "4000");

        assert!(!restart_env(&app_env, None).contains_key("PM2_HOME"));

        app_env.insert("PM2_HOME".to_string(), "/app/pm2".to_string());
        assert_eq!(restart_env(&app_env, Some("/srv/pm2".to_string()))["PM2_HOME"], "/app/pm2");
    }

    #[test]
    fn parse_jlist_empty() {
        assert!(parse_jlist("[]").unwrap().is_empty());
    }

    #[test]
    fn parse_jlist_rejects_garbage() {
        assert!(parse_jlist("daemon not running").is_err());
        assert!(parse_jlist("[{oops").is_err());
    }

    #[test]
    fn config_artifact_shape() {
        let dir = tempfile::tempdir().unwrap();
        let launch = LaunchCommand {
            program: "node".to_string(),
            args: vec!["index.js".to_string()],
        };
        let mut env = ProcessEnv::new();
        env.insert("PORT".to_string(), "4000".to_string());

        let config = SupervisorConfig::single("demo", dir.path().join("current"), &launch, env);
        let path = dir.path().join(SUPERVISOR_CONFIG_FILE);
        config.write_to(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let app = &json["apps"][0];
        assert_eq!(app["name"], "demo");
        assert_eq!(app["script"], "node");
        assert_eq!(app["args"][0], "index.js");
        assert_eq!(app["interpreter"], "none");
        assert_eq!(app["env"]["PORT"], "4000");
    }
}
