//! Lifecycle operations on deployed apps: stop, restart, destroy, logs,
//! status, and listing.

use std::io::ErrorKind;

use serde::Serialize;
use tracing::{info, warn};

use hoist_core::{AppName, AppRecord};
use hoist_process::{ProcessStatus, process_status};

use crate::deployer::Deployer;
use crate::env::process_env;
use crate::error::{DeployError, DeployResult, Stage};

pub const DEFAULT_LOG_LINES: u32 = 100;
pub const MAX_LOG_LINES: u32 = 10_000;

/// Registry record plus live process state.
#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub app: AppRecord,
    pub process: ProcessStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestroyReport {
    pub app: AppName,
    /// Port returned to the pool, if the app had one.
    pub port: Option<u16>,
}

impl Deployer {
    /// Registered record for `app`, or NotFound.
    pub fn record(&self, app: &AppName) -> DeployResult<AppRecord> {
        self.inner
            .registry
            .get(app)
            .ok_or_else(|| DeployError::NotFound(format!("app {app} is not deployed")))
    }

    pub fn apps(&self) -> Vec<AppRecord> {
        self.inner.registry.list()
    }

    pub async fn stop(&self, app: &AppName) -> DeployResult<()> {
        let record = self.record(app)?;
        self.inner
            .supervisor
            .stop(&record.process_name)
            .await
            .map_err(|e| DeployError::upstream(Stage::Supervisor, e))?;
        info!(app = %app, "process stopped");
        Ok(())
    }

    /// Restart the live release with a freshly built environment.
    pub async fn restart(&self, app: &AppName) -> DeployResult<()> {
        let record = self.record(app)?;
        let env = process_env(app, record.current_release, record.port);
        self.inner
            .supervisor
            .restart(&record.process_name, &env)
            .await
            .map_err(|e| DeployError::upstream(Stage::Supervisor, e))?;
        info!(app = %app, release = %record.current_release, "process restarted");
        Ok(())
    }

    /// Remove the process, every file of the app, its record, and its port.
    pub async fn destroy(&self, app: &AppName) -> DeployResult<DestroyReport> {
        let record = self.record(app)?;
        let layout = self.layout(app);
        let lock = self.inner.locks.acquire(layout.base())?;
        let supervisor = &self.inner.supervisor;

        let existing = supervisor
            .describe(&record.process_name)
            .await
            .map_err(|e| DeployError::upstream(Stage::Supervisor, e))?;
        if existing.is_some() {
            supervisor
                .delete(&record.process_name)
                .await
                .map_err(|e| DeployError::upstream(Stage::Supervisor, e))?;
        }

        self.inner.registry.remove(app)?;

        // Takes the lock marker with it; the guard tolerates that.
        match tokio::fs::remove_dir_all(layout.base()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(app = %app, error = %e, "failed to remove app directory"),
        }
        lock.release();

        info!(app = %app, port = ?record.port, "app destroyed");
        Ok(DestroyReport {
            app: app.clone(),
            port: record.port,
        })
    }

    /// Last `lines` lines of output; `None` means the default.
    pub async fn logs(&self, app: &AppName, lines: Option<u32>) -> DeployResult<String> {
        let lines = lines.unwrap_or(DEFAULT_LOG_LINES);
        if !(1..=MAX_LOG_LINES).contains(&lines) {
            return Err(DeployError::Validation(format!(
                "lines must be between 1 and {MAX_LOG_LINES}"
            )));
        }
        let record = self.record(app)?;
        self.inner
            .supervisor
            .logs(&record.process_name, lines)
            .await
            .map_err(|e| DeployError::upstream(Stage::Supervisor, e))
    }

    pub async fn status(&self, app: &AppName) -> DeployResult<AppStatus> {
        let record = self.record(app)?;
        let process = process_status(&*self.inner.supervisor, &record.process_name).await;
        Ok(AppStatus {
            app: record,
            process,
        })
    }
}
