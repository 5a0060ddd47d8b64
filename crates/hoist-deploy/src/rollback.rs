//! Operator-triggered rollback.
//!
//! Swaps `current` and `previous`, so calling it twice returns to where it
//! started. Holds the deploy lock for the duration.

use serde::Serialize;
use tracing::{info, warn};

use hoist_core::manifest::inspect_release;
use hoist_core::{AppName, ReleaseId, now_secs};

use crate::deployer::Deployer;
use crate::env::process_env;
use crate::error::{DeployError, DeployResult, Stage};

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub app: AppName,
    /// Release now live.
    pub current: ReleaseId,
    /// Release that was live before the rollback.
    pub previous: ReleaseId,
}

impl Deployer {
    pub async fn rollback(&self, app: &AppName) -> DeployResult<RollbackReport> {
        let mut record = self.record(app)?;
        let layout = self.layout(app);
        let lock = self.inner.locks.acquire(layout.base())?;
        let slots = layout.slots();

        let current = slots
            .current()
            .filter(|id| layout.release_exists(*id))
            .ok_or_else(|| DeployError::NotFound(format!("{app} has no current release")))?;

        let previous = match slots.previous() {
            Some(id) if layout.release_exists(id) => id,
            Some(id) => {
                warn!(app = %app, release = %id, "previous release was pruned, dropping link");
                if let Err(e) = slots.clear_previous() {
                    warn!(app = %app, error = %e, "failed to remove dangling previous link");
                }
                return Err(DeployError::NotFound(format!(
                    "{app} has no previous release to roll back to"
                )));
            }
            None => {
                return Err(DeployError::NotFound(format!(
                    "{app} has no previous release to roll back to"
                )));
            }
        };

        slots.swap(current, previous)?;

        let env = process_env(app, previous, record.port);
        if let Err(e) = self.inner.supervisor.restart(&record.process_name, &env).await {
            warn!(app = %app, error = %e, "restart failed, swapping slots back");
            if let Err(e) = slots.swap(previous, current) {
                warn!(app = %app, error = %e, "failed to swap slots back");
            }
            return Err(DeployError::Upstream {
                stage: Stage::Supervisor,
                message: e.to_string(),
                rolled_back: true,
            });
        }

        let plan = inspect_release(&layout.release_dir(previous)).plan;
        if let Err(e) = self.write_supervisor_config(app, &layout, &plan, &env) {
            warn!(app = %app, error = %e, "failed to rewrite supervisor config");
        }

        record.current_release = previous;
        record.deployed_at = now_secs();
        self.inner.registry.put(record)?;
        lock.release();

        info!(app = %app, from = %current, to = %previous, "rolled back");
        Ok(RollbackReport {
            app: app.clone(),
            current: previous,
            previous: current,
        })
    }
}
