//! Release activation state machine.
//!
//! A deploy walks these phases, each logged as it is entered:
//!
//! ```text
//! Locked → Extracted → [Installed] → Activated → ProcessSwapped
//!        → Confirmed → [HealthChecked] → Committed
//! ```
//!
//! Anything that fails before `Activated` aborts and leaves the live release
//! untouched. Anything that fails after it rolls the slots and the process
//! back to the snapshot taken just before activation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use hoist_core::manifest::inspect_release;
use hoist_core::{
    AppName, AppRecord, HoistConfig, LaunchPlan, PackageManager, ReleaseId, ToolsConfig,
    now_millis, now_secs,
};
use hoist_health::{HealthSchedule, wait_until_healthy};
use hoist_process::{
    ArchiveExtractor, DependencyInstaller, ProcessEnv, ProcessResult, ProcessSupervisor,
    SupervisorConfig,
};
use hoist_state::Registry;

use crate::env::process_env;
use crate::error::{DeployError, DeployResult, Stage};
use crate::layout::{AppLayout, SlotSnapshot};
use crate::lock::{LOCK_STALE_AFTER, LockManager};

/// Phases of a single deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Locked,
    Extracted,
    Installed,
    Activated,
    ProcessSwapped,
    Confirmed,
    HealthChecked,
    Committed,
    Aborted,
    RollingBack,
    RolledBack,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Locked => "locked",
            Self::Extracted => "extracted",
            Self::Installed => "installed",
            Self::Activated => "activated",
            Self::ProcessSwapped => "process_swapped",
            Self::Confirmed => "confirmed",
            Self::HealthChecked => "health_checked",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
        })
    }
}

/// Tunables resolved from the daemon config.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub apps_dir: PathBuf,
    pub settle_delay: Duration,
    pub extract_timeout: Duration,
    pub install_timeout: Duration,
    pub health: HealthSchedule,
    /// Health-check port when proxy mode is off.
    pub app_port: u16,
    pub retain_previous: bool,
    /// First port handed out; `Some` iff proxy mode is on.
    pub port_base: Option<u16>,
    pub lock_stale_after: Duration,
    pub tools: ToolsConfig,
}

impl DeploySettings {
    pub fn from_config(config: &HoistConfig) -> Self {
        let deploy = &config.deploy;
        Self {
            apps_dir: config.apps_dir(),
            settle_delay: deploy.settle_delay(),
            extract_timeout: deploy.extract_timeout(),
            install_timeout: deploy.install_timeout(),
            health: HealthSchedule::new(deploy.health_schedule(), deploy.health_attempt_timeout()),
            app_port: deploy.app_port,
            retain_previous: deploy.retain_previous,
            port_base: config.proxy.as_ref().map(|p| p.port_base),
            lock_stale_after: LOCK_STALE_AFTER,
            tools: config.tools.clone(),
        }
    }
}

/// SHA-256 and size of an uploaded archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveDigest {
    pub sha256: String,
    pub bytes: u64,
}

/// Outcome of a committed deploy.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub app: AppName,
    pub release: ReleaseId,
    pub archive: ArchiveDigest,
    pub launch: LaunchPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<PackageManager>,
    pub port: Option<u16>,
    /// Attempt that passed the health check, when one was requested.
    pub health_attempts: Option<u32>,
    /// Old release directories removed on commit.
    pub pruned: usize,
}

/// What the post-activation steps produced.
struct BringUp {
    launch: LaunchPlan,
    package_manager: Option<PackageManager>,
    health_attempts: Option<u32>,
}

pub(crate) struct Inner {
    pub(crate) settings: DeploySettings,
    pub(crate) registry: Registry,
    pub(crate) supervisor: Arc<dyn ProcessSupervisor>,
    pub(crate) extractor: Arc<dyn ArchiveExtractor>,
    pub(crate) installer: Arc<dyn DependencyInstaller>,
    pub(crate) locks: LockManager,
}

/// Runs deploys, rollbacks, and lifecycle operations.
///
/// Cheap to clone; all clones share the registry and collaborators.
#[derive(Clone)]
pub struct Deployer {
    pub(crate) inner: Arc<Inner>,
}

impl Deployer {
    pub fn new(
        settings: DeploySettings,
        registry: Registry,
        supervisor: Arc<dyn ProcessSupervisor>,
        extractor: Arc<dyn ArchiveExtractor>,
        installer: Arc<dyn DependencyInstaller>,
    ) -> Self {
        let locks = LockManager::new(settings.lock_stale_after);
        Self {
            inner: Arc::new(Inner {
                settings,
                registry,
                supervisor,
                extractor,
                installer,
                locks,
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.inner.settings
    }

    pub fn layout(&self, app: &AppName) -> AppLayout {
        AppLayout::new(&self.inner.settings.apps_dir, app)
    }

    /// Deploy the archive streamed in `body` as a new release of `app`.
    ///
    /// Runs on its own task: once the lock is taken the deploy finishes even
    /// if the caller goes away.
    pub async fn deploy<B>(
        &self,
        app: AppName,
        health_check: Option<String>,
        body: B,
    ) -> DeployResult<DeployReport>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: fmt::Display + Send,
    {
        let health_check = normalize_health_path(health_check)?;
        let this = self.clone();
        tokio::spawn(async move { this.run_deploy(app, health_check, body).await })
            .await
            .map_err(|e| DeployError::Internal(format!("deploy task failed: {e}")))?
    }

    async fn run_deploy<B>(
        &self,
        app: AppName,
        health_check: Option<String>,
        body: B,
    ) -> DeployResult<DeployReport>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: fmt::Display,
    {
        let layout = self.layout(&app);
        let lock = match self.inner.locks.acquire(layout.base()) {
            Ok(lock) => lock,
            Err(e) => {
                warn!(app = %app, phase = %DeployPhase::Aborted, error = %e, "deploy rejected");
                return Err(e);
            }
        };
        info!(app = %app, phase = %DeployPhase::Locked, "deploy started");

        let first_deploy = !self.inner.registry.contains(&app);
        let result = match self.inner.settings.port_base {
            Some(base) => match self.inner.registry.allocate_port(&app, base) {
                Ok(port) => {
                    self.deploy_locked(&app, &layout, health_check, Some(port), body)
                        .await
                }
                Err(e) => Err(e.into()),
            },
            None => self.deploy_locked(&app, &layout, health_check, None, body).await,
        };

        if result.is_err() && first_deploy {
            self.inner.registry.release_reservation(&app);
        }
        lock.release();
        result
    }

    async fn deploy_locked<B>(
        &self,
        app: &AppName,
        layout: &AppLayout,
        health_check: Option<String>,
        port: Option<u16>,
        body: B,
    ) -> DeployResult<DeployReport>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: fmt::Display,
    {
        let last = layout.list_releases()?.last().copied();
        let release = ReleaseId::next(now_millis(), last);

        let archive = match self.receive_and_extract(layout, release, body).await {
            Ok(archive) => archive,
            Err(e) => {
                warn!(app = %app, release = %release, phase = %DeployPhase::Aborted, error = %e, "deploy aborted");
                return Err(e);
            }
        };
        info!(
            app = %app,
            release = %release,
            phase = %DeployPhase::Extracted,
            bytes = archive.bytes,
            sha256 = %archive.sha256,
            "release extracted"
        );

        let slots = layout.slots();
        let snapshot = slots.snapshot();
        if let Err(e) = slots.advance(release) {
            if let Err(restore) = slots.restore(&snapshot) {
                warn!(app = %app, error = %restore, "failed to restore slots after activation error");
            }
            warn!(app = %app, release = %release, phase = %DeployPhase::Aborted, error = %e, "activation failed");
            return Err(e.into());
        }
        info!(app = %app, release = %release, phase = %DeployPhase::Activated, "release activated");

        let bring_up = match self
            .bring_up(app, layout, release, port, health_check.as_deref())
            .await
        {
            Ok(bring_up) => bring_up,
            Err(e) => {
                warn!(app = %app, release = %release, error = %e, "deploy failed after activation");
                self.roll_back(app, layout, &snapshot, port).await;
                return Err(e.into_rolled_back());
            }
        };

        let mut keep = vec![release];
        if self.inner.settings.retain_previous {
            keep.extend(snapshot.current);
        }
        let pruned = layout.prune_releases(&keep);

        info!(
            app = %app,
            release = %release,
            phase = %DeployPhase::Committed,
            pruned,
            "deploy committed"
        );

        Ok(DeployReport {
            app: app.clone(),
            release,
            archive,
            launch: bring_up.launch,
            package_manager: bring_up.package_manager,
            port,
            health_attempts: bring_up.health_attempts,
            pruned,
        })
    }

    /// Spool the upload, then extract it into a fresh release directory.
    async fn receive_and_extract<B>(
        &self,
        layout: &AppLayout,
        release: ReleaseId,
        body: B,
    ) -> DeployResult<ArchiveDigest>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: fmt::Display,
    {
        let release_dir = layout.release_dir(release);
        tokio::fs::create_dir_all(&release_dir).await?;

        let upload = layout.upload_path(release);
        let archive = match receive_upload(&upload, body).await {
            Ok(archive) => archive,
            Err(e) => {
                remove_quietly(&upload).await;
                // Nothing was extracted, so there is nothing to inspect.
                let _ = tokio::fs::remove_dir(&release_dir).await;
                return Err(e);
            }
        };

        let limit = self.inner.settings.extract_timeout;
        let extracted =
            tokio::time::timeout(limit, self.inner.extractor.extract(&upload, &release_dir)).await;
        remove_quietly(&upload).await;

        match extracted {
            Ok(Ok(())) => Ok(archive),
            Ok(Err(e)) => Err(DeployError::upstream(Stage::Extract, e)),
            Err(_) => Err(DeployError::upstream(
                Stage::Extract,
                format!("timed out after {limit:?}"),
            )),
        }
    }

    /// Everything between activation and commit. Any error here triggers
    /// rollback.
    async fn bring_up(
        &self,
        app: &AppName,
        layout: &AppLayout,
        release: ReleaseId,
        port: Option<u16>,
        health_check: Option<&str>,
    ) -> DeployResult<BringUp> {
        let settings = &self.inner.settings;
        let supervisor = &self.inner.supervisor;
        let name = app.as_str();

        let release_dir = layout.release_dir(release);
        let inspection = inspect_release(&release_dir);
        let env = process_env(app, release, port);

        let package_manager = if inspection.has_manifest {
            self.install(app, &release_dir).await
        } else {
            None
        };
        if let Some(manager) = package_manager {
            info!(app = %app, phase = %DeployPhase::Installed, ?manager, "dependencies installed");
        }

        self.swap_process(app, layout, &inspection.plan, &env).await?;
        info!(app = %app, phase = %DeployPhase::ProcessSwapped, launch = ?inspection.plan, "process swapped");

        tokio::time::sleep(settings.settle_delay).await;
        match supervisor.describe(name).await {
            Ok(Some(process)) => {
                info!(app = %app, phase = %DeployPhase::Confirmed, status = %process.status, "process confirmed");
            }
            Ok(None) => {
                return Err(DeployError::upstream(
                    Stage::Supervisor,
                    "process not running after start",
                ));
            }
            Err(e) => return Err(DeployError::upstream(Stage::Supervisor, e)),
        }

        let health_attempts = match health_check {
            Some(path) => {
                let address = format!("127.0.0.1:{}", port.unwrap_or(settings.app_port));
                let attempt = wait_until_healthy(&address, path, &settings.health)
                    .await
                    .map_err(|e| DeployError::upstream(Stage::HealthCheck, e))?;
                info!(app = %app, phase = %DeployPhase::HealthChecked, attempt, "health check passed");
                Some(attempt)
            }
            None => None,
        };

        self.inner.registry.put(AppRecord {
            name: app.clone(),
            current_release: release,
            process_name: name.to_string(),
            health_check_path: health_check.map(str::to_string),
            port,
            deployed_at: now_secs(),
        })?;

        Ok(BringUp {
            launch: inspection.plan,
            package_manager,
            health_attempts,
        })
    }

    /// Install dependencies. Failure is logged and the deploy carries on.
    async fn install(&self, app: &AppName, dir: &Path) -> Option<PackageManager> {
        let limit = self.inner.settings.install_timeout;
        match tokio::time::timeout(limit, self.inner.installer.install(dir)).await {
            Ok(Ok(manager)) => Some(manager),
            Ok(Err(e)) => {
                warn!(app = %app, error = %e, "dependency install failed, continuing");
                None
            }
            Err(_) => {
                warn!(app = %app, timeout = ?limit, "dependency install timed out, continuing");
                None
            }
        }
    }

    /// Restart the existing process in place, or start it from a fresh
    /// config artifact.
    async fn swap_process(
        &self,
        app: &AppName,
        layout: &AppLayout,
        plan: &LaunchPlan,
        env: &ProcessEnv,
    ) -> DeployResult<()> {
        let supervisor = &self.inner.supervisor;
        let name = app.as_str();

        let existing = supervisor
            .describe(name)
            .await
            .map_err(|e| DeployError::upstream(Stage::Supervisor, e))?;

        let config_path = self
            .write_supervisor_config(app, layout, plan, env)
            .map_err(|e| DeployError::upstream(Stage::Supervisor, e))?;

        let swapped = if existing.is_some() {
            debug!(app = %app, "restarting existing process");
            supervisor.restart(name, env).await
        } else {
            debug!(app = %app, config = %config_path.display(), "starting new process");
            supervisor.start(&config_path).await
        };
        swapped.map_err(|e| DeployError::upstream(Stage::Supervisor, e))
    }

    /// Write the config artifact describing `plan` under `env`, which pm2
    /// also uses to resurrect the app.
    pub(crate) fn write_supervisor_config(
        &self,
        app: &AppName,
        layout: &AppLayout,
        plan: &LaunchPlan,
        env: &ProcessEnv,
    ) -> ProcessResult<PathBuf> {
        let command = plan.command(&self.inner.settings.tools);
        let config = SupervisorConfig::single(app.as_str(), layout.current_link(), &command, env.clone());
        let path = layout.supervisor_config();
        config.write_to(&path)?;
        Ok(path)
    }

    /// Reinstate the pre-deploy slots, process, and config artifact.
    /// Best-effort throughout.
    async fn roll_back(
        &self,
        app: &AppName,
        layout: &AppLayout,
        snapshot: &SlotSnapshot,
        port: Option<u16>,
    ) {
        warn!(app = %app, phase = %DeployPhase::RollingBack, restore = ?snapshot.current, "rolling back");
        let supervisor = &self.inner.supervisor;
        let name = app.as_str();

        if let Err(e) = layout.slots().restore(snapshot) {
            warn!(app = %app, error = %e, "failed to restore release slots");
        }

        match snapshot.current {
            Some(previous) => {
                let env = process_env(app, previous, port);
                let plan = inspect_release(&layout.release_dir(previous)).plan;
                if let Err(e) = self.write_supervisor_config(app, layout, &plan, &env) {
                    warn!(app = %app, error = %e, "failed to restore supervisor config");
                }
                if let Err(e) = supervisor.restart(name, &env).await {
                    warn!(app = %app, error = %e, "failed to restart previous release");
                }
            }
            None => {
                remove_quietly(&layout.supervisor_config()).await;
                if let Err(e) = supervisor.delete(name).await {
                    warn!(app = %app, error = %e, "failed to remove process of failed first deploy");
                }
            }
        }
        warn!(app = %app, phase = %DeployPhase::RolledBack, "rollback finished");
    }
}

/// Validate the optional health-check path. Empty means none.
pub fn normalize_health_path(path: Option<String>) -> DeployResult<Option<String>> {
    match path {
        None => Ok(None),
        Some(p) if p.is_empty() => Ok(None),
        Some(p) if p.starts_with('/') && !p.chars().any(|c| c.is_whitespace() || c.is_control()) => {
            Ok(Some(p))
        }
        Some(p) => Err(DeployError::Validation(format!(
            "health check path must start with '/': {p:?}"
        ))),
    }
}

/// Stream `body` into `path`, hashing as it goes.
async fn receive_upload<B>(path: &Path, mut body: B) -> DeployResult<ArchiveDigest>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
{
    let mut file = tokio::fs::File::create(path).await?;
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;

    while let Some(frame) = body.frame().await {
        let frame =
            frame.map_err(|e| DeployError::Validation(format!("upload interrupted: {e}")))?;
        if let Ok(data) = frame.into_data() {
            hasher.update(&data);
            bytes += data.len() as u64;
            file.write_all(&data).await?;
        }
    }
    file.flush().await?;

    if bytes == 0 {
        return Err(DeployError::Validation("empty archive".to_string()));
    }
    Ok(ArchiveDigest {
        sha256: hex::encode(hasher.finalize()),
        bytes,
    })
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}
