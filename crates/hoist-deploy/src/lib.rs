//! hoist-deploy: release activation and app lifecycle.
//!
//! [`Deployer`] owns the whole write path for an app:
//!
//! - **lock**: one in-flight deploy, rollback, or destroy per app, via a
//!   marker file with a staleness timeout.
//! - **layout**: `releases/{id}` directories and the `current`/`previous`
//!   symlink ring.
//! - **deployer**: the activation state machine with automatic rollback.
//! - **rollback**: operator-triggered slot swap.
//! - **lifecycle**: stop, restart, destroy, logs, status.

pub mod deployer;
pub mod env;
pub mod error;
pub mod layout;
pub mod lifecycle;
pub mod lock;
pub mod rollback;

pub use deployer::{
    ArchiveDigest, DeployPhase, DeployReport, DeploySettings, Deployer, normalize_health_path,
};
pub use error::{DeployError, DeployResult, Stage};
pub use layout::{AppLayout, ReleaseSlots, SlotSnapshot};
pub use lifecycle::{AppStatus, DEFAULT_LOG_LINES, DestroyReport, MAX_LOG_LINES};
pub use lock::{DeployLock, LOCK_FILE, LOCK_STALE_AFTER, LockManager};
pub use rollback::RollbackReport;
