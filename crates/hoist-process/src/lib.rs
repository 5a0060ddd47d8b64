//! hoist-process: adapters for the external tools a deploy drives.
//!
//! Three capability traits sit between the deploy pipeline and the host:
//!
//! - [`ProcessSupervisor`]: start, restart, stop, and inspect app processes
//!   (pm2 in production).
//! - [`ArchiveExtractor`]: unpack an uploaded bundle (`tar -xzf`).
//! - [`DependencyInstaller`]: install a release's dependencies with the
//!   package manager its lock file names.
//!
//! The traits return boxed futures so they stay object-safe and can be held
//! as `Arc<dyn Trait>`. In-memory fakes live in `testing`, behind the
//! `testing` feature.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

pub mod command;
pub mod error;
pub mod extractor;
pub mod installer;
pub mod status;
pub mod supervisor;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Boxed future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Environment variables for an app process, sorted by name.
pub type ProcessEnv = BTreeMap<String, String>;

pub use command::{EnvMode, run_command};
pub use error::{ProcessError, ProcessResult};
pub use extractor::{ArchiveExtractor, TarExtractor};
pub use installer::{DependencyInstaller, PackageInstaller};
pub use status::{ProcessState, ProcessStatus, process_status};
pub use supervisor::{
    Pm2Supervisor, ProcessDefinition, ProcessInfo, ProcessSupervisor, SUPERVISOR_CONFIG_FILE,
    SupervisorConfig,
};
