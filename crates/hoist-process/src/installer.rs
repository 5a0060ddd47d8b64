//! Dependency installer seam and the package-manager implementation.

use std::path::Path;

use tracing::info;

use hoist_core::{PackageManager, ToolsConfig};

use crate::BoxFuture;
use crate::command::{EnvMode, run_command};
use crate::error::ProcessResult;

/// Capability interface over the dependency installer.
pub trait DependencyInstaller: Send + Sync {
    /// Install dependencies for the release in `dir`.
    fn install<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, ProcessResult<PackageManager>>;
}

/// Runs pnpm, yarn, or npm depending on the lock file in the release.
#[derive(Debug, Clone)]
pub struct PackageInstaller {
    tools: ToolsConfig,
}

impl PackageInstaller {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }
}

impl DependencyInstaller for PackageInstaller {
    fn install<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, ProcessResult<PackageManager>> {
        Box::pin(async move {
            let manager = PackageManager::detect(dir);
            let cmd = manager.command(&self.tools);
            let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
            run_command(&cmd.program, &args, Some(dir), EnvMode::Inherit, None).await?;
            info!(dir = %dir.display(), ?manager, "dependencies installed");
            Ok(manager)
        })
    }
}
