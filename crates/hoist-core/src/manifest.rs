//! Bundle manifest (`package.json`) inspection.
//!
//! Decides how a release is launched and which package manager installs
//! its dependencies. Only the handful of fields hoist cares about are
//! modelled; everything else in the manifest is ignored.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ToolsConfig;

/// Dependency manifest file name inside a release.
pub const MANIFEST_FILE: &str = "package.json";

/// Entry file launched when the manifest names neither a start script nor a main module.
pub const DEFAULT_ENTRY: &str = "index.js";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleManifest {
    pub name: Option<String>,
    pub main: Option<String>,
    #[serde(default)]
    pub scripts: HashMap<String, String>,
}

impl BundleManifest {
    pub fn parse(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    pub fn start_script(&self) -> Option<&str> {
        self.scripts
            .get("start")
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn main_entry(&self) -> Option<&str> {
        self.main.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// How a release's process is started, in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LaunchPlan {
    /// Manifest declares a start script; run it through the package runner.
    StartScript(String),
    /// Manifest declares a main module; run that file.
    MainEntry(String),
    /// Neither is declared; run [`DEFAULT_ENTRY`].
    DefaultEntry,
}

/// Concrete program + args handed to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// What the release directory says about launching and installing.
#[derive(Debug, Clone)]
pub struct ReleaseInspection {
    pub plan: LaunchPlan,
    /// A manifest file exists (even if it failed to parse).
    pub has_manifest: bool,
}

impl LaunchPlan {
    pub fn from_manifest(manifest: Option<&BundleManifest>) -> Self {
        let Some(manifest) = manifest else {
            return Self::DefaultEntry;
        };
        if let Some(script) = manifest.start_script() {
            Self::StartScript(script.to_string())
        } else if let Some(main) = manifest.main_entry() {
            Self::MainEntry(main.to_string())
        } else {
            Self::DefaultEntry
        }
    }

    pub fn command(&self, tools: &ToolsConfig) -> LaunchCommand {
        match self {
            Self::StartScript(_) => LaunchCommand {
                program: tools.npm_bin.clone(),
                args: vec!["start".to_string()],
            },
            Self::MainEntry(file) => LaunchCommand {
                program: tools.node_bin.clone(),
                args: vec![file.clone()],
            },
            Self::DefaultEntry => LaunchCommand {
                program: tools.node_bin.clone(),
                args: vec![DEFAULT_ENTRY.to_string()],
            },
        }
    }
}

/// Inspect an extracted release directory.
///
/// A manifest that cannot be read or parsed is logged and treated as if it
/// declared nothing; the release still launches via the default entry.
pub fn inspect_release(dir: &Path) -> ReleaseInspection {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return ReleaseInspection {
            plan: LaunchPlan::DefaultEntry,
            has_manifest: false,
        };
    }

    let manifest = std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|content| BundleManifest::parse(&content).map_err(|e| e.to_string()));

    let manifest = match manifest {
        Ok(m) => Some(m),
        Err(error) => {
            warn!(path = %path.display(), %error, "unreadable manifest, using default entry");
            None
        }
    };

    ReleaseInspection {
        plan: LaunchPlan::from_manifest(manifest.as_ref()),
        has_manifest: true,
    }
}

/// Package manager chosen by the lock file shipped in the release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    Pnpm,
    Yarn,
    /// `package-lock.json` present: reproducible `npm ci`.
    NpmCi,
    Npm,
}

impl PackageManager {
    pub fn detect(dir: &Path) -> Self {
        if dir.join("pnpm-lock.yaml").is_file() {
            Self::Pnpm
        } else if dir.join("yarn.lock").is_file() {
            Self::Yarn
        } else if dir.join("package-lock.json").is_file() {
            Self::NpmCi
        } else {
            Self::Npm
        }
    }

    pub fn command(&self, tools: &ToolsConfig) -> LaunchCommand {
        let (program, args) = match self {
            Self::Pnpm => (tools.pnpm_bin.as_str(), &["install", "--frozen-lockfile"][..]),
            Self::Yarn => (tools.yarn_bin.as_str(), &["install", "--frozen-lockfile"][..]),
            Self::NpmCi => (tools.npm_bin.as_str(), &["ci"][..]),
            Self::Npm => (tools.npm_bin.as_str(), &["install"][..]),
        };
        LaunchCommand {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}
