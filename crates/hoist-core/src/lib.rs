//! hoist-core: shared types, configuration, bundle manifests, and access control.

pub mod access;
pub mod config;
pub mod manifest;
pub mod types;

pub use access::{AccessDenied, AccessGate, IpAllowlist, RateLimiter};
pub use config::{DeployConfig, HoistConfig, ManagementConfig, ProxyConfig, RootMode, ToolsConfig};
pub use manifest::{LaunchCommand, LaunchPlan, PackageManager};
pub use types::*;
