//! Domain types shared across hoist crates.
//!
//! `AppRecord` is what the registry persists for every app that has
//! completed at least one deploy. `AppName` and `ReleaseId` are validated
//! newtypes so the rest of the workspace can use them as path segments
//! without re-checking.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static APP_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("valid regex"));

/// Rejected app name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid app name {0:?}: expected 1-64 chars of [A-Za-z0-9_-], starting alphanumeric")]
pub struct InvalidAppName(pub String);

/// A validated app name. Safe to use as a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(String);

impl AppName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidAppName> {
        let name = name.into();
        if APP_NAME_RE.is_match(&name) {
            Ok(Self(name))
        } else {
            Err(InvalidAppName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AppName {
    type Err = InvalidAppName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AppName {
    type Error = InvalidAppName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AppName> for String {
    fn from(name: AppName) -> Self {
        name.0
    }
}

impl AsRef<str> for AppName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Release identifier: milliseconds since the unix epoch at allocation time.
///
/// Ids are unique per app and strictly increasing; the release directory is
/// named after the decimal form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(pub u64);

impl ReleaseId {
    /// Next id for an app whose newest existing release is `last`.
    pub fn next(now_ms: u64, last: Option<ReleaseId>) -> Self {
        match last {
            Some(ReleaseId(prev)) if prev >= now_ms => ReleaseId(prev + 1),
            _ => ReleaseId(now_ms),
        }
    }

    /// Parse a release directory name. Non-numeric names are not releases.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        name.parse().ok().map(ReleaseId)
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted record for a deployed app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub name: AppName,
    pub current_release: ReleaseId,
    /// Name of the process entry in the supervisor.
    pub process_name: String,
    /// Health-check path supplied with the last deploy, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
    /// Assigned port (proxy mode only). Sticky until destroy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Unix timestamp (seconds) of the last successful deploy or rollback.
    pub deployed_at: u64,
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    now_millis() / 1000
}
