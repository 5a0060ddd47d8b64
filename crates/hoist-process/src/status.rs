//! Process status adapter.
//!
//! Turns whatever the supervisor reports into a fixed shape. A status check
//! never fails: an unreachable supervisor yields `unknown`, a missing entry
//! yields `stopped`.

use serde::Serialize;
use tracing::warn;

use hoist_core::now_millis;

use crate::supervisor::{ProcessInfo, ProcessSupervisor};

/// Normalized lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Online,
    Launching,
    Stopping,
    Stopped,
    Errored,
    Unknown,
}

impl ProcessState {
    pub fn from_supervisor(status: &str) -> Self {
        match status {
            "online" => Self::Online,
            "launching" | "waiting restart" => Self::Launching,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "errored" | "one-launch-status" => Self::Errored,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStatus {
    pub name: String,
    pub status: ProcessState,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    /// Unix milliseconds of the last start.
    pub started_at: Option<u64>,
    pub uptime_ms: Option<u64>,
    pub restarts: u32,
}

impl ProcessStatus {
    fn empty(name: &str, status: ProcessState) -> Self {
        Self {
            name: name.to_string(),
            status,
            cpu_percent: 0.0,
            memory_bytes: 0,
            started_at: None,
            uptime_ms: None,
            restarts: 0,
        }
    }

    pub fn stopped(name: &str) -> Self {
        Self::empty(name, ProcessState::Stopped)
    }

    pub fn unknown(name: &str) -> Self {
        Self::empty(name, ProcessState::Unknown)
    }

    pub fn from_info(info: &ProcessInfo, now_ms: u64) -> Self {
        let status = ProcessState::from_supervisor(&info.status);
        let uptime_ms = match status {
            ProcessState::Online => info.started_at.map(|t| now_ms.saturating_sub(t)),
            _ => None,
        };
        Self {
            name: info.name.clone(),
            status,
            cpu_percent: info.cpu_percent,
            memory_bytes: info.memory_bytes,
            started_at: info.started_at,
            uptime_ms,
            restarts: info.restarts,
        }
    }
}

/// Status of the process named `name`.
pub async fn process_status(supervisor: &dyn ProcessSupervisor, name: &str) -> ProcessStatus {
    match supervisor.list().await {
        Ok(list) => list
            .iter()
            .find(|p| p.name == name)
            .map(|info| ProcessStatus::from_info(info, now_millis()))
            .unwrap_or_else(|| ProcessStatus::stopped(name)),
        Err(error) => {
            warn!(%name, %error, "supervisor unreachable, reporting unknown status");
            ProcessStatus::unknown(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSupervisor;

    fn info(status: &str) -> ProcessInfo {
        ProcessInfo {
            name: "demo".to_string(),
            status: status.to_string(),
            pid: Some(10),
            cpu_percent: 2.5,
            memory_bytes: 1024,
            started_at: Some(1_000),
            restarts: 2,
        }
    }

    #[test]
    fn state_mapping() {
        assert_eq!(ProcessState::from_supervisor("online"), ProcessState::Online);
        assert_eq!(ProcessState::from_supervisor("stopped"), ProcessState::Stopped);
        assert_eq!(ProcessState::from_supervisor("errored"), ProcessState::Errored);
        assert_eq!(ProcessState::from_supervisor("weird"), ProcessState::Unknown);
    }

    #[test]
    fn uptime_only_while_online() {
        let online = ProcessStatus::from_info(&info("online"), 5_000);
        assert_eq!(online.uptime_ms, Some(4_000));
        assert_eq!(online.restarts, 2);

        let stopped = ProcessStatus::from_info(&info("stopped"), 5_000);
        assert_eq!(stopped.uptime_ms, None);
        assert_eq!(stopped.started_at, Some(1_000));
    }

    #[tokio::test]
    async fn missing_entry_is_stopped() {
        let supervisor = FakeSupervisor::new();
        let status = process_status(&supervisor, "demo").await;
        assert_eq!(status, ProcessStatus::stopped("demo"));
    }

    #[tokio::test]
    async fn unreachable_supervisor_is_unknown() {
        let supervisor = FakeSupervisor::new();
        supervisor.set_unreachable(true);
        let status = process_status(&supervisor, "demo").await;
        assert_eq!(status.status, ProcessState::Unknown);
    }

    #[tokio::test]
    async fn running_entry_is_reported() {
        let supervisor = FakeSupervisor::new();
        supervisor.insert(info("online"));
        let status = process_status(&supervisor, "demo").await;
        assert_eq!(status.status, ProcessState::Online);
        assert_eq!(status.memory_bytes, 1024);
    }
}
