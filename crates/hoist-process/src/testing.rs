//! In-process fakes for the collaborator traits.
//!
//! Used by the deploy, API, and daemon test suites in place of pm2, tar,
//! and npm. The fake extractor treats an "archive" as a JSON object mapping
//! relative file paths to contents; [`bundle`] builds one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hoist_core::PackageManager;

use crate::error::{ProcessError, ProcessResult};
use crate::extractor::ArchiveExtractor;
use crate::installer::DependencyInstaller;
use crate::supervisor::{ProcessInfo, ProcessSupervisor, SupervisorConfig};
use crate::{BoxFuture, ProcessEnv};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unreachable_error() -> ProcessError {
    ProcessError::Failed {
        what: "fake supervisor".to_string(),
        code: None,
        stderr: "supervisor unreachable".to_string(),
    }
}

/// Build a fake archive from `(path, contents)` pairs.
pub fn bundle(files: &[(&str, &str)]) -> Vec<u8> {
    let map: BTreeMap<&str, &str> = files.iter().copied().collect();
    serde_json::to_vec(&map).unwrap_or_default()
}

/// A supervisor call, as recorded by [`FakeSupervisor`].
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorCall {
    Start { config: SupervisorConfig },
    Restart { name: String, env: ProcessEnv },
    Stop { name: String },
    Delete { name: String },
}

/// Supervisor that keeps its process table in memory.
#[derive(Debug, Default)]
pub struct FakeSupervisor {
    processes: Mutex<BTreeMap<String, ProcessInfo>>,
    calls: Mutex<Vec<SupervisorCall>>,
    unreachable: AtomicBool,
    crash_on_start: AtomicBool,
    lost_after_swap: AtomicBool,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails, as if the supervisor daemon were down.
    pub fn set_unreachable(&self, on: bool) {
        self.unreachable.store(on, Ordering::SeqCst);
    }

    /// Start/restart succeed but the process is gone by the time anyone looks.
    pub fn set_crash_on_start(&self, on: bool) {
        self.crash_on_start.store(on, Ordering::SeqCst);
    }

    /// The next start or restart succeeds, then the supervisor daemon goes
    /// away and every later call fails.
    pub fn set_lost_after_swap(&self, on: bool) {
        self.lost_after_swap.store(on, Ordering::SeqCst);
    }

    pub fn insert(&self, info: ProcessInfo) {
        lock(&self.processes).insert(info.name.clone(), info);
    }

    pub fn process(&self, name: &str) -> Option<ProcessInfo> {
        lock(&self.processes).get(name).cloned()
    }

    pub fn calls(&self) -> Vec<SupervisorCall> {
        lock(&self.calls).clone()
    }

    /// The most recent config passed to `start`, if any.
    pub fn last_started(&self) -> Option<SupervisorConfig> {
        self.calls().into_iter().rev().find_map(|c| match c {
            SupervisorCall::Start { config } => Some(config),
            _ => None,
        })
    }

    fn check(&self) -> ProcessResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(unreachable_error())
        } else {
            Ok(())
        }
    }

    fn record(&self, call: SupervisorCall) {
        lock(&self.calls).push(call);
    }

    fn swapped(&self) {
        if self.lost_after_swap.swap(false, Ordering::SeqCst) {
            self.set_unreachable(true);
        }
    }

    fn online(name: &str, restarts: u32) -> ProcessInfo {
        ProcessInfo {
            name: name.to_string(),
            status: "online".to_string(),
            pid: Some(1000 + restarts),
            cpu_percent: 0.5,
            memory_bytes: 32 * 1024 * 1024,
            started_at: Some(hoist_core::now_millis()),
            restarts,
        }
    }
}

impl ProcessSupervisor for FakeSupervisor {
    fn describe<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProcessResult<Option<ProcessInfo>>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.process(name))
        })
    }

    fn start<'a>(&'a self, config: &'a Path) -> BoxFuture<'a, ProcessResult<()>> {
        Box::pin(async move {
            self.check()?;
            let raw = std::fs::read(config)?;
            let parsed: SupervisorConfig =
                serde_json::from_slice(&raw).map_err(|e| ProcessError::Parse {
                    what: "fake start".to_string(),
                    message: e.to_string(),
                })?;
            if !self.crash_on_start.load(Ordering::SeqCst) {
                for app in &parsed.apps {
                    self.insert(Self::online(&app.name, 0));
                }
            }
            self.record(SupervisorCall::Start { config: parsed });
            self.swapped();
            Ok(())
        })
    }

    fn restart<'a>(&'a self, name: &'a str, env: &'a ProcessEnv) -> BoxFuture<'a, ProcessResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.record(SupervisorCall::Restart {
                name: name.to_string(),
                env: env.clone(),
            });
            let mut processes = lock(&self.processes);
            let Some(existing) = processes.get(name).cloned() else {
                return Err(ProcessError::Failed {
                    what: format!("restart {name}"),
                    code: Some(1),
                    stderr: "process not found".to_string(),
                });
            };
            if self.crash_on_start.load(Ordering::SeqCst) {
                processes.remove(name);
            } else {
                processes.insert(name.to_string(), Self::online(name, existing.restarts + 1));
            }
            drop(processes);
            self.swapped();
            Ok(())
        })
    }

    fn stop<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProcessResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.record(SupervisorCall::Stop {
                name: name.to_string(),
            });
            if let Some(p) = lock(&self.processes).get_mut(name) {
                p.status = "stopped".to_string();
                p.pid = None;
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProcessResult<()>> {
        Box::pin(async move {
            self.check()?;
            self.record(SupervisorCall::Delete {
                name: name.to_string(),
            });
            lock(&self.processes).remove(name);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, ProcessResult<Vec<ProcessInfo>>> {
        Box::pin(async move {
            self.check()?;
            Ok(lock(&self.processes).values().cloned().collect())
        })
    }

    fn logs<'a>(&'a self, name: &'a str, lines: u32) -> BoxFuture<'a, ProcessResult<String>> {
        Box::pin(async move {
            self.check()?;
            Ok((1..=lines).map(|i| format!("{name} line {i}\n")).collect())
        })
    }
}

/// Extractor that unpacks [`bundle`] archives.
#[derive(Debug, Default)]
pub struct FakeExtractor {
    delay: Mutex<Option<Duration>>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before extracting, to hold a deploy inside the critical section.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }
}

impl ArchiveExtractor for FakeExtractor {
    fn extract<'a>(&'a self, archive: &'a Path, target: &'a Path) -> BoxFuture<'a, ProcessResult<()>> {
        Box::pin(async move {
            let delay = *lock(&self.delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let raw = std::fs::read(archive)?;
            let files: BTreeMap<String, String> =
                serde_json::from_slice(&raw).map_err(|e| ProcessError::Failed {
                    what: "fake extract".to_string(),
                    code: Some(2),
                    stderr: e.to_string(),
                })?;
            for (rel, contents) in files {
                let path = target.join(&rel);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, contents)?;
            }
            Ok(())
        })
    }
}

/// Installer that records the directories it was asked to install.
#[derive(Debug, Default)]
pub struct FakeInstaller {
    installed: Mutex<Vec<PathBuf>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, on: bool) {
        self.fail.store(on, Ordering::SeqCst);
    }

    /// Sleep before reporting, like a registry that never answers.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    pub fn installed(&self) -> Vec<PathBuf> {
        lock(&self.installed).clone()
    }
}

impl DependencyInstaller for FakeInstaller {
    fn install<'a>(&'a self, dir: &'a Path) -> BoxFuture<'a, ProcessResult<PackageManager>> {
        Box::pin(async move {
            lock(&self.installed).push(dir.to_path_buf());
            let delay = *lock(&self.delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProcessError::Failed {
                    what: "fake install".to_string(),
                    code: Some(1),
                    stderr: "registry unreachable".to_string(),
                });
            }
            Ok(PackageManager::detect(dir))
        })
    }
}
