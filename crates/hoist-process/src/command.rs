//! Bounded external command execution.
//!
//! Children are spawned with `kill_on_drop`, so abandoning the future (on
//! timeout here, or by a caller's own `tokio::time::timeout`) also kills the
//! process instead of leaving it running.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tracing::debug;

use crate::error::{ProcessError, ProcessResult};
use crate::ProcessEnv;

/// How a command's environment is built.
#[derive(Debug, Clone, Copy)]
pub enum EnvMode<'a> {
    /// Inherit the daemon's environment.
    Inherit,
    /// Start from an empty environment and set exactly these variables.
    Exact(&'a ProcessEnv),
}

/// Run `program args...` to completion and require a zero exit status.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: EnvMode<'_>,
    timeout: Option<Duration>,
) -> ProcessResult<Output> {
    let what = describe(program, args);

    let mut cmd = tokio::process::Command::new(program);
    cmd.kill_on_drop(true)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    if let EnvMode::Exact(vars) = env {
        cmd.env_clear().envs(vars);
    }

    debug!(command = %what, "running");

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let output = match timeout {
        Some(after) => tokio::time::timeout(after, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::Timeout {
                what: what.clone(),
                after,
            })??,
        None => child.wait_with_output().await?,
    };

    if !output.status.success() {
        return Err(ProcessError::Failed {
            what,
            code: output.status.code(),
            stderr: tail(&String::from_utf8_lossy(&output.stderr), 2048),
        });
    }
    Ok(output)
}

fn describe(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Last `max` bytes of `s`, on a char boundary.
fn tail(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_output() {
        let out = run_command("sh", &["-c", "echo hi"], None, EnvMode::Inherit, None)
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hi");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let err = run_command("sh", &["-c", "echo boom >&2; exit 3"], None, EnvMode::Inherit, None)
            .await
            .unwrap_err();
        match err {
            ProcessError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn timeout_abandons_command() {
        let err = run_command(
            "sh",
            &["-c", "sleep 5"],
            None,
            EnvMode::Inherit,
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = run_command("hoist-no-such-binary", &[], None, EnvMode::Inherit, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn exact_env_replaces_inherited() {
        let mut env = ProcessEnv::new();
        env.insert("HOIST_TEST".to_string(), "1".to_string());
        let out = run_command(
            "/bin/sh",
            &["-c", "echo ${HOIST_TEST}-${HOME:-unset}"],
            None,
            EnvMode::Exact(&env),
            None,
        )
        .await
        .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "1-unset");
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("  short ", 10), "short");
    }
}
