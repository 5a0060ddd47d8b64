//! Process environment for app releases.

use hoist_core::{AppName, ReleaseId};
use hoist_process::ProcessEnv;

/// Host variables passed through to app processes. Everything else the
/// daemon sees (including its own secrets) is withheld.
pub const HOST_ENV_ALLOWLIST: &[&str] = &[
    "PATH", "HOME", "USER", "LANG", "LC_ALL", "TZ", "TMPDIR", "SHELL",
];

/// Environment for `release` of `app`. `port` is set in proxy mode only.
pub fn process_env(app: &AppName, release: ReleaseId, port: Option<u16>) -> ProcessEnv {
    let mut env: ProcessEnv = HOST_ENV_ALLOWLIST
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
        .collect();

    env.insert("HOIST_APP".to_string(), app.to_string());
    env.insert("HOIST_RELEASE".to_string(), release.to_string());
    env.insert("NODE_ENV".to_string(), "production".to_string());
    if let Some(port) = port {
        env.insert("PORT".to_string(), port.to_string());
        env.insert("BASE_PATH".to_string(), format!("/{app}"));
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_mode_adds_port_and_base_path() {
        let app = AppName::new("shop").unwrap();
        let env = process_env(&app, ReleaseId(7), Some(4001));
        assert_eq!(env["HOIST_APP"], "shop");
        assert_eq!(env["HOIST_RELEASE"], "7");
        assert_eq!(env["NODE_ENV"], "production");
        assert_eq!(env["PORT"], "4001");
        assert_eq!(env["BASE_PATH"], "/shop");
    }

    #[test]
    fn only_allowlisted_host_vars_pass() {
        let app = AppName::new("shop").unwrap();
        let env = process_env(&app, ReleaseId(7), None);
        assert!(!env.contains_key("PORT"));
        assert!(!env.contains_key("BASE_PATH"));
        for key in env.keys() {
            assert!(
                HOST_ENV_ALLOWLIST.contains(&key.as_str())
                    || ["HOIST_APP", "HOIST_RELEASE", "NODE_ENV"].contains(&key.as_str()),
                "unexpected variable {key}"
            );
        }
    }
}
