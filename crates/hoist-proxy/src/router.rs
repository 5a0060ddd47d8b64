//! Request routing: maps the first path segment to a registered app.
//!
//! `/{app}/rest?query` goes to `127.0.0.1:{port}/rest?query`, where `port`
//! is the app's assigned port. An empty remainder becomes `/`.

use tracing::debug;

use hoist_core::AppName;
use hoist_state::Registry;

/// Path that lists deployed apps instead of routing.
pub const TOC_PATH: &str = "/app_toc";

/// Where a traffic request should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Root,
    Toc,
    App {
        app: AppName,
        port: u16,
        /// Path and query to send upstream.
        forward: String,
    },
    Unknown(String),
}

/// Split `/{segment}{rest}` into the segment and the path to forward.
pub fn split_app_path<'a>(path: &'a str, query: Option<&str>) -> Option<(&'a str, String)> {
    let trimmed = path.strip_prefix('/')?;
    if trimmed.is_empty() {
        return None;
    }
    let (segment, rest) = match trimmed.find('/') {
        Some(i) => trimmed.split_at(i),
        None => (trimmed, ""),
    };
    let mut forward = if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    };
    if let Some(q) = query {
        forward.push('?');
        forward.push_str(q);
    }
    Some((segment, forward))
}

/// Resolve a request path against the registry.
pub fn resolve(registry: &Registry, path: &str, query: Option<&str>) -> Route {
    if path == TOC_PATH {
        return Route::Toc;
    }
    let Some((segment, forward)) = split_app_path(path, query) else {
        return Route::Root;
    };

    let record = AppName::new(segment).ok().and_then(|name| registry.get(&name));
    match record {
        Some(record) => match record.port {
            Some(port) => Route::App {
                app: record.name,
                port,
                forward,
            },
            None => {
                debug!(app = %record.name, "app has no assigned port");
                Route::Unknown(segment.to_string())
            }
        },
        None => Route::Unknown(segment.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_core::{AppRecord, ReleaseId};

    fn registry_with(apps: &[(&str, Option<u16>)]) -> Registry {
        let registry = Registry::open_in_memory().unwrap();
        for (name, port) in apps {
            registry
                .put(AppRecord {
                    name: AppName::new(*name).unwrap(),
                    current_release: ReleaseId(1),
                    process_name: name.to_string(),
                    health_check_path: None,
                    port: *port,
                    deployed_at: 0,
                })
                .unwrap();
        }
        registry
    }

    #[test]
    fn split_paths() {
        assert_eq!(split_app_path("/", None), None);
        assert_eq!(split_app_path("/shop", None), Some(("shop", "/".to_string())));
        assert_eq!(split_app_path("/shop/", None), Some(("shop", "/".to_string())));
        assert_eq!(
            split_app_path("/shop/api/items", Some("page=2")),
            Some(("shop", "/api/items?page=2".to_string()))
        );
        assert_eq!(split_app_path("/shop", Some("a=1")), Some(("shop", "/?a=1".to_string())));
    }

    #[test]
    fn resolves_registered_apps() {
        let registry = registry_with(&[("shop", Some(4000)), ("legacy", None)]);

        assert_eq!(resolve(&registry, "/", None), Route::Root);
        assert_eq!(resolve(&registry, TOC_PATH, None), Route::Toc);
        assert_eq!(
            resolve(&registry, "/shop/cart", None),
            Route::App {
                app: AppName::new("shop").unwrap(),
                port: 4000,
                forward: "/cart".to_string(),
            }
        );
        assert_eq!(resolve(&registry, "/nope/x", None), Route::Unknown("nope".to_string()));
        assert_eq!(resolve(&registry, "/legacy", None), Route::Unknown("legacy".to_string()));
        // Names are matched exactly.
        assert_eq!(resolve(&registry, "/Shop", None), Route::Unknown("Shop".to_string()));
        assert_eq!(resolve(&registry, "/..%2f", None), Route::Unknown("..%2f".to_string()));
    }
}
