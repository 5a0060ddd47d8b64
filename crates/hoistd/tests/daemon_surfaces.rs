//! Both surfaces as the daemon assembles them, driven through `oneshot`
//! with in-process collaborators standing in for pm2, tar, and npm.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::get;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use hoist_core::{HoistConfig, ProxyConfig};
use hoist_process::testing::{FakeExtractor, FakeInstaller, FakeSupervisor, bundle};
use hoist_state::Registry;
use hoistd::{Collaborators, Daemon, build_daemon};

struct Harness {
    _dir: TempDir,
    daemon: Daemon,
    supervisor: Arc<FakeSupervisor>,
    config: HoistConfig,
}

fn harness(tweak: impl FnOnce(&mut HoistConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HoistConfig {
        data_dir: dir.path().to_path_buf(),
        ..HoistConfig::default()
    };
    config.deploy.settle_delay_ms = 0;
    config.deploy.health_schedule_ms = vec![5, 5, 5];
    config.management.rate_limit = false;
    tweak(&mut config);

    let supervisor = Arc::new(FakeSupervisor::new());
    let collaborators = Collaborators {
        supervisor: supervisor.clone(),
        extractor: Arc::new(FakeExtractor::new()),
        installer: Arc::new(FakeInstaller::new()),
    };
    let daemon = build_daemon(&config, Registry::open_in_memory().unwrap(), collaborators).unwrap();
    Harness {
        _dir: dir,
        daemon,
        supervisor,
        config,
    }
}

fn request(method: &str, uri: &str, from: [u8; 4], body: Body) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((from, 40000))));
    req
}

fn get_from(uri: &str, from: [u8; 4]) -> Request<Body> {
    request("GET", uri, from, Body::empty())
}

fn deploy_request(app: &str) -> Request<Body> {
    request(
        "POST",
        &format!("/deploy/{app}"),
        LOCAL,
        Body::from(bundle(&[("index.js", "")])),
    )
}

const LOCAL: [u8; 4] = [127, 0, 0, 1];

async fn send(router: &Router, req: Request<Body>) -> Response {
    router.clone().oneshot(req).await.unwrap()
}

async fn json(resp: Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Upstream with a health route and an echo of the request URI.
async fn upstream() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .fallback(|req: axum::extract::Request| async move { req.uri().to_string() });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

// ── Management surface ─────────────────────────────────────────────

#[tokio::test]
async fn deploy_then_status_and_listing() {
    let h = harness(|_| {});
    let api = &h.daemon.management;

    let resp = send(api, deploy_request("shop")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["app"], "shop");
    let release = body["data"]["release"].as_u64().unwrap();

    let status = json(send(api, get_from("/status/shop", LOCAL)).await).await;
    assert_eq!(status["data"]["app"]["current_release"], release);
    assert_eq!(status["data"]["process"]["status"], "online");

    let apps = json(send(api, get_from("/apps", LOCAL)).await).await;
    assert_eq!(apps["data"].as_array().unwrap().len(), 1);

    let health = json(send(api, get_from("/healthz", LOCAL)).await).await;
    assert_eq!(health["data"], serde_json::json!({"status": "ok", "apps": 1}));
}

#[tokio::test]
async fn error_statuses_use_the_envelope() {
    let h = harness(|_| {});
    let api = &h.daemon.management;

    let resp = send(api, deploy_request("bad.name")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(resp).await["success"], false);

    let resp = send(api, request("POST", "/rollback/ghost", LOCAL, Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = send(api, get_from("/status/ghost", LOCAL)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    send(api, deploy_request("shop")).await;
    for bad in ["abc", "0", "10001"] {
        let resp = send(api, get_from(&format!("/logs/shop?lines={bad}"), LOCAL)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "lines={bad}");
    }
    let logs = json(send(api, get_from("/logs/shop?lines=2", LOCAL)).await).await;
    assert_eq!(logs["data"]["logs"], "shop line 1\nshop line 2\n");
}

#[tokio::test]
async fn deploy_while_locked_is_conflict() {
    let h = harness(|_| {});
    let base = h.config.apps_dir().join("shop");
    std::fs::create_dir_all(&base).unwrap();
    std::fs::write(base.join(hoist_deploy::LOCK_FILE), "1").unwrap();

    let resp = send(&h.daemon.management, deploy_request("shop")).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert!(h.daemon.deployer.registry().is_empty());
}

#[tokio::test]
async fn supervisor_outage_is_server_error() {
    let h = harness(|_| {});
    h.supervisor.set_unreachable(true);

    let resp = send(&h.daemon.management, deploy_request("shop")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["rolled_back"], true);
}

#[tokio::test]
async fn destroy_removes_everything() {
    let h = harness(|_| {});
    let api = &h.daemon.management;
    send(api, deploy_request("shop")).await;

    let resp = send(api, request("POST", "/destroy/shop", LOCAL, Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!h.config.apps_dir().join("shop").exists());
    assert!(h.supervisor.process("shop").is_none());

    let resp = send(api, get_from("/status/shop", LOCAL)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Management gate ────────────────────────────────────────────────

#[tokio::test]
async fn gate_rejects_unlisted_ips_and_missing_tokens() {
    let h = harness(|c| {
        c.management.allowed_ips = Some("10.0.0.1".into());
        c.management.token = Some("s3cret".into());
    });
    let api = &h.daemon.management;

    let resp = send(api, get_from("/healthz", [10, 0, 0, 9])).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(json(resp).await["success"], false);

    let resp = send(api, get_from("/healthz", [10, 0, 0, 1])).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let mut req = get_from("/healthz", [10, 0, 0, 1]);
    req.headers_mut()
        .insert("authorization", "Bearer s3cret".parse().unwrap());
    assert_eq!(send(api, req).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn eleventh_request_in_a_minute_is_throttled() {
    let h = harness(|c| c.management.rate_limit = true);
    let api = &h.daemon.management;

    for i in 0..10 {
        let resp = send(api, get_from("/healthz", [10, 0, 0, 1])).await;
        assert_eq!(resp.status(), StatusCode::OK, "request {i}");
    }
    let resp = send(api, get_from("/healthz", [10, 0, 0, 1])).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let resp = send(api, get_from("/healthz", [10, 0, 0, 2])).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Proxy surface ──────────────────────────────────────────────────

#[tokio::test]
async fn proxy_mode_is_off_by_default() {
    let h = harness(|_| {});
    assert!(h.daemon.proxy.is_none());
}

#[tokio::test]
async fn deployed_app_is_reachable_through_the_proxy() {
    let port = upstream().await;
    let h = harness(|c| {
        c.proxy = Some(ProxyConfig {
            port_base: port,
            ..ProxyConfig::default()
        });
    });

    let resp = send(
        &h.daemon.management,
        request(
            "POST",
            "/deploy/shop?health_check=/healthz",
            LOCAL,
            Body::from(bundle(&[("index.js", "")])),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["data"]["port"], port);
    assert_eq!(body["data"]["health_attempts"], 1);

    let started = h.supervisor.last_started().unwrap();
    assert_eq!(started.apps[0].env["PORT"], port.to_string());
    assert_eq!(started.apps[0].env["BASE_PATH"], "/shop");

    let proxy = h.daemon.proxy.as_ref().unwrap();
    let resp = send(proxy, get_from("/shop/items?page=3", [192, 0, 2, 1])).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"/items?page=3");

    let toc = json(send(proxy, get_from("/app_toc", LOCAL)).await).await;
    assert_eq!(toc, serde_json::json!({"apps": ["shop"]}));
}

#[tokio::test]
async fn proxy_gate_is_separate_from_management() {
    let h = harness(|c| {
        c.management.token = Some("admin".into());
        c.proxy = Some(ProxyConfig {
            allowed_ips: Some("192.0.2.1".into()),
            ..ProxyConfig::default()
        });
    });
    let proxy = h.daemon.proxy.as_ref().unwrap();

    let resp = send(proxy, get_from("/app_toc", [192, 0, 2, 1])).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(proxy, get_from("/app_toc", [192, 0, 2, 2])).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // The proxy never rate limits.
    for _ in 0..15 {
        let resp = send(proxy, get_from("/app_toc", [192, 0, 2, 1])).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
