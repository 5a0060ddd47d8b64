//! Traffic surface: the axum router in front of every deployed app.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tracing::{debug, warn};

use hoist_core::{AppName, ProxyConfig, RootMode};
use hoist_state::Registry;

use crate::error::ProxyError;
use crate::forward::Forwarder;
use crate::router::{Route, TOC_PATH, resolve};

#[derive(Clone)]
pub struct ProxyState {
    registry: Registry,
    forwarder: Forwarder,
    root: RootMode,
    home_app: String,
}

impl ProxyState {
    pub fn new(registry: Registry, config: &ProxyConfig) -> Self {
        Self {
            registry,
            forwarder: Forwarder::new(),
            root: config.root,
            home_app: config.home_app.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AppToc {
    pub apps: Vec<String>,
}

/// Build the traffic router.
pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route(TOC_PATH, get(app_toc))
        .fallback(proxy)
        .with_state(state)
}

/// Peer address set by `into_make_service_with_connect_info`; unspecified
/// when the server was not set up that way.
pub fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn app_toc(State(state): State<ProxyState>) -> axum::Json<AppToc> {
    axum::Json(AppToc {
        apps: state.registry.names(),
    })
}

async fn proxy(State(state): State<ProxyState>, req: Request) -> Response {
    let ip = client_ip(&req);
    let route = resolve(&state.registry, req.uri().path(), req.uri().query());

    match route {
        Route::Root => root(&state, req, ip).await,
        Route::Toc => app_toc(State(state)).await.into_response(),
        Route::App { app, port, forward } => {
            let prefix = format!("/{app}");
            state
                .forwarder
                .forward(req, app.as_str(), port, &forward, Some(&prefix), ip)
                .await
                .unwrap_or_else(|e| {
                    warn!(%app, error = %e, "proxy request failed");
                    e.into_response()
                })
        }
        Route::Unknown(name) => {
            debug!(app = %name, "no such app");
            ProxyError::UnknownApp(name).into_response()
        }
    }
}

async fn root(state: &ProxyState, req: Request<Body>, ip: IpAddr) -> Response {
    match state.root {
        RootMode::Listing => Html(listing_page(&state.registry.names())).into_response(),
        RootMode::NotFound => ProxyError::NotFound.into_response(),
        RootMode::Home => {
            let home = AppName::new(state.home_app.as_str())
                .ok()
                .and_then(|name| state.registry.get(&name));
            let Some((name, port)) = home.and_then(|r| r.port.map(|p| (r.name, p))) else {
                return ProxyError::UnknownApp(state.home_app.clone()).into_response();
            };
            let forward = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            state
                .forwarder
                .forward(req, name.as_str(), port, &forward, None, ip)
                .await
                .unwrap_or_else(|e| {
                    warn!(app = %name, error = %e, "home app request failed");
                    e.into_response()
                })
        }
    }
}

/// Minimal HTML index. App names are restricted to `[A-Za-z0-9_-]`, so
/// they need no escaping.
fn listing_page(apps: &[String]) -> String {
    let mut items = String::new();
    for app in apps {
        items.push_str(&format!("<li><a href=\"/{app}/\">{app}</a></li>"));
    }
    if apps.is_empty() {
        items.push_str("<li>no apps deployed</li>");
    }
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>hoist</title></head>\
         <body><h1>Apps</h1><ul>{items}</ul></body></html>"
    )
}
