//! Access-gate middleware shared by the management and traffic surfaces.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use hoist_core::{AccessDenied, AccessGate};

use crate::handlers::error_response;

/// Reject the request unless `gate` lets it through.
///
/// Install with `axum::middleware::from_fn_with_state(gate, enforce)`.
pub async fn enforce(State(gate): State<Arc<AccessGate>>, req: Request, next: Next) -> Response {
    let ip = peer_ip(&req);
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match gate.check(ip, authorization) {
        Ok(()) => next.run(req).await,
        Err(denied) => {
            debug!(%ip, path = %req.uri().path(), reason = %denied, "request denied");
            error_response(&denied.to_string(), denied_status(denied)).into_response()
        }
    }
}

pub fn denied_status(denied: AccessDenied) -> StatusCode {
    match denied {
        AccessDenied::Forbidden => StatusCode::FORBIDDEN,
        AccessDenied::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AccessDenied::Unauthorized => StatusCode::UNAUTHORIZED,
    }
}

fn peer_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
