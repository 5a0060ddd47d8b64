//! Forwarding a request to an app on the loopback interface.

use std::net::IpAddr;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response, Uri, Version};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";
pub const X_FORWARDED_PREFIX: &str = "x-forwarded-prefix";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Pooled HTTP/1 client for upstream requests.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl Forwarder {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    /// Send `req` to `127.0.0.1:{port}{forward}` and stream the answer back.
    ///
    /// `prefix` is the public path prefix the app is mounted under, if any.
    pub async fn forward(
        &self,
        mut req: Request<Body>,
        app: &str,
        port: u16,
        forward: &str,
        prefix: Option<&str>,
        client_ip: IpAddr,
    ) -> ProxyResult<Response<Body>> {
        let uri: Uri = format!("http://127.0.0.1:{port}{forward}")
            .parse()
            .map_err(|e| ProxyError::BadRequest(format!("invalid upstream path: {e}")))?;
        debug!(%app, %uri, "forwarding");

        *req.uri_mut() = uri;
        *req.version_mut() = Version::HTTP_11;
        add_forwarding_headers(req.headers_mut(), client_ip, prefix);

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| ProxyError::Unreachable {
                app: app.to_string(),
                reason: e.to_string(),
            })?;
        Ok(resp.map(Body::new))
    }
}

/// Add the `X-Forwarded-*` family. `X-Forwarded-For` is appended to, not
/// replaced; `X-Forwarded-Proto` keeps an upstream proxy's value.
pub fn add_forwarding_headers(headers: &mut HeaderMap, client_ip: IpAddr, prefix: Option<&str>) {
    let ip = client_ip.to_string();

    let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {ip}"),
        _ => ip.clone(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Ok(value) = HeaderValue::from_str(&ip) {
        headers.insert(X_REAL_IP, value);
    }
    if let Some(prefix) = prefix.and_then(|p| HeaderValue::from_str(p).ok()) {
        headers.insert(X_FORWARDED_PREFIX, prefix);
    }
    if !headers.contains_key(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn forwarded_for_is_appended() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9"));
        add_forwarding_headers(&mut headers, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), Some("/shop"));

        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.9, 10.0.0.7");
        assert_eq!(headers[X_REAL_IP], "10.0.0.7");
        assert_eq!(headers[X_FORWARDED_PREFIX], "/shop");
        assert_eq!(headers[X_FORWARDED_PROTO], "http");
    }

    #[test]
    fn existing_proto_is_kept() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        add_forwarding_headers(&mut headers, IpAddr::V4(Ipv4Addr::LOCALHOST), None);

        assert_eq!(headers[X_FORWARDED_PROTO], "https");
        assert_eq!(headers[X_FORWARDED_FOR], "127.0.0.1");
        assert!(!headers.contains_key(X_FORWARDED_PREFIX));
    }
}
