//! Health check probe logic.
//!
//! Performs HTTP GET probes against an app's serving port and drives the
//! fixed retry schedule used during deploys.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint returned exactly 200.
    Healthy,
    /// The endpoint answered with some other status.
    Unhealthy(u16),
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

/// Delays before each attempt plus the per-attempt bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSchedule {
    pub delays: Vec<Duration>,
    pub attempt_timeout: Duration,
}

impl HealthSchedule {
    pub fn new(delays: Vec<Duration>, attempt_timeout: Duration) -> Self {
        Self {
            delays,
            attempt_timeout,
        }
    }

    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    /// Sum of all waits, excluding time spent inside probes.
    pub fn total_wait(&self) -> Duration {
        self.delays.iter().sum()
    }
}

impl Default for HealthSchedule {
    /// 1s, 2s, then eight attempts 4s apart; 5s per attempt.
    fn default() -> Self {
        let mut delays = vec![Duration::from_secs(1), Duration::from_secs(2)];
        delays.extend([Duration::from_secs(4); 8]);
        Self::new(delays, Duration::from_secs(5))
    }
}

/// The schedule ran out without a 200.
#[derive(Debug, Clone, Error)]
#[error("health check {path} failed after {attempts} attempts (last: {last:?})")]
pub struct HealthCheckFailed {
    pub path: String,
    pub attempts: u32,
    pub last: ProbeResult,
}

/// Poll `http://{address}{path}` until it returns 200 or the schedule runs out.
///
/// Returns the 1-based attempt number that succeeded.
pub async fn wait_until_healthy(
    address: &str,
    path: &str,
    schedule: &HealthSchedule,
) -> Result<u32, HealthCheckFailed> {
    let mut last = ProbeResult::Failed;
    let mut attempts = 0u32;

    for delay in &schedule.delays {
        tokio::time::sleep(*delay).await;
        attempts += 1;

        last = http_probe(address, path, schedule.attempt_timeout).await;
        if last == ProbeResult::Healthy {
            info!(%address, path, attempt = attempts, "health check passed");
            return Ok(attempts);
        }
        debug!(%address, path, attempt = attempts, result = ?last, "health check attempt missed");
    }

    warn!(%address, path, attempts, result = ?last, "health check exhausted schedule");
    Err(HealthCheckFailed {
        path: path.to_string(),
        attempts,
        last,
    })
}

/// Perform an HTTP health probe against an endpoint.
///
/// Returns `Healthy` only for a 200 response, `Unhealthy` for any other
/// status, or `Failed` if the connection fails or times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", address)
            .header("user-agent", "hoist-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status() == http::StatusCode::OK => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "health probe non-200");
                ProbeResult::Unhealthy(resp.status().as_u16())
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    /// Serve `/healthz` answering 503 for the first `failures` hits, then 200.
    async fn spawn_app(failures: u32) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new()
            .route(
                "/healthz",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n < failures {
                            StatusCode::SERVICE_UNAVAILABLE
                        } else {
                            StatusCode::OK
                        }
                    }
                }),
            )
            .route("/created", get(|| async { StatusCode::CREATED }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr.to_string(), hits)
    }

    fn fast_schedule(attempts: usize) -> HealthSchedule {
        HealthSchedule::new(
            vec![Duration::from_millis(5); attempts],
            Duration::from_millis(500),
        )
    }

    #[test]
    fn default_schedule_shape() {
        let schedule = HealthSchedule::default();
        assert_eq!(schedule.attempts(), 10);
        assert_eq!(schedule.delays[0], Duration::from_secs(1));
        assert_eq!(schedule.delays[1], Duration::from_secs(2));
        assert_eq!(schedule.total_wait(), Duration::from_secs(35));
        assert_eq!(schedule.attempt_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn probe_healthy_on_200() {
        let (addr, _) = spawn_app(0).await;
        let result = http_probe(&addr, "/healthz", Duration::from_secs(1)).await;
        assert_eq!(result, ProbeResult::Healthy);
    }

    #[tokio::test]
    async fn probe_other_2xx_is_not_healthy() {
        let (addr, _) = spawn_app(0).await;
        let result = http_probe(&addr, "/created", Duration::from_secs(1)).await;
        assert_eq!(result, ProbeResult::Unhealthy(201));
    }

    #[tokio::test]
    async fn probe_connection_refused_fails() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = http_probe(&addr, "/healthz", Duration::from_secs(1)).await;
        assert_eq!(result, ProbeResult::Failed);
    }

    #[tokio::test]
    async fn wait_succeeds_after_misses() {
        let (addr, hits) = spawn_app(3).await;
        let attempt = wait_until_healthy(&addr, "/healthz", &fast_schedule(10))
            .await
            .unwrap();
        assert_eq!(attempt, 4);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn wait_exhausts_schedule() {
        let (addr, hits) = spawn_app(u32::MAX).await;
        let err = wait_until_healthy(&addr, "/healthz", &fast_schedule(4))
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last, ProbeResult::Unhealthy(503));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
