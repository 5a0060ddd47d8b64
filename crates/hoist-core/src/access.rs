//! Access control applied in front of both HTTP surfaces.
//!
//! Checks run in a fixed order: IP allowlist, rate limit, bearer token.
//! The gate is transport-agnostic; the axum middleware in `hoist-api`
//! feeds it the peer address and the `Authorization` header.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

/// Fixed rate-limit window per client address.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Requests allowed per address inside one window.
pub const RATE_LIMIT_MAX_REQUESTS: u32 = 10;

/// Table size above which expired windows are swept on insert.
const PRUNE_THRESHOLD: usize = 4096;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessDenied {
    #[error("address not allowed")]
    Forbidden,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("invalid or missing token")]
    Unauthorized,
}

#[derive(Debug, Error)]
#[error("invalid address {entry:?} in allowlist")]
pub struct InvalidAllowlist {
    pub entry: String,
}

/// Set of client addresses allowed to reach a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpAllowlist {
    Any,
    Only(HashSet<IpAddr>),
}

impl IpAllowlist {
    /// Parse a comma-separated list of literal addresses.
    ///
    /// `None`, an empty string, or `*` allow everyone.
    pub fn parse(raw: Option<&str>) -> Result<Self, InvalidAllowlist> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::Any);
        };
        if raw == "*" {
            return Ok(Self::Any);
        }

        let mut addrs = HashSet::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if entry == "*" {
                return Ok(Self::Any);
            }
            let ip: IpAddr = entry.parse().map_err(|_| InvalidAllowlist {
                entry: entry.to_string(),
            })?;
            addrs.insert(ip.to_canonical());
        }
        Ok(Self::Only(addrs))
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        match self {
            Self::Any => true,
            Self::Only(set) => set.contains(&ip.to_canonical()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request from `ip` and report whether it is allowed.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    /// [`check`](Self::check) with an explicit clock, for tests.
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(window) = windows.get_mut(&ip) {
            if now.saturating_duration_since(window.started) < self.window {
                if window.count >= self.max_requests {
                    debug!(%ip, count = window.count, "rate limit hit");
                    return false;
                }
                window.count += 1;
                return true;
            }
            // Window expired: this request opens a new one.
            *window = Window { started: now, count: 1 };
            return true;
        }

        if windows.len() >= PRUNE_THRESHOLD {
            let span = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.started) < span);
        }
        windows.insert(ip, Window { started: now, count: 1 });
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_WINDOW, RATE_LIMIT_MAX_REQUESTS)
    }
}

/// Per-surface gate: allowlist, optional rate limiter, optional token.
#[derive(Debug)]
pub struct AccessGate {
    allowlist: IpAllowlist,
    limiter: Option<RateLimiter>,
    token: Option<String>,
}

impl AccessGate {
    pub fn new(allowlist: IpAllowlist, limiter: Option<RateLimiter>, token: Option<String>) -> Self {
        Self {
            allowlist,
            limiter,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Gate for one surface, built from its config values.
    pub fn from_settings(
        allowed_ips: Option<&str>,
        token: Option<&str>,
        rate_limit: bool,
    ) -> Result<Self, InvalidAllowlist> {
        let allowlist = IpAllowlist::parse(allowed_ips)?;
        let limiter = rate_limit.then(RateLimiter::default);
        Ok(Self::new(allowlist, limiter, token.map(str::to_string)))
    }

    /// A gate that lets everything through.
    pub fn open() -> Self {
        Self::new(IpAllowlist::Any, None, None)
    }

    /// Run all checks for one request.
    ///
    /// `authorization` is the raw `Authorization` header value, if any.
    pub fn check(&self, ip: IpAddr, authorization: Option<&str>) -> Result<(), AccessDenied> {
        if !self.allowlist.allows(ip) {
            return Err(AccessDenied::Forbidden);
        }
        if let Some(limiter) = &self.limiter {
            if !limiter.check(ip) {
                return Err(AccessDenied::RateLimited);
            }
        }
        if let Some(token) = &self.token {
            let presented = authorization.and_then(|v| v.strip_prefix("Bearer "));
            if presented != Some(token.as_str()) {
                return Err(AccessDenied::Unauthorized);
            }
        }
        Ok(())
    }
}
