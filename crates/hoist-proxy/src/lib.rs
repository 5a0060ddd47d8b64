//! hoist-proxy: one public port in front of many co-located apps.
//!
//! Requests to `/{app}/...` are forwarded to the port the registry assigned
//! to `app`, with the prefix stripped and `X-Forwarded-*` headers added.
//! `/app_toc` lists the deployed apps; `/` is handled per [`RootMode`].
//!
//! [`RootMode`]: hoist_core::RootMode

pub mod error;
pub mod forward;
pub mod router;
pub mod service;

pub use error::{ProxyError, ProxyResult};
pub use forward::{Forwarder, add_forwarding_headers};
pub use router::{Route, TOC_PATH, resolve, split_app_path};
pub use service::{AppToc, ProxyState, build_router, client_ip};
