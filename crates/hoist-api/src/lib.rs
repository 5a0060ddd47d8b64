//! hoist-api: management surface for hoist.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/deploy/{app}?health_check=/path` | Deploy the tar.gz request body |
//! | POST | `/rollback/{app}` | Swap `current` and `previous` |
//! | POST | `/stop/{app}` | Stop the app's process |
//! | POST | `/restart/{app}` | Restart with a refreshed environment |
//! | POST | `/destroy/{app}` | Remove process, files, record, and port |
//! | GET | `/status/{app}` | Record plus process status |
//! | GET | `/logs/{app}?lines=n` | Last `n` log lines |
//! | GET | `/apps` | All app records |
//! | GET | `/healthz` | Daemon liveness |
//!
//! Every route sits behind the access gate.

pub mod gate;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use hoist_core::AccessGate;
use hoist_deploy::Deployer;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub deployer: Deployer,
}

/// Build the management router, gated by `gate`.
pub fn build_router(deployer: Deployer, gate: Arc<AccessGate>) -> Router {
    let state = ApiState { deployer };

    Router::new()
        .route("/deploy/{app}", post(handlers::deploy))
        .route("/rollback/{app}", post(handlers::rollback))
        .route("/stop/{app}", post(handlers::stop))
        .route("/restart/{app}", post(handlers::restart))
        .route("/destroy/{app}", post(handlers::destroy))
        .route("/status/{app}", get(handlers::status))
        .route("/logs/{app}", get(handlers::logs))
        .route("/apps", get(handlers::list_apps))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .layer(middleware::from_fn_with_state(gate, gate::enforce))
}
