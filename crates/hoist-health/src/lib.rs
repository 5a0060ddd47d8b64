//! hoist-health: post-activation health verification.
//!
//! After a release is activated and its process confirmed, the deploy
//! pipeline polls the app's health endpoint on a fixed schedule:
//!
//! ```text
//! wait 1s → probe → wait 2s → probe → (wait 4s → probe) × 8
//! ```
//!
//! A single `200 OK` at any attempt passes. Any other status, connection
//! error, or per-attempt timeout counts as a miss and the next attempt runs.
//! Exhausting the schedule fails the check, which sends the deploy into
//! rollback.

pub mod checker;

pub use checker::{HealthCheckFailed, HealthSchedule, ProbeResult, http_probe, wait_until_healthy};
