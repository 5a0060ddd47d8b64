//! hoist-state: the app registry.
//!
//! Backed by [redb](https://docs.rs/redb): one database file holds every
//! `AppRecord`. The full map is mirrored in memory and each mutation is
//! committed to disk before it becomes visible, so the file always reflects
//! the last committed change.
//!
//! The registry also owns port allocation for proxy mode, since port
//! uniqueness is a property of the whole record set.
//!
//! `Registry` is `Clone` + `Send` + `Sync` (backed by `Arc`) and can be
//! shared across async tasks. No lock is ever held across an `.await`.

pub mod error;
pub mod registry;
pub mod tables;

pub use error::{StateError, StateResult};
pub use registry::Registry;
