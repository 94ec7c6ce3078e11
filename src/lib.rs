//! Keel - deployment orchestration for container platform clusters
//!
//! Keel installs, upgrades and removes a container runtime, a control plane
//! and an image registry across a fleet of hosts. Work is split into
//! [phases](phase::Phase) that a [`Manager`](phase::Manager) runs in order:
//!
//! - Concurrent per-host execution with error attribution
//! - Jittered fixed-delay retry for connections and health checks
//! - Rolling updates with health gates
//! - Idempotent, version-aware reconciliation
//! - Persisted local cluster state

pub mod config;
pub mod error;
pub mod executor;
pub mod host;
pub mod phase;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod rolling;
pub mod shell;
pub mod state;
pub mod telemetry;
pub mod version;

#[cfg(test)]
mod testing;

pub use error::{KeelError, Result};
