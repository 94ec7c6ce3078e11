//! Rolling updates across the fleet
//!
//! Control plane hosts are changed one at a time, each followed by a health
//! gate, so at most one control plane member is unavailable at any moment.
//! Everything else goes through a bounded batch.

use crate::config::Component;
use crate::error::{KeelError, Result};
use crate::executor::{attribute, Executor};
use crate::host::{Host, HostSet};
use crate::retry::{poll_until, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Share of non-control-plane hosts changed at once
pub const DEFAULT_ROLLING_FRACTION: f64 = 0.10;

/// Policy shared by rolling upgrades and rolling restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingPolicy {
    /// Fraction of non-control-plane hosts updated concurrently
    pub fraction: f64,
    /// Health gate between control plane hosts
    pub health: RetryPolicy,
}

impl Default for RollingPolicy {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_ROLLING_FRACTION,
            health: RetryPolicy::new(60, 5_000, 500),
        }
    }
}

impl RollingPolicy {
    pub fn batch_width(&self, count: usize) -> usize {
        batch_width(count, self.fraction)
    }
}

/// Concurrent batch width for `count` hosts: `max(1, floor(count * fraction))`
pub fn batch_width(count: usize, fraction: f64) -> usize {
    let width = (count as f64 * fraction).floor();
    if width < 1.0 {
        1
    } else {
        width as usize
    }
}

/// Apply `op` to every host in `hosts`, control plane first and serially.
///
/// When `gate` is set, each control plane host must report a healthy control
/// plane before the next one is touched. A control plane failure aborts the
/// update immediately; failures on other hosts are collected while the rest
/// of the batch carries on. The gate only ever polls control plane hosts, so
/// a lone worker goes through a batch of one without a health check.
pub async fn rolling_update<F, Fut>(
    hosts: &HostSet,
    policy: &RollingPolicy,
    gate: bool,
    op: F,
) -> Result<()>
where
    F: Fn(Arc<Host>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (control_plane, others) = hosts.partition(|h| h.is_control_plane());

    let op = Arc::new(op);

    for host in &control_plane {
        tracing::info!("{}: updating", host);
        (*op)(Arc::clone(host)).await.map_err(|e| attribute(e, host))?;

        if gate {
            wait_healthy(host, &policy.health).await?;
        }
    }

    if others.is_empty() {
        return Ok(());
    }

    let width = policy.batch_width(others.len());
    tracing::info!(
        "updating {} host(s), {} at a time",
        others.len(),
        width
    );

    let op = Arc::clone(&op);
    Executor::bounded(width)
        .run(&others, move |host| (*op)(host))
        .await
}

/// Health gate on a single control plane host
pub async fn wait_healthy(host: &Arc<Host>, policy: &RetryPolicy) -> Result<()> {
    tracing::info!("{}: waiting for the control plane to become healthy", host);
    poll_until(policy, "control plane health", || {
        host.configurer().healthy(Component::ControlPlane)
    })
    .await
    .map_err(|e| KeelError::on_host(e, host.address()))
}
