//! Engine settings

use crate::retry::RetryPolicy;
use crate::rolling::RollingPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of hosts pulling images at the same time
pub const DEFAULT_IMAGE_CONCURRENCY: usize = 5;

/// Knobs that change how the pipeline runs, independent of what is deployed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Continue with later phases when a phase fails
    pub ignore_errors: bool,
    /// Never run phase cleanup
    pub skip_cleanup: bool,
    /// Re-apply matching versions and allow minor version skips
    pub force: bool,
    /// Rolling update/restart policy
    pub rolling: RollingPolicy,
    /// Retry policy for opening connections
    pub connect_retry: RetryPolicy,
    /// Hosts pulling images concurrently
    pub image_concurrency: usize,
    /// Directory holding persisted cluster state
    pub state_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ignore_errors: false,
            skip_cleanup: false,
            force: false,
            rolling: RollingPolicy::default(),
            connect_retry: RetryPolicy::new(10, 5_000, 1_000),
            image_concurrency: DEFAULT_IMAGE_CONCURRENCY,
            state_dir: None,
        }
    }
}

impl Settings {
    /// State directory, falling back to the user data directory
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("/var/lib"))
                .join("keel")
        })
    }
}
