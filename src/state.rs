//! Persisted local cluster state

use crate::error::{KeelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What is remembered about a cluster between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    /// Cluster name
    pub name: String,
    /// Cluster ID
    pub id: String,
    /// Last successful save
    pub updated_at: DateTime<Utc>,
}

impl ClusterState {
    /// Fresh state with a newly generated ID
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: Uuid::new_v4().to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// One JSON file per cluster under a state directory
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(KeelError::State(format!("invalid cluster name: {:?}", name)));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }

    /// Load the state of `name`, `None` if nothing was saved yet
    pub fn load(&self, name: &str) -> Result<Option<ClusterState>> {
        let path = self.path(name)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let state: ClusterState = serde_json::from_str(&content).map_err(|e| {
            KeelError::State(format!("failed to parse {}: {}", path.display(), e))
        })?;

        if state.name != name {
            return Err(KeelError::State(format!(
                "{} belongs to cluster '{}'",
                path.display(),
                state.name
            )));
        }
        Ok(Some(state))
    }

    /// Write `state`, creating the directory if needed
    pub fn save(&self, state: &ClusterState) -> Result<()> {
        let path = self.path(&state.name)?;
        std::fs::create_dir_all(&self.dir)?;

        let mut state = state.clone();
        state.updated_at = Utc::now();
        let content = serde_json::to_string_pretty(&state)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!("saved cluster state to {}", path.display());
        Ok(())
    }

    /// Forget `name`; missing state is not an error
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
