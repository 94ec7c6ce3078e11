//! Local state bookkeeping

use super::Phase;
use crate::config::ClusterConfig;
use crate::error::{KeelError, Result};
use crate::state::{ClusterState, StateStore};
use async_trait::async_trait;

/// Loads the cluster ID recorded by an earlier run, generating one for a
/// cluster seen for the first time
pub struct LoadState {
    store: StateStore,
}

impl LoadState {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Phase for LoadState {
    fn title(&self) -> String {
        "Load local state".to_string()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        let state = match self.store.load(&config.name)? {
            Some(state) => {
                tracing::debug!("loaded state for cluster {} ({})", state.name, state.id);
                state
            }
            None => {
                let state = ClusterState::new(&config.name);
                tracing::info!("new cluster {} ({})", state.name, state.id);
                state
            }
        };
        config.id = Some(state.id);
        Ok(())
    }
}

/// Records the cluster ID after a successful apply
pub struct SaveState {
    store: StateStore,
}

impl SaveState {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Phase for SaveState {
    fn title(&self) -> String {
        "Save local state".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        if config.id.is_none() {
            return Err(KeelError::State("cluster ID was never loaded".to_string()));
        }
        Ok(())
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        let Some(ref id) = config.id else {
            return Err(KeelError::State("cluster ID was never loaded".to_string()));
        };
        let mut state = ClusterState::new(&config.name);
        state.id = id.clone();
        self.store.save(&state)
    }
}

/// Forgets a cluster after a successful reset
pub struct RemoveState {
    store: StateStore,
}

impl RemoveState {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Phase for RemoveState {
    fn title(&self) -> String {
        "Remove local state".to_string()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        self.store.remove(&config.name)?;
        config.id = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Role;
    use crate::phase::Manager;
    use crate::testing::{cluster, mock_host, MockConfigurer};
    use tempfile::TempDir;

    fn config() -> ClusterConfig {
        cluster(vec![mock_host("cp0", Role::ControlPlane, MockConfigurer::new())])
    }

    async fn load_and_save(store: &StateStore) -> Option<String> {
        let mut m = Manager::new(config());
        m.add_phase(LoadState::new(store.clone()));
        m.add_phase(SaveState::new(store.clone()));
        m.run().await.unwrap();
        m.config().id.clone()
    }

    #[tokio::test]
    async fn test_id_is_stable_across_runs() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());

        let first = load_and_save(&store).await;
        let second = load_and_save(&store).await;
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_remove_forgets_the_cluster() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        let first = load_and_save(&store).await;

        let mut m = Manager::new(config());
        m.add_phase(RemoveState::new(store.clone()));
        m.run().await.unwrap();

        assert!(store.load("test").unwrap().is_none());
        assert_ne!(load_and_save(&store).await, first);
    }

    #[tokio::test]
    async fn test_save_requires_loaded_id() {
        let tmp = TempDir::new().unwrap();
        let mut m = Manager::new(config());
        m.add_phase(SaveState::new(StateStore::new(tmp.path())));
        assert!(m.run().await.is_err());
    }
}
