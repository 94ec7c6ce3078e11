//! Per-host remote capability

use crate::config::{Component, Flags, HostSpec};
use crate::error::Result;
use crate::host::Role;
use crate::version::Version;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything the engine can ask of a remote host.
///
/// Implementations own the session and the OS-specific command templates;
/// the engine treats every method as an opaque remote operation.
#[async_trait]
pub trait Configurer: Send + Sync {
    /// Open the session
    async fn connect(&self) -> Result<()>;

    /// Close the session
    async fn disconnect(&self) -> Result<()>;

    /// Run a command and capture its output
    async fn exec(&self, cmd: &str) -> Result<String>;

    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<String>;

    async fn delete_file(&self, path: &str) -> Result<()>;

    async fn file_exists(&self, path: &str) -> Result<bool>;

    /// HTTP status of `url` as seen from the host
    async fn http_status(&self, url: &str) -> Result<u16>;

    /// The host is running inside a container
    async fn is_containerized(&self) -> Result<bool>;

    /// The host environment is missing some of `env`
    async fn needs_environment_fix(&self, env: &BTreeMap<String, String>) -> Result<bool>;

    /// Persist `env` on the host
    async fn fix_environment(&self, env: &BTreeMap<String, String>) -> Result<()>;

    /// Identify the OS; fails with `UnsupportedHost` when it can't be managed
    async fn resolve_os(&self) -> Result<String>;

    async fn hostname(&self) -> Result<String>;

    async fn internal_address(&self) -> Result<String>;

    /// Currently installed version of a component, `None` when absent
    async fn installed_version(&self, component: Component) -> Result<Option<Version>>;

    /// The runtime has a pending restart
    async fn restart_required(&self) -> Result<bool>;

    /// Install or upgrade a component to `version`
    async fn apply(&self, component: Component, version: &Version, flags: &Flags) -> Result<()>;

    async fn restart(&self, component: Component) -> Result<()>;

    async fn uninstall(&self, component: Component) -> Result<()>;

    /// Local health check of a component
    async fn healthy(&self, component: Component) -> Result<bool>;

    /// Join the host to the control plane led by `leader`
    async fn join(&self, role: Role, leader: &str, token: &str) -> Result<()>;

    /// Issue a join token for `role`; only meaningful on a control plane host
    async fn issue_join_token(&self, role: Role) -> Result<String>;

    /// Cluster ID from the running control plane
    async fn cluster_id(&self) -> Result<String>;

    async fn pull_image(&self, image: &str) -> Result<()>;
}

/// Creates the configurer for a host entry of the cluster document
pub trait ConfigurerFactory {
    fn configurer(&self, host: &HostSpec) -> Result<Arc<dyn Configurer>>;
}
