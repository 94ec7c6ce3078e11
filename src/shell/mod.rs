//! Shell-driven configurer
//!
//! Talks to hosts by running commands, either through a local `sh` or the
//! system `ssh` client. All product-specific command text lives in
//! [`commands`].

pub mod commands;
pub mod runner;

pub use commands::Products;
pub use runner::Runner;

use crate::config::{ClusterSpec, Component, Flags, HostSpec};
use crate::error::{KeelError, Result};
use crate::host::{Configurer, ConfigurerFactory, Role};
use crate::version::Version;
use async_trait::async_trait;
use runner::quote;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ShellConfigurer {
    runner: Runner,
    products: Arc<Products>,
}

impl ShellConfigurer {
    pub fn new(runner: Runner, products: Arc<Products>) -> Self {
        Self { runner, products }
    }

    async fn probe(&self, cmd: &str) -> Result<bool> {
        Ok(commands::affirmative(&self.runner.run(cmd).await?))
    }
}

#[async_trait]
impl Configurer for ShellConfigurer {
    async fn connect(&self) -> Result<()> {
        self.runner.open().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.runner.close().await
    }

    async fn exec(&self, cmd: &str) -> Result<String> {
        self.runner.run(cmd).await
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.runner
            .run_with_input(&commands::write_file(path), Some(content))
            .await
            .map(|_| ())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.runner.run(&format!("cat {}", quote(path))).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.runner
            .run(&format!("rm -f {}", quote(path)))
            .await
            .map(|_| ())
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        self.probe(&commands::file_exists(path)).await
    }

    async fn http_status(&self, url: &str) -> Result<u16> {
        let out = self.runner.run(&commands::http_status(url)).await?;
        let out = out.trim();
        out.parse()
            .map_err(|_| KeelError::Command(format!("unexpected HTTP status '{}' from {}", out, url)))
    }

    async fn is_containerized(&self) -> Result<bool> {
        self.probe(commands::CONTAINERIZED).await
    }

    async fn needs_environment_fix(&self, env: &BTreeMap<String, String>) -> Result<bool> {
        if !self.file_exists(commands::ENVIRONMENT_FILE).await? {
            return Ok(!env.is_empty());
        }
        let current =
            commands::parse_environment(&self.read_file(commands::ENVIRONMENT_FILE).await?);
        Ok(env.iter().any(|(k, v)| current.get(k) != Some(v)))
    }

    async fn fix_environment(&self, env: &BTreeMap<String, String>) -> Result<()> {
        let current = if self.file_exists(commands::ENVIRONMENT_FILE).await? {
            commands::parse_environment(&self.read_file(commands::ENVIRONMENT_FILE).await?)
        } else {
            BTreeMap::new()
        };
        let content = commands::render_environment(&current, env);
        self.write_file(commands::ENVIRONMENT_FILE, &content).await
    }

    async fn resolve_os(&self) -> Result<String> {
        if !self.file_exists(commands::OS_RELEASE).await? {
            return Err(KeelError::UnsupportedHost("unknown OS".to_string()));
        }
        commands::parse_os_release(&self.read_file(commands::OS_RELEASE).await?)
    }

    async fn hostname(&self) -> Result<String> {
        Ok(self.runner.run(commands::HOSTNAME).await?.trim().to_string())
    }

    async fn internal_address(&self) -> Result<String> {
        let out = self.runner.run(commands::INTERNAL_ADDRESS).await?;
        out.split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| KeelError::Command("host reported no addresses".to_string()))
    }

    async fn installed_version(&self, component: Component) -> Result<Option<Version>> {
        commands::parse_version(&self.runner.run(&commands::version(component)).await?)
    }

    async fn restart_required(&self) -> Result<bool> {
        self.file_exists(commands::RESTART_MARKER).await
    }

    async fn apply(&self, component: Component, version: &Version, flags: &Flags) -> Result<()> {
        let upgrade = self.installed_version(component).await?.is_some();
        let cmd = self.products.apply(component, version, flags, upgrade);
        self.runner.run(&cmd).await.map(|_| ())
    }

    async fn restart(&self, component: Component) -> Result<()> {
        self.runner
            .run(&commands::restart(component))
            .await
            .map(|_| ())
    }

    async fn uninstall(&self, component: Component) -> Result<()> {
        let Some(installed) = self.installed_version(component).await? else {
            return Ok(());
        };
        self.runner
            .run(&self.products.uninstall(component, &installed))
            .await
            .map(|_| ())
    }

    async fn healthy(&self, component: Component) -> Result<bool> {
        match commands::health_url(component) {
            Some(url) => Ok(self.http_status(url).await? == 200),
            None => self.probe(commands::RUNTIME_INFO).await,
        }
    }

    async fn join(&self, role: Role, leader: &str, token: &str) -> Result<()> {
        self.runner
            .run_with_input(&self.products.join(role, leader), Some(token))
            .await
            .map(|_| ())
    }

    async fn issue_join_token(&self, role: Role) -> Result<String> {
        let token = self.runner.run(&commands::join_token(role)).await?;
        Ok(token.trim().to_string())
    }

    async fn cluster_id(&self) -> Result<String> {
        let id = self.runner.run(commands::CLUSTER_ID).await?;
        Ok(id.trim().to_string())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.runner.run(&commands::pull(image)).await.map(|_| ())
    }
}

/// Builds a [`ShellConfigurer`] per host entry
pub struct ShellConfigurerFactory {
    products: Arc<Products>,
    control_dir: PathBuf,
}

impl ShellConfigurerFactory {
    /// Factory for `spec`; ssh control sockets are kept under `state_dir`
    pub fn new(spec: &ClusterSpec, state_dir: &Path) -> Self {
        Self {
            products: Arc::new(Products::from_spec(spec)),
            control_dir: state_dir.join("ssh"),
        }
    }
}

impl ConfigurerFactory for ShellConfigurerFactory {
    fn configurer(&self, host: &HostSpec) -> Result<Arc<dyn Configurer>> {
        let runner = match (&host.ssh, &host.localhost) {
            (Some(ssh), _) => Runner::ssh(ssh, &self.control_dir),
            (None, Some(local)) if local.enabled => Runner::local(),
            _ => {
                return Err(KeelError::InvalidConfig(format!(
                    "host {} has no usable connection",
                    host.address()
                )))
            }
        };
        Ok(Arc::new(ShellConfigurer::new(runner, Arc::clone(&self.products))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, ClusterParser};
    use tempfile::TempDir;

    const DOCUMENT: &str = r#"
name: lab
hosts:
  - role: control-plane
    localhost: {}
control_plane:
  version: 3.7.0
runtime:
  version: 23.0.7
"#;

    fn local() -> ShellConfigurer {
        let spec = ClusterParser::parse_str(DOCUMENT).unwrap();
        ShellConfigurer::new(Runner::local(), Arc::new(Products::from_spec(&spec)))
    }

    #[tokio::test]
    async fn test_file_operations() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub/file.txt");
        let path = path.to_str().unwrap();
        let c = local();

        assert!(!c.file_exists(path).await.unwrap());
        c.write_file(path, "it's here\n").await.unwrap();
        assert!(c.file_exists(path).await.unwrap());
        assert_eq!(c.read_file(path).await.unwrap(), "it's here\n");
        c.delete_file(path).await.unwrap();
        assert!(!c.file_exists(path).await.unwrap());
    }

    #[tokio::test]
    async fn test_exec_reports_failure() {
        let c = local();
        assert_eq!(c.exec("printf ok").await.unwrap(), "ok");
        assert!(matches!(
            c.exec("exit 7").await,
            Err(KeelError::Command(_))
        ));
    }

    #[test]
    fn test_factory_builds_every_host() {
        let tmp = TempDir::new().unwrap();
        let spec = ClusterParser::parse_str(DOCUMENT).unwrap();
        let factory = ShellConfigurerFactory::new(&spec, tmp.path());

        let config = ClusterConfig::from_spec(spec, &factory).unwrap();
        assert_eq!(config.hosts.len(), 1);
        assert_eq!(config.hosts[0].address(), "localhost");
    }
}
