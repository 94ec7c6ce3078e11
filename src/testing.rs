//! Test doubles shared by unit tests

use crate::config::{ClusterConfig, Component, ControlPlaneConfig, Flags, RuntimeConfig};
use crate::error::{KeelError, Result};
use crate::host::{Configurer, Host, Role};
use crate::version::Version;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CONTROL_PLANE_VERSION: &str = "3.7.0";
pub const RUNTIME_VERSION: &str = "23.0.7";

/// Tracks how many guarded sections are running at once
#[derive(Clone, Default)]
pub struct Gauge {
    inner: Arc<GaugeInner>,
}

#[derive(Default)]
struct GaugeInner {
    current: AtomicUsize,
    max: AtomicUsize,
    total: AtomicUsize,
}

pub struct GaugeGuard {
    inner: Arc<GaugeInner>,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> GaugeGuard {
        let now = self.inner.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max.fetch_max(now, Ordering::SeqCst);
        self.inner.total.fetch_add(1, Ordering::SeqCst);
        GaugeGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Highest number of sections seen in flight together
    pub fn max(&self) -> usize {
        self.inner.max.load(Ordering::SeqCst)
    }

    /// Sections entered so far
    pub fn total(&self) -> usize {
        self.inner.total.load(Ordering::SeqCst)
    }
}

/// Call log shared by several mocks, for checking cross-host ordering
pub type Journal = Arc<Mutex<Vec<String>>>;

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.inner.current.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockState {
    versions: HashMap<Component, Version>,
    stuck: HashSet<Component>,
    failing: HashSet<String>,
    unhealthy_remaining: u32,
    os: Option<String>,
    hostname: Option<String>,
    restart_required: bool,
    needs_env_fix: bool,
    join_version: Version,
    delay: Duration,
    gauge: Option<Gauge>,
    files: HashMap<String, String>,
    journal: Option<(Journal, String)>,
}

/// Scriptable in-memory host
#[derive(Clone)]
pub struct MockConfigurer {
    state: Arc<Mutex<MockState>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockConfigurer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                versions: HashMap::new(),
                stuck: HashSet::new(),
                failing: HashSet::new(),
                unhealthy_remaining: 0,
                os: Some("ubuntu".to_string()),
                hostname: None,
                restart_required: false,
                needs_env_fix: false,
                join_version: Version::parse(CONTROL_PLANE_VERSION).unwrap(),
                delay: Duration::ZERO,
                gauge: None,
                files: HashMap::new(),
                journal: None,
            })),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_state<F: FnOnce(&mut MockState)>(self, f: F) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_version(self, component: Component, version: &str) -> Self {
        let version = Version::parse(version).unwrap();
        self.with_state(|s| {
            s.versions.insert(component, version);
        })
    }

    /// `apply` succeeds without changing the installed version
    pub fn stuck(self, component: Component) -> Self {
        self.with_state(|s| {
            s.stuck.insert(component);
        })
    }

    /// Calls with this label fail
    pub fn failing(self, label: &str) -> Self {
        let label = label.to_string();
        self.with_state(|s| {
            s.failing.insert(label);
        })
    }

    /// The first `n` health checks report unhealthy
    pub fn unhealthy_for(self, n: u32) -> Self {
        self.with_state(|s| s.unhealthy_remaining = n)
    }

    pub fn unsupported_os(self) -> Self {
        self.with_state(|s| s.os = None)
    }

    pub fn with_hostname(self, name: &str) -> Self {
        let name = name.to_string();
        self.with_state(|s| s.hostname = Some(name))
    }

    pub fn with_pending_restart(self) -> Self {
        self.with_state(|s| s.restart_required = true)
    }

    pub fn with_env_fix(self) -> Self {
        self.with_state(|s| s.needs_env_fix = true)
    }

    pub fn joins_as(self, version: &str) -> Self {
        let version = Version::parse(version).unwrap();
        self.with_state(|s| s.join_version = version)
    }

    /// Mutating operations take `delay` and are tracked by `gauge`
    pub fn tracked(self, gauge: &Gauge, delay: Duration) -> Self {
        let gauge = gauge.clone();
        self.with_state(|s| {
            s.gauge = Some(gauge);
            s.delay = delay;
        })
    }

    /// Also log every call as `name:label` into `journal`
    pub fn journaled(self, journal: &Journal, name: &str) -> Self {
        let entry = (Arc::clone(journal), name.to_string());
        self.with_state(|s| s.journal = Some(entry))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == label).count()
    }

    pub fn version(&self, component: Component) -> Option<Version> {
        self.state.lock().unwrap().versions.get(&component).cloned()
    }

    fn call(&self, label: String) -> Result<()> {
        let failing = {
            let s = self.state.lock().unwrap();
            if let Some((ref journal, ref name)) = s.journal {
                journal.lock().unwrap().push(format!("{}:{}", name, label));
            }
            s.failing.contains(&label)
        };
        self.calls.lock().unwrap().push(label.clone());
        if failing {
            return Err(KeelError::Command(format!("{} failed", label)));
        }
        Ok(())
    }

    async fn mutate(&self, label: String) -> Result<()> {
        self.call(label)?;
        let (gauge, delay) = {
            let s = self.state.lock().unwrap();
            (s.gauge.clone(), s.delay)
        };
        let _guard = gauge.as_ref().map(|g| g.enter());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Configurer for MockConfigurer {
    async fn connect(&self) -> Result<()> {
        self.call("connect".to_string())
    }

    async fn disconnect(&self) -> Result<()> {
        self.call("disconnect".to_string())
    }

    async fn exec(&self, cmd: &str) -> Result<String> {
        self.call(format!("exec:{}", cmd))?;
        Ok(String::new())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.call(format!("write_file:{}", path))?;
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.call(format!("read_file:{}", path))?;
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| KeelError::Command(format!("cat {}: no such file", path)))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.call(format!("delete_file:{}", path))?;
        self.state.lock().unwrap().files.remove(path);
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        self.call(format!("file_exists:{}", path))?;
        Ok(self.state.lock().unwrap().files.contains_key(path))
    }

    async fn http_status(&self, url: &str) -> Result<u16> {
        self.call(format!("http_status:{}", url))?;
        Ok(200)
    }

    async fn is_containerized(&self) -> Result<bool> {
        self.call("is_containerized".to_string())?;
        Ok(false)
    }

    async fn needs_environment_fix(&self, _env: &BTreeMap<String, String>) -> Result<bool> {
        self.call("needs_environment_fix".to_string())?;
        Ok(self.state.lock().unwrap().needs_env_fix)
    }

    async fn fix_environment(&self, _env: &BTreeMap<String, String>) -> Result<()> {
        self.call("fix_environment".to_string())?;
        self.state.lock().unwrap().needs_env_fix = false;
        Ok(())
    }

    async fn resolve_os(&self) -> Result<String> {
        self.call("resolve_os".to_string())?;
        self.state
            .lock()
            .unwrap()
            .os
            .clone()
            .ok_or_else(|| KeelError::UnsupportedHost("unknown OS".to_string()))
    }

    async fn hostname(&self) -> Result<String> {
        self.call("hostname".to_string())?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .hostname
            .clone()
            .unwrap_or_else(|| "node".to_string()))
    }

    async fn internal_address(&self) -> Result<String> {
        self.call("internal_address".to_string())?;
        Ok("172.16.0.10".to_string())
    }

    async fn installed_version(&self, component: Component) -> Result<Option<Version>> {
        self.call(format!("version:{}", component))?;
        Ok(self.version(component))
    }

    async fn restart_required(&self) -> Result<bool> {
        self.call("restart_required".to_string())?;
        Ok(self.state.lock().unwrap().restart_required)
    }

    async fn apply(&self, component: Component, version: &Version, _flags: &Flags) -> Result<()> {
        self.mutate(format!("apply:{}", component)).await?;
        let mut s = self.state.lock().unwrap();
        if !s.stuck.contains(&component) {
            s.versions.insert(component, version.clone());
        }
        Ok(())
    }

    async fn restart(&self, component: Component) -> Result<()> {
        self.mutate(format!("restart:{}", component)).await?;
        if component == Component::Runtime {
            self.state.lock().unwrap().restart_required = false;
        }
        Ok(())
    }

    async fn uninstall(&self, component: Component) -> Result<()> {
        self.mutate(format!("uninstall:{}", component)).await?;
        self.state.lock().unwrap().versions.remove(&component);
        Ok(())
    }

    async fn healthy(&self, component: Component) -> Result<bool> {
        self.call(format!("healthy:{}", component))?;
        let mut s = self.state.lock().unwrap();
        if s.unhealthy_remaining > 0 {
            s.unhealthy_remaining -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    async fn join(&self, role: Role, _leader: &str, _token: &str) -> Result<()> {
        self.mutate(format!("join:{}", role)).await?;
        let mut s = self.state.lock().unwrap();
        let version = s.join_version.clone();
        s.versions.insert(Component::ControlPlane, version);
        Ok(())
    }

    async fn issue_join_token(&self, role: Role) -> Result<String> {
        self.call(format!("issue_join_token:{}", role))?;
        Ok(format!("token-{}", role))
    }

    async fn cluster_id(&self) -> Result<String> {
        self.call("cluster_id".to_string())?;
        Ok("cluster-1234".to_string())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.mutate(format!("pull_image:{}", image)).await
    }
}

pub fn mock_host(address: &str, role: Role, mock: MockConfigurer) -> Arc<Host> {
    Arc::new(Host::new(address, role, Arc::new(mock)))
}

/// Cluster with the default test versions
pub fn cluster(hosts: Vec<Arc<Host>>) -> ClusterConfig {
    ClusterConfig::new(
        "test",
        hosts,
        ControlPlaneConfig::new(Version::parse(CONTROL_PLANE_VERSION).unwrap()),
        RuntimeConfig::new(Version::parse(RUNTIME_VERSION).unwrap()),
    )
}
