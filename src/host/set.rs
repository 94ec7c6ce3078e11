//! Ordered views over hosts

use super::{Host, Role};
use crate::error::Result;
use crate::executor::Executor;
use std::future::Future;
use std::sync::Arc;

/// An ordered selection of hosts.
///
/// Holds shared handles only; filtering never copies a host.
#[derive(Debug, Clone, Default)]
pub struct HostSet {
    hosts: Vec<Arc<Host>>,
}

impl HostSet {
    pub fn new(hosts: Vec<Arc<Host>>) -> Self {
        Self { hosts }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Host>> {
        self.hosts.iter()
    }

    pub fn first(&self) -> Option<Arc<Host>> {
        self.hosts.first().cloned()
    }

    /// Hosts matching `pred`, in order
    pub fn filter<P: Fn(&Host) -> bool>(&self, pred: P) -> HostSet {
        HostSet::new(self.hosts.iter().filter(|h| pred(h)).cloned().collect())
    }

    /// First host matching `pred`
    pub fn find<P: Fn(&Host) -> bool>(&self, pred: P) -> Option<Arc<Host>> {
        self.hosts.iter().find(|h| pred(h)).cloned()
    }

    pub fn count<P: Fn(&Host) -> bool>(&self, pred: P) -> usize {
        self.hosts.iter().filter(|h| pred(h)).count()
    }

    pub fn with_role(&self, role: Role) -> HostSet {
        self.filter(|h| h.role() == role)
    }

    /// Split into (matching, rest), keeping relative order in both
    pub fn partition<P: Fn(&Host) -> bool>(&self, pred: P) -> (HostSet, HostSet) {
        let (yes, no): (Vec<_>, Vec<_>) = self.hosts.iter().cloned().partition(|h| pred(h));
        (HostSet::new(yes), HostSet::new(no))
    }

    /// Hosts that are not `host`
    pub fn without(&self, host: &Host) -> HostSet {
        self.filter(|h| h.address() != host.address())
    }

    pub fn addresses(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.address().to_string()).collect()
    }

    /// Run `f` on each host in order, stopping at the first error
    pub async fn each<F, Fut>(&self, f: F) -> Result<()>
    where
        F: Fn(Arc<Host>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        for host in &self.hosts {
            f(Arc::clone(host))
                .await
                .map_err(|e| crate::executor::attribute(e, host))?;
        }
        Ok(())
    }

    /// Run `f` on every host concurrently; see [`Executor::run`]
    pub async fn parallel_each<F, Fut>(&self, f: F) -> Result<()>
    where
        F: Fn(Arc<Host>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Executor::unbounded().run(self, f).await
    }

    /// Run `f` on every host with at most `width` in flight
    pub async fn parallel_each_bounded<F, Fut>(&self, width: usize, f: F) -> Result<()>
    where
        F: Fn(Arc<Host>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Executor::bounded(width).run(self, f).await
    }
}

impl<'a> IntoIterator for &'a HostSet {
    type Item = &'a Arc<Host>;
    type IntoIter = std::slice::Iter<'a, Arc<Host>>;

    fn into_iter(self) -> Self::IntoIter {
        self.hosts.iter()
    }
}

impl FromIterator<Arc<Host>> for HostSet {
    fn from_iter<I: IntoIterator<Item = Arc<Host>>>(iter: I) -> Self {
        HostSet::new(iter.into_iter().collect())
    }
}
