//! Fan-out executor for per-host work
//!
//! Every host gets its own tokio task. A semaphore caps how many of them run
//! at once when a width is set; errors are collected under a lock while the
//! tasks run and only read once all of them have been joined.

use crate::error::{AggregateError, KeelError, Result};
use crate::host::{Host, HostSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Runs a function against every host of a set concurrently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executor {
    width: Option<usize>,
}

impl Executor {
    /// One task per host, all running at once
    pub fn unbounded() -> Self {
        Self { width: None }
    }

    /// At most `width` hosts in flight; a width of zero is treated as one
    pub fn bounded(width: usize) -> Self {
        Self {
            width: Some(width.max(1)),
        }
    }

    pub fn width(&self) -> Option<usize> {
        self.width
    }

    /// Run `f` for every host and wait for all of them.
    ///
    /// A failing host does not stop its siblings. Returns `Ok` only when
    /// every host succeeded; otherwise every failure, attributed to its host.
    pub async fn run<F, Fut>(&self, hosts: &HostSet, f: F) -> Result<()>
    where
        F: Fn(Arc<Host>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if hosts.is_empty() {
            return Ok(());
        }

        let f = Arc::new(f);
        let semaphore = self.width.map(|w| Arc::new(Semaphore::new(w)));
        let errors = Arc::new(Mutex::new(AggregateError::new()));
        let mut set = JoinSet::new();

        for host in hosts.iter() {
            let host = Arc::clone(host);
            let f = Arc::clone(&f);
            let semaphore = semaphore.clone();
            let errors = Arc::clone(&errors);

            set.spawn(async move {
                // Hold the permit until the host's work is done
                let _permit = match semaphore {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            push(&errors, KeelError::Internal(e.to_string()).on_host(host.address()));
                            return;
                        }
                    },
                    None => None,
                };

                if let Err(e) = (*f)(Arc::clone(&host)).await {
                    push(&errors, attribute(e, &host));
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                push(&errors, KeelError::Internal(format!("host task aborted: {}", e)));
            }
        }

        let collected = {
            let mut guard = errors.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        collected.into_result()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::unbounded()
    }
}

fn push(errors: &Mutex<AggregateError>, err: KeelError) {
    errors.lock().unwrap_or_else(PoisonError::into_inner).push(err);
}

/// Attach the host to an error unless it already names one
pub(crate) fn attribute(err: KeelError, host: &Host) -> KeelError {
    match err {
        KeelError::Host { .. } => err,
        other => other.on_host(host.address()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Role;
    use crate::testing::{mock_host, Gauge, MockConfigurer};
    use std::time::Duration;

    fn hosts(n: usize) -> HostSet {
        HostSet::new(
            (0..n)
                .map(|i| mock_host(&format!("10.0.0.{}", i), Role::Worker, MockConfigurer::new()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let set = hosts(5);
        let result = Executor::unbounded().run(&set, |_| async { Ok(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_every_failure_is_reported() {
        let set = hosts(6);
        let result = Executor::unbounded()
            .run(&set, |h| async move {
                let last: u32 = h.address().rsplit('.').next().unwrap().parse().unwrap();
                if last % 2 == 0 {
                    Err(KeelError::Command(format!("boom {}", last)))
                } else {
                    Ok(())
                }
            })
            .await;

        match result {
            Err(KeelError::Aggregate(agg)) => {
                assert_eq!(agg.len(), 3);
                let rendered = agg.to_string();
                for addr in ["10.0.0.0", "10.0.0.2", "10.0.0.4"] {
                    assert!(rendered.contains(addr), "missing {} in {}", addr, rendered);
                }
            }
            other => panic!("expected aggregate error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_failure_is_attributed() {
        let set = hosts(3);
        let result = Executor::unbounded()
            .run(&set, |h| async move {
                if h.address() == "10.0.0.1" {
                    Err(KeelError::Command("exit 1".to_string()))
                } else {
                    Ok(())
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "10.0.0.1: Command failed: exit 1");
    }

    #[tokio::test]
    async fn test_bounded_width_is_respected() {
        let set = hosts(20);
        let gauge = Gauge::new();
        let g = gauge.clone();

        Executor::bounded(3)
            .run(&set, move |_| {
                let g = g.clone();
                async move {
                    let _guard = g.enter();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(gauge.max() <= 3);
        assert_eq!(gauge.total(), 20);
    }

    #[tokio::test]
    async fn test_unbounded_runs_concurrently() {
        let set = hosts(8);
        let gauge = Gauge::new();
        let g = gauge.clone();

        Executor::unbounded()
            .run(&set, move |_| {
                let g = g.clone();
                async move {
                    let _guard = g.enter();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(gauge.max() > 1);
    }

    #[test]
    fn test_zero_width_becomes_one() {
        assert_eq!(Executor::bounded(0).width(), Some(1));
    }
}
