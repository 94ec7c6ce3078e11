//! Install/upgrade reconciliation
//!
//! Compares what a host runs with what the cluster wants, refuses unsafe
//! version changes, applies only when needed, and re-reads the host
//! afterwards to make sure the change actually landed.

use crate::config::{Component, Flags};
use crate::error::{KeelError, Result};
use crate::host::Host;
use crate::version::Version;

/// What to do about a component on a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Already at the target version
    Skip,
    /// Install or upgrade, with a warning to log first
    Apply { warning: Option<String> },
}

/// Result of reconciling a component on a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Installed(Version),
    Upgraded { from: Version, to: Version },
}

/// Decide how to converge `installed` to `target`.
///
/// Downgrades are always rejected. Jumping more than one minor version
/// within a major is rejected unless `force` is set, in which case it is
/// only warned about. With `force`, a matching version is applied again.
pub fn plan(
    component: Component,
    installed: Option<&Version>,
    target: &Version,
    force: bool,
) -> Result<Plan> {
    let installed = match installed {
        Some(v) => v,
        None => return Ok(Plan::Apply { warning: None }),
    };

    if target < installed {
        return Err(KeelError::DowngradeNotSupported {
            installed: installed.to_string(),
            target: target.to_string(),
        });
    }

    if target == installed {
        return Ok(if force {
            Plan::Apply {
                warning: Some(format!(
                    "{} {} is already installed, reinstalling because of --force",
                    component, installed
                )),
            }
        } else {
            Plan::Skip
        });
    }

    if let Some(distance) = installed.minor_distance(target) {
        if distance > 1 {
            let required = installed.next_minor();
            if !force {
                return Err(KeelError::VersionSkipNotSupported {
                    installed: installed.to_string(),
                    target: target.to_string(),
                    required,
                });
            }
            return Ok(Plan::Apply {
                warning: Some(format!(
                    "upgrading {} from {} to {} skips {}, continuing because of --force",
                    component, installed, target, required
                )),
            });
        }
    }

    Ok(Plan::Apply { warning: None })
}

/// Bring `component` on `host` to `target`.
///
/// Uses the host's gathered facts as the installed version. After applying,
/// the version is read back from the host and must equal `target`; the host
/// facts are updated with whatever was read.
pub async fn reconcile(
    host: &Host,
    component: Component,
    target: &Version,
    flags: &Flags,
    force: bool,
) -> Result<Outcome> {
    let installed = host.installed_version(component);

    match plan(component, installed.as_ref(), target, force)? {
        Plan::Skip => {
            tracing::info!("{}: {} {} already installed", host, component, target);
            return Ok(Outcome::Unchanged);
        }
        Plan::Apply { warning: Some(w) } => tracing::warn!("{}: {}", host, w),
        Plan::Apply { warning: None } => {}
    }

    match installed {
        Some(ref from) => tracing::info!("{}: upgrading {} {} -> {}", host, component, from, target),
        None => tracing::info!("{}: installing {} {}", host, component, target),
    }

    host.configurer().apply(component, target, flags).await?;

    let actual = host.configurer().installed_version(component).await?;
    host.set_installed_version(component, actual.clone());

    match actual {
        Some(ref v) if v == target => {}
        other => {
            return Err(KeelError::VerificationFailed {
                component: component.to_string(),
                expected: target.to_string(),
                actual: other
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            })
        }
    }

    Ok(match installed {
        Some(from) => Outcome::Upgraded {
            from,
            to: target.clone(),
        },
        None => Outcome::Installed(target.clone()),
    })
}

/// A component version hosts should converge to
#[derive(Debug, Clone)]
pub struct Target {
    pub component: Component,
    pub version: Version,
    pub flags: Flags,
    pub force: bool,
}

impl Target {
    pub fn new(component: Component, version: Version, flags: Flags, force: bool) -> Self {
        Self {
            component,
            version,
            flags,
            force,
        }
    }

    /// [`reconcile`] `host` to this target
    pub async fn reconcile(&self, host: &Host) -> Result<Outcome> {
        reconcile(host, self.component, &self.version, &self.flags, self.force).await
    }
}
