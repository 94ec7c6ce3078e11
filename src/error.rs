//! Error types for Keel

use std::fmt;
use thiserror::Error;

/// Result type for Keel operations
pub type Result<T> = std::result::Result<T, KeelError>;

/// Keel error types
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Unsupported host: {0}")]
    UnsupportedHost(String),

    #[error("{host}: {source}")]
    Host {
        host: String,
        #[source]
        source: Box<KeelError>,
    },

    #[error(transparent)]
    Aggregate(AggregateError),

    #[error("phase '{phase}' failed: {source}")]
    Phase {
        phase: String,
        #[source]
        source: Box<KeelError>,
    },

    #[error("one or more phases failed:\n{0}")]
    PhasesFailed(AggregateError),

    #[error("downgrade from {installed} to {target} is not supported")]
    DowngradeNotSupported { installed: String, target: String },

    #[error(
        "upgrade from {installed} to {target} skips a minor version, install {required} first"
    )]
    VersionSkipNotSupported {
        installed: String,
        target: String,
        required: String,
    },

    #[error("{component} reported version {actual} after apply, expected {expected}")]
    VerificationFailed {
        component: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("State error: {0}")]
    State(String),

    #[error("pipeline has already been run")]
    AlreadyRun,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeelError {
    /// Attribute an error to a host
    pub fn on_host(self, host: impl Into<String>) -> Self {
        KeelError::Host {
            host: host.into(),
            source: Box::new(self),
        }
    }

    /// Whether retrying the failed operation can change the outcome.
    ///
    /// Policy violations and configuration problems are deterministic and
    /// are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            KeelError::DowngradeNotSupported { .. }
            | KeelError::VersionSkipNotSupported { .. }
            | KeelError::VerificationFailed { .. }
            | KeelError::InvalidVersion(_)
            | KeelError::Precondition(_)
            | KeelError::InvalidConfig(_)
            | KeelError::ConfigParse(_)
            | KeelError::UnsupportedHost(_)
            | KeelError::AlreadyRun => false,
            KeelError::Host { source, .. } | KeelError::Phase { source, .. } => {
                source.is_retryable()
            }
            KeelError::Aggregate(agg) | KeelError::PhasesFailed(agg) => {
                agg.errors().iter().all(KeelError::is_retryable)
            }
            _ => true,
        }
    }

    /// Remediation hint for errors that have an obvious fix
    pub fn hint(&self) -> Option<String> {
        match self {
            KeelError::VersionSkipNotSupported { required, .. } => Some(format!(
                "upgrade to {} first, or pass --force to attempt the upgrade anyway",
                required
            )),
            KeelError::DowngradeNotSupported { installed, .. } => Some(format!(
                "set the target version to {} or newer",
                installed
            )),
            KeelError::Host { source, .. } | KeelError::Phase { source, .. } => source.hint(),
            KeelError::Aggregate(agg) | KeelError::PhasesFailed(agg) => {
                agg.errors().iter().find_map(KeelError::hint)
            }
            _ => None,
        }
    }
}

/// A join of zero or more errors, typically one per failing host.
///
/// Every constituent message is rendered, one per line.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<KeelError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, err: KeelError) {
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[KeelError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse into a result: `Ok` when empty, the sole error when there is
    /// exactly one, an aggregate otherwise.
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(KeelError::Aggregate(self)),
        }
    }
}

impl From<Vec<KeelError>> for AggregateError {
    fn from(errors: Vec<KeelError>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "- {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
