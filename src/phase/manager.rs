//! Phase pipeline manager

use super::{CleanupPolicy, Phase};
use crate::config::ClusterConfig;
use crate::error::{AggregateError, KeelError, Result};
use crate::telemetry::{NoopTelemetry, Telemetry};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a phase ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// `should_run` returned false
    Skipped,
    Succeeded,
    /// Failed with the given message
    Failed(String),
}

/// Outcome of one phase
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub title: String,
    pub outcome: PhaseOutcome,
    pub duration: Duration,
}

/// Outcome of every phase the manager reached, in order
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    fn push(&mut self, title: &str, outcome: PhaseOutcome, duration: Duration) {
        self.phases.push(PhaseReport {
            title: title.to_string(),
            outcome,
            duration,
        });
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| *o == PhaseOutcome::Succeeded)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| *o == PhaseOutcome::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PhaseOutcome::Failed(_)))
    }

    fn count<P: Fn(&PhaseOutcome) -> bool>(&self, pred: P) -> usize {
        self.phases.iter().filter(|p| pred(&p.outcome)).count()
    }

    pub fn total_duration(&self) -> Duration {
        self.phases.iter().map(|p| p.duration).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for phase in &self.phases {
            match phase.outcome {
                PhaseOutcome::Skipped => writeln!(f, "  - {} (skipped)", phase.title)?,
                PhaseOutcome::Succeeded => {
                    writeln!(f, "  ✓ {} ({:.1}s)", phase.title, phase.duration.as_secs_f64())?
                }
                PhaseOutcome::Failed(ref msg) => writeln!(f, "  ✗ {}: {}", phase.title, msg)?,
            }
        }
        write!(
            f,
            "{} succeeded, {} skipped, {} failed in {:.1}s",
            self.succeeded(),
            self.skipped(),
            self.failed(),
            self.total_duration().as_secs_f64()
        )
    }
}

/// Runs an ordered list of phases against one cluster config.
///
/// A manager performs a single run; calling [`Manager::run`] again returns
/// [`KeelError::AlreadyRun`].
pub struct Manager {
    config: ClusterConfig,
    phases: Vec<Box<dyn Phase>>,
    ignore_errors: bool,
    skip_cleanup: bool,
    telemetry: Arc<dyn Telemetry>,
    report: RunReport,
    ran: bool,
}

impl Manager {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            phases: Vec::new(),
            ignore_errors: false,
            skip_cleanup: false,
            telemetry: Arc::new(NoopTelemetry),
            report: RunReport::default(),
            ran: false,
        }
    }

    /// Keep going after a failed phase
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    /// Never run phase cleanup
    pub fn skip_cleanup(mut self, skip: bool) -> Self {
        self.skip_cleanup = skip;
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn add_phase<P: Phase + 'static>(&mut self, phase: P) {
        self.phases.push(Box::new(phase));
    }

    /// Titles of the registered phases in run order
    pub fn titles(&self) -> Vec<String> {
        self.phases.iter().map(|p| p.title()).collect()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Run every phase in order.
    ///
    /// A failed phase is cleaned up (unless cleanup is disabled) and aborts
    /// the run, or with `ignore_errors` is recorded while the run carries on.
    /// Phases with [`CleanupPolicy::Always`] that succeeded are cleaned up in
    /// reverse order once the run ends, whichever way it ends.
    pub async fn run(&mut self) -> Result<()> {
        if self.ran {
            return Err(KeelError::AlreadyRun);
        }
        self.ran = true;

        let mut phases = std::mem::take(&mut self.phases);
        let mut deferred = Vec::new();
        let mut failures = AggregateError::new();
        let mut aborted = None;

        for (index, phase) in phases.iter_mut().enumerate() {
            let title = phase.title();

            if let Err(e) = phase.prepare(&self.config) {
                tracing::error!("{}: {}", title, e);
                self.report
                    .push(&title, PhaseOutcome::Failed(e.to_string()), Duration::ZERO);
                let err = phase_error(&title, e);
                if self.ignore_errors {
                    failures.push(err);
                    continue;
                }
                aborted = Some(err);
                break;
            }

            if !phase.should_run() {
                tracing::debug!("Skipping phase: {}", title);
                self.report.push(&title, PhaseOutcome::Skipped, Duration::ZERO);
                continue;
            }

            tracing::info!("==> {}", title);
            let start = Instant::now();
            let result = phase.run(&mut self.config).await;
            let duration = start.elapsed();

            let mut props = phase.properties();
            props.insert("duration".to_string(), duration.as_secs_f64().into());
            props.insert("success".to_string(), result.is_ok().into());
            self.telemetry.record_event(&title, &props);

            match result {
                Ok(()) => {
                    self.report.push(&title, PhaseOutcome::Succeeded, duration);
                    if phase.cleanup_policy() == CleanupPolicy::Always {
                        deferred.push(index);
                    }
                }
                Err(e) => {
                    tracing::error!("{} failed: {}", title, e);
                    self.report
                        .push(&title, PhaseOutcome::Failed(e.to_string()), duration);
                    if !self.skip_cleanup {
                        cleanup(phase.as_mut(), &title).await;
                    }
                    let err = phase_error(&title, e);
                    if self.ignore_errors {
                        failures.push(err);
                        continue;
                    }
                    aborted = Some(err);
                    break;
                }
            }
        }

        if !self.skip_cleanup {
            for index in deferred.into_iter().rev() {
                let phase = phases[index].as_mut();
                let title = phase.title();
                cleanup(phase, &title).await;
            }
        }

        self.phases = phases;

        if let Some(err) = aborted {
            return Err(err);
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(KeelError::PhasesFailed(failures))
        }
    }
}

fn phase_error(title: &str, source: KeelError) -> KeelError {
    KeelError::Phase {
        phase: title.to_string(),
        source: Box::new(source),
    }
}

async fn cleanup(phase: &mut dyn Phase, title: &str) {
    tracing::debug!("Cleaning up phase: {}", title);
    if let Err(e) = phase.cleanup().await {
        tracing::warn!("{}: cleanup failed: {}", title, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Role;
    use crate::telemetry::MemoryTelemetry;
    use crate::testing::{cluster, mock_host, MockConfigurer};
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Scripted {
        name: &'static str,
        log: Log,
        policy: CleanupPolicy,
        fail_prepare: bool,
        skip: bool,
        fail_run: bool,
        fail_cleanup: bool,
    }

    impl Scripted {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                policy: CleanupPolicy::OnFailure,
                fail_prepare: false,
                skip: false,
                fail_run: false,
                fail_cleanup: false,
            }
        }

        fn always(mut self) -> Self {
            self.policy = CleanupPolicy::Always;
            self
        }

        fn failing(mut self) -> Self {
            self.fail_run = true;
            self
        }

        fn log(&self, event: &str) {
            self.log.lock().unwrap().push(format!("{}:{}", event, self.name));
        }
    }

    #[async_trait]
    impl Phase for Scripted {
        fn title(&self) -> String {
            self.name.to_string()
        }

        fn cleanup_policy(&self) -> CleanupPolicy {
            self.policy
        }

        fn prepare(&mut self, _config: &ClusterConfig) -> Result<()> {
            self.log("prepare");
            if self.fail_prepare {
                return Err(KeelError::Precondition("not ready".to_string()));
            }
            Ok(())
        }

        fn should_run(&self) -> bool {
            !self.skip
        }

        async fn run(&mut self, _config: &mut ClusterConfig) -> Result<()> {
            self.log("run");
            if self.fail_run {
                return Err(KeelError::Command(format!("{} broke", self.name)));
            }
            Ok(())
        }

        async fn cleanup(&mut self) -> Result<()> {
            self.log("cleanup");
            if self.fail_cleanup {
                return Err(KeelError::Command("cleanup broke".to_string()));
            }
            Ok(())
        }
    }

    fn manager() -> Manager {
        Manager::new(cluster(vec![mock_host(
            "cp0",
            Role::ControlPlane,
            MockConfigurer::new(),
        )]))
    }

    fn events(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_abort_runs_only_failed_phase_cleanup() {
        let log = Log::default();
        let mut m = manager();
        m.add_phase(Scripted::new("a", &log));
        m.add_phase(Scripted::new("b", &log).failing());
        m.add_phase(Scripted::new("c", &log));

        let err = m.run().await.unwrap_err();
        assert_eq!(err.to_string(), "phase 'b' failed: Command failed: b broke");
        assert_eq!(
            events(&log),
            vec!["prepare:a", "run:a", "prepare:b", "run:b", "cleanup:b"]
        );
        assert_eq!(m.report().succeeded(), 1);
        assert_eq!(m.report().failed(), 1);
    }

    #[tokio::test]
    async fn test_successful_install_phase_is_not_cleaned_up() {
        let log = Log::default();
        let mut m = manager();
        m.add_phase(Scripted::new("a", &log));
        m.run().await.unwrap();
        assert!(!events(&log).contains(&"cleanup:a".to_string()));
    }

    #[tokio::test]
    async fn test_always_phases_cleaned_up_in_reverse_on_abort() {
        let log = Log::default();
        let mut m = manager();
        m.add_phase(Scripted::new("connect", &log).always());
        m.add_phase(Scripted::new("tunnel", &log).always());
        m.add_phase(Scripted::new("install", &log).failing());

        assert!(m.run().await.is_err());
        let events = events(&log);
        let tail: Vec<_> = events.iter().rev().take(3).rev().cloned().collect();
        assert_eq!(tail, vec!["cleanup:install", "cleanup:tunnel", "cleanup:connect"]);
    }

    #[tokio::test]
    async fn test_failed_always_phase_is_cleaned_up_once() {
        let log = Log::default();
        let mut m = manager().ignore_errors(true);
        m.add_phase(Scripted::new("connect", &log).always().failing());

        assert!(m.run().await.is_err());
        let cleanups = events(&log)
            .iter()
            .filter(|e| e.starts_with("cleanup"))
            .count();
        assert_eq!(cleanups, 1);
    }

    #[tokio::test]
    async fn test_ignore_errors_continues_and_reports_all() {
        let log = Log::default();
        let mut m = manager().ignore_errors(true);
        m.add_phase(Scripted::new("a", &log).failing());
        m.add_phase(Scripted::new("b", &log));
        m.add_phase(Scripted::new("c", &log).failing());

        let err = m.run().await.unwrap_err();
        match err {
            KeelError::PhasesFailed(ref agg) => assert_eq!(agg.len(), 2),
            ref other => panic!("unexpected {:?}", other),
        }
        let msg = err.to_string();
        assert!(msg.contains("a broke"));
        assert!(msg.contains("c broke"));
        assert!(events(&log).contains(&"run:b".to_string()));
    }

    #[tokio::test]
    async fn test_skip_cleanup() {
        let log = Log::default();
        let mut m = manager().skip_cleanup(true);
        m.add_phase(Scripted::new("connect", &log).always());
        m.add_phase(Scripted::new("b", &log).failing());

        assert!(m.run().await.is_err());
        assert!(!events(&log).iter().any(|e| e.starts_with("cleanup")));
    }

    #[tokio::test]
    async fn test_cleanup_error_does_not_replace_failure() {
        let log = Log::default();
        let mut m = manager();
        let mut phase = Scripted::new("b", &log).failing();
        phase.fail_cleanup = true;
        m.add_phase(phase);

        let err = m.run().await.unwrap_err();
        assert!(err.to_string().contains("b broke"));
    }

    #[tokio::test]
    async fn test_prepare_failure_skips_run_and_cleanup() {
        let log = Log::default();
        let mut m = manager();
        let mut phase = Scripted::new("a", &log);
        phase.fail_prepare = true;
        m.add_phase(phase);

        let err = m.run().await.unwrap_err();
        assert!(err.to_string().contains("not ready"));
        assert_eq!(events(&log), vec!["prepare:a"]);
    }

    #[tokio::test]
    async fn test_skipped_phase_and_telemetry() {
        let log = Log::default();
        let sink = Arc::new(MemoryTelemetry::new());
        let mut m = manager().telemetry(sink.clone());
        let mut skipped = Scripted::new("a", &log);
        skipped.skip = true;
        m.add_phase(skipped);
        m.add_phase(Scripted::new("b", &log));

        m.run().await.unwrap();
        assert_eq!(events(&log), vec!["prepare:a", "prepare:b", "run:b"]);
        assert_eq!(m.report().skipped(), 1);

        let recorded = sink.events();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "b");
        assert_eq!(recorded[0].1["success"], serde_json::json!(true));
        assert!(recorded[0].1.contains_key("duration"));
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let log = Log::default();
        let mut m = manager();
        m.add_phase(Scripted::new("a", &log));
        m.run().await.unwrap();

        assert!(matches!(m.run().await, Err(KeelError::AlreadyRun)));
        assert_eq!(events(&log).len(), 2);
    }
}
