//! Capture runner: executes a snapshot plan against one browser session.
//!
//! Units run strictly one after another on the session's page. Each unit
//! ends in exactly one [`CaptureResult`]:
//!
//! - `Captured`: the page stabilized and the screenshot was taken
//! - `Retryable`: stability retries were exhausted, the page was captured
//!   anyway and the result is flagged as degraded
//! - `Failed`: a driver error (or cancellation) prevented the capture
//!
//! One unit's failure never stops the rest of the plan. Cancellation aborts
//! the in-flight unit, skips the remainder and returns what was gathered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config;
use crate::diff::{DiffSink, SnapshotMetadata, SubmissionError, SubmissionHandle};
use crate::driver::{DriverError, PageDriver, PixelArtifact};
use crate::plan::{CaptureUnit, SnapshotIdentifier, SnapshotPlan, Viewport};
use crate::session::Session;
use crate::stability::{self, StabilityConfig, StabilityOutcome};

/// Reason recorded for units aborted by cancellation or the run deadline
pub const CANCELLED_REASON: &str = "cancelled";

/// How often to retry a page that did not stabilize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds)
    pub backoff_base_ms: u64,
    /// Multiplier applied to the delay for each further retry
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        config::get().retry.clone()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base_ms: u64, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_base_ms,
            backoff_factor,
        }
    }

    /// Delay before retry number `retry` (1-based): `base * factor^(retry - 1)`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.backoff_base_ms as f64 * self.backoff_factor.max(1.0).powi(exponent);
        if millis.is_finite() {
            Duration::from_millis(millis.round() as u64)
        } else {
            Duration::from_millis(u64::MAX)
        }
    }

    /// Total attempts the policy allows per unit
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Whether diff submissions are awaited before the next unit starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    #[default]
    Await,
    /// Submit in the background; results are collected when the run ends
    FireAndForget,
}

/// Which results make a run fail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailOn {
    /// Only `Failed` results fail the run; degraded captures are warnings
    #[default]
    Failed,
    /// `Retryable` (degraded) results fail the run too
    Degraded,
}

/// Settings for one runner
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Base URL that route paths are joined onto
    pub base_url: String,
    pub stability: StabilityConfig,
    pub retry: RetryPolicy,
    pub submit_mode: SubmitMode,
    /// Abort the run once this much time has passed
    pub run_timeout: Option<Duration>,
    /// Store every capture in the fallback session, not only failed submissions
    pub keep_artifacts: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            base_url: config::base_url(),
            stability: StabilityConfig::default(),
            retry: RetryPolicy::default(),
            submit_mode: SubmitMode::default(),
            run_timeout: None,
            keep_artifacts: false,
        }
    }
}

/// Reference to a captured screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub identifier: SnapshotIdentifier,
    pub width: u32,
    pub height: u32,
    /// Size of the PNG in bytes
    pub bytes: usize,
    /// Local copy, when one was written
    pub local_path: Option<PathBuf>,
}

/// Terminal outcome of one capture unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureResult {
    Captured(ArtifactRef),
    /// Degraded: captured after stability retries ran out
    Retryable { artifact: ArtifactRef, reason: String },
    Failed { reason: String },
}

impl CaptureResult {
    pub fn artifact(&self) -> Option<&ArtifactRef> {
        match self {
            CaptureResult::Captured(artifact) | CaptureResult::Retryable { artifact, .. } => Some(artifact),
            CaptureResult::Failed { .. } => None,
        }
    }

    fn artifact_mut(&mut self) -> Option<&mut ArtifactRef> {
        match self {
            CaptureResult::Captured(artifact) | CaptureResult::Retryable { artifact, .. } => Some(artifact),
            CaptureResult::Failed { .. } => None,
        }
    }

    pub fn is_captured(&self) -> bool {
        matches!(self, CaptureResult::Captured(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, CaptureResult::Retryable { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CaptureResult::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            CaptureResult::Captured(_) => "captured",
            CaptureResult::Retryable { .. } => "degraded",
            CaptureResult::Failed { .. } => "failed",
        }
    }
}

/// What happened to the diff-service hand-off of a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Nothing was captured, so nothing was submitted
    NotAttempted,
    /// Submitted in the background and not yet collected
    Pending,
    Submitted { handle: SubmissionHandle },
    /// The diff service is disabled
    Skipped,
    Failed { reason: String },
}

/// Everything recorded about one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    /// Position in the full plan
    pub index: usize,
    pub identifier: SnapshotIdentifier,
    pub route_label: String,
    pub viewport: Viewport,
    /// Navigation + stability attempts made
    pub attempts: u32,
    pub result: CaptureResult,
    pub submission: SubmissionStatus,
    pub elapsed_ms: u64,
}

/// Results of one run, in plan order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Units in the plan this report covers
    pub planned: usize,
    /// The run was cancelled or hit its deadline
    pub cancelled: bool,
    pub units: Vec<UnitReport>,
}

/// Counts by result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub planned: usize,
    pub captured: usize,
    pub degraded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub submission_failures: usize,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            planned: self.planned,
            skipped: self.planned.saturating_sub(self.units.len()),
            ..Default::default()
        };
        for unit in &self.units {
            match unit.result {
                CaptureResult::Captured(_) => summary.captured += 1,
                CaptureResult::Retryable { .. } => summary.degraded += 1,
                CaptureResult::Failed { .. } => summary.failed += 1,
            }
            if matches!(unit.submission, SubmissionStatus::Failed { .. }) {
                summary.submission_failures += 1;
            }
        }
        summary
    }

    /// Whether the run passes under `fail_on`
    ///
    /// Units skipped by cancellation count as failures.
    pub fn passed(&self, fail_on: FailOn) -> bool {
        let summary = self.summary();
        let degraded_fails = fail_on == FailOn::Degraded && summary.degraded > 0;
        summary.failed == 0 && summary.skipped == 0 && !degraded_fails
    }

    /// Combine shard reports into one, ordered by plan position
    pub fn merge(reports: Vec<RunReport>) -> RunReport {
        let started_at = reports.iter().map(|r| r.started_at).min().unwrap_or_else(Utc::now);
        let finished_at = reports.iter().map(|r| r.finished_at).max().unwrap_or_else(Utc::now);
        let planned = reports.iter().map(|r| r.planned).sum();
        let cancelled = reports.iter().any(|r| r.cancelled);
        let mut units: Vec<UnitReport> = reports.into_iter().flat_map(|r| r.units).collect();
        units.sort_by_key(|u| u.index);
        RunReport {
            started_at,
            finished_at,
            planned,
            cancelled,
            units,
        }
    }
}

/// Executes snapshot plans
pub struct CaptureRunner {
    options: RunnerOptions,
    sink: Arc<dyn DiffSink>,
    fallback: Option<Arc<Session>>,
    cancel: CancellationToken,
}

/// Outcome of the navigate + stabilize loop for one unit
struct Prepared {
    attempts: u32,
    degraded: Option<String>,
}

/// Background submission result: (report position, status, local copy)
type SubmissionOutcome = (usize, SubmissionStatus, Option<PathBuf>);

impl CaptureRunner {
    pub fn new(options: RunnerOptions, sink: Arc<dyn DiffSink>) -> Self {
        Self {
            options,
            sink,
            fallback: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Local session that keeps screenshots the diff service did not take
    pub fn with_fallback(mut self, session: Arc<Session>) -> Self {
        self.fallback = Some(session);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts runs of this runner when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `plan` against `page`, one unit at a time, in plan order
    pub async fn run<P>(&self, plan: &SnapshotPlan, page: &mut P) -> RunReport
    where
        P: PageDriver + ?Sized,
    {
        let started_at = Utc::now();
        let deadline = self.options.run_timeout.map(|t| Instant::now() + t);
        let mut units: Vec<UnitReport> = Vec::with_capacity(plan.len());
        let mut background: JoinSet<SubmissionOutcome> = JoinSet::new();
        let mut cancelled = false;

        info!(units = plan.len(), source = page.source_type(), "starting capture run");

        for (position, unit) in plan.iter().enumerate() {
            if self.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d) {
                cancelled = true;
                break;
            }

            let unit_started = Instant::now();
            debug!(progress = %format!("{}/{}", position + 1, plan.len()), snapshot = %unit.identifier, "capturing");

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                _ = wait_for_deadline(deadline) => None,
                report = self.capture_unit(unit, page, units.len(), &mut background) => Some(report),
            };

            match outcome {
                Some(report) => {
                    log_unit(&report);
                    units.push(report);
                }
                None => {
                    warn!(snapshot = %unit.identifier, "run cancelled, skipping remaining units");
                    units.push(UnitReport {
                        index: unit.index,
                        identifier: unit.identifier.clone(),
                        route_label: unit.route.label.clone(),
                        viewport: unit.viewport.clone(),
                        attempts: 0,
                        result: CaptureResult::Failed {
                            reason: CANCELLED_REASON.to_string(),
                        },
                        submission: SubmissionStatus::NotAttempted,
                        elapsed_ms: unit_started.elapsed().as_millis() as u64,
                    });
                    cancelled = true;
                    break;
                }
            }
        }

        if cancelled {
            background.abort_all();
        }
        while let Some(joined) = background.join_next().await {
            match joined {
                Ok((position, status, local_path)) => {
                    if let Some(unit) = units.get_mut(position) {
                        unit.submission = status;
                        if let (Some(path), Some(artifact)) = (local_path, unit.result.artifact_mut()) {
                            artifact.local_path = Some(path);
                        }
                    }
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(error = %e, "background submission panicked"),
            }
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            planned: plan.len(),
            cancelled,
            units,
        };
        let summary = report.summary();
        info!(
            captured = summary.captured,
            degraded = summary.degraded,
            failed = summary.failed,
            skipped = summary.skipped,
            "capture run finished"
        );
        report
    }

    /// Capture one unit; driver errors become a `Failed` report
    async fn capture_unit<P>(
        &self,
        unit: &CaptureUnit,
        page: &mut P,
        position: usize,
        background: &mut JoinSet<SubmissionOutcome>,
    ) -> UnitReport
    where
        P: PageDriver + ?Sized,
    {
        let started = Instant::now();
        let mut report = UnitReport {
            index: unit.index,
            identifier: unit.identifier.clone(),
            route_label: unit.route.label.clone(),
            viewport: unit.viewport.clone(),
            attempts: 0,
            result: CaptureResult::Failed { reason: String::new() },
            submission: SubmissionStatus::NotAttempted,
            elapsed_ms: 0,
        };

        let url = unit.route.url(&self.options.base_url);
        let captured = self.prepare_and_capture(unit, &url, page, &mut report.attempts).await;

        match captured {
            Err(e) => {
                report.result = CaptureResult::Failed { reason: e.to_string() };
            }
            Ok((artifact, degraded)) => {
                let metadata = SnapshotMetadata {
                    route_label: unit.route.label.clone(),
                    url,
                    width: unit.viewport.width,
                    height: unit.viewport.height,
                    device: unit.viewport.label.clone(),
                    degraded: degraded.is_some(),
                    captured_at: Utc::now(),
                };

                let mut artifact_ref = ArtifactRef {
                    identifier: unit.identifier.clone(),
                    width: artifact.width,
                    height: artifact.height,
                    bytes: artifact.image_data.len(),
                    local_path: None,
                };
                if self.options.keep_artifacts {
                    artifact_ref.local_path = store_fallback(self.fallback.as_deref(), &unit.identifier, &artifact, &metadata);
                }

                match self.options.submit_mode {
                    SubmitMode::Await => {
                        let status = submission_status(self.sink.submit(&unit.identifier, &artifact, &metadata).await);
                        if artifact_ref.local_path.is_none() && !matches!(status, SubmissionStatus::Submitted { .. }) {
                            artifact_ref.local_path =
                                store_fallback(self.fallback.as_deref(), &unit.identifier, &artifact, &metadata);
                        }
                        report.submission = status;
                    }
                    SubmitMode::FireAndForget => {
                        let sink = Arc::clone(&self.sink);
                        let fallback = if artifact_ref.local_path.is_none() {
                            self.fallback.clone()
                        } else {
                            None
                        };
                        let identifier = unit.identifier.clone();
                        background.spawn(async move {
                            let status = submission_status(sink.submit(&identifier, &artifact, &metadata).await);
                            let local_path = if matches!(status, SubmissionStatus::Submitted { .. }) {
                                None
                            } else {
                                store_fallback(fallback.as_deref(), &identifier, &artifact, &metadata)
                            };
                            (position, status, local_path)
                        });
                        report.submission = SubmissionStatus::Pending;
                    }
                }

                report.result = match degraded {
                    None => CaptureResult::Captured(artifact_ref),
                    Some(reason) => CaptureResult::Retryable {
                        artifact: artifact_ref,
                        reason,
                    },
                };
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report
    }

    /// Apply the viewport and route preconditions, then navigate and stabilize
    /// with retries, then screenshot
    async fn prepare_and_capture<P>(
        &self,
        unit: &CaptureUnit,
        url: &str,
        page: &mut P,
        attempts: &mut u32,
    ) -> Result<(PixelArtifact, Option<String>), DriverError>
    where
        P: PageDriver + ?Sized,
    {
        let (width, height) = unit.viewport.dimensions();
        page.set_viewport(width, height).await?;

        for precondition in &unit.route.preconditions {
            debug!(snapshot = %unit.identifier, precondition = %precondition, "ensuring precondition");
            page.ensure_precondition(precondition).await?;
        }

        let prepared = self.stabilize(unit, url, page, attempts).await?;

        if let Some(selector) = &unit.route.scroll_to {
            stability::scroll_into_view(page, selector).await?;
        }

        let artifact = page.screenshot().await?;
        debug!(snapshot = %unit.identifier, attempts = prepared.attempts, bytes = artifact.image_data.len(), "screenshot taken");
        Ok((artifact, prepared.degraded))
    }

    async fn stabilize<P>(
        &self,
        unit: &CaptureUnit,
        url: &str,
        page: &mut P,
        attempts: &mut u32,
    ) -> Result<Prepared, DriverError>
    where
        P: PageDriver + ?Sized,
    {
        let config = self.options.stability.for_route(&unit.route);
        let policy = &self.options.retry;

        loop {
            *attempts += 1;
            debug!(snapshot = %unit.identifier, url, attempt = *attempts, "navigating");
            page.navigate(url).await?;

            match stability::await_stable(page, &config).await? {
                StabilityOutcome::Stable => {
                    return Ok(Prepared {
                        attempts: *attempts,
                        degraded: None,
                    });
                }
                StabilityOutcome::TimedOut { signal, waited } => {
                    if *attempts > policy.max_retries {
                        let reason = format!(
                            "{} not ready after {} ms ({} attempts)",
                            signal,
                            waited.as_millis(),
                            *attempts
                        );
                        warn!(snapshot = %unit.identifier, %reason, "capturing degraded page");
                        return Ok(Prepared {
                            attempts: *attempts,
                            degraded: Some(reason),
                        });
                    }
                    let delay = policy.delay_for(*attempts);
                    warn!(
                        snapshot = %unit.identifier,
                        signal = %signal,
                        attempt = *attempts,
                        delay_ms = delay.as_millis() as u64,
                        "page unstable, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Run independent sessions concurrently, one task per (page, plan) pair
///
/// Sessions share nothing but the runner's immutable settings, sink and
/// cancellation token. Reports come back in shard order; a shard whose task
/// panicked reports every one of its units as failed.
pub async fn run_sharded<P>(runner: Arc<CaptureRunner>, sessions: Vec<(P, SnapshotPlan)>) -> Vec<RunReport>
where
    P: PageDriver + 'static,
{
    let mut handles = Vec::with_capacity(sessions.len());
    for (shard, (mut page, plan)) in sessions.into_iter().enumerate() {
        let runner = Arc::clone(&runner);
        let units = plan.clone();
        let handle = tokio::spawn(async move { runner.run(&plan, &mut page).await });
        handles.push((shard, units, handle));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for (shard, plan, handle) in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(shard, error = %e, "capture session aborted");
                reports.push(aborted_report(&plan, &format!("session aborted: {}", e)));
            }
        }
    }
    reports
}

fn aborted_report(plan: &SnapshotPlan, reason: &str) -> RunReport {
    let now = Utc::now();
    RunReport {
        started_at: now,
        finished_at: now,
        planned: plan.len(),
        cancelled: false,
        units: plan
            .iter()
            .map(|unit| UnitReport {
                index: unit.index,
                identifier: unit.identifier.clone(),
                route_label: unit.route.label.clone(),
                viewport: unit.viewport.clone(),
                attempts: 0,
                result: CaptureResult::Failed {
                    reason: reason.to_string(),
                },
                submission: SubmissionStatus::NotAttempted,
                elapsed_ms: 0,
            })
            .collect(),
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn submission_status(result: Result<SubmissionHandle, SubmissionError>) -> SubmissionStatus {
    match result {
        Ok(handle) => SubmissionStatus::Submitted { handle },
        Err(SubmissionError::Disabled) => SubmissionStatus::Skipped,
        Err(e) => {
            warn!(error = %e, "snapshot submission failed");
            SubmissionStatus::Failed { reason: e.to_string() }
        }
    }
}

/// Write a local copy if a fallback session exists; errors are logged, not raised
fn store_fallback(
    session: Option<&Session>,
    identifier: &SnapshotIdentifier,
    artifact: &PixelArtifact,
    metadata: &SnapshotMetadata,
) -> Option<PathBuf> {
    let session = session?;
    match session.store_artifact(identifier, artifact, metadata) {
        Ok(path) => Some(path),
        Err(e) => {
            error!(snapshot = %identifier, error = %e, "could not store local artifact");
            None
        }
    }
}

fn log_unit(report: &UnitReport) {
    match &report.result {
        CaptureResult::Captured(_) => {
            info!(snapshot = %report.identifier, attempts = report.attempts, elapsed_ms = report.elapsed_ms, "captured")
        }
        CaptureResult::Retryable { reason, .. } => {
            warn!(snapshot = %report.identifier, attempts = report.attempts, %reason, "captured (degraded)")
        }
        CaptureResult::Failed { reason } => {
            error!(snapshot = %report.identifier, attempts = report.attempts, %reason, "capture failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_report(index: usize, result: CaptureResult) -> UnitReport {
        UnitReport {
            index,
            identifier: SnapshotIdentifier::new(format!("u{}", index)),
            route_label: "home".to_string(),
            viewport: Viewport::new(10, 10),
            attempts: 1,
            result,
            submission: SubmissionStatus::NotAttempted,
            elapsed_ms: 0,
        }
    }

    fn artifact(index: usize) -> ArtifactRef {
        ArtifactRef {
            identifier: SnapshotIdentifier::new(format!("u{}", index)),
            width: 10,
            height: 10,
            bytes: 0,
            local_path: None,
        }
    }

    fn report(planned: usize, units: Vec<UnitReport>) -> RunReport {
        RunReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            planned,
            cancelled: false,
            units,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::new(3, 500, 2.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.max_attempts(), 4);

        let linear = RetryPolicy::new(2, 100, 1.0);
        assert_eq!(linear.delay_for(2), Duration::from_millis(100));
    }

    #[test]
    fn test_degraded_passes_by_default() {
        let run = report(
            2,
            vec![
                unit_report(0, CaptureResult::Captured(artifact(0))),
                unit_report(
                    1,
                    CaptureResult::Retryable {
                        artifact: artifact(1),
                        reason: "fonts-loaded not ready".to_string(),
                    },
                ),
            ],
        );
        assert!(run.passed(FailOn::Failed));
        assert!(!run.passed(FailOn::Degraded));
        assert_eq!(run.summary().degraded, 1);
    }

    #[test]
    fn test_failed_or_skipped_units_fail_run() {
        let failed = report(1, vec![unit_report(0, CaptureResult::Failed { reason: "boom".to_string() })]);
        assert!(!failed.passed(FailOn::Failed));

        let partial = report(3, vec![unit_report(0, CaptureResult::Captured(artifact(0)))]);
        assert_eq!(partial.summary().skipped, 2);
        assert!(!partial.passed(FailOn::Failed));
    }

    #[test]
    fn test_merge_orders_by_plan_index() {
        let a = report(2, vec![unit_report(0, CaptureResult::Captured(artifact(0))), unit_report(2, CaptureResult::Captured(artifact(2)))]);
        let b = report(1, vec![unit_report(1, CaptureResult::Captured(artifact(1)))]);
        let merged = RunReport::merge(vec![a, b]);
        assert_eq!(merged.planned, 3);
        let order: Vec<usize> = merged.units.iter().map(|u| u.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_capture_result_serialization() {
        let value = serde_json::to_value(CaptureResult::Failed { reason: "cancelled".to_string() }).unwrap();
        assert_eq!(value, serde_json::json!({ "status": "failed", "reason": "cancelled" }));

        let captured = serde_json::to_value(CaptureResult::Captured(artifact(0))).unwrap();
        assert_eq!(captured["status"], "captured");
        assert_eq!(captured["identifier"], "u0");
    }
}
