//! Page Vision - visual regression capture for web pages.
//!
//! This crate provides:
//! - Snapshot planning: routes x viewports with deterministic, collision-checked names
//! - A stability gate that waits for fonts, images, network and layout to settle
//! - A capture runner with retries, degraded captures and cancellation
//! - Hand-off of screenshots to an external visual-diff service
//! - Session management for local artifact fallbacks
//!
//! # Example
//!
//! ```rust,no_run
//! use page_vision::driver::MockPage;
//! use page_vision::plan::{NamingPolicy, Route, SnapshotPlan, Viewport};
//! use page_vision::runner::{CaptureRunner, RunnerOptions};
//! use page_vision::diff::DisabledSink;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let routes = vec![Route::new("home", "/")];
//! let viewports = vec![Viewport::new(375, 667), Viewport::new(1280, 900)];
//! let plan = SnapshotPlan::build(&routes, &viewports, &NamingPolicy::default())?;
//!
//! let runner = CaptureRunner::new(RunnerOptions::default(), Arc::new(DisabledSink));
//! let mut page = MockPage::new();
//! let report = runner.run(&plan, &mut page).await;
//! assert_eq!(report.units.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod diff;
pub mod driver;
pub mod plan;
pub mod runner;
pub mod session;
pub mod stability;

// Re-export planning types
pub use plan::{CaptureUnit, NamingPolicy, PlanError, Route, SnapshotIdentifier, SnapshotPlan, Viewport};

// Re-export driver types
pub use driver::{DriverError, MockPage, PageDriver, PixelArtifact};

// Re-export stability gate
pub use stability::{Signal, StabilityConfig, StabilityOutcome, await_stable};

// Re-export runner types
pub use runner::{
    CaptureResult, CaptureRunner, FailOn, RetryPolicy, RunReport, RunnerOptions, SubmissionStatus, SubmitMode,
    UnitReport, run_sharded,
};

// Re-export diff-service hand-off
pub use diff::{DiffSink, DisabledSink, HttpDiffConfig, HttpDiffSink, SnapshotMetadata, SubmissionError};

// Re-export configuration and session management
pub use config::{ConfigError, SuiteConfig};
pub use session::{Session, cleanup_old_sessions, list_sessions};
