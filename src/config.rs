//! Configuration management with environment variable support.
//!
//! Two layers:
//! - process-wide defaults read from `PAGE_VISION_*` environment variables
//!   (cached on first access)
//! - a JSON suite file ([`SuiteConfig`]) naming routes, viewports, stability
//!   signals and retry policy for one run; unset fields fall back to the
//!   environment defaults
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `PAGE_VISION_BASE_URL` | Base URL of the application under test | `https://www.example.com` |
//! | `PAGE_VISION_DIFF_ENDPOINT` | Diff-service snapshot upload URL | `http://localhost:5338/snapshots` |
//! | `PAGE_VISION_DIFF_TOKEN` | Diff-service token; submissions are disabled without it | unset |
//! | `PAGE_VISION_DIFF_CONNECT_TIMEOUT` | Diff-service connection timeout in seconds | `10` |
//! | `PAGE_VISION_DIFF_TIMEOUT` | Diff-service request timeout in seconds | `60` |
//! | `PAGE_VISION_SESSION_DIR` | Base directory for local artifact sessions | `/tmp/page-vision` |
//! | `PAGE_VISION_MAX_RETRIES` | Stability retries per capture unit | `1` |
//! | `PAGE_VISION_BACKOFF_BASE_MS` | First retry delay in milliseconds | `500` |
//! | `PAGE_VISION_BACKOFF_FACTOR` | Multiplier applied per further retry | `2.0` |
//! | `PAGE_VISION_VIEWPORTS` | Default viewports (comma-separated presets or WxH) | `desktop-fhd,tablet-landscape,iphone-se` |
//!
//! # Example
//!
//! ```bash
//! export PAGE_VISION_BASE_URL="https://staging.example.com"
//! export PAGE_VISION_DIFF_TOKEN="..."
//! page-vision run --suite suite.json
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::plan::{NamingPolicy, PlanResult, Route, SnapshotPlan, Viewport};
use crate::runner::{FailOn, RetryPolicy, RunnerOptions, SubmitMode};
use crate::stability::StabilityConfig;

// ============================================================================
// Default Values
// ============================================================================

/// Default base URL of the application under test
pub const DEFAULT_BASE_URL: &str = "https://www.example.com";

/// Default diff-service upload URL
pub const DEFAULT_DIFF_ENDPOINT: &str = "http://localhost:5338/snapshots";

/// Default diff-service connection timeout (seconds)
pub const DEFAULT_DIFF_CONNECT_TIMEOUT: u64 = 10;

/// Default diff-service request timeout (seconds)
pub const DEFAULT_DIFF_REQUEST_TIMEOUT: u64 = 60;

/// Default session base directory
pub const DEFAULT_SESSION_DIR: &str = "/tmp/page-vision";

/// Default number of stability retries
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Default first backoff delay (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Default backoff multiplier
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Default viewport list
pub const DEFAULT_VIEWPORTS: &str = "desktop-fhd,tablet-landscape,iphone-se";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_BASE_URL: &str = "PAGE_VISION_BASE_URL";
pub const ENV_DIFF_ENDPOINT: &str = "PAGE_VISION_DIFF_ENDPOINT";
pub const ENV_DIFF_TOKEN: &str = "PAGE_VISION_DIFF_TOKEN";
pub const ENV_DIFF_CONNECT_TIMEOUT: &str = "PAGE_VISION_DIFF_CONNECT_TIMEOUT";
pub const ENV_DIFF_REQUEST_TIMEOUT: &str = "PAGE_VISION_DIFF_TIMEOUT";
pub const ENV_SESSION_DIR: &str = "PAGE_VISION_SESSION_DIR";
pub const ENV_MAX_RETRIES: &str = "PAGE_VISION_MAX_RETRIES";
pub const ENV_BACKOFF_BASE_MS: &str = "PAGE_VISION_BACKOFF_BASE_MS";
pub const ENV_BACKOFF_FACTOR: &str = "PAGE_VISION_BACKOFF_FACTOR";
pub const ENV_VIEWPORTS: &str = "PAGE_VISION_VIEWPORTS";

/// Legacy base URL variable used by existing CI pipelines
pub const ENV_BASE_URL_LEGACY: &str = "BASE_URL";

// ============================================================================
// Process-wide defaults
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized defaults
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub diff: DiffSettings,
    pub session: SessionSettings,
    pub retry: RetryPolicy,
    pub viewports: Vec<Viewport>,
}

/// Diff-service settings
#[derive(Debug, Clone)]
pub struct DiffSettings {
    pub endpoint: String,
    pub token: Option<String>,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Whole-request timeout (seconds)
    pub request_timeout: u64,
}

/// Session-related settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base directory for session storage
    pub base_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create configuration from any variable source; unset or unparseable
    /// values use the defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let viewports = lookup(ENV_VIEWPORTS)
            .and_then(|s| parse_viewport_list(&s).ok())
            .unwrap_or_else(default_viewports);

        Self {
            base_url: lookup(ENV_BASE_URL)
                .or_else(|| lookup(ENV_BASE_URL_LEGACY))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            diff: DiffSettings {
                endpoint: lookup(ENV_DIFF_ENDPOINT).unwrap_or_else(|| DEFAULT_DIFF_ENDPOINT.to_string()),
                token: lookup(ENV_DIFF_TOKEN).filter(|t| !t.trim().is_empty()),
                connect_timeout: parse_var(&lookup, ENV_DIFF_CONNECT_TIMEOUT).unwrap_or(DEFAULT_DIFF_CONNECT_TIMEOUT),
                request_timeout: parse_var(&lookup, ENV_DIFF_REQUEST_TIMEOUT).unwrap_or(DEFAULT_DIFF_REQUEST_TIMEOUT),
            },
            session: SessionSettings {
                base_dir: lookup(ENV_SESSION_DIR).unwrap_or_else(|| DEFAULT_SESSION_DIR.to_string()),
            },
            retry: RetryPolicy {
                max_retries: parse_var(&lookup, ENV_MAX_RETRIES).unwrap_or(DEFAULT_MAX_RETRIES),
                backoff_base_ms: parse_var(&lookup, ENV_BACKOFF_BASE_MS).unwrap_or(DEFAULT_BACKOFF_BASE_MS),
                backoff_factor: parse_var(&lookup, ENV_BACKOFF_FACTOR).unwrap_or(DEFAULT_BACKOFF_FACTOR),
            },
            viewports,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|s| s.trim().parse().ok())
}

fn default_viewports() -> Vec<Viewport> {
    parse_viewport_list(DEFAULT_VIEWPORTS).unwrap_or_default()
}

/// Parse "desktop-fhd, 1280x900, iphone-se" into viewports
pub fn parse_viewport_list(list: &str) -> Result<Vec<Viewport>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Viewport::parse(s).ok_or_else(|| ConfigError::UnknownViewport(s.to_string())))
        .collect()
}

/// Get the base URL under test (convenience function)
pub fn base_url() -> String {
    get().base_url.clone()
}

/// Get session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().session.base_dir.clone()
}

// ============================================================================
// Suite files
// ============================================================================

/// Errors loading or validating a suite file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid suite file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown viewport '{0}' (use a preset name or WxH)")]
    UnknownViewport(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One run's worth of configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub base_url: String,
    pub routes: Vec<Route>,
    /// Entries are `{ "width", "height", "label" }` objects or preset / WxH strings
    #[serde(deserialize_with = "deserialize_viewports")]
    pub viewports: Vec<Viewport>,
    pub naming: NamingPolicy,
    pub stability_signals: StabilityConfig,
    pub retry: RetryPolicy,
    pub submit_mode: SubmitMode,
    pub fail_on: FailOn,
    /// Abort the run after this many milliseconds
    pub run_timeout_ms: Option<u64>,
    /// Store every capture locally, not only failed submissions
    pub keep_artifacts: bool,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        let cfg = get();
        Self {
            base_url: cfg.base_url.clone(),
            routes: Vec::new(),
            viewports: cfg.viewports.clone(),
            naming: NamingPolicy::default(),
            stability_signals: StabilityConfig::default(),
            retry: cfg.retry.clone(),
            submit_mode: SubmitMode::default(),
            fail_on: FailOn::default(),
            run_timeout_ms: None,
            keep_artifacts: false,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ViewportEntry {
    Named(String),
    Explicit(Viewport),
}

fn deserialize_viewports<'de, D>(deserializer: D) -> Result<Vec<Viewport>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<ViewportEntry>::deserialize(deserializer)?;
    entries
        .into_iter()
        .map(|entry| match entry {
            ViewportEntry::Explicit(v) => Ok(v),
            ViewportEntry::Named(name) => Viewport::parse(&name)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown viewport '{}'", name))),
        })
        .collect()
}

impl SuiteConfig {
    /// Load and validate a JSON suite file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let suite: SuiteConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        suite.validate()?;
        Ok(suite)
    }

    /// Check values that deserialization cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".to_string()));
        }
        let factor = self.retry.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_factor must be a finite number >= 1.0, got {}",
                factor
            )));
        }
        Ok(())
    }

    /// Expand routes x viewports
    pub fn build_plan(&self) -> PlanResult<SnapshotPlan> {
        SnapshotPlan::build(&self.routes, &self.viewports, &self.naming)
    }

    /// Runner settings for this suite
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            base_url: self.base_url.clone(),
            stability: self.stability_signals.clone(),
            retry: self.retry.clone(),
            submit_mode: self.submit_mode,
            run_timeout: self.run_timeout_ms.map(Duration::from_millis),
            keep_artifacts: self.keep_artifacts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.session.base_dir, DEFAULT_SESSION_DIR);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.backoff_base_ms, 500);
        assert_eq!(config.diff.token, None);
        assert_eq!(
            config.viewports.iter().map(|v| v.dimensions()).collect::<Vec<_>>(),
            vec![(1920, 1080), (1024, 768), (375, 667)]
        );
    }

    #[test]
    fn test_config_from_variables() {
        let vars: std::collections::HashMap<&str, &str> = [
            (ENV_BASE_URL_LEGACY, "https://legacy.example.com"),
            (ENV_DIFF_TOKEN, "  "),
            (ENV_MAX_RETRIES, "3"),
            (ENV_BACKOFF_FACTOR, "not-a-number"),
            (ENV_VIEWPORTS, "iphone-se"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.base_url, "https://legacy.example.com");
        assert_eq!(config.diff.token, None);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff_factor, DEFAULT_BACKOFF_FACTOR);
        assert_eq!(config.viewports, vec![Viewport::new(375, 667).labeled("iPhone SE")]);
    }

    #[test]
    fn test_parse_viewport_list() {
        let viewports = parse_viewport_list("iphone-se, 1280x900").unwrap();
        assert_eq!(viewports[0].dimensions(), (375, 667));
        assert_eq!(viewports[1], Viewport::new(1280, 900));
        assert!(matches!(parse_viewport_list("watch"), Err(ConfigError::UnknownViewport(_))));
    }

    #[test]
    fn test_suite_from_json() {
        let suite: SuiteConfig = serde_json::from_str(
            r#"{
                "base_url": "https://staging.example.com",
                "routes": [
                    { "label": "home", "path": "/", "ready_selectors": [".hero-banner"] },
                    { "label": "checkout", "path": "/checkout", "tags": ["critical"] }
                ],
                "viewports": ["iphone-se", { "width": 1280, "height": 900 }],
                "stability_signals": { "fonts": false, "animation_delay_ms": 250 },
                "retry": { "max_retries": 2, "backoff_base_ms": 100, "backoff_factor": 2.0 },
                "submit_mode": "fire_and_forget",
                "fail_on": "degraded"
            }"#,
        )
        .unwrap();
        suite.validate().unwrap();

        assert_eq!(suite.routes.len(), 2);
        assert_eq!(suite.viewports[0].label.as_deref(), Some("iPhone SE"));
        assert_eq!(suite.viewports[1], Viewport::new(1280, 900));
        assert!(!suite.stability_signals.fonts.enabled);
        assert_eq!(suite.submit_mode, SubmitMode::FireAndForget);
        assert_eq!(suite.fail_on, FailOn::Degraded);

        let plan = suite.build_plan().unwrap();
        let ids: Vec<&str> = plan.iter().map(|u| u.identifier.as_str()).collect();
        assert_eq!(
            ids,
            vec!["home-375x667", "home-1280x900", "checkout-375x667", "checkout-1280x900"]
        );

        let options = suite.runner_options();
        assert_eq!(options.retry.max_retries, 2);
        assert_eq!(options.base_url, "https://staging.example.com");
    }

    #[test]
    fn test_suite_rejects_unknown_viewport() {
        let result: Result<SuiteConfig, _> = serde_json::from_str(r#"{ "viewports": ["smartwatch"] }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_suite_validation() {
        let mut suite: SuiteConfig = serde_json::from_str("{}").unwrap();
        suite.retry.backoff_factor = 0.5;
        assert!(matches!(suite.validate(), Err(ConfigError::Invalid(_))));

        suite.retry.backoff_factor = 2.0;
        suite.base_url = " ".to_string();
        assert!(matches!(suite.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("suite.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = SuiteConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("suite.json"));

        let missing = SuiteConfig::load(&tmp.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
