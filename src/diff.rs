//! Hand-off to the external visual-diff service.
//!
//! The service owns comparison, baselines and approval; this side only
//! submits screenshots and records whether the submission was accepted.
//!
//! # Configuration
//!
//! The HTTP sink reads its defaults from environment variables:
//! - `PAGE_VISION_DIFF_ENDPOINT`: snapshot upload URL
//! - `PAGE_VISION_DIFF_TOKEN`: bearer token; without it submissions are disabled
//! - `PAGE_VISION_DIFF_CONNECT_TIMEOUT`: connection timeout (seconds)
//! - `PAGE_VISION_DIFF_TIMEOUT`: whole-request timeout (seconds)

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config;
use crate::driver::PixelArtifact;
use crate::plan::SnapshotIdentifier;

/// Result type for diff-service operations
pub type SubmissionResult<T> = Result<T, SubmissionError>;

/// Errors that can occur while submitting a snapshot
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Submissions are turned off (no token configured)
    #[error("diff service disabled")]
    Disabled,
    /// Failed to reach the service
    #[error("diff service unreachable: {0}")]
    Unreachable(String),
    /// The service answered with a non-success status
    #[error("diff service rejected snapshot (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    /// The service answered with something unparseable
    #[error("invalid response from diff service: {0}")]
    InvalidResponse(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the diff service is told about a snapshot besides its pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub route_label: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub device: Option<String>,
    /// Captured after stability retries were exhausted
    pub degraded: bool,
    pub captured_at: DateTime<Utc>,
}

/// Receipt for an accepted submission; results are fetched out of band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionHandle {
    pub id: String,
    pub submitted_at: DateTime<Utc>,
}

/// Receives captured snapshots
#[async_trait]
pub trait DiffSink: Send + Sync {
    async fn submit(
        &self,
        identifier: &SnapshotIdentifier,
        artifact: &PixelArtifact,
        metadata: &SnapshotMetadata,
    ) -> SubmissionResult<SubmissionHandle>;
}

/// Sink used when no diff service is configured: logs and skips
#[derive(Debug, Clone, Default)]
pub struct DisabledSink;

#[async_trait]
impl DiffSink for DisabledSink {
    async fn submit(
        &self,
        identifier: &SnapshotIdentifier,
        _artifact: &PixelArtifact,
        _metadata: &SnapshotMetadata,
    ) -> SubmissionResult<SubmissionHandle> {
        info!(snapshot = %identifier, "diff service disabled - skipping snapshot");
        Err(SubmissionError::Disabled)
    }
}

/// Configuration for the HTTP diff sink
#[derive(Debug, Clone)]
pub struct HttpDiffConfig {
    /// Snapshot upload URL
    pub endpoint: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Timeout for the initial connection (seconds)
    pub connect_timeout: u64,
    /// Timeout for the whole request (seconds)
    pub request_timeout: u64,
}

impl Default for HttpDiffConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.diff.endpoint.clone(),
            token: cfg.diff.token.clone(),
            connect_timeout: cfg.diff.connect_timeout,
            request_timeout: cfg.diff.request_timeout,
        }
    }
}

impl HttpDiffConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn request_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout = seconds;
        self
    }
}

/// Posts snapshots as JSON to an HTTP endpoint using `curl`
#[derive(Debug, Clone)]
pub struct HttpDiffSink {
    config: HttpDiffConfig,
}

impl HttpDiffSink {
    pub fn new(config: HttpDiffConfig) -> Self {
        Self { config }
    }
}

/// Build the upload payload for one snapshot
pub fn build_payload(
    identifier: &SnapshotIdentifier,
    artifact: &PixelArtifact,
    metadata: &SnapshotMetadata,
) -> serde_json::Value {
    let image_base64 = base64::engine::general_purpose::STANDARD.encode(&artifact.image_data);
    serde_json::json!({
        "name": identifier.as_str(),
        "widths": [metadata.width],
        "min_height": metadata.height,
        "image": {
            "format": "png",
            "encoding": "base64",
            "width": artifact.width,
            "height": artifact.height,
            "data": image_base64,
        },
        "metadata": metadata,
    })
}

/// Split curl output written with `-w "\n%{http_code}"` into (body, status)
fn split_status(stdout: &str) -> (String, u16) {
    match stdout.rsplit_once('\n') {
        Some((body, code)) => (body.to_string(), code.trim().parse().unwrap_or(0)),
        None => (String::new(), stdout.trim().parse().unwrap_or(0)),
    }
}

#[async_trait]
impl DiffSink for HttpDiffSink {
    async fn submit(
        &self,
        identifier: &SnapshotIdentifier,
        artifact: &PixelArtifact,
        metadata: &SnapshotMetadata,
    ) -> SubmissionResult<SubmissionHandle> {
        let Some(token) = self.config.token.as_deref() else {
            return Err(SubmissionError::Disabled);
        };

        let body = serde_json::to_vec(&build_payload(identifier, artifact, metadata))
            .map_err(|e| SubmissionError::InvalidResponse(e.to_string()))?;

        // Body goes through stdin: base64 screenshots exceed argv limits
        let mut child = Command::new("curl")
            .args([
                "-s",
                "-X", "POST",
                &self.config.endpoint,
                "-H", "Content-Type: application/json",
                "-H", &format!("Authorization: Bearer {}", token),
                "--data-binary", "@-",
                "-w", "\n%{http_code}",
                "--connect-timeout", &self.config.connect_timeout.to_string(),
                "--max-time", &self.config.request_timeout.to_string(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SubmissionError::Io(std::io::Error::other("Failed to open curl stdin")))?;
        stdin.write_all(&body).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (response, status) = split_status(&stdout);

        if status == 0 {
            return Err(SubmissionError::Unreachable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        if !(200..300).contains(&status) {
            return Err(SubmissionError::Rejected { status, body: response });
        }

        let id = if response.trim().is_empty() {
            identifier.to_string()
        } else {
            let json: serde_json::Value = serde_json::from_str(&response)
                .map_err(|e| SubmissionError::InvalidResponse(e.to_string()))?;
            json["id"]
                .as_str()
                .map(str::to_string)
                .or_else(|| json["data"]["id"].as_str().map(str::to_string))
                .unwrap_or_else(|| identifier.to_string())
        };

        debug!(snapshot = %identifier, submission = %id, status, "snapshot submitted");
        Ok(SubmissionHandle {
            id,
            submitted_at: Utc::now(),
        })
    }
}

/// Check whether the diff service accepts connections
///
/// Any HTTP status (even 4xx/5xx) counts as reachable; only a failed
/// connection does not.
pub async fn check_health(endpoint: &str, timeout_secs: u64) -> SubmissionResult<bool> {
    let url = endpoint.trim_start_matches("http://").trim_start_matches("https://");
    let host_port = url.split('/').next().unwrap_or("127.0.0.1");
    let scheme = if endpoint.starts_with("https://") { "https" } else { "http" };

    let output = Command::new("curl")
        .args([
            "-s",
            "-o", "/dev/null",
            "-w", "%{http_code}",
            "--connect-timeout", &timeout_secs.to_string(),
            "--max-time", &timeout_secs.to_string(),
            "-I",
            &format!("{}://{}", scheme, host_port),
        ])
        .output()
        .await?;

    let status = String::from_utf8_lossy(&output.stdout);
    let code: u16 = status.trim().parse().unwrap_or(0);
    Ok(code > 0)
}
