//! Capture sessions: local artifact directories.
//!
//! A session directory holds screenshots that should survive independently
//! of the diff service (fallback copies when a submission fails, or every
//! capture when the session is configured to keep all artifacts), their JSON
//! manifests, and the final run report.
//!
//! - Unique session directories under a configurable base directory
//! - Automatic cleanup unless explicitly preserved
//! - Session metadata tracking

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config;
use crate::diff::SnapshotMetadata;
use crate::driver::PixelArtifact;
use crate::plan::SnapshotIdentifier;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised while writing session artifacts
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A capture session with organized file management
#[derive(Debug)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this session
    pub dir: PathBuf,
    /// Whether to keep files after the session is dropped
    pub keep: bool,
    /// Base URL under test, recorded in the session metadata
    pub base_url: Option<String>,
}

/// Manifest written next to every stored screenshot
#[derive(Debug, Serialize)]
struct ArtifactManifest<'a> {
    identifier: &'a SnapshotIdentifier,
    image: String,
    width: u32,
    height: u32,
    metadata: &'a SnapshotMetadata,
}

impl Session {
    /// Create a new session with a unique ID under the configured base directory
    pub fn new() -> Self {
        let id = generate_session_id();
        let dir = base_dir().join(&id);
        Self {
            id,
            dir,
            keep: false,
            base_url: None,
        }
    }

    /// Create a session with a specific name/prefix
    pub fn with_name(name: &str) -> Self {
        let id = format!("{}_{}", sanitize_name(name), generate_timestamp_suffix());
        let dir = base_dir().join(&id);
        Self {
            id,
            dir,
            keep: false,
            base_url: None,
        }
    }

    /// Create a session in a specific directory; kept by default
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_session_id);
        Self {
            id,
            dir,
            keep: true,
            base_url: None,
        }
    }

    /// Set whether to keep files after the session is dropped
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Record the base URL under test
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Create the session directory and write `.session.json`
    pub fn init(&self) -> SessionResult<()> {
        fs::create_dir_all(&self.dir)?;

        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "host": hostname::get().ok().map(|h| h.to_string_lossy().to_string()),
            "base_url": self.base_url,
        });
        fs::write(self.dir.join(".session.json"), serde_json::to_string_pretty(&metadata)?)?;
        Ok(())
    }

    /// Path of the PNG stored for `identifier`
    ///
    /// Distinct identifiers always map to distinct paths.
    pub fn artifact_path(&self, identifier: &SnapshotIdentifier) -> PathBuf {
        self.dir.join(format!("{}.png", encode_file_stem(identifier.as_str())))
    }

    /// Write a screenshot and its JSON manifest; returns the PNG path
    pub fn store_artifact(
        &self,
        identifier: &SnapshotIdentifier,
        artifact: &PixelArtifact,
        metadata: &SnapshotMetadata,
    ) -> SessionResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let image_path = self.artifact_path(identifier);
        fs::write(&image_path, &artifact.image_data)?;

        let manifest = ArtifactManifest {
            identifier,
            image: image_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            width: artifact.width,
            height: artifact.height,
            metadata,
        };
        fs::write(image_path.with_extension("json"), serde_json::to_string_pretty(&manifest)?)?;

        debug!(snapshot = %identifier, path = %image_path.display(), "stored artifact");
        Ok(image_path)
    }

    /// Write any serializable report as `run.json`
    pub fn write_report<T: Serialize>(&self, report: &T) -> SessionResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join("run.json");
        fs::write(&path, serde_json::to_string_pretty(report)?)?;
        Ok(path)
    }

    /// List all PNG files in the session
    pub fn list_captures(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut captures = Vec::new();
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "png") {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }

    /// Remove the session directory unless it is kept
    pub fn cleanup(&self) -> std::io::Result<()> {
        if self.dir.exists() && !self.keep {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

fn base_dir() -> PathBuf {
    PathBuf::from(config::session_base_dir())
}

/// Generate a unique session ID
fn generate_session_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("session_{}_{}", timestamp, std::process::id())
}

fn generate_timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Sanitize a name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

/// Percent-encode every byte outside `[A-Za-z0-9._-]`
///
/// Unlike [`sanitize_name`] the mapping is reversible, so two identifiers
/// never share a file.
pub fn encode_file_stem(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Remove sessions under `base` older than `max_age`
pub fn cleanup_old_sessions(base: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) {
            match fs::remove_dir_all(&path) {
                Ok(()) => cleaned += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove old session"),
            }
        }
    }

    Ok(cleaned)
}

/// List all existing sessions under `base`
pub fn list_sessions(base: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        if path.is_dir() {
            sessions.push(path);
        }
    }
    sessions.sort();
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata() -> SnapshotMetadata {
        SnapshotMetadata {
            route_label: "Homepage".to_string(),
            url: "https://www.example.com".to_string(),
            width: 2,
            height: 2,
            device: None,
            degraded: true,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_session_new() {
        let session = Session::new();
        assert!(session.id.starts_with("session_"));
        assert!(!session.keep);
    }

    #[test]
    fn test_session_with_name() {
        let session = Session::with_name("nightly run");
        assert!(session.id.starts_with("nightly_run_"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Homepage - Mobile 375x667"), "Homepage_-_Mobile_375x667");
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
    }

    #[test]
    fn test_encode_file_stem_is_injective() {
        assert_eq!(encode_file_stem("home-375x667"), "home-375x667");
        assert_eq!(encode_file_stem("home page-375x667"), "home%20page-375x667");
        assert_eq!(encode_file_stem("a/b%"), "a%2Fb%25");
        assert_ne!(encode_file_stem("home page"), encode_file_stem("home_page"));
        assert_ne!(encode_file_stem("a%20b"), encode_file_stem("a b"));
        assert_eq!(encode_file_stem("é"), "%C3%A9");
    }

    #[test]
    fn test_store_artifact_writes_png_and_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let session = Session::in_dir(tmp.path().join("run"));
        session.init().unwrap();

        let id = SnapshotIdentifier::new("Homepage - 2x2");
        let artifact = PixelArtifact {
            image_data: vec![0x89, b'P', b'N', b'G'],
            width: 2,
            height: 2,
        };
        let path = session.store_artifact(&id, &artifact, &metadata()).unwrap();

        assert!(path.ends_with("Homepage%20-%202x2.png"));
        assert_eq!(fs::read(&path).unwrap(), artifact.image_data);

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path.with_extension("json")).unwrap()).unwrap();
        assert_eq!(manifest["identifier"], "Homepage - 2x2");
        assert_eq!(manifest["metadata"]["degraded"], true);

        assert_eq!(session.list_captures().unwrap(), vec![path]);
        assert!(session.dir.join(".session.json").exists());
    }

    #[test]
    fn test_unkept_session_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("scratch");
        {
            let session = Session::in_dir(&dir).keep(false);
            session.init().unwrap();
            assert!(dir.exists());
        }
        assert!(!dir.exists());
    }

    #[test]
    fn test_list_and_cleanup_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("b")).unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();

        let sessions = list_sessions(tmp.path()).unwrap();
        assert_eq!(sessions, vec![tmp.path().join("a"), tmp.path().join("b")]);

        // Nothing is older than an hour
        assert_eq!(cleanup_old_sessions(tmp.path(), Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(list_sessions(&tmp.path().join("missing")).unwrap(), Vec::<PathBuf>::new());
    }
}
