use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for browser-automation operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors raised by a browser-automation collaborator
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum DriverError {
    /// The page could not be loaded
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// The window could not be resized
    #[error("could not apply viewport {width}x{height}: {message}")]
    Viewport { width: u32, height: u32, message: String },

    /// A script threw or the driver could not run it
    #[error("script execution failed: {0}")]
    Script(String),

    /// The screenshot could not be taken or encoded
    #[error("screenshot failed: {0}")]
    Screenshot(String),

    /// The session could not be brought into a state a route requires
    #[error("precondition '{0}' not satisfied")]
    Precondition(String),

    /// Session lost, browser crashed, or any other driver failure
    #[error("driver error: {0}")]
    Session(String),
}

/// A captured screenshot
#[derive(Debug, Clone, PartialEq)]
pub struct PixelArtifact {
    /// PNG-encoded image data
    pub image_data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Browser-automation operations needed to capture a page
///
/// A driver is one browser session. The capture runner borrows it mutably for
/// the whole run, so captures inside a session never overlap.
#[async_trait]
pub trait PageDriver: Send {
    /// Load `url` and return once the driver considers navigation done
    async fn navigate(&mut self, url: &str) -> DriverResult<()>;

    /// Resize the window / emulated device to `width` x `height`
    async fn set_viewport(&mut self, width: u32, height: u32) -> DriverResult<()>;

    /// Run a script in the page and return its (JSON) result
    async fn execute_script(&mut self, script: &str) -> DriverResult<serde_json::Value>;

    /// Screenshot the current viewport
    async fn screenshot(&mut self) -> DriverResult<PixelArtifact>;

    /// Bring the session into the state named by `precondition` (e.g. "logged-in")
    ///
    /// Drivers that know no preconditions refuse every one.
    async fn ensure_precondition(&mut self, precondition: &str) -> DriverResult<()> {
        Err(DriverError::Precondition(precondition.to_string()))
    }

    /// Source type identifier (e.g. "webdriver", "mock")
    fn source_type(&self) -> &str {
        "browser"
    }
}

#[async_trait]
impl<P: PageDriver + ?Sized> PageDriver for Box<P> {
    async fn navigate(&mut self, url: &str) -> DriverResult<()> {
        (**self).navigate(url).await
    }

    async fn set_viewport(&mut self, width: u32, height: u32) -> DriverResult<()> {
        (**self).set_viewport(width, height).await
    }

    async fn execute_script(&mut self, script: &str) -> DriverResult<serde_json::Value> {
        (**self).execute_script(script).await
    }

    async fn screenshot(&mut self) -> DriverResult<PixelArtifact> {
        (**self).screenshot().await
    }

    async fn ensure_precondition(&mut self, precondition: &str) -> DriverResult<()> {
        (**self).ensure_precondition(precondition).await
    }

    fn source_type(&self) -> &str {
        (**self).source_type()
    }
}
