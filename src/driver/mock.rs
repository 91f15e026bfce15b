//! Scripted in-memory page for tests, demos and dry runs.
//!
//! - `MockFramebuffer` draws deterministic frames and encodes them as PNG
//! - `MockPage` implements [`PageDriver`], answering the stability probes
//!   according to per-URL [`PageBehavior`] and recording everything it sees

use async_trait::async_trait;
use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageBuffer, RgbImage};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::time::Duration;
use tokio::time::Instant;

use super::types::{DriverError, DriverResult, PageDriver, PixelArtifact};
use crate::stability::Probe;

/// A virtual framebuffer for rendering mock screenshots
///
/// Provides a small drawing API:
/// - `fill()` - Fill entire buffer with a color
/// - `draw_rect()` - Draw a filled rectangle
/// - `draw_text()` - Draw text using font8x8 glyphs
/// - `get_pixel()` / `set_pixel()` - Direct pixel access
#[derive(Debug, Clone)]
pub struct MockFramebuffer {
    /// Width in pixels
    width: u32,
    /// Height in pixels
    height: u32,
    /// RGB pixel buffer (row-major, 3 bytes per pixel)
    buffer: Vec<u8>,
}

impl MockFramebuffer {
    /// Create a new framebuffer with the given dimensions, initialized to black
    pub fn new(width: u32, height: u32) -> Self {
        let buffer = vec![0u8; (width as usize) * (height as usize) * 3];
        Self { width, height, buffer }
    }

    /// Create a framebuffer initialized to a specific color
    pub fn with_color(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut fb = Self::new(width, height);
        fb.fill(color);
        fb
    }

    /// Load a framebuffer from PNG image bytes
    pub fn from_png_bytes(data: &[u8]) -> DriverResult<Self> {
        let img = image::load_from_memory(data)
            .map_err(|e| DriverError::Screenshot(format!("Failed to load PNG: {}", e)))?;
        let rgb = img.to_rgb8();
        Ok(Self {
            width: rgb.width(),
            height: rgb.height(),
            buffer: rgb.into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fill the entire framebuffer with a color
    pub fn fill(&mut self, color: [u8; 3]) {
        for chunk in self.buffer.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Draw a filled rectangle, clipped to the buffer
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        for py in y..y.saturating_add(h).min(self.height) {
            for px in x..x.saturating_add(w).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Draw text using font8x8 glyphs
    ///
    /// Each character is 8x8 pixels. Text does not wrap.
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        let mut cursor_x = x;
        for ch in text.chars() {
            if cursor_x >= self.width {
                break;
            }
            self.draw_char(cursor_x, y, ch, fg, bg);
            cursor_x += 8;
        }
    }

    fn draw_char(&mut self, x: u32, y: u32, ch: char, fg: [u8; 3], bg: [u8; 3]) {
        let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        for (row_idx, row) in glyph.iter().enumerate() {
            let py = y + row_idx as u32;
            if py >= self.height {
                break;
            }
            for bit in 0..8 {
                let px = x + bit;
                if px >= self.width {
                    break;
                }
                // font8x8 stores LSB as leftmost pixel
                let color = if (row >> bit) & 1 == 1 { fg } else { bg };
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Get the color of a pixel (black outside the buffer)
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        [self.buffer[idx], self.buffer[idx + 1], self.buffer[idx + 2]]
    }

    /// Set the color of a pixel; writes outside the buffer are ignored
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        self.buffer[idx..idx + 3].copy_from_slice(&color);
    }

    /// Encode the framebuffer as PNG bytes
    pub fn to_png(&self) -> DriverResult<Vec<u8>> {
        let img: RgbImage = ImageBuffer::from_raw(self.width, self.height, self.buffer.clone())
            .ok_or_else(|| DriverError::Screenshot("buffer size does not match dimensions".to_string()))?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| DriverError::Screenshot(format!("Failed to encode PNG: {}", e)))?;
        Ok(bytes)
    }

    /// Encode and wrap as a [`PixelArtifact`]
    pub fn to_artifact(&self) -> DriverResult<PixelArtifact> {
        Ok(PixelArtifact {
            image_data: self.to_png()?,
            width: self.width,
            height: self.height,
        })
    }
}

/// How a mock URL behaves
///
/// Readiness counters are polls answered "not ready" before the probe
/// reports ready; `None` means the probe never becomes ready. Counters restart
/// on every navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBehavior {
    pub fonts_ready_after: Option<u32>,
    pub images_ready_after: Option<u32>,
    pub network_idle_after: Option<u32>,
    pub elements_ready_after: Option<u32>,
    /// Navigations to this URL that never settle before it behaves as above
    pub unstable_visits: u32,
    /// Navigation fails with this message
    pub navigation_error: Option<String>,
    /// Screenshots fail with this message
    pub screenshot_error: Option<String>,
    /// `scroll_into_view` targets present on the page
    pub scroll_targets: Vec<String>,
    /// Time each navigation takes
    pub load_time: Duration,
    /// Background color of rendered frames
    pub color: [u8; 3],
}

impl Default for PageBehavior {
    fn default() -> Self {
        Self {
            fonts_ready_after: Some(0),
            images_ready_after: Some(0),
            network_idle_after: Some(0),
            elements_ready_after: Some(0),
            unstable_visits: 0,
            navigation_error: None,
            screenshot_error: None,
            scroll_targets: vec!["footer".to_string()],
            load_time: Duration::ZERO,
            color: [240, 240, 240],
        }
    }
}

impl PageBehavior {
    /// Stable immediately
    pub fn stable() -> Self {
        Self::default()
    }

    /// Fonts never finish loading
    pub fn fonts_never_load() -> Self {
        Self {
            fonts_ready_after: None,
            ..Self::default()
        }
    }

    /// Network never goes idle
    pub fn never_idle() -> Self {
        Self {
            network_idle_after: None,
            ..Self::default()
        }
    }

    /// Navigation always fails
    pub fn broken(message: impl Into<String>) -> Self {
        Self {
            navigation_error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Settles only from the `visits + 1`-th navigation on
    pub fn unstable_for(visits: u32) -> Self {
        Self {
            unstable_visits: visits,
            ..Self::default()
        }
    }
}

/// Everything a [`MockPage`] was asked to do, in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockPageLog {
    pub navigations: Vec<String>,
    /// When each navigation started, parallel to `navigations`
    pub navigated_at: Vec<Instant>,
    /// Preconditions requested, satisfied or not
    pub preconditions: Vec<String>,
    pub viewports: Vec<(u32, u32)>,
    pub probes: Vec<Probe>,
    pub screenshots: usize,
}

impl MockPageLog {
    /// Number of times `probe` was executed
    pub fn probe_count(&self, probe: Probe) -> usize {
        self.probes.iter().filter(|p| **p == probe).count()
    }
}

/// A scripted [`PageDriver`]
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    behaviors: HashMap<String, PageBehavior>,
    default_behavior: PageBehavior,
    preconditions: HashSet<String>,
    current_url: Option<String>,
    viewport: (u32, u32),
    visits: HashMap<String, u32>,
    polls: HashMap<Probe, u32>,
    log: MockPageLog,
}

impl MockPage {
    pub fn new() -> Self {
        Self {
            viewport: (1920, 1080),
            ..Default::default()
        }
    }

    /// Behavior for URLs without a specific entry
    pub fn default_behavior(mut self, behavior: PageBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Precondition this page can establish; all others are refused
    pub fn satisfies(mut self, precondition: impl Into<String>) -> Self {
        self.preconditions.insert(precondition.into());
        self
    }

    /// Behavior for one URL
    pub fn page(mut self, url: impl Into<String>, behavior: PageBehavior) -> Self {
        self.behaviors.insert(url.into(), behavior);
        self
    }

    pub fn log(&self) -> &MockPageLog {
        &self.log
    }

    fn behavior(&self) -> &PageBehavior {
        self.current_url
            .as_ref()
            .and_then(|url| self.behaviors.get(url))
            .unwrap_or(&self.default_behavior)
    }

    fn settled_this_visit(&self) -> bool {
        let visits = self
            .current_url
            .as_ref()
            .and_then(|url| self.visits.get(url))
            .copied()
            .unwrap_or(0);
        visits > self.behavior().unstable_visits
    }

    /// Answer a readiness probe and advance its poll counter
    fn readiness(&mut self, probe: Probe, ready_after: Option<u32>) -> bool {
        let settled = self.settled_this_visit();
        let polls = self.polls.entry(probe).or_insert(0);
        let seen = *polls;
        *polls += 1;
        settled && ready_after.is_some_and(|after| seen >= after)
    }

    /// Render the current page into a frame
    fn render(&self) -> MockFramebuffer {
        let (width, height) = self.viewport;
        let behavior = self.behavior();
        let mut fb = MockFramebuffer::with_color(width, height, behavior.color);
        fb.draw_rect(0, 0, width, 24, [40, 40, 40]);
        let title = self.current_url.as_deref().unwrap_or("about:blank");
        fb.draw_text(8, 8, title, [255, 255, 255], [40, 40, 40]);
        let dims = format!("{}x{}", width, height);
        fb.draw_text(8, 32, &dims, [0, 0, 0], behavior.color);
        fb
    }
}

#[async_trait]
impl PageDriver for MockPage {
    async fn navigate(&mut self, url: &str) -> DriverResult<()> {
        self.log.navigations.push(url.to_string());
        self.log.navigated_at.push(Instant::now());
        let behavior = self.behaviors.get(url).unwrap_or(&self.default_behavior).clone();

        if !behavior.load_time.is_zero() {
            tokio::time::sleep(behavior.load_time).await;
        }
        if let Some(message) = behavior.navigation_error {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                message,
            });
        }

        *self.visits.entry(url.to_string()).or_insert(0) += 1;
        self.current_url = Some(url.to_string());
        self.polls.clear();
        Ok(())
    }

    async fn set_viewport(&mut self, width: u32, height: u32) -> DriverResult<()> {
        self.log.viewports.push((width, height));
        if width == 0 || height == 0 {
            return Err(DriverError::Viewport {
                width,
                height,
                message: "dimensions must be non-zero".to_string(),
            });
        }
        self.viewport = (width, height);
        Ok(())
    }

    async fn execute_script(&mut self, script: &str) -> DriverResult<serde_json::Value> {
        let probe = Probe::from_script(script)
            .ok_or_else(|| DriverError::Script("mock page only understands stability probes".to_string()))?;
        self.log.probes.push(probe);

        let behavior = self.behavior().clone();
        let value = match probe {
            Probe::Suppress => serde_json::json!(0),
            Probe::ScrollTop => serde_json::json!(true),
            Probe::ScrollTo => {
                let found = behavior.scroll_targets.iter().any(|t| script.contains(&format!("\"{}\"", t)));
                serde_json::json!(found)
            }
            Probe::ElementsVisible => serde_json::json!(self.readiness(probe, behavior.elements_ready_after)),
            Probe::Fonts => serde_json::json!(self.readiness(probe, behavior.fonts_ready_after)),
            Probe::Images => serde_json::json!(self.readiness(probe, behavior.images_ready_after)),
            Probe::NetworkIdle => serde_json::json!(self.readiness(probe, behavior.network_idle_after)),
        };
        Ok(value)
    }

    async fn screenshot(&mut self) -> DriverResult<PixelArtifact> {
        if let Some(message) = &self.behavior().screenshot_error {
            return Err(DriverError::Screenshot(message.clone()));
        }
        self.log.screenshots += 1;
        self.render().to_artifact()
    }

    async fn ensure_precondition(&mut self, precondition: &str) -> DriverResult<()> {
        self.log.preconditions.push(precondition.to_string());
        if self.preconditions.contains(precondition) {
            Ok(())
        } else {
            Err(DriverError::Precondition(precondition.to_string()))
        }
    }

    fn source_type(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stability::{fonts_script, network_idle_script, scroll_to_script};

    #[test]
    fn test_mock_framebuffer_new() {
        let fb = MockFramebuffer::new(100, 50);
        assert_eq!(fb.width(), 100);
        assert_eq!(fb.height(), 50);
        assert_eq!(fb.get_pixel(0, 0), [0, 0, 0]);
    }

    #[test]
    fn test_mock_framebuffer_draw_rect_clips() {
        let mut fb = MockFramebuffer::new(20, 20);
        fb.draw_rect(15, 15, 100, 100, [255, 0, 0]);
        assert_eq!(fb.get_pixel(19, 19), [255, 0, 0]);
        assert_eq!(fb.get_pixel(14, 14), [0, 0, 0]);
    }

    #[test]
    fn test_mock_framebuffer_draw_text() {
        let mut fb = MockFramebuffer::new(64, 16);
        fb.draw_text(0, 0, "H", [255, 255, 255], [0, 0, 0]);
        let lit = (0..8).flat_map(|y| (0..8).map(move |x| (x, y))).filter(|&(x, y)| fb.get_pixel(x, y) == [255, 255, 255]).count();
        assert!(lit > 0, "glyph should light some pixels");
    }

    #[test]
    fn test_mock_framebuffer_png_roundtrip() {
        let mut fb = MockFramebuffer::new(32, 32);
        fb.fill([100, 150, 200]);
        fb.draw_rect(8, 8, 16, 16, [255, 0, 0]);

        let png = fb.to_png().unwrap();
        let fb2 = MockFramebuffer::from_png_bytes(&png).unwrap();

        assert_eq!(fb2.width(), fb.width());
        assert_eq!(fb2.get_pixel(0, 0), [100, 150, 200]);
        assert_eq!(fb2.get_pixel(10, 10), [255, 0, 0]);
    }

    #[tokio::test]
    async fn test_mock_page_readiness_counters_restart_on_navigation() {
        let behavior = PageBehavior {
            fonts_ready_after: Some(2),
            ..PageBehavior::default()
        };
        let mut page = MockPage::new().default_behavior(behavior);
        page.navigate("https://example.com").await.unwrap();

        let script = fonts_script();
        assert_eq!(page.execute_script(&script).await.unwrap(), serde_json::json!(false));
        assert_eq!(page.execute_script(&script).await.unwrap(), serde_json::json!(false));
        assert_eq!(page.execute_script(&script).await.unwrap(), serde_json::json!(true));

        page.navigate("https://example.com").await.unwrap();
        assert_eq!(page.execute_script(&script).await.unwrap(), serde_json::json!(false));
        assert_eq!(page.log().probe_count(Probe::Fonts), 4);
    }

    #[tokio::test]
    async fn test_mock_page_unstable_visits() {
        let mut page = MockPage::new().page("https://example.com/a", PageBehavior::unstable_for(1));
        let script = network_idle_script();

        page.navigate("https://example.com/a").await.unwrap();
        assert_eq!(page.execute_script(&script).await.unwrap(), serde_json::json!(false));

        page.navigate("https://example.com/a").await.unwrap();
        assert_eq!(page.execute_script(&script).await.unwrap(), serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_mock_page_errors() {
        let mut page = MockPage::new().page("https://example.com/down", PageBehavior::broken("502"));
        let err = page.navigate("https://example.com/down").await.unwrap_err();
        assert!(matches!(err, DriverError::Navigation { .. }));

        assert!(page.execute_script("return 1;").await.is_err());
        assert!(page.set_viewport(0, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_page_preconditions() {
        let mut page = MockPage::new().satisfies("logged-in");
        assert!(page.ensure_precondition("logged-in").await.is_ok());
        let err = page.ensure_precondition("cart-filled").await.unwrap_err();
        assert_eq!(err, DriverError::Precondition("cart-filled".to_string()));
        assert_eq!(page.log().preconditions, vec!["logged-in", "cart-filled"]);
    }

    #[tokio::test]
    async fn test_mock_page_screenshot_matches_viewport() {
        let mut page = MockPage::new();
        page.set_viewport(375, 667).await.unwrap();
        page.navigate("https://example.com").await.unwrap();

        let shot = page.screenshot().await.unwrap();
        assert_eq!((shot.width, shot.height), (375, 667));
        let decoded = MockFramebuffer::from_png_bytes(&shot.image_data).unwrap();
        assert_eq!(decoded.width(), 375);
        assert_eq!(page.log().screenshots, 1);

        let found = page.execute_script(&scroll_to_script("footer")).await.unwrap();
        assert_eq!(found, serde_json::json!(true));
        let missing = page.execute_script(&scroll_to_script(".search-overlay")).await.unwrap();
        assert_eq!(missing, serde_json::json!(false));
    }
}
