use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical page or page state under test
///
/// Routes are plain data. Page-specific behaviour (extra elements to hide,
/// elements that must be visible before capture) is declared here instead of
/// living in per-page code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Human-readable label, the first component of every identifier
    pub label: String,

    /// URL path appended to the configured base URL
    pub path: String,

    /// Preconditions the session must satisfy before navigation (e.g. "logged-in")
    #[serde(default)]
    pub preconditions: Vec<String>,

    /// Optional scenario suffix (e.g. "search-open", "footer")
    #[serde(default)]
    pub scenario: Option<String>,

    /// Selectors hidden before capture in addition to the global list
    #[serde(default)]
    pub suppress_selectors: Vec<String>,

    /// Selectors that must be visible before the page counts as ready
    #[serde(default)]
    pub ready_selectors: Vec<String>,

    /// Selector scrolled into view after the page settles
    #[serde(default)]
    pub scroll_to: Option<String>,

    /// Free-form markers used to select subsets of a plan ("smoke", "critical")
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Route {
    /// Create a route with a label and path and nothing else
    pub fn new(label: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
            preconditions: Vec::new(),
            scenario: None,
            suppress_selectors: Vec::new(),
            ready_selectors: Vec::new(),
            scroll_to: None,
            tags: Vec::new(),
        }
    }

    pub fn scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn precondition(mut self, precondition: impl Into<String>) -> Self {
        self.preconditions.push(precondition.into());
        self
    }

    pub fn suppress(mut self, selector: impl Into<String>) -> Self {
        self.suppress_selectors.push(selector.into());
        self
    }

    pub fn ready_when_visible(mut self, selector: impl Into<String>) -> Self {
        self.ready_selectors.push(selector.into());
        self
    }

    pub fn scroll_to(mut self, selector: impl Into<String>) -> Self {
        self.scroll_to = Some(selector.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Whether this route carries the given marker
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Join this route's path onto a base URL without doubling slashes
    pub fn url(&self, base_url: &str) -> String {
        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            return self.path.clone();
        }
        let base = base_url.trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path)
        }
    }
}

/// A (width, height) pair representing a device class
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in CSS pixels
    pub width: u32,
    /// Height in CSS pixels
    pub height: u32,
    /// Optional device label (e.g. "iPhone SE")
    #[serde(default)]
    pub label: Option<String>,
}

/// Named device presets: (name, width, height, device label)
const PRESETS: &[(&str, u32, u32, &str)] = &[
    ("desktop-fhd", 1920, 1080, "Desktop Full HD"),
    ("desktop-hd", 1366, 768, "Desktop HD"),
    ("tablet-landscape", 1024, 768, "Tablet Landscape"),
    ("tablet-portrait", 768, 1024, "Tablet Portrait"),
    ("iphone-pro-max", 428, 926, "iPhone Pro Max"),
    ("iphone-11", 414, 896, "iPhone 11"),
    ("pixel", 393, 851, "Android Pixel"),
    ("iphone-12", 390, 844, "iPhone 12"),
    ("iphone-se", 375, 667, "iPhone SE"),
];

impl Viewport {
    /// Create an unlabeled viewport
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            label: None,
        }
    }

    /// Attach a device label
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Get the dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Parse a preset name ("iphone-se", "desktop-fhd", ...) or a "WxH" string
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_lowercase();
        if let Some((_, w, h, label)) = PRESETS.iter().find(|(name, ..)| *name == lower) {
            return Some(Viewport::new(*w, *h).labeled(*label));
        }

        let parts: Vec<&str> = lower.split('x').collect();
        if parts.len() == 2 {
            let width = parts[0].trim().parse().ok()?;
            let height = parts[1].trim().parse().ok()?;
            Some(Viewport::new(width, height))
        } else {
            None
        }
    }

    /// All presets, widest first
    pub fn all_presets() -> Vec<Viewport> {
        PRESETS
            .iter()
            .map(|(_, w, h, label)| Viewport::new(*w, *h).labeled(*label))
            .collect()
    }

    /// Whether both dimensions are non-zero
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Deterministic, run-unique name of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotIdentifier(String);

impl SnapshotIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SnapshotIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One route paired with one viewport, ready to be captured
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureUnit {
    /// Position in the full (unsharded) plan
    pub index: usize,
    pub route: Route,
    pub viewport: Viewport,
    pub identifier: SnapshotIdentifier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_parse_presets() {
        let se = Viewport::parse("iphone-se").unwrap();
        assert_eq!(se.dimensions(), (375, 667));
        assert_eq!(se.label.as_deref(), Some("iPhone SE"));
        assert_eq!(Viewport::parse("Desktop-FHD").unwrap().dimensions(), (1920, 1080));
    }

    #[test]
    fn test_viewport_parse_custom() {
        assert_eq!(Viewport::parse("1280x900"), Some(Viewport::new(1280, 900)));
        assert_eq!(Viewport::parse("100 x 30"), Some(Viewport::new(100, 30)));
    }

    #[test]
    fn test_viewport_parse_invalid() {
        assert_eq!(Viewport::parse("phone"), None);
        assert_eq!(Viewport::parse("100"), None);
        assert_eq!(Viewport::parse("axb"), None);
    }

    #[test]
    fn test_viewport_validity() {
        assert!(Viewport::new(1, 1).is_valid());
        assert!(!Viewport::new(0, 600).is_valid());
        assert!(!Viewport::new(800, 0).is_valid());
    }

    #[test]
    fn test_presets_widest_first() {
        let widths: Vec<u32> = Viewport::all_presets().iter().map(|v| v.width).collect();
        assert!(widths.windows(2).all(|w| w[0] >= w[1]), "widths: {:?}", widths);
        assert_eq!(widths.first(), Some(&1920));
        assert_eq!(widths.last(), Some(&375));
    }

    #[test]
    fn test_route_url_joining() {
        let home = Route::new("home", "/");
        assert_eq!(home.url("https://www.example.com/"), "https://www.example.com");

        let checkout = Route::new("checkout", "/checkout");
        assert_eq!(checkout.url("https://www.example.com"), "https://www.example.com/checkout");

        let absolute = Route::new("other", "https://other.example.com/x");
        assert_eq!(absolute.url("https://www.example.com"), "https://other.example.com/x");
    }

    #[test]
    fn test_route_deserializes_with_defaults() {
        let route: Route = serde_json::from_str(r#"{"label": "home", "path": "/"}"#).unwrap();
        assert_eq!(route, Route::new("home", "/"));
    }
}
