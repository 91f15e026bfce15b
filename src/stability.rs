//! Page stability gate.
//!
//! Decides when a navigated page is safe to photograph. Signals run in a
//! fixed order, each with its own timeout budget:
//!
//! 1. suppress dynamic elements (synchronous DOM mutation, no wait)
//! 2. route-specific ready selectors visible
//! 3. web fonts loaded
//! 4. images loaded
//! 5. network idle
//! 6. animation settle delay
//!
//! Later signals assume earlier ones hold: measuring settlement before fonts
//! load produces false negatives. The first signal to exhaust its budget ends
//! the gate with [`StabilityOutcome::TimedOut`]; disabled signals are never
//! evaluated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::driver::{DriverError, DriverResult, PageDriver};
use crate::plan::Route;

/// Default font-load budget (milliseconds)
pub const DEFAULT_FONTS_TIMEOUT_MS: u64 = 5_000;

/// Default image-load budget (milliseconds)
pub const DEFAULT_IMAGES_TIMEOUT_MS: u64 = 10_000;

/// Default network-idle budget (milliseconds)
pub const DEFAULT_NETWORK_IDLE_TIMEOUT_MS: u64 = 5_000;

/// Default budget for route ready selectors (milliseconds)
pub const DEFAULT_ELEMENTS_TIMEOUT_MS: u64 = 15_000;

/// Default settle delay after the polling signals (milliseconds)
pub const DEFAULT_ANIMATION_DELAY_MS: u64 = 500;

/// Upper bound on the settle delay (milliseconds)
pub const MAX_ANIMATION_DELAY_MS: u64 = 1_000;

/// Default interval between readiness polls (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Selectors hidden on every page unless configured otherwise
pub const DEFAULT_SUPPRESS_SELECTORS: &[&str] = &[
    ".timestamp",
    "[data-timestamp]",
    ".live-count",
    ".real-time-counter",
    "[data-dynamic='true']",
];

/// A readiness check performed by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    SuppressDynamic,
    ElementsVisible,
    FontsLoaded,
    ImagesLoaded,
    NetworkIdle,
    AnimationSettled,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::SuppressDynamic => "suppress-dynamic",
            Signal::ElementsVisible => "elements-visible",
            Signal::FontsLoaded => "fonts-loaded",
            Signal::ImagesLoaded => "images-loaded",
            Signal::NetworkIdle => "network-idle",
            Signal::AnimationSettled => "animation-settled",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pass through the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StabilityOutcome {
    /// Every enabled signal reported ready within its budget
    Stable,
    /// `signal` did not report ready within `waited`
    TimedOut {
        signal: Signal,
        #[serde(with = "millis")]
        waited: Duration,
    },
}

impl StabilityOutcome {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilityOutcome::Stable)
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Enable flag and optional budget for one polling signal
///
/// Deserializes from `true` / `false`, a bare number of milliseconds, or
/// `{ "enabled": .., "timeout_ms": .. }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SignalSetting")]
pub struct SignalToggle {
    pub enabled: bool,
    /// Budget in milliseconds; `None` uses the signal's default
    pub timeout_ms: Option<u64>,
}

impl SignalToggle {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            timeout_ms: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            enabled: true,
            timeout_ms: Some(timeout_ms),
        }
    }

    fn budget(&self, default_ms: u64) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(default_ms))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SignalSetting {
    Flag(bool),
    Millis(u64),
    Detailed {
        #[serde(default = "enabled_by_default")]
        enabled: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

fn enabled_by_default() -> bool {
    true
}

impl From<SignalSetting> for SignalToggle {
    fn from(setting: SignalSetting) -> Self {
        match setting {
            SignalSetting::Flag(enabled) => Self {
                enabled,
                timeout_ms: None,
            },
            SignalSetting::Millis(ms) => Self::with_timeout_ms(ms),
            SignalSetting::Detailed { enabled, timeout_ms } => Self { enabled, timeout_ms },
        }
    }
}

/// Which signals the gate checks and how long each may take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub fonts: SignalToggle,
    pub images: SignalToggle,
    pub network_idle: SignalToggle,
    /// Budget for `ready_selectors`; only checked when selectors exist
    pub elements: SignalToggle,
    pub ready_selectors: Vec<String>,
    pub animation_delay_ms: u64,
    pub suppress_selectors: Vec<String>,
    /// Inject a style that zeroes animation and transition durations
    pub freeze_animations: bool,
    pub scroll_to_top: bool,
    pub poll_interval_ms: u64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            fonts: SignalToggle::enabled(),
            images: SignalToggle::enabled(),
            network_idle: SignalToggle::enabled(),
            elements: SignalToggle::enabled(),
            ready_selectors: Vec::new(),
            animation_delay_ms: DEFAULT_ANIMATION_DELAY_MS,
            suppress_selectors: DEFAULT_SUPPRESS_SELECTORS.iter().map(|s| s.to_string()).collect(),
            freeze_animations: true,
            scroll_to_top: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl StabilityConfig {
    /// A configuration with every signal off; useful as a base for tests
    pub fn none() -> Self {
        Self {
            fonts: SignalToggle::disabled(),
            images: SignalToggle::disabled(),
            network_idle: SignalToggle::disabled(),
            elements: SignalToggle::disabled(),
            ready_selectors: Vec::new(),
            animation_delay_ms: 0,
            suppress_selectors: Vec::new(),
            freeze_animations: false,
            scroll_to_top: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    /// Merge a route's own selectors into this configuration
    pub fn for_route(&self, route: &Route) -> StabilityConfig {
        let mut config = self.clone();
        config.suppress_selectors.extend(route.suppress_selectors.iter().cloned());
        config.ready_selectors.extend(route.ready_selectors.iter().cloned());
        config
    }

    fn animation_delay(&self) -> Duration {
        Duration::from_millis(self.animation_delay_ms.min(MAX_ANIMATION_DELAY_MS))
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Scripts the gate sends to the page
///
/// Every script starts with a `/* page-vision:<probe> */` tag so drivers
/// and tests can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Probe {
    Suppress,
    ElementsVisible,
    Fonts,
    Images,
    NetworkIdle,
    ScrollTop,
    ScrollTo,
}

const PROBE_TAG: &str = "/* page-vision:";

impl Probe {
    fn tag(&self) -> &'static str {
        match self {
            Probe::Suppress => "suppress",
            Probe::ElementsVisible => "elements",
            Probe::Fonts => "fonts",
            Probe::Images => "images",
            Probe::NetworkIdle => "network-idle",
            Probe::ScrollTop => "scroll-top",
            Probe::ScrollTo => "scroll-to",
        }
    }

    /// Recover the probe from a script built by this module
    pub fn from_script(script: &str) -> Option<Probe> {
        let rest = script.trim_start().strip_prefix(PROBE_TAG)?;
        let tag = rest.split(" */").next()?;
        [
            Probe::Suppress,
            Probe::ElementsVisible,
            Probe::Fonts,
            Probe::Images,
            Probe::NetworkIdle,
            Probe::ScrollTop,
            Probe::ScrollTo,
        ]
        .into_iter()
        .find(|p| p.tag() == tag)
    }

    fn header(&self) -> String {
        format!("{}{} */\n", PROBE_TAG, self.tag())
    }
}

/// Build the suppression script for `selectors`
pub fn suppress_script(selectors: &[String], freeze_animations: bool) -> String {
    let selectors = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{}return (function (selectors, freeze) {{
  var hidden = 0;
  selectors.forEach(function (sel) {{
    try {{
      document.querySelectorAll(sel).forEach(function (el) {{
        el.style.setProperty('display', 'none', 'important');
        hidden += 1;
      }});
    }} catch (e) {{}}
  }});
  if (freeze && !document.getElementById('page-vision-freeze')) {{
    var style = document.createElement('style');
    style.id = 'page-vision-freeze';
    style.textContent = '*, *::before, *::after {{ animation-duration: 0s !important; animation-delay: 0s !important; transition-duration: 0s !important; transition-delay: 0s !important; caret-color: transparent !important; }}';
    document.head.appendChild(style);
  }}
  return hidden;
}})({}, {});",
        Probe::Suppress.header(),
        selectors,
        freeze_animations
    )
}

/// Build the visibility check for route ready selectors
pub fn elements_script(selectors: &[String]) -> String {
    let selectors = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{}return (function (selectors) {{
  return selectors.every(function (sel) {{
    var el = document.querySelector(sel);
    if (!el) {{ return false; }}
    var rect = el.getBoundingClientRect();
    var style = window.getComputedStyle(el);
    return rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden' && style.display !== 'none';
  }});
}})({});",
        Probe::ElementsVisible.header(),
        selectors
    )
}

pub fn fonts_script() -> String {
    format!(
        "{}return document.fonts ? document.fonts.status === 'loaded' : true;",
        Probe::Fonts.header()
    )
}

pub fn images_script() -> String {
    format!(
        "{}return Array.from(document.images).every(function (img) {{ return img.complete; }});",
        Probe::Images.header()
    )
}

pub fn network_idle_script() -> String {
    format!(
        "{}return document.readyState === 'complete' && (typeof window.jQuery === 'undefined' || window.jQuery.active === 0);",
        Probe::NetworkIdle.header()
    )
}

pub fn scroll_top_script() -> String {
    format!("{}window.scrollTo(0, 0); return true;", Probe::ScrollTop.header())
}

pub fn scroll_to_script(selector: &str) -> String {
    let selector = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "{}var el = document.querySelector({}); if (!el) {{ return false; }} el.scrollIntoView({{block: 'end', behavior: 'instant'}}); return true;",
        Probe::ScrollTo.header(),
        selector
    )
}

/// JavaScript truthiness of a script result
pub fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

/// Wait until `page` is safe to capture
///
/// Driver errors are returned as `Err`; a signal running out of budget is a
/// normal [`StabilityOutcome::TimedOut`] for the caller to act on.
pub async fn await_stable<P>(page: &mut P, config: &StabilityConfig) -> DriverResult<StabilityOutcome>
where
    P: PageDriver + ?Sized,
{
    if !config.suppress_selectors.is_empty() || config.freeze_animations {
        let hidden = page
            .execute_script(&suppress_script(&config.suppress_selectors, config.freeze_animations))
            .await?;
        debug!(selectors = config.suppress_selectors.len(), hidden = %hidden, "suppressed dynamic elements");
    }

    let polled = [
        (
            Signal::ElementsVisible,
            config.elements.enabled && !config.ready_selectors.is_empty(),
            config.elements.budget(DEFAULT_ELEMENTS_TIMEOUT_MS),
        ),
        (Signal::FontsLoaded, config.fonts.enabled, config.fonts.budget(DEFAULT_FONTS_TIMEOUT_MS)),
        (Signal::ImagesLoaded, config.images.enabled, config.images.budget(DEFAULT_IMAGES_TIMEOUT_MS)),
        (
            Signal::NetworkIdle,
            config.network_idle.enabled,
            config.network_idle.budget(DEFAULT_NETWORK_IDLE_TIMEOUT_MS),
        ),
    ];

    for (signal, enabled, budget) in polled {
        if !enabled {
            continue;
        }
        let script = match signal {
            Signal::ElementsVisible => elements_script(&config.ready_selectors),
            Signal::FontsLoaded => fonts_script(),
            Signal::ImagesLoaded => images_script(),
            _ => network_idle_script(),
        };

        let started = Instant::now();
        if !poll_until_ready(page, &script, budget, config.poll_interval()).await? {
            let waited = started.elapsed();
            warn!(signal = %signal, waited_ms = waited.as_millis() as u64, "page did not stabilize");
            return Ok(StabilityOutcome::TimedOut { signal, waited });
        }
        debug!(signal = %signal, elapsed_ms = started.elapsed().as_millis() as u64, "signal ready");
    }

    if config.animation_delay_ms > MAX_ANIMATION_DELAY_MS {
        warn!(
            configured_ms = config.animation_delay_ms,
            max_ms = MAX_ANIMATION_DELAY_MS,
            "animation delay capped"
        );
    }
    let delay = config.animation_delay();
    if !delay.is_zero() {
        sleep(delay).await;
        debug!(signal = %Signal::AnimationSettled, delay_ms = delay.as_millis() as u64, "signal ready");
    }

    if config.scroll_to_top {
        page.execute_script(&scroll_top_script()).await?;
    }

    Ok(StabilityOutcome::Stable)
}

/// Scroll `selector` into view; a missing element is a script error
pub async fn scroll_into_view<P>(page: &mut P, selector: &str) -> DriverResult<()>
where
    P: PageDriver + ?Sized,
{
    let found = page.execute_script(&scroll_to_script(selector)).await?;
    if is_truthy(&found) {
        Ok(())
    } else {
        Err(DriverError::Script(format!("no element matches '{}'", selector)))
    }
}

/// Poll `script` until it returns a truthy value or `budget` elapses
async fn poll_until_ready<P>(page: &mut P, script: &str, budget: Duration, interval: Duration) -> DriverResult<bool>
where
    P: PageDriver + ?Sized,
{
    let polling = async {
        loop {
            let value = page.execute_script(script).await?;
            if is_truthy(&value) {
                return Ok::<(), DriverError>(());
            }
            sleep(interval).await;
        }
    };

    match timeout(budget, polling).await {
        Ok(Ok(())) => Ok(true),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockPage, PageBehavior};
    use serde_json::json;

    #[test]
    fn test_probe_round_trip_through_scripts() {
        let selectors = vec![".timestamp".to_string()];
        assert_eq!(Probe::from_script(&suppress_script(&selectors, true)), Some(Probe::Suppress));
        assert_eq!(Probe::from_script(&elements_script(&selectors)), Some(Probe::ElementsVisible));
        assert_eq!(Probe::from_script(&fonts_script()), Some(Probe::Fonts));
        assert_eq!(Probe::from_script(&images_script()), Some(Probe::Images));
        assert_eq!(Probe::from_script(&network_idle_script()), Some(Probe::NetworkIdle));
        assert_eq!(Probe::from_script(&scroll_top_script()), Some(Probe::ScrollTop));
        assert_eq!(Probe::from_script(&scroll_to_script("footer")), Some(Probe::ScrollTo));
        assert_eq!(Probe::from_script("return 1;"), None);
    }

    #[test]
    fn test_suppress_script_embeds_selectors_as_json() {
        let selectors = vec!["[data-dynamic='true']".to_string(), ".live-count".to_string()];
        let script = suppress_script(&selectors, false);
        assert!(script.contains(r#"["[data-dynamic='true']",".live-count"]"#));
        assert!(script.trim_end().ends_with(", false);"));
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(3)));
        assert!(is_truthy(&json!("loaded")));
        assert!(is_truthy(&json!([])));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&serde_json::Value::Null));
    }

    #[test]
    fn test_signal_toggle_forms() {
        let config: StabilityConfig = serde_json::from_value(json!({
            "fonts": false,
            "images": 2500,
            "network_idle": { "timeout_ms": 750 },
            "animation_delay_ms": 200
        }))
        .unwrap();

        assert_eq!(config.fonts, SignalToggle::disabled());
        assert_eq!(config.images, SignalToggle::with_timeout_ms(2500));
        assert_eq!(config.network_idle, SignalToggle::with_timeout_ms(750));
        assert_eq!(config.animation_delay_ms, 200);
        // Unspecified fields keep their defaults
        assert!(config.freeze_animations);
        assert_eq!(config.suppress_selectors.len(), DEFAULT_SUPPRESS_SELECTORS.len());
    }

    #[test]
    fn test_for_route_merges_selectors() {
        let route = Route::new("home", "/")
            .suppress(".rotating-banner")
            .ready_when_visible(".hero-banner");
        let merged = StabilityConfig::default().for_route(&route);
        assert_eq!(merged.suppress_selectors.last().map(String::as_str), Some(".rotating-banner"));
        assert_eq!(merged.ready_selectors, vec![".hero-banner".to_string()]);
    }

    async fn navigated(behavior: PageBehavior) -> MockPage {
        let mut page = MockPage::new().default_behavior(behavior);
        page.navigate("https://shop.test").await.unwrap();
        page
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_fonts_never_block() {
        let mut page = navigated(PageBehavior::fonts_never_load()).await;
        let config = StabilityConfig {
            fonts: SignalToggle::disabled(),
            ..StabilityConfig::default()
        };

        let outcome = await_stable(&mut page, &config).await.unwrap();

        assert_eq!(outcome, StabilityOutcome::Stable);
        assert_eq!(page.log().probe_count(Probe::Fonts), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_probed_in_order() {
        let mut page = navigated(PageBehavior::stable()).await;
        let config = StabilityConfig {
            ready_selectors: vec![".hero-banner".to_string()],
            animation_delay_ms: 0,
            ..StabilityConfig::default()
        };

        let outcome = await_stable(&mut page, &config).await.unwrap();

        assert!(outcome.is_stable());
        assert_eq!(
            page.log().probes,
            vec![
                Probe::Suppress,
                Probe::ElementsVisible,
                Probe::Fonts,
                Probe::Images,
                Probe::NetworkIdle,
                Probe::ScrollTop,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_exhausted_signal_ends_gate() {
        let behavior = PageBehavior {
            images_ready_after: None,
            ..PageBehavior::stable()
        };
        let mut page = navigated(behavior).await;
        let config = StabilityConfig {
            images: SignalToggle::with_timeout_ms(2_000),
            ..StabilityConfig::default()
        };

        let outcome = await_stable(&mut page, &config).await.unwrap();

        match outcome {
            StabilityOutcome::TimedOut { signal, waited } => {
                assert_eq!(signal, Signal::ImagesLoaded);
                assert!(waited >= Duration::from_millis(2_000), "waited {:?}", waited);
                assert!(waited < Duration::from_millis(2_100), "waited {:?}", waited);
            }
            other => panic!("expected a timeout, got {:?}", other),
        }
        let log = page.log();
        assert_eq!(log.probe_count(Probe::Fonts), 1);
        assert_eq!(log.probe_count(Probe::NetworkIdle), 0);
        assert_eq!(log.probe_count(Probe::ScrollTop), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_ready_within_budget_is_stable() {
        let behavior = PageBehavior {
            fonts_ready_after: Some(3),
            ..PageBehavior::stable()
        };
        let mut page = navigated(behavior).await;
        let config = StabilityConfig {
            fonts: SignalToggle::with_timeout_ms(1_000),
            ..StabilityConfig::none()
        };

        let started = Instant::now();
        let outcome = await_stable(&mut page, &config).await.unwrap();

        assert_eq!(outcome, StabilityOutcome::Stable);
        // Three polls answered "not ready", 100ms apart
        assert_eq!(page.log().probe_count(Probe::Fonts), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[test]
    fn test_animation_delay_capped() {
        let mut config = StabilityConfig::none();
        config.animation_delay_ms = 5_000;
        assert_eq!(config.animation_delay(), Duration::from_millis(MAX_ANIMATION_DELAY_MS));
    }
}
