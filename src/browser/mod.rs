//! Narrow browser façade.
//!
//! Every component in this crate talks to the page only through
//! [`PageDriver`]. The production implementation is [`chromium::ChromeDriver`]
//! (native CDP via `chromiumoxide`); tests substitute a scripted fake.

pub mod chromium;
pub mod manager;

use crate::core::types::AccessibilityNode;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub use chromium::ChromeDriver;
pub use manager::BrowserSession;

/// How long `navigate` waits before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Return as soon as the navigation is committed.
    Commit,
    /// Wait for the load event.
    Load,
    /// Load event plus a resource-count quiet period (bounded).
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// The `index`-th match of `selector` in document order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    pub selector: String,
    pub index: usize,
}

impl ElementRef {
    pub fn first(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            index: 0,
        }
    }

    pub fn nth(selector: impl Into<String>, index: usize) -> Self {
        Self {
            selector: selector.into(),
            index,
        }
    }
}

/// One text field read relative to each container of a [`NodeQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldQuery {
    pub name: &'static str,
    pub selector: String,
    /// `true`: concatenate the text of every match; `false`: first match only.
    pub all: bool,
}

/// Structured DOM read: for every element matching `container`, return its
/// `id` plus the text of each field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeQuery {
    pub container: String,
    pub fields: Vec<FieldQuery>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl NodeSnapshot {
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageFormat {
    Png,
    Jpeg { quality: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotOptions {
    pub format: ImageFormat,
    /// Viewport-only when `false`.
    pub full_page: bool,
    /// Downscale factor in `(0, 1]`.
    pub scale: f64,
}

impl ShotOptions {
    /// Full-resolution PNG of the viewport, used for step evidence.
    pub fn evidence() -> Self {
        Self {
            format: ImageFormat::Png,
            full_page: false,
            scale: 1.0,
        }
    }

    pub fn compressed(scale: f64, quality: i64) -> Self {
        Self {
            format: ImageFormat::Jpeg { quality },
            full_page: false,
            scale,
        }
    }
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Number of elements currently matching `selector`.
    async fn count(&self, selector: &str) -> Result<usize>;

    /// Trimmed visible text of every element matching `selector`.
    async fn texts(&self, selector: &str) -> Result<Vec<String>>;

    async fn read_nodes(&self, query: &NodeQuery) -> Result<Vec<NodeSnapshot>>;

    async fn scroll_into_view(&self, target: &ElementRef) -> Result<()>;

    async fn hover(&self, target: &ElementRef) -> Result<()>;

    async fn click(&self, target: &ElementRef, button: MouseButton) -> Result<()>;

    /// Left click at viewport coordinates.
    async fn click_at(&self, x: f64, y: f64) -> Result<()>;

    /// Mouse-wheel scroll over `target` by `delta_y` CSS pixels (negative = up).
    async fn scroll_by(&self, target: &ElementRef, delta_y: f64) -> Result<()>;

    /// Insert text into the focused element.
    async fn type_text(&self, text: &str) -> Result<()>;

    /// Key or chord, e.g. `"Enter"`, `"Escape"`, `"Control+A"`.
    async fn press_key(&self, key: &str) -> Result<()>;

    async fn screenshot(&self, opts: &ShotOptions) -> Result<Vec<u8>>;

    /// `None` when the page exposes no accessibility tree.
    async fn accessibility_snapshot(&self) -> Result<Option<AccessibilityNode>>;
}

/// Poll `count(selector)` until it is non-zero or `budget` elapses.
///
/// Driver errors count as "not there yet"; the wait never fails.
pub async fn wait_for_selector(driver: &dyn PageDriver, selector: &str, budget: Duration) -> bool {
    wait_for_count(driver, selector, budget, |n| n > 0).await
}

/// Poll until `selector` matches nothing or `budget` elapses.
pub async fn wait_for_detach(driver: &dyn PageDriver, selector: &str, budget: Duration) -> bool {
    wait_for_count(driver, selector, budget, |n| n == 0).await
}

/// Poll `texts(selector)` until `accept` holds or `budget` elapses.
pub async fn wait_for_text(
    driver: &dyn PageDriver,
    selector: &str,
    budget: Duration,
    accept: impl Fn(&[String]) -> bool,
) -> bool {
    const POLL: Duration = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        if let Ok(texts) = driver.texts(selector).await {
            if accept(&texts) {
                return true;
            }
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(POLL.min(deadline - now)).await;
    }
}

async fn wait_for_count(
    driver: &dyn PageDriver,
    selector: &str,
    budget: Duration,
    done: impl Fn(usize) -> bool,
) -> bool {
    const POLL: Duration = Duration::from_millis(100);
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        if let Ok(n) = driver.count(selector).await {
            if done(n) {
                return true;
            }
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(POLL.min(deadline - now)).await;
    }
}
