//! `PageDriver` over a live chromiumoxide `Page`.
//!
//! DOM reads are single `Runtime.evaluate` round-trips; pointer and keyboard
//! input goes through the CDP `Input` domain so the page sees trusted events
//! (hover toolbars and context menus do not react to synthetic JS events).

use super::{ElementRef, ImageFormat, MouseButton, NodeQuery, NodeSnapshot, PageDriver, ShotOptions, WaitPolicy};
use crate::core::types::AccessibilityNode;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::accessibility::{
    AxNode, AxValue, EnableParams as AxEnableParams, GetFullAxTreeParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton as CdpMouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

pub struct ChromeDriver {
    page: Page,
}

#[derive(Debug, Deserialize)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[derive(Debug, Deserialize)]
struct ViewportSize {
    width: f64,
    height: f64,
}

/// JSON-encode a string for safe embedding in an evaluated script.
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

impl ChromeDriver {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn eval_json(&self, script: String) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| anyhow!("evaluate failed: {}", e))?;
        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }

    /// Bounding box of the target in viewport coordinates, `None` if absent.
    async fn rect_of(&self, target: &ElementRef) -> Result<Option<Rect>> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelectorAll({sel})[{idx}];
                if (!el) return null;
                const r = el.getBoundingClientRect();
                return {{ x: r.left, y: r.top, width: r.width, height: r.height }};
            }})()"#,
            sel = js_str(&target.selector),
            idx = target.index
        );
        let value = self.eval_json(script).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(serde_json::from_value::<Rect>(value).ok())
    }

    async fn center_of(&self, target: &ElementRef) -> Result<(f64, f64)> {
        let rect = self.rect_of(target).await?.ok_or_else(|| {
            anyhow!(
                "element not found: {} [{}]",
                target.selector,
                target.index
            )
        })?;
        Ok((rect.x + rect.width / 2.0, rect.y + rect.height / 2.0))
    }

    async fn mouse(
        &self,
        kind: DispatchMouseEventType,
        x: f64,
        y: f64,
        button: Option<CdpMouseButton>,
    ) -> Result<()> {
        let mut builder = DispatchMouseEventParams::builder().r#type(kind).x(x).y(y);
        if let Some(b) = button {
            builder = builder.button(b).click_count(1);
        }
        let params = builder
            .build()
            .map_err(|e| anyhow!("failed to build mouse event: {}", e))?;
        self.page
            .execute(params)
            .await
            .map_err(|e| anyhow!("mouse event failed: {}", e))?;
        Ok(())
    }

    async fn press_at(&self, x: f64, y: f64, button: CdpMouseButton) -> Result<()> {
        self.mouse(DispatchMouseEventType::MouseMoved, x, y, None).await?;
        self.mouse(DispatchMouseEventType::MousePressed, x, y, Some(button.clone()))
            .await?;
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.mouse(DispatchMouseEventType::MouseReleased, x, y, Some(button))
            .await
    }

    async fn key_event(
        &self,
        kind: DispatchKeyEventType,
        key: &KeySpec,
        modifiers: i64,
    ) -> Result<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(key.key.clone())
            .code(key.code.clone())
            .windows_virtual_key_code(key.vk)
            .modifiers(modifiers);
        if kind == DispatchKeyEventType::KeyDown && modifiers == 0 {
            if let Some(text) = key.text.as_ref() {
                builder = builder.text(text.clone());
            }
        }
        let params = builder
            .build()
            .map_err(|e| anyhow!("failed to build key event: {}", e))?;
        self.page
            .execute(params)
            .await
            .map_err(|e| anyhow!("key event failed: {}", e))?;
        Ok(())
    }
}

// ── Key chords ───────────────────────────────────────────────────────────────

struct KeySpec {
    key: String,
    code: String,
    vk: i64,
    text: Option<String>,
}

fn key_spec(name: &str) -> KeySpec {
    let simple = |key: &str, code: &str, vk: i64, text: Option<&str>| KeySpec {
        key: key.to_string(),
        code: code.to_string(),
        vk,
        text: text.map(str::to_string),
    };
    match name {
        "Enter" => simple("Enter", "Enter", 13, Some("\r")),
        "Escape" => simple("Escape", "Escape", 27, None),
        "Backspace" => simple("Backspace", "Backspace", 8, None),
        "Delete" => simple("Delete", "Delete", 46, None),
        "Tab" => simple("Tab", "Tab", 9, None),
        "PageUp" => simple("PageUp", "PageUp", 33, None),
        "PageDown" => simple("PageDown", "PageDown", 34, None),
        "Home" => simple("Home", "Home", 36, None),
        "End" => simple("End", "End", 35, None),
        other => {
            let ch = other.chars().next().unwrap_or(' ');
            if other.chars().count() == 1 && ch.is_ascii_alphanumeric() {
                let upper = ch.to_ascii_uppercase();
                let code = if ch.is_ascii_digit() {
                    format!("Digit{}", ch)
                } else {
                    format!("Key{}", upper)
                };
                KeySpec {
                    key: ch.to_ascii_lowercase().to_string(),
                    code,
                    vk: upper as i64,
                    text: Some(ch.to_string()),
                }
            } else {
                simple(other, other, 0, None)
            }
        }
    }
}

/// Split `"Control+Shift+A"` into a CDP modifier bitmask and the key name.
fn parse_chord(chord: &str) -> (i64, &str) {
    let mut modifiers = 0i64;
    let parts: Vec<&str> = chord.split('+').collect();
    let (key, mods) = match parts.split_last() {
        Some((k, m)) if !k.is_empty() => (*k, m),
        _ => (chord, &[][..]),
    };
    for m in mods {
        modifiers |= match m.to_ascii_lowercase().as_str() {
            "alt" => 1,
            "control" | "ctrl" => 2,
            "meta" | "cmd" => 4,
            "shift" => 8,
            _ => 0,
        };
    }
    (modifiers, key)
}

// ── Accessibility tree ───────────────────────────────────────────────────────

fn ax_string(value: &Option<AxValue>) -> String {
    value
        .as_ref()
        .and_then(|v| v.value.as_ref())
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_default()
}

/// Rebuild the recursive tree from CDP's flat node list. Ignored nodes are
/// elided and their children hoisted into the nearest kept ancestor.
pub fn build_ax_tree(nodes: &[AxNode]) -> Option<AccessibilityNode> {
    let by_id: HashMap<&str, &AxNode> = nodes
        .iter()
        .map(|n| (n.node_id.inner().as_str(), n))
        .collect();
    let root = nodes.iter().find(|n| n.parent_id.is_none()).or(nodes.first())?;

    fn kept_children(
        node: &AxNode,
        by_id: &HashMap<&str, &AxNode>,
        depth: usize,
    ) -> Vec<AccessibilityNode> {
        if depth > 512 {
            return Vec::new();
        }
        let mut out = Vec::new();
        for child_id in node.child_ids.iter().flatten() {
            let Some(child) = by_id.get(child_id.inner().as_str()) else {
                continue;
            };
            if child.ignored {
                out.extend(kept_children(child, by_id, depth + 1));
            } else {
                out.push(
                    AccessibilityNode::new(ax_string(&child.role), ax_string(&child.name))
                        .with_children(kept_children(child, by_id, depth + 1)),
                );
            }
        }
        out
    }

    Some(
        AccessibilityNode::new(ax_string(&root.role), ax_string(&root.name))
            .with_children(kept_children(root, &by_id, 0)),
    )
}

// ── Driver ───────────────────────────────────────────────────────────────────

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<()> {
        debug!("navigate: {} ({:?})", url, wait);
        self.page
            .goto(url)
            .await
            .map_err(|e| anyhow!("Failed to navigate to {}: {}", url, e))?;
        match wait {
            WaitPolicy::Commit => {}
            WaitPolicy::Load => {
                self.page
                    .wait_for_navigation()
                    .await
                    .map_err(|e| anyhow!("navigation wait failed: {}", e))?;
            }
            WaitPolicy::NetworkIdle => {
                self.page
                    .wait_for_navigation()
                    .await
                    .map_err(|e| anyhow!("navigation wait failed: {}", e))?;
                wait_until_stable(&self.page, 800, 8_000).await;
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| anyhow!("url lookup failed: {}", e))?
            .unwrap_or_default())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let value = self
            .eval_json(format!(
                "document.querySelectorAll({}).length",
                js_str(selector)
            ))
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        let value = self
            .eval_json(format!(
                "Array.from(document.querySelectorAll({})).map(e => (e.innerText || e.textContent || '').trim())",
                js_str(selector)
            ))
            .await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    async fn read_nodes(&self, query: &NodeQuery) -> Result<Vec<NodeSnapshot>> {
        let fields: Vec<serde_json::Value> = query
            .fields
            .iter()
            .map(|f| serde_json::json!({ "name": f.name, "selector": f.selector, "all": f.all }))
            .collect();
        let script = format!(
            r#"(() => {{
                const fields = {fields};
                const text = (n) => (n && (n.innerText || n.textContent) || '').trim();
                return Array.from(document.querySelectorAll({container})).map(el => {{
                    const out = {{}};
                    for (const f of fields) {{
                        if (f.all) {{
                            out[f.name] = Array.from(el.querySelectorAll(f.selector))
                                .map(text).filter(t => t.length > 0).join('\n');
                        }} else {{
                            out[f.name] = text(el.querySelector(f.selector));
                        }}
                    }}
                    return {{ id: el.id || '', fields: out }};
                }});
            }})()"#,
            fields = serde_json::Value::Array(fields),
            container = js_str(&query.container)
        );
        let value = self.eval_json(script).await?;
        serde_json::from_value(value).map_err(|e| anyhow!("read_nodes: bad payload: {}", e))
    }

    async fn scroll_into_view(&self, target: &ElementRef) -> Result<()> {
        let found = self
            .eval_json(format!(
                r#"(() => {{
                    const el = document.querySelectorAll({sel})[{idx}];
                    if (!el) return false;
                    el.scrollIntoView({{ block: 'center', inline: 'nearest' }});
                    return true;
                }})()"#,
                sel = js_str(&target.selector),
                idx = target.index
            ))
            .await?;
        if found.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(anyhow!("scroll_into_view: element not found: {}", target.selector))
        }
    }

    async fn hover(&self, target: &ElementRef) -> Result<()> {
        let (x, y) = self.center_of(target).await?;
        self.mouse(DispatchMouseEventType::MouseMoved, x, y, None).await
    }

    async fn click(&self, target: &ElementRef, button: MouseButton) -> Result<()> {
        let (x, y) = self.center_of(target).await?;
        let cdp_button = match button {
            MouseButton::Left => CdpMouseButton::Left,
            MouseButton::Right => CdpMouseButton::Right,
        };
        self.press_at(x, y, cdp_button).await
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.press_at(x, y, CdpMouseButton::Left).await
    }

    async fn scroll_by(&self, target: &ElementRef, delta_y: f64) -> Result<()> {
        let (x, y) = self.center_of(target).await?;
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(x)
            .y(y)
            .delta_x(0.0)
            .delta_y(delta_y)
            .build()
            .map_err(|e| anyhow!("failed to build wheel event: {}", e))?;
        self.page
            .execute(params)
            .await
            .map_err(|e| anyhow!("wheel event failed: {}", e))?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(|e| anyhow!("insertText failed: {}", e))?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let (modifiers, name) = parse_chord(key);
        let spec = key_spec(name);
        self.key_event(DispatchKeyEventType::KeyDown, &spec, modifiers)
            .await?;
        self.key_event(DispatchKeyEventType::KeyUp, &spec, modifiers)
            .await
    }

    async fn screenshot(&self, opts: &ShotOptions) -> Result<Vec<u8>> {
        let mut builder = ScreenshotParams::builder().full_page(opts.full_page);
        builder = match opts.format {
            ImageFormat::Png => builder.format(CaptureScreenshotFormat::Png),
            ImageFormat::Jpeg { quality } => builder
                .format(CaptureScreenshotFormat::Jpeg)
                .quality(quality),
        };
        if !opts.full_page && opts.scale < 1.0 {
            let size: ViewportSize = serde_json::from_value(
                self.eval_json(
                    "({ width: window.innerWidth, height: window.innerHeight })".to_string(),
                )
                .await?,
            )
            .map_err(|e| anyhow!("viewport size lookup failed: {}", e))?;
            builder = builder.clip(Viewport {
                x: 0.0,
                y: 0.0,
                width: size.width,
                height: size.height,
                scale: opts.scale,
            });
        }
        self.page
            .screenshot(builder.build())
            .await
            .map_err(|e| anyhow!("screenshot capture failed: {}", e))
    }

    async fn accessibility_snapshot(&self) -> Result<Option<AccessibilityNode>> {
        self.page
            .execute(AxEnableParams::default())
            .await
            .map_err(|e| anyhow!("failed to enable accessibility: {}", e))?;
        let tree = self
            .page
            .execute(GetFullAxTreeParams::default())
            .await
            .map_err(|e| anyhow!("failed to get accessibility tree: {}", e))?;
        Ok(build_ax_tree(&tree.result.nodes))
    }
}

/// Wait until the page's resource count stops changing for `quiet_ms`, or
/// until `timeout_ms` has elapsed. Never fails.
pub async fn wait_until_stable(page: &Page, quiet_ms: u64, timeout_ms: u64) {
    let poll_ms = 250u64;
    let start = std::time::Instant::now();
    let mut last_count: u64 = 0;
    let mut stable_since = std::time::Instant::now();

    loop {
        if start.elapsed().as_millis() as u64 >= timeout_ms {
            info!("wait_until_stable: timeout after {}ms", timeout_ms);
            break;
        }

        let count: u64 = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_u64())
            .unwrap_or(0);

        if count != last_count {
            last_count = count;
            stable_since = std::time::Instant::now();
        } else if stable_since.elapsed().as_millis() as u64 >= quiet_ms {
            debug!(
                "wait_until_stable: idle after {}ms ({} resources)",
                start.elapsed().as_millis(),
                count
            );
            break;
        }

        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }
}
