//! Element resolution through ordered strategy chains.
//!
//! A logical target ("the context menu of message X") is described as data: a
//! list of [`Strategy`] values tried strictly in order. The first strategy whose
//! probe matches within its budget wins and the chain halts. The locator never
//! consults the vision model; escalation is the caller's decision.

use crate::browser::{self, ElementRef, MouseButton, PageDriver};
use crate::core::types::MessageRef;
use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Gesture applied to the probed element once the strategy is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Click,
    RightClick,
    Hover,
    /// Locate only.
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct Strategy {
    pub label: String,
    /// Hovered before probing, for controls that only render on hover.
    pub prelude_hover: Option<String>,
    pub probe: String,
    pub gesture: Gesture,
    #[serde(skip)]
    pub budget: Duration,
}

impl Strategy {
    pub fn new(label: impl Into<String>, probe: impl Into<String>, gesture: Gesture, budget: Duration) -> Self {
        Self {
            label: label.into(),
            prelude_hover: None,
            probe: probe.into(),
            gesture,
            budget,
        }
    }

    pub fn after_hover(mut self, selector: impl Into<String>) -> Self {
        self.prelude_hover = Some(selector.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSpec {
    pub target: String,
    pub strategies: Vec<Strategy>,
}

impl TargetSpec {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            strategies: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: Strategy) -> Self {
        self.strategies.push(strategy);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    pub target: String,
    pub strategy: String,
    pub element: ElementRef,
    pub gesture: Gesture,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    Found(Handle),
    NotFound { target: String, tried: Vec<String> },
}

impl Located {
    pub fn handle(&self) -> Option<&Handle> {
        match self {
            Located::Found(h) => Some(h),
            Located::NotFound { .. } => None,
        }
    }
}

/// Walk the chain. Only the chosen strategy and those before it touch the DOM.
pub async fn locate(driver: &dyn PageDriver, spec: &TargetSpec) -> Located {
    let mut tried = Vec::with_capacity(spec.strategies.len());
    for strategy in &spec.strategies {
        tried.push(strategy.label.clone());

        if let Some(hover) = strategy.prelude_hover.as_deref() {
            if let Err(e) = driver.hover(&ElementRef::first(hover)).await {
                debug!("locator: {} prelude hover failed: {}", strategy.label, e);
            }
        }

        if browser::wait_for_selector(driver, &strategy.probe, strategy.budget).await {
            info!("locator: {} → {}", spec.target, strategy.label);
            return Located::Found(Handle {
                target: spec.target.clone(),
                strategy: strategy.label.clone(),
                element: ElementRef::first(strategy.probe.clone()),
                gesture: strategy.gesture,
            });
        }
        debug!(
            "locator: {} strategy {} not satisfied within {}ms",
            spec.target,
            strategy.label,
            strategy.budget.as_millis()
        );
    }

    warn!("locator: all strategies exhausted for {}", spec.target);
    Located::NotFound {
        target: spec.target.clone(),
        tried,
    }
}

/// Perform the handle's gesture.
pub async fn activate(driver: &dyn PageDriver, handle: &Handle) -> Result<()> {
    match handle.gesture {
        Gesture::Click => driver.click(&handle.element, MouseButton::Left).await,
        Gesture::RightClick => driver.click(&handle.element, MouseButton::Right).await,
        Gesture::Hover => driver.hover(&handle.element).await,
        Gesture::None => Ok(()),
    }
}

// ── Built-in target specs ────────────────────────────────────────────────────

pub const MENU: &str = r#"[role="menu"]"#;
pub const MENU_ITEM: &str = r#"[role="menu"] [role="menuitem"]"#;
pub const COMPOSER: &str = r#"[role="textbox"][data-slate-editor="true"]"#;
pub const COMPOSER_FORM: &str = r#"form:has([role="textbox"][data-slate-editor="true"])"#;
/// Text leaves inside the composer; none present means the composer is empty.
pub const COMPOSER_TEXT: &str =
    r#"[role="textbox"][data-slate-editor="true"] [data-slate-string="true"]"#;
pub const MESSAGES_SCROLLER: &str = r#"[data-list-id="chat-messages"]"#;

/// Right-click the timestamp (avoids link context menus inside the body), else
/// hover the message and click its overflow control.
pub fn context_menu(message: &MessageRef, budget: Duration) -> TargetSpec {
    let container = message.container_selector();
    TargetSpec::new(format!("context menu of {}", message.message_id))
        .then(Strategy::new(
            "right-click timestamp",
            format!("{} time", container),
            Gesture::RightClick,
            budget,
        ))
        .then(
            Strategy::new(
                "hover + more button",
                format!(
                    r#"{c} [aria-label="More"], {c} [aria-label="更多"]"#,
                    c = container
                ),
                Gesture::Click,
                budget,
            )
            .after_hover(container),
        )
}

pub fn composer(budget: Duration) -> TargetSpec {
    TargetSpec::new("message composer")
        .then(Strategy::new("slate textbox", COMPOSER, Gesture::Click, budget))
        .then(Strategy::new(
            "any textbox",
            r#"main [role="textbox"]"#,
            Gesture::Click,
            budget,
        ))
}

pub fn confirm_button(budget: Duration) -> TargetSpec {
    TargetSpec::new("confirmation button")
        .then(Strategy::new(
            "dialog submit",
            r#"[role="dialog"] button[type="submit"]"#,
            Gesture::Click,
            budget,
        ))
        .then(Strategy::new(
            "alert dialog submit",
            r#"[role="alertdialog"] button[type="submit"]"#,
            Gesture::Click,
            budget,
        ))
}

// ── Locale-tolerant menu items ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuAction {
    Delete,
    Reply,
    Edit,
    CopyLink,
}

impl MenuAction {
    /// Display strings across supported locales. Matched exactly.
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            MenuAction::Delete => &["Delete Message", "Delete", "删除消息", "删除"],
            MenuAction::Reply => &["Reply", "回复"],
            MenuAction::Edit => &["Edit Message", "Edit", "编辑消息", "编辑"],
            MenuAction::CopyLink => &["Copy Message Link", "复制消息链接"],
        }
    }
}

/// Index of the first item whose trimmed text equals one of the action's labels.
pub fn find_menu_item(texts: &[String], action: MenuAction) -> Option<usize> {
    let labels = action.labels();
    texts.iter().position(|t| labels.contains(&t.trim()))
}

#[derive(Debug, Clone, Default)]
pub struct MenuLookup {
    pub index: Option<usize>,
    pub texts: Vec<String>,
}

impl MenuLookup {
    pub fn element(&self) -> Option<ElementRef> {
        self.index.map(|i| ElementRef::nth(MENU_ITEM, i))
    }
}

/// Visible menu item texts, for diagnostics. Empty when unreadable.
pub async fn visible_menu_items(driver: &dyn PageDriver) -> Vec<String> {
    match driver.texts(MENU_ITEM).await {
        Ok(t) => t,
        Err(e) => {
            warn!("locator: reading menu items failed: {}", e);
            Vec::new()
        }
    }
}

pub async fn locate_menu_item(driver: &dyn PageDriver, action: MenuAction) -> MenuLookup {
    let texts = visible_menu_items(driver).await;
    MenuLookup {
        index: find_menu_item(&texts, action),
        texts,
    }
}

/// Locale-matched "replying to X" banner text inside the composer form.
pub const REPLY_MARKERS: &[&str] = &["Replying to", "正在回复"];

pub fn has_reply_marker(form_text: &str) -> bool {
    REPLY_MARKERS.iter().any(|m| form_text.contains(m))
}
