use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Origin used when rendering permalinks from bare identifiers.
pub const DEFAULT_PLATFORM_ORIGIN: &str = "https://discord.com";

static CHANNEL_PATH: OnceLock<Regex> = OnceLock::new();
static MESSAGE_PATH: OnceLock<Regex> = OnceLock::new();

fn channel_path_re() -> &'static Regex {
    CHANNEL_PATH.get_or_init(|| {
        Regex::new(r"^/channels/(@me|\d+)/(\d+)/?$").expect("valid channel path pattern")
    })
}

fn message_path_re() -> &'static Regex {
    MESSAGE_PATH.get_or_init(|| {
        Regex::new(r"^/channels/(@me|\d+)/(\d+)/(\d+)/?$").expect("valid message path pattern")
    })
}

fn url_path(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    Some(parsed.path().to_string())
}

fn url_origin(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    match parsed.origin() {
        url::Origin::Tuple(..) => Some(parsed.origin().ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

// ── Identifiers ──────────────────────────────────────────────────────────────

/// `{guild, channel}` pair resolved from a navigation URL.
///
/// Parsing is strict: anything that is not exactly `/channels/{guild}/{channel}`
/// yields `None`. Identifiers are never guessed from partial URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelRef {
    pub guild_id: String,
    pub channel_id: String,
}

impl ChannelRef {
    pub fn from_url(raw: &str) -> Option<Self> {
        let path = url_path(raw)?;
        let caps = channel_path_re().captures(&path)?;
        Some(Self {
            guild_id: caps[1].to_string(),
            channel_id: caps[2].to_string(),
        })
    }

    /// Channel portion of a message permalink.
    pub fn from_permalink(raw: &str) -> Option<Self> {
        MessageRef::from_url(raw).map(|m| m.channel())
    }

    pub fn url(&self, origin: &str) -> String {
        format!(
            "{}/channels/{}/{}",
            origin.trim_end_matches('/'),
            self.guild_id,
            self.channel_id
        )
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.channel_id)
    }
}

/// A single message addressed by its permalink.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub guild_id: String,
    pub channel_id: String,
    pub message_id: String,
}

impl MessageRef {
    pub fn from_url(raw: &str) -> Option<Self> {
        let path = url_path(raw)?;
        let caps = message_path_re().captures(&path)?;
        Some(Self {
            guild_id: caps[1].to_string(),
            channel_id: caps[2].to_string(),
            message_id: caps[3].to_string(),
        })
    }

    pub fn in_channel(channel: &ChannelRef, message_id: impl Into<String>) -> Self {
        Self {
            guild_id: channel.guild_id.clone(),
            channel_id: channel.channel_id.clone(),
            message_id: message_id.into(),
        }
    }

    pub fn channel(&self) -> ChannelRef {
        ChannelRef {
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
        }
    }

    pub fn permalink(&self, origin: &str) -> String {
        format!(
            "{}/channels/{}/{}/{}",
            origin.trim_end_matches('/'),
            self.guild_id,
            self.channel_id,
            self.message_id
        )
    }

    /// DOM id of the `<li>` container that renders this message.
    pub fn container_id(&self) -> String {
        format!("chat-messages-{}-{}", self.channel_id, self.message_id)
    }

    pub fn container_selector(&self) -> String {
        format!("li[id=\"{}\"]", self.container_id())
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.guild_id, self.channel_id, self.message_id)
    }
}

/// Origin (`scheme://host[:port]`) of a URL, used to keep permalinks on the
/// same host the operator navigated to.
pub fn origin_of(raw: &str) -> Option<String> {
    url_origin(raw)
}

/// Trailing `-`-separated segment of a message container id.
///
/// `"chat-messages-123-456"` → `Some("456")`.
pub fn extract_message_id(li_id: &str) -> Option<String> {
    let (_, tail) = li_id.trim().rsplit_once('-')?;
    if tail.is_empty() {
        None
    } else {
        Some(tail.to_string())
    }
}

/// Channel segment of a message container id (the one before the message id).
pub fn extract_channel_id(li_id: &str) -> Option<String> {
    let (head, _) = li_id.trim().rsplit_once('-')?;
    let (_, channel) = head.rsplit_once('-')?;
    if channel.is_empty() {
        None
    } else {
        Some(channel.to_string())
    }
}

// ── Scanned messages ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub message_id: String,
    pub channel_id: String,
    pub author: String,
    pub text: String,
    pub li_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub is_template: bool,
    /// Markers that matched, in marker-table order.
    #[serde(default)]
    pub markers: Vec<String>,
}

// ── Accessibility ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessibilityNode {
    pub role: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AccessibilityNode>,
}

impl AccessibilityNode {
    pub fn new(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<AccessibilityNode>) -> Self {
        self.children = children;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatEntry {
    pub role: String,
    pub name: String,
    pub trail: Vec<String>,
}

// ── Action audit trail ───────────────────────────────────────────────────────

/// Interaction stages of the single-message state machine, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Navigated,
    Located,
    MenuOpen,
    ItemSelected,
    Confirmed,
    Verified,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Navigated => "Navigated",
            Stage::Located => "Located",
            Stage::MenuOpen => "MenuOpen",
            Stage::ItemSelected => "ItemSelected",
            Stage::Confirmed => "Confirmed",
            Stage::Verified => "Verified",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    Failed { reason: String },
    Skipped { reason: String },
}

impl StepOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        StepOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    pub label: String,
    pub screenshot_path: Option<String>,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Delete,
    Reply,
    Clear,
    Post,
}

/// Terminal state of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActionOutcome {
    Verified,
    /// Dry run: everything up to the mutation was exercised, nothing changed.
    Skipped,
    Failed {
        stage: Stage,
        reason: String,
        screenshot_path: Option<String>,
    },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ActionOutcome::Failed { .. })
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            ActionOutcome::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub kind: ActionKind,
    pub target: String,
    pub steps: Vec<ActionStep>,
    pub outcome: ActionOutcome,
    /// Visible menu item texts, captured when menu resolution fails.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub menu_items: Vec<String>,
    /// Advisory vision suggestion; recorded, never executed for destructive actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<serde_json::Value>,
}

impl ActionReport {
    pub fn last_screenshot(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find_map(|s| s.screenshot_path.as_deref())
    }
}

// ── Batch reports ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEntry {
    pub message_id: String,
    pub round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub deleted: Vec<RunEntry>,
    pub errors: Vec<RunEntry>,
    pub rounds_run: u32,
    #[serde(default)]
    pub dry_run: bool,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ── Fan-out input ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorThemes {
    pub author: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub themes: Vec<String>,
}
