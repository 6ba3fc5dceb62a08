//! Deterministic reply fan-out.
//!
//! Authors are grouped by the language-keyed target channel, one short message
//! is rendered per author from a fixed theme table, and messages are posted
//! sequentially with a paced gap per channel.

use super::compose::post_message;
use super::executor::ActionExecutor;
use crate::browser::WaitPolicy;
use crate::core::types::{ActionOutcome, AuthorThemes, ChannelRef};
use crate::features::pacing::{Clock, PacingStore};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LangGroup {
    Zh,
    General,
}

impl LangGroup {
    pub fn of(lang: &str) -> Self {
        if lang.trim().to_ascii_lowercase().starts_with("zh") {
            LangGroup::Zh
        } else {
            LangGroup::General
        }
    }
}

#[derive(Debug, Clone)]
pub struct FanoutTargets {
    pub zh: ChannelRef,
    pub general: ChannelRef,
}

impl FanoutTargets {
    pub fn channel(&self, group: LangGroup) -> &ChannelRef {
        match group {
            LangGroup::Zh => &self.zh,
            LangGroup::General => &self.general,
        }
    }
}

/// Theme key → (English fragment, Chinese fragment).
const THEME_FRAGMENTS: &[(&str, &str, &str)] = &[
    ("shipping/delivery", "we've logged the delivery issue with the logistics team", "物流配送的问题我们已经记录并反馈"),
    ("refund", "refund progress will be shared with you as soon as it moves", "退款进度会第一时间同步给你"),
    ("payment", "we're checking the payment problem right now", "支付问题我们正在排查"),
    ("account", "for account questions please DM a moderator", "账号相关的问题请私信管理员"),
    ("bug", "the bug has been passed to the dev team", "问题已经转交开发团队"),
    ("feature request", "your suggestion went to the product team", "你的建议已经转达给产品团队"),
];

fn fragment(theme: &str, group: LangGroup) -> Option<&'static str> {
    let key = theme.trim().to_lowercase();
    THEME_FRAGMENTS
        .iter()
        .find(|(k, _, _)| *k == key)
        .map(|(_, en, zh)| match group {
            LangGroup::Zh => *zh,
            LangGroup::General => *en,
        })
}

/// One message per author. Unknown themes are skipped; repeated themes are
/// rendered once, in first-seen order.
pub fn render_message(item: &AuthorThemes) -> String {
    let group = LangGroup::of(&item.lang);
    let mut seen = HashSet::new();
    let parts: Vec<&str> = item
        .themes
        .iter()
        .filter(|t| seen.insert(t.trim().to_lowercase()))
        .filter_map(|t| fragment(t, group))
        .collect();

    match group {
        LangGroup::Zh => {
            let body = if parts.is_empty() {
                "我们会继续跟进".to_string()
            } else {
                parts.join("；")
            };
            format!("@{} 感谢反馈！{}。", item.author, body)
        }
        LangGroup::General => {
            let body = if parts.is_empty() {
                "we'll keep following up".to_string()
            } else {
                parts.join(", and ")
            };
            format!("@{} Thanks for the feedback, {}.", item.author, body)
        }
    }
}

/// Language-keyed groups in deterministic order; an author appears at most
/// once per group.
pub fn group_by_channel(items: &[AuthorThemes]) -> BTreeMap<LangGroup, Vec<AuthorThemes>> {
    let mut groups: BTreeMap<LangGroup, Vec<AuthorThemes>> = BTreeMap::new();
    for item in items {
        let author = item.author.trim();
        if author.is_empty() {
            continue;
        }
        let bucket = groups.entry(LangGroup::of(&item.lang)).or_default();
        if bucket.iter().any(|b| b.author.trim() == author) {
            continue;
        }
        bucket.push(item.clone());
    }
    groups
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutEntry {
    pub author: String,
    pub group: LangGroup,
    pub channel: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutReport {
    pub sent: Vec<FanoutEntry>,
    pub errors: Vec<FanoutEntry>,
    #[serde(default)]
    pub dry_run: bool,
}

impl FanoutReport {
    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub fn load_input(path: &std::path::Path) -> Result<Vec<AuthorThemes>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("fanout: cannot read {:?}: {}", path, e))?;
    let items: Vec<AuthorThemes> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("fanout: {:?} is not a list of {{author, lang, themes}}: {}", path, e))?;
    Ok(items)
}

pub async fn fanout<C: Clock>(
    exec: &ActionExecutor<'_>,
    items: &[AuthorThemes],
    targets: &FanoutTargets,
    delay: Duration,
    pacing: &PacingStore<C>,
) -> Result<FanoutReport> {
    let mut report = FanoutReport {
        dry_run: exec.dry_run,
        ..Default::default()
    };

    for (group, authors) in group_by_channel(items) {
        let channel = targets.channel(group);
        let url = channel.url(&exec.origin);
        info!("fanout: {} author(s) → {:?} channel {}", authors.len(), group, channel);

        let nav = exec.driver.navigate(&url, WaitPolicy::Load).await;
        let pacing_key = PacingStore::<C>::key("fanout", &channel.channel_id);

        for item in &authors {
            let text = render_message(item);
            let mut entry = FanoutEntry {
                author: item.author.clone(),
                group,
                channel: url.clone(),
                text: text.clone(),
                error: None,
                screenshot_path: None,
            };
            if let Err(e) = &nav {
                entry.error = Some(format!("navigation failed: {}", e));
                report.errors.push(entry);
                continue;
            }

            pacing.wait_clear(&pacing_key, delay).await;
            let action = post_message(exec, &url, &text).await;
            pacing.mark(&pacing_key);
            entry.screenshot_path = action.last_screenshot().map(str::to_string);
            match action.outcome {
                ActionOutcome::Failed { stage, reason, .. } => {
                    warn!("fanout: {} failed at {}: {}", item.author, stage, reason);
                    entry.error = Some(format!("{}: {}", stage, reason));
                    report.errors.push(entry);
                }
                _ => report.sent.push(entry),
            }
        }
    }

    exec.artifacts.write_json("fanout.json", &report)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(author: &str, lang: &str, themes: &[&str]) -> AuthorThemes {
        AuthorThemes {
            author: author.into(),
            lang: lang.into(),
            themes: themes.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_lang_grouping() {
        assert_eq!(LangGroup::of("zh"), LangGroup::Zh);
        assert_eq!(LangGroup::of("zh-CN"), LangGroup::Zh);
        assert_eq!(LangGroup::of("ZH_tw"), LangGroup::Zh);
        assert_eq!(LangGroup::of("en"), LangGroup::General);
        assert_eq!(LangGroup::of(""), LangGroup::General);
    }

    #[test]
    fn test_render_is_deterministic_and_localized() {
        let a = at("a", "zh", &["shipping/delivery"]);
        let first = render_message(&a);
        assert_eq!(first, render_message(&a));
        assert_eq!(first, "@a 感谢反馈！物流配送的问题我们已经记录并反馈。");

        let b = at("b", "en", &[]);
        assert_eq!(
            render_message(&b),
            "@b Thanks for the feedback, we'll keep following up."
        );
    }

    #[test]
    fn test_render_skips_unknown_and_repeated_themes() {
        let c = at("c", "en", &["Refund", "weather", "refund", "bug"]);
        assert_eq!(
            render_message(&c),
            "@c Thanks for the feedback, refund progress will be shared with you as soon as it moves, and the bug has been passed to the dev team."
        );
    }

    #[test]
    fn test_group_dedupes_authors_per_group() {
        let items = vec![
            at("x", "en", &["bug"]),
            at("x", "en", &["refund"]),
            at("x", "zh", &[]),
            at("  ", "en", &[]),
        ];
        let groups = group_by_channel(&items);
        assert_eq!(groups[&LangGroup::General].len(), 1);
        assert_eq!(groups[&LangGroup::General][0].themes, vec!["bug"]);
        assert_eq!(groups[&LangGroup::Zh].len(), 1);
    }
}
