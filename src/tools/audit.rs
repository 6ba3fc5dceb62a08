//! Channel audit: wait until the page sits on a channel, then dump the
//! accessibility view of the sidebar and headers.

use crate::browser::{PageDriver, WaitPolicy};
use crate::core::artifacts::RunArtifacts;
use crate::core::errors::ModerationError;
use crate::core::types::ChannelRef;
use crate::features::accessibility::{self, DEFAULT_SUMMARY_CAP, ROLE_HEADING, ROLE_TREEITEM};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AuditOptions {
    /// Navigate here first; `None` waits for the operator to navigate.
    pub url: Option<String>,
    pub login_wait: Duration,
    pub poll: Duration,
    pub summary_cap: usize,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            url: None,
            login_wait: Duration::from_secs(300),
            poll: Duration::from_secs(1),
            summary_cap: DEFAULT_SUMMARY_CAP,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResult {
    pub ok: bool,
    pub url: String,
    pub channel: Option<ChannelRef>,
    pub channel_items_count: usize,
    pub headings_count: usize,
    pub entries_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
}

/// Poll the current URL until it parses as a channel or the deadline passes.
pub async fn wait_for_channel(
    driver: &dyn PageDriver,
    deadline: Duration,
    poll: Duration,
) -> std::result::Result<(String, ChannelRef), ModerationError> {
    let start = tokio::time::Instant::now();
    let mut last_url = String::new();
    loop {
        match driver.current_url().await {
            Ok(url) => {
                if let Some(channel) = ChannelRef::from_url(&url) {
                    return Ok((url, channel));
                }
                last_url = url;
            }
            Err(e) => warn!("audit: reading url failed: {}", e),
        }
        let waited = start.elapsed();
        if waited >= deadline {
            return Err(ModerationError::NavigationTimeout {
                expected: "/channels/{guild}/{channel}",
                last_url,
                waited,
            });
        }
        tokio::time::sleep(poll.min(deadline - waited)).await;
    }
}

pub async fn audit(
    driver: &dyn PageDriver,
    artifacts: &RunArtifacts,
    opts: &AuditOptions,
) -> Result<AuditResult> {
    if let Some(url) = opts.url.as_deref() {
        if let Err(e) = driver.navigate(url, WaitPolicy::Load).await {
            warn!("audit: navigation to {} failed: {}", url, e);
        }
    }

    let (url, channel) = match wait_for_channel(driver, opts.login_wait, opts.poll).await {
        Ok(found) => found,
        Err(e) => {
            let last_url = match &e {
                ModerationError::NavigationTimeout { last_url, .. } => last_url.clone(),
                _ => String::new(),
            };
            let result = AuditResult {
                ok: false,
                url: last_url,
                channel: None,
                channel_items_count: 0,
                headings_count: 0,
                entries_count: 0,
                error: Some(e.to_string()),
                screenshot_path: artifacts.try_capture(driver, "audit-timeout").await,
            };
            artifacts.write_json("result.json", &result)?;
            return Ok(result);
        }
    };
    info!("audit: on channel {}", channel);

    let tree = accessibility::snapshot(driver).await;
    let entries = accessibility::flatten(tree.as_ref());
    let summary = accessibility::summarize(&entries, opts.summary_cap);

    artifacts.write_json("a11y.json", &tree)?;
    artifacts.write_json("a11y_flat.json", &entries)?;
    artifacts.write_json("summary.json", &summary)?;

    let result = AuditResult {
        ok: true,
        url,
        channel: Some(channel),
        channel_items_count: accessibility::count_role(&entries, ROLE_TREEITEM),
        headings_count: accessibility::count_role(&entries, ROLE_HEADING),
        entries_count: entries.len(),
        error: None,
        screenshot_path: artifacts.try_capture(driver, "audit").await,
    };
    artifacts.write_json("result.json", &result)?;
    info!(
        "audit: {} entries ({} channel items, {} headings)",
        result.entries_count, result.channel_items_count, result.headings_count
    );
    Ok(result)
}
