//! Round-based bulk delete of templated messages by author.
//!
//! Each round scrolls up to reveal older history, scans, deletes every fresh
//! match, then re-navigates to the channel root so scroll drift caused by
//! removed messages never compounds. One failing message never stops the run.

use super::delete::delete_message;
use super::executor::ActionExecutor;
use crate::browser::{self, ElementRef, WaitPolicy};
use crate::core::types::{ActionOutcome, ActionReport, ChannelRef, MessageRef, RunEntry, RunReport};
use crate::features::locator::MESSAGES_SCROLLER;
use crate::features::pacing::{Clock, PacingStore};
use crate::features::scanner::{self, ScanFilter, MESSAGE_CONTAINER};
use anyhow::Result;
use std::collections::HashSet;
use tracing::{info, warn};

/// Wheel distance of one scroll-up step, in CSS pixels.
pub const SCROLL_STEP_PX: f64 = 900.0;

#[derive(Debug, Clone)]
pub struct PurgeOptions {
    pub channel: ChannelRef,
    pub author: Option<String>,
    pub rounds: u32,
    pub scroll_up_steps: u32,
}

impl PurgeOptions {
    pub fn filter(&self) -> ScanFilter {
        ScanFilter {
            author_includes: self.author.clone(),
            classify: true,
        }
    }
}

async fn open_channel_root(exec: &ActionExecutor<'_>, channel: &ChannelRef) {
    if let Err(e) = exec
        .driver
        .navigate(&channel.url(&exec.origin), WaitPolicy::Load)
        .await
    {
        warn!("purge: navigation to {} failed: {}", channel, e);
        return;
    }
    if !browser::wait_for_selector(exec.driver, MESSAGE_CONTAINER, exec.timing.attach_timeout()).await
    {
        info!("purge: no messages rendered in {}", channel);
    }
}

async fn scroll_up<C: Clock>(exec: &ActionExecutor<'_>, steps: u32, pacing: &PacingStore<C>) {
    let scroller = ElementRef::first(MESSAGES_SCROLLER);
    for _ in 0..steps {
        pacing.wait_turn("purge:scroll", exec.timing.settle()).await;
        if let Err(e) = exec.driver.scroll_by(&scroller, -SCROLL_STEP_PX).await {
            warn!("purge: scroll failed: {}", e);
            break;
        }
    }
    exec.settle().await;
}

fn entry_for(report: &ActionReport, message_id: &str, round: u32) -> (bool, RunEntry) {
    match &report.outcome {
        ActionOutcome::Failed {
            stage,
            reason,
            screenshot_path,
        } => (
            false,
            RunEntry {
                message_id: message_id.to_string(),
                round,
                error: Some(format!("{}: {}", stage, reason)),
                screenshot_path: screenshot_path.clone(),
            },
        ),
        _ => (
            true,
            RunEntry {
                message_id: message_id.to_string(),
                round,
                error: None,
                screenshot_path: report.last_screenshot().map(str::to_string),
            },
        ),
    }
}

/// Run the loop and persist `run.json` (plus the per-action `actions.json`).
pub async fn purge<C: Clock>(
    exec: &ActionExecutor<'_>,
    opts: &PurgeOptions,
    pacing: &PacingStore<C>,
) -> Result<RunReport> {
    let filter = opts.filter();
    let mut report = RunReport {
        dry_run: exec.dry_run,
        ..Default::default()
    };
    let mut actions: Vec<ActionReport> = Vec::new();
    let mut attempted: HashSet<String> = HashSet::new();

    open_channel_root(exec, &opts.channel).await;

    for round in 1..=opts.rounds.max(1) {
        report.rounds_run = round;
        scroll_up(exec, opts.scroll_up_steps, pacing).await;

        let records = match scanner::collect(exec.driver, &filter).await {
            Ok(r) => r,
            Err(e) => {
                warn!("purge: scan failed in round {}: {}", round, e);
                let screenshot_path = exec
                    .artifacts
                    .try_capture(exec.driver, &format!("round-{}-scan-failed", round))
                    .await;
                report.errors.push(RunEntry {
                    message_id: String::new(),
                    round,
                    error: Some(format!("scan failed: {}", e)),
                    screenshot_path,
                });
                break;
            }
        };
        let fresh: Vec<_> = records
            .into_iter()
            .filter(|r| !attempted.contains(&r.message_id))
            .collect();
        info!("purge: round {} → {} fresh matches", round, fresh.len());
        if fresh.is_empty() {
            break;
        }

        exec.artifacts
            .try_capture(exec.driver, &format!("round-{}", round))
            .await;

        for record in &fresh {
            attempted.insert(record.message_id.clone());
            let message = MessageRef::in_channel(&opts.channel, record.message_id.clone());
            let action = delete_message(exec, &message).await;
            let (ok, entry) = entry_for(&action, &record.message_id, round);
            if ok {
                report.deleted.push(entry);
            } else {
                report.errors.push(entry);
            }
            actions.push(action);
        }

        open_channel_root(exec, &opts.channel).await;
    }

    exec.artifacts.write_json("run.json", &report)?;
    exec.artifacts.write_json("actions.json", &actions)?;
    info!(
        "purge: done after {} round(s): {} deleted, {} errors",
        report.rounds_run,
        report.deleted.len(),
        report.errors.len()
    );
    Ok(report)
}
