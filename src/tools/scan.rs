//! Read-only scan of a channel's rendered messages.

use crate::browser::{self, ElementRef, PageDriver, WaitPolicy};
use crate::core::artifacts::RunArtifacts;
use crate::core::types::{ChannelRef, MessageRecord};
use crate::features::classify;
use crate::features::locator::MESSAGES_SCROLLER;
use crate::features::scanner::{self, ScanFilter, MESSAGE_CONTAINER};
use anyhow::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub channel: ChannelRef,
    pub origin: String,
    pub filter: ScanFilter,
    pub scroll_up_steps: u32,
    pub attach_timeout: Duration,
    pub settle: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedMessage {
    #[serde(flatten)]
    pub record: MessageRecord,
    pub markers: Vec<String>,
}

pub async fn scan(
    driver: &dyn PageDriver,
    artifacts: &RunArtifacts,
    opts: &ScanOptions,
) -> Result<Vec<ScannedMessage>> {
    driver
        .navigate(&opts.channel.url(&opts.origin), WaitPolicy::Load)
        .await?;
    if !browser::wait_for_selector(driver, MESSAGE_CONTAINER, opts.attach_timeout).await {
        info!("scan: no messages rendered in {}", opts.channel);
    }

    let scroller = ElementRef::first(MESSAGES_SCROLLER);
    for _ in 0..opts.scroll_up_steps {
        if let Err(e) = driver.scroll_by(&scroller, -super::purge::SCROLL_STEP_PX).await {
            warn!("scan: scroll failed: {}", e);
            break;
        }
        tokio::time::sleep(opts.settle).await;
    }

    let records = scanner::collect(driver, &opts.filter).await?;
    let out: Vec<ScannedMessage> = records
        .into_iter()
        .map(|record| ScannedMessage {
            markers: classify::classify(&record.text).markers,
            record,
        })
        .collect();

    artifacts.write_json("messages.json", &out)?;
    artifacts.try_capture(driver, "scan").await;
    info!("scan: {} message(s) kept in {}", out.len(), opts.channel);
    Ok(out)
}
