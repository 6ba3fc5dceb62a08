//! Composer housekeeping: clearing a draft and posting a plain message.

use super::executor::{ActionExecutor, StageFailure, StepLog};
use super::reply::send_into_composer;
use crate::browser::{self, WaitPolicy};
use crate::core::errors::ModerationError;
use crate::core::types::{ActionKind, ActionOutcome, ActionReport, ChannelRef, Stage, StepOutcome};
use crate::features::locator::{self, Handle, Located};
use tracing::info;

/// Drop any reply mode and empty the composer of `channel`.
pub async fn clear_composer(exec: &ActionExecutor<'_>, channel: &ChannelRef) -> ActionReport {
    let mut log = StepLog::new(ActionKind::Clear, channel.url(&exec.origin));
    match run_clear(exec, &mut log, channel).await {
        Ok(None) => exec.finish_dry_run(log).await,
        Ok(Some(outcome)) => log.finish(outcome),
        Err(failure) => log.fail(exec, failure).await,
    }
}

async fn find_composer(exec: &ActionExecutor<'_>) -> Result<Handle, StageFailure> {
    match locator::locate(exec.driver, &locator::composer(exec.timing.attach_timeout())).await {
        Located::Found(h) => Ok(h),
        Located::NotFound { target, tried } => Err(StageFailure::from_error(
            Stage::Located,
            ModerationError::LocatorExhausted { target, tried },
        )),
    }
}

async fn run_clear(
    exec: &ActionExecutor<'_>,
    log: &mut StepLog,
    channel: &ChannelRef,
) -> Result<Option<ActionOutcome>, StageFailure> {
    exec.driver
        .navigate(&channel.url(&exec.origin), WaitPolicy::Load)
        .await
        .map_err(|e| StageFailure::from_error(Stage::Navigated, e))?;
    log.record(exec, Stage::Navigated.label(), StepOutcome::Ok).await;

    let handle = find_composer(exec).await?;
    log.record(exec, Stage::Located.label(), StepOutcome::Ok).await;
    if exec.dry_run {
        return Ok(None);
    }

    let keys = async {
        exec.driver.press_key("Escape").await?;
        locator::activate(exec.driver, &handle).await?;
        exec.driver.press_key("Control+A").await?;
        exec.driver.press_key("Backspace").await
    };
    keys.await
        .map_err(|e| StageFailure::from_error(Stage::ItemSelected, e))?;

    if !browser::wait_for_detach(exec.driver, locator::COMPOSER_TEXT, exec.timing.verify_timeout()).await
    {
        return Err(StageFailure::new(Stage::Verified, "composer not empty after clear"));
    }
    log.record(exec, Stage::Verified.label(), StepOutcome::Ok).await;
    info!("clear: composer of {} emptied", channel);
    Ok(Some(ActionOutcome::Verified))
}

/// Post `text` as a new message in the channel currently open. The composer
/// must be in plain mode; a lingering reply banner is dismissed once.
pub async fn post_message(exec: &ActionExecutor<'_>, target: &str, text: &str) -> ActionReport {
    let mut log = StepLog::new(ActionKind::Post, target);
    match run_post(exec, &mut log, text).await {
        Ok(None) => exec.finish_dry_run(log).await,
        Ok(Some(outcome)) => log.finish(outcome),
        Err(failure) => log.fail(exec, failure).await,
    }
}

async fn composer_in_reply_mode(exec: &ActionExecutor<'_>) -> bool {
    exec.driver
        .texts(locator::COMPOSER_FORM)
        .await
        .map(|texts| texts.iter().any(|t| locator::has_reply_marker(t)))
        .unwrap_or(false)
}

async fn run_post(
    exec: &ActionExecutor<'_>,
    log: &mut StepLog,
    text: &str,
) -> Result<Option<ActionOutcome>, StageFailure> {
    find_composer(exec).await?;
    log.record(exec, Stage::Located.label(), StepOutcome::Ok).await;
    if exec.dry_run {
        return Ok(None);
    }

    if composer_in_reply_mode(exec).await {
        exec.driver
            .press_key("Escape")
            .await
            .map_err(|e| StageFailure::from_error(Stage::Confirmed, e))?;
        exec.settle().await;
        if composer_in_reply_mode(exec).await {
            return Err(StageFailure::from_error(
                Stage::Confirmed,
                ModerationError::InvariantViolation {
                    stage: Stage::Confirmed,
                    detail: "composer stuck in reply mode; refusing to post".to_string(),
                },
            ));
        }
    }
    log.record(exec, Stage::Confirmed.label(), StepOutcome::Ok).await;

    send_into_composer(exec, text).await?;
    log.record(exec, Stage::Verified.label(), StepOutcome::Ok).await;
    Ok(Some(ActionOutcome::Verified))
}
