//! Reply to one message. Text is only ever typed once the composer shows the
//! "replying to" banner; without it the action fails and nothing is sent.

use super::executor::{ActionExecutor, StageFailure, StepLog};
use crate::browser;
use crate::core::errors::ModerationError;
use crate::core::types::{ActionKind, ActionOutcome, ActionReport, MessageRef, Stage, StepOutcome};
use crate::features::locator::{self, Located, MenuAction};
use tracing::info;

pub async fn reply_to_message(
    exec: &ActionExecutor<'_>,
    message: &MessageRef,
    text: &str,
) -> ActionReport {
    let mut log = StepLog::new(ActionKind::Reply, message.permalink(&exec.origin));
    match run(exec, &mut log, message, text).await {
        Ok(None) => exec.finish_dry_run(log).await,
        Ok(Some(outcome)) => log.finish(outcome),
        Err(failure) => log.fail(exec, failure).await,
    }
}

async fn run(
    exec: &ActionExecutor<'_>,
    log: &mut StepLog,
    message: &MessageRef,
    text: &str,
) -> Result<Option<ActionOutcome>, StageFailure> {
    exec.navigate_to_message(log, message).await?;
    exec.focus_message(log, message).await?;
    exec.open_context_menu(log, message).await?;
    exec.select_menu_item(log, MenuAction::Reply).await?;
    if exec.dry_run {
        return Ok(None);
    }

    let in_reply_mode = browser::wait_for_text(
        exec.driver,
        locator::COMPOSER_FORM,
        exec.timing.confirm_timeout(),
        |texts| texts.iter().any(|t| locator::has_reply_marker(t)),
    )
    .await;
    if !in_reply_mode {
        return Err(StageFailure::from_error(
            Stage::Confirmed,
            ModerationError::InvariantViolation {
                stage: Stage::Confirmed,
                detail: "composer is not in reply mode; refusing to type".to_string(),
            },
        ));
    }
    log.record(exec, Stage::Confirmed.label(), StepOutcome::Ok).await;

    send_into_composer(exec, text).await?;
    log.record(exec, Stage::Verified.label(), StepOutcome::Ok).await;
    info!("reply: sent to {}", message.message_id);
    Ok(Some(ActionOutcome::Verified))
}

/// Focus the composer, type, confirm the draft is there, press Enter, and
/// wait for it to empty.
pub(crate) async fn send_into_composer(
    exec: &ActionExecutor<'_>,
    text: &str,
) -> Result<(), StageFailure> {
    let handle = match locator::locate(exec.driver, &locator::composer(exec.timing.strategy_budget())).await
    {
        Located::Found(h) => h,
        Located::NotFound { target, tried } => {
            return Err(StageFailure::from_error(
                Stage::Verified,
                ModerationError::LocatorExhausted { target, tried },
            ))
        }
    };
    locator::activate(exec.driver, &handle)
        .await
        .map_err(|e| StageFailure::from_error(Stage::Verified, e))?;
    exec.driver
        .type_text(text)
        .await
        .map_err(|e| StageFailure::from_error(Stage::Verified, e))?;
    if !browser::wait_for_selector(exec.driver, locator::COMPOSER_TEXT, exec.timing.confirm_timeout()).await
    {
        return Err(StageFailure::new(
            Stage::Verified,
            "typed text never reached the composer; Enter not pressed",
        ));
    }
    exec.driver
        .press_key("Enter")
        .await
        .map_err(|e| StageFailure::from_error(Stage::Verified, e))?;

    if !browser::wait_for_detach(exec.driver, locator::COMPOSER_TEXT, exec.timing.verify_timeout()).await
    {
        return Err(StageFailure::new(
            Stage::Verified,
            "composer still holds text after Enter",
        ));
    }
    Ok(())
}
