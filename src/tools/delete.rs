//! Single-message delete through the ordinary UI.

use super::executor::{ActionExecutor, StageFailure, StepLog};
use crate::browser;
use crate::core::types::{ActionKind, ActionOutcome, ActionReport, MessageRef, Stage, StepOutcome};
use crate::features::locator::{self, Located, MenuAction};
use tracing::info;

pub async fn delete_message(exec: &ActionExecutor<'_>, message: &MessageRef) -> ActionReport {
    let mut log = StepLog::new(ActionKind::Delete, message.permalink(&exec.origin));
    match run(exec, &mut log, message).await {
        Ok(None) => exec.finish_dry_run(log).await,
        Ok(Some(outcome)) => log.finish(outcome),
        Err(failure) => log.fail(exec, failure).await,
    }
}

/// `Ok(None)` means the dry run stopped before the mutation.
async fn run(
    exec: &ActionExecutor<'_>,
    log: &mut StepLog,
    message: &MessageRef,
) -> Result<Option<ActionOutcome>, StageFailure> {
    exec.navigate_to_message(log, message).await?;
    exec.focus_message(log, message).await?;
    exec.open_context_menu(log, message).await?;
    exec.select_menu_item(log, MenuAction::Delete).await?;
    if exec.dry_run {
        return Ok(None);
    }

    let handle = match locator::locate(exec.driver, &locator::confirm_button(exec.timing.confirm_timeout())).await {
        Located::Found(h) => h,
        Located::NotFound { .. } => {
            return Err(StageFailure::new(
                Stage::Confirmed,
                "confirmation dialog never appeared",
            ))
        }
    };
    locator::activate(exec.driver, &handle)
        .await
        .map_err(|e| StageFailure::from_error(Stage::Confirmed, e))?;
    log.record(exec, Stage::Confirmed.label(), StepOutcome::Ok).await;

    let container = message.container_selector();
    if !browser::wait_for_detach(exec.driver, &container, exec.timing.verify_timeout()).await {
        return Err(StageFailure::new(
            Stage::Verified,
            format!("container {} still present after confirm", message.container_id()),
        ));
    }
    log.record(exec, Stage::Verified.label(), StepOutcome::Ok).await;
    info!("delete: {} removed", message.message_id);
    Ok(Some(ActionOutcome::Verified))
}
