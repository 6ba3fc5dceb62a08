//! Shared machinery for the single-target interaction state machine.
//!
//! Each action owns a [`StepLog`]; every transition appends an [`ActionStep`]
//! with a screenshot reference, and the log always ends in exactly one
//! terminal outcome.

use crate::browser::{self, ElementRef, PageDriver, WaitPolicy};
use crate::core::artifacts::RunArtifacts;
use crate::core::config::TimingSettings;
use crate::core::errors::ModerationError;
use crate::core::types::{
    ActionKind, ActionOutcome, ActionReport, ActionStep, MessageRef, Stage, StepOutcome,
};
use crate::features::locator::{self, Located, MenuAction, MenuLookup};
use crate::features::vision::{self, VisionClient};
use tracing::{info, warn};

/// Terminal failure of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}

impl StageFailure {
    pub fn new(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }

    pub fn from_error(stage: Stage, err: impl std::fmt::Display) -> Self {
        Self::new(stage, err.to_string())
    }
}

pub struct StepLog {
    kind: ActionKind,
    target: String,
    steps: Vec<ActionStep>,
    menu_items: Vec<String>,
    advice: Option<serde_json::Value>,
}

impl StepLog {
    pub fn new(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            steps: Vec::new(),
            menu_items: Vec::new(),
            advice: None,
        }
    }

    pub fn steps(&self) -> &[ActionStep] {
        &self.steps
    }

    fn kind_slug(&self) -> &'static str {
        match self.kind {
            ActionKind::Delete => "delete",
            ActionKind::Reply => "reply",
            ActionKind::Clear => "clear",
            ActionKind::Post => "post",
        }
    }

    /// Capture evidence, then append the step.
    pub async fn record(
        &mut self,
        exec: &ActionExecutor<'_>,
        label: &str,
        outcome: StepOutcome,
    ) -> Option<String> {
        let shot_label = format!("{}-{}", self.kind_slug(), label);
        let (screenshot_path, outcome) = match exec.artifacts.capture(exec.driver, &shot_label).await {
            Ok(p) => (Some(p), outcome),
            Err(e) => {
                warn!("executor: evidence for {} unavailable: {}", label, e);
                let outcome = match outcome {
                    StepOutcome::Failed { reason } => StepOutcome::Failed {
                        reason: format!("{} (screenshot unavailable: {})", reason, e),
                    },
                    other => other,
                };
                (None, outcome)
            }
        };
        self.steps.push(ActionStep {
            label: label.to_string(),
            screenshot_path: screenshot_path.clone(),
            outcome,
        });
        screenshot_path
    }

    pub fn set_menu_items(&mut self, items: Vec<String>) {
        self.menu_items = items;
    }

    pub fn set_advice(&mut self, advice: Option<serde_json::Value>) {
        self.advice = advice;
    }

    pub fn finish(self, outcome: ActionOutcome) -> ActionReport {
        ActionReport {
            kind: self.kind,
            target: self.target,
            steps: self.steps,
            outcome,
            menu_items: self.menu_items,
            advice: self.advice,
        }
    }

    /// Record the failing step and close the log as `Failed(stage)`.
    pub async fn fail(mut self, exec: &ActionExecutor<'_>, failure: StageFailure) -> ActionReport {
        warn!(
            "executor: {} failed at {}: {}",
            self.target, failure.stage, failure.reason
        );
        self.record(
            exec,
            failure.stage.label(),
            StepOutcome::failed(failure.reason.clone()),
        )
        .await;
        let screenshot_path = self.steps.iter().rev().find_map(|s| s.screenshot_path.clone());
        self.finish(ActionOutcome::Failed {
            stage: failure.stage,
            reason: failure.reason,
            screenshot_path,
        })
    }
}

pub struct ActionExecutor<'a> {
    pub driver: &'a dyn PageDriver,
    pub artifacts: &'a RunArtifacts,
    pub timing: TimingSettings,
    pub origin: String,
    pub dry_run: bool,
    advisor: Option<&'a VisionClient>,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(
        driver: &'a dyn PageDriver,
        artifacts: &'a RunArtifacts,
        timing: TimingSettings,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            driver,
            artifacts,
            timing,
            origin: origin.into(),
            dry_run: false,
            advisor: None,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Vision advisor consulted for diagnostics only.
    pub fn with_advisor(mut self, advisor: Option<&'a VisionClient>) -> Self {
        self.advisor = advisor;
        self
    }

    pub async fn settle(&self) {
        tokio::time::sleep(self.timing.settle()).await;
    }

    /// Permalink navigation, then a bounded wait for the message container.
    pub async fn navigate_to_message(
        &self,
        log: &mut StepLog,
        message: &MessageRef,
    ) -> Result<(), StageFailure> {
        let url = message.permalink(&self.origin);
        self.driver
            .navigate(&url, WaitPolicy::Load)
            .await
            .map_err(|e| StageFailure::from_error(Stage::Navigated, e))?;

        let container = message.container_selector();
        if !browser::wait_for_selector(self.driver, &container, self.timing.attach_timeout()).await
        {
            return Err(StageFailure::from_error(
                Stage::Navigated,
                ModerationError::MissingTarget(format!(
                    "container {} did not attach within {}ms",
                    message.container_id(),
                    self.timing.attach_timeout().as_millis()
                )),
            ));
        }
        log.record(self, Stage::Navigated.label(), StepOutcome::Ok).await;
        Ok(())
    }

    /// Scroll the container into view and hover it so the toolbar renders.
    pub async fn focus_message(
        &self,
        log: &mut StepLog,
        message: &MessageRef,
    ) -> Result<(), StageFailure> {
        let container = ElementRef::first(message.container_selector());
        self.driver
            .scroll_into_view(&container)
            .await
            .map_err(|e| StageFailure::from_error(Stage::Located, e))?;
        self.driver
            .hover(&container)
            .await
            .map_err(|e| StageFailure::from_error(Stage::Located, e))?;
        self.settle().await;
        log.record(self, Stage::Located.label(), StepOutcome::Ok).await;
        Ok(())
    }

    /// Context-menu chain, then a bounded wait for the menu itself.
    pub async fn open_context_menu(
        &self,
        log: &mut StepLog,
        message: &MessageRef,
    ) -> Result<(), StageFailure> {
        let spec = locator::context_menu(message, self.timing.strategy_budget());
        let failure = match locator::locate(self.driver, &spec).await {
            Located::Found(handle) => match locator::activate(self.driver, &handle).await {
                Ok(()) => {
                    if browser::wait_for_selector(
                        self.driver,
                        locator::MENU,
                        self.timing.confirm_timeout(),
                    )
                    .await
                    {
                        self.settle().await;
                        log.record(self, Stage::MenuOpen.label(), StepOutcome::Ok).await;
                        return Ok(());
                    }
                    format!("menu did not open after {}", handle.strategy)
                }
                Err(e) => format!("{} gesture failed: {}", handle.strategy, e),
            },
            Located::NotFound { target, tried } => {
                ModerationError::LocatorExhausted { target, tried }.to_string()
            }
        };

        log.set_menu_items(locator::visible_menu_items(self.driver).await);
        log.set_advice(
            self.advise(&format!(
                "Find the chat message whose id ends with {} and point at the control that opens its context menu.",
                message.message_id
            ))
            .await,
        );
        Err(StageFailure::new(Stage::MenuOpen, failure))
    }

    /// Click the locale-matched menu item. In a dry run the item is only
    /// located and the menu dismissed.
    pub async fn select_menu_item(
        &self,
        log: &mut StepLog,
        action: MenuAction,
    ) -> Result<MenuLookup, StageFailure> {
        let lookup = locator::locate_menu_item(self.driver, action).await;
        let Some(element) = lookup.element() else {
            let reason = format!(
                "no {:?} item among {} visible menu items",
                action,
                lookup.texts.len()
            );
            log.set_menu_items(lookup.texts);
            return Err(StageFailure::new(Stage::ItemSelected, reason));
        };

        if self.dry_run {
            return Ok(lookup);
        }

        self.driver
            .click(&element, browser::MouseButton::Left)
            .await
            .map_err(|e| StageFailure::from_error(Stage::ItemSelected, e))?;
        self.settle().await;
        log.record(self, Stage::ItemSelected.label(), StepOutcome::Ok).await;
        Ok(lookup)
    }

    /// Dismiss whatever menu is open and close the log as `Skipped`.
    pub async fn finish_dry_run(&self, mut log: StepLog) -> ActionReport {
        if let Err(e) = self.driver.press_key("Escape").await {
            warn!("executor: escape after dry run failed: {}", e);
        }
        log.record(
            self,
            Stage::ItemSelected.label(),
            StepOutcome::Skipped {
                reason: "dry run".to_string(),
            },
        )
        .await;
        info!("executor: dry run stopped before mutation");
        log.finish(ActionOutcome::Skipped)
    }

    /// Ask the vision advisor for a suggestion; recorded, never executed.
    pub async fn advise(&self, goal: &str) -> Option<serde_json::Value> {
        let advisor = self.advisor?;
        if !advisor.is_configured() {
            return None;
        }
        let settings = advisor.settings();
        let shot = vision::capture(
            self.driver,
            settings.resolve_scale(),
            settings.resolve_jpeg_quality(),
        )
        .await?;
        let action = advisor.ask(&shot, goal).await?;
        serde_json::to_value(action.to_viewport(shot.scale)).ok()
    }
}
