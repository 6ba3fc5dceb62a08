use crate::core::types::Stage;
use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for moderation operations.
///
/// Vision-model failures are deliberately absent: `VisionClient::ask` degrades
/// to `None` and never produces an error value.
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("url did not resolve to {expected} within {}s (last url: {last_url})", .waited.as_secs())]
    NavigationTimeout {
        expected: &'static str,
        last_url: String,
        waited: Duration,
    },

    #[error("all strategies exhausted for {target} (tried: {})", .tried.join(", "))]
    LocatorExhausted { target: String, tried: Vec<String> },

    #[error("invariant violated at {stage}: {detail}")]
    InvariantViolation { stage: Stage, detail: String },

    #[error("missing target: {0}")]
    MissingTarget(String),

    #[error("browser failure: {0}")]
    Browser(String),
}
