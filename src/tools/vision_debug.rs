//! Advisory vision probe: ask the model what it would do for a goal on the
//! current page. Only `--apply` lets the suggestion touch the page.

use crate::browser::{PageDriver, WaitPolicy};
use crate::core::artifacts::RunArtifacts;
use crate::features::vision::{self, VisionAction, VisionClient};
use anyhow::Result;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionProbe {
    pub goal: String,
    pub url: Option<String>,
    pub screenshot_path: Option<String>,
    /// Suggestion in viewport coordinates; `None` when the model gave nothing usable.
    pub action: Option<VisionAction>,
    pub applied: bool,
}

pub async fn probe(
    driver: &dyn PageDriver,
    artifacts: &RunArtifacts,
    client: &VisionClient,
    url: Option<&str>,
    goal: &str,
    apply: bool,
) -> Result<VisionProbe> {
    if let Some(u) = url {
        driver.navigate(u, WaitPolicy::Load).await?;
    }

    let settings = client.settings();
    let shot = vision::capture(driver, settings.resolve_scale(), settings.resolve_jpeg_quality()).await;
    let screenshot_path = match &shot {
        Some(s) => {
            let path = artifacts.path(&format!("vision-{}.jpg", chrono::Utc::now().timestamp_millis()));
            artifacts.write_bytes(&path, &s.bytes)?;
            Some(path.to_string_lossy().to_string())
        }
        None => None,
    };

    let action = match &shot {
        Some(s) => client.ask(s, goal).await.map(|a| a.to_viewport(s.scale)),
        None => None,
    };

    let mut applied = false;
    if apply {
        match &action {
            Some(VisionAction::Click { x, y }) => {
                driver.click_at(*x, *y).await?;
                applied = true;
            }
            Some(VisionAction::Type { x, y, text }) => {
                driver.click_at(*x, *y).await?;
                driver.type_text(text).await?;
                applied = true;
            }
            _ => {}
        }
    }

    let result = VisionProbe {
        goal: goal.to_string(),
        url: driver.current_url().await.ok(),
        screenshot_path,
        action,
        applied,
    };
    artifacts.write_json("vision.json", &result)?;
    info!("vision: suggestion={:?} applied={}", result.action, applied);
    Ok(result)
}
