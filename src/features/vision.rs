//! Remote vision-model fallback.
//!
//! `image × goal → Option<VisionAction>`. No retries, no side effects on the
//! page; every failure path (missing key, network, status, body) collapses to
//! `None` so the caller decides what "no suggestion" means.

use crate::browser::{PageDriver, ShotOptions};
use crate::core::config::VisionSettings;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You operate a web browser by looking at screenshots. \
Reply with exactly ONE JSON object and nothing else. Allowed shapes: \
{\"action\":\"click\",\"x\":<int>,\"y\":<int>} \
{\"action\":\"type\",\"x\":<int>,\"y\":<int>,\"text\":\"...\"} \
{\"action\":\"not_found\"} {\"action\":\"done\"}. \
Coordinates are pixels in the screenshot you were given.";

/// A downscaled viewport capture ready to inline into the request.
#[derive(Debug, Clone)]
pub struct VisionShot {
    pub bytes: Vec<u8>,
    /// Factor the viewport was scaled by; used to map coordinates back.
    pub scale: f64,
}

impl VisionShot {
    pub fn data_url(&self) -> String {
        format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Viewport-only compressed capture. `None` when the driver cannot screenshot.
pub async fn capture(driver: &dyn PageDriver, scale: f64, quality: i64) -> Option<VisionShot> {
    match driver
        .screenshot(&ShotOptions::compressed(scale, quality))
        .await
    {
        Ok(bytes) if !bytes.is_empty() => Some(VisionShot { bytes, scale }),
        Ok(_) => {
            warn!("vision: empty screenshot");
            None
        }
        Err(e) => {
            warn!("vision: screenshot failed: {}", e);
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VisionAction {
    Click { x: f64, y: f64 },
    Type { x: f64, y: f64, text: String },
    NotFound,
    Done,
}

impl VisionAction {
    /// Map screenshot-space coordinates back onto the page viewport.
    pub fn to_viewport(&self, scale: f64) -> VisionAction {
        let s = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
        match self {
            VisionAction::Click { x, y } => VisionAction::Click {
                x: x / s,
                y: y / s,
            },
            VisionAction::Type { x, y, text } => VisionAction::Type {
                x: x / s,
                y: y / s,
                text: text.clone(),
            },
            other => other.clone(),
        }
    }

    fn from_value(v: &Value) -> Option<Self> {
        let action = v.get("action")?.as_str()?.trim().to_ascii_lowercase();
        let num = |k: &str| v.get(k).and_then(Value::as_f64).filter(|n| n.is_finite());
        match action.replace(|c: char| c == '-' || c == ' ', "_").as_str() {
            "click" => Some(VisionAction::Click {
                x: num("x")?,
                y: num("y")?,
            }),
            "type" => Some(VisionAction::Type {
                x: num("x")?,
                y: num("y")?,
                text: v.get("text")?.as_str()?.to_string(),
            }),
            "not_found" | "notfound" => Some(VisionAction::NotFound),
            "done" => Some(VisionAction::Done),
            _ => None,
        }
    }
}

/// First JSON object in free-form model output: a fenced block wins over a
/// bare object; unknown or incomplete actions yield `None`.
pub fn parse_action(raw: &str) -> Option<VisionAction> {
    if let Some(v) = fenced_object(raw) {
        return VisionAction::from_value(&v);
    }
    bare_object(raw).and_then(|v| VisionAction::from_value(&v))
}

fn fenced_object(raw: &str) -> Option<Value> {
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    // Skip the optional language tag on the opening fence line.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    bare_object(&body[..end])
}

fn bare_object(raw: &str) -> Option<Value> {
    for (i, _) in raw.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&raw[i..]).into_iter::<Value>();
        if let Some(Ok(v @ Value::Object(_))) = stream.next() {
            return Some(v);
        }
    }
    None
}

/// Text the model produced: `content`, then `reasoning_content`.
fn completion_texts(envelope: &Value) -> Vec<String> {
    let message = envelope
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("message"));
    let Some(message) = message else {
        return Vec::new();
    };
    ["content", "reasoning_content"]
        .iter()
        .filter_map(|k| message.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub struct VisionClient {
    http: reqwest::Client,
    settings: VisionSettings,
}

impl VisionClient {
    pub fn new(settings: VisionSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(settings.resolve_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!("vision: http client builder failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self { http, settings }
    }

    pub fn settings(&self) -> &VisionSettings {
        &self.settings
    }

    pub fn is_configured(&self) -> bool {
        self.settings.resolve_api_key().is_some()
    }

    /// One request, one answer. Never errors.
    pub async fn ask(&self, shot: &VisionShot, goal: &str) -> Option<VisionAction> {
        let Some(api_key) = self.settings.resolve_api_key() else {
            info!("vision: no API key configured, skipping");
            return None;
        };

        let url = format!(
            "{}/chat/completions",
            self.settings.resolve_base_url().trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.settings.resolve_model(),
            "temperature": 0.1,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": [
                    {"type": "text", "text": goal},
                    {"type": "image_url", "image_url": {"url": shot.data_url()}}
                ]}
            ]
        });

        let response = match self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .timeout(self.settings.resolve_timeout())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("vision: request failed: {}", e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(
                "vision: chat.completions status={} body={}",
                status,
                text.chars().take(300).collect::<String>()
            );
            return None;
        }

        let envelope: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("vision: response json parse failed: {}", e);
                return None;
            }
        };

        let action = completion_texts(&envelope)
            .iter()
            .find_map(|t| parse_action(t));
        debug!("vision: goal={:?} → {:?}", goal, action);
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_object_after_prose() {
        let a = parse_action("Sure. {\"action\":\"click\",\"x\":10,\"y\":20} hope that helps {\"action\":\"done\"}");
        assert_eq!(a, Some(VisionAction::Click { x: 10.0, y: 20.0 }));
    }

    #[test]
    fn test_fenced_block_preferred() {
        let raw = "thinking {not json}\n```json\n{\"action\": \"type\", \"x\": 1, \"y\": 2, \"text\": \"hi\"}\n```";
        assert_eq!(
            parse_action(raw),
            Some(VisionAction::Type {
                x: 1.0,
                y: 2.0,
                text: "hi".into()
            })
        );
    }

    #[test]
    fn test_unparseable_or_unknown_is_none() {
        assert_eq!(parse_action("no json here"), None);
        assert_eq!(parse_action("{\"action\":\"dance\"}"), None);
        assert_eq!(parse_action("{\"action\":\"click\",\"x\":5}"), None);
        assert_eq!(parse_action("{\"action\":\"NOT_FOUND\"}"), Some(VisionAction::NotFound));
    }

    #[test]
    fn test_to_viewport_divides_by_scale() {
        let a = VisionAction::Click { x: 50.0, y: 25.0 }.to_viewport(0.5);
        assert_eq!(a, VisionAction::Click { x: 100.0, y: 50.0 });
        assert_eq!(VisionAction::Done.to_viewport(0.5), VisionAction::Done);
    }

    #[test]
    fn test_reasoning_content_fallback() {
        let env = serde_json::json!({
            "choices": [{"message": {"content": "", "reasoning_content": "{\"action\":\"done\"}"}}]
        });
        let texts = completion_texts(&env);
        assert_eq!(texts.len(), 1);
        assert_eq!(parse_action(&texts[0]), Some(VisionAction::Done));
    }
}
