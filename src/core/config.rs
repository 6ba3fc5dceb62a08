use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// PilotConfig: file-based config loader (modpilot.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "MODPILOT_CONFIG";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_PROFILE_DIR: &str = "MODPILOT_PROFILE_DIR";
pub const ENV_ARTIFACTS_DIR: &str = "MODPILOT_ARTIFACTS_DIR";
pub const ENV_VISION_API_KEY: &str = "GLM_API_KEY";
pub const ENV_VISION_BASE_URL: &str = "GLM_BASE_URL";
pub const ENV_VISION_MODEL: &str = "GLM_VISION_MODEL";
pub const ENV_VISION_TIMEOUT_MS: &str = "GLM_TIMEOUT_MS";

const DEFAULT_VISION_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
const DEFAULT_VISION_MODEL: &str = "glm-4.5v";

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Vision sub-config (mirrors the `vision` key in modpilot.json).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct VisionSettings {
    /// API key. Never logged.
    pub api_key: Option<String>,
    /// Chat-completions base URL, without the `/chat/completions` suffix.
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    /// Downscale factor applied to the viewport screenshot. Default: 0.5.
    pub scale: Option<f64>,
    /// JPEG quality of the screenshot sent to the model. Default: 60.
    pub jpeg_quality: Option<i64>,
}

impl VisionSettings {
    /// API key: JSON field → `GLM_API_KEY` env var → `None`.
    ///
    /// Unlike a local LLM endpoint there is no key-less mode; an empty key is
    /// treated as missing.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .or_else(|| env_nonempty(ENV_VISION_API_KEY))
    }

    /// Base URL: JSON field → `GLM_BASE_URL` env var → bigmodel.cn v4.
    pub fn resolve_base_url(&self) -> String {
        self.base_url
            .as_ref()
            .filter(|u| !u.trim().is_empty())
            .cloned()
            .or_else(|| env_nonempty(ENV_VISION_BASE_URL))
            .unwrap_or_else(|| DEFAULT_VISION_BASE_URL.to_string())
    }

    /// Model: JSON field → `GLM_VISION_MODEL` env var → `glm-4.5v`.
    pub fn resolve_model(&self) -> String {
        self.model
            .as_ref()
            .filter(|m| !m.trim().is_empty())
            .cloned()
            .or_else(|| env_nonempty(ENV_VISION_MODEL))
            .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string())
    }

    /// Per-call timeout: JSON field → `GLM_TIMEOUT_MS` env var → 30s.
    pub fn resolve_timeout(&self) -> Duration {
        let ms = self
            .timeout_ms
            .or_else(|| env_nonempty(ENV_VISION_TIMEOUT_MS).and_then(|v| v.parse().ok()))
            .unwrap_or(30_000);
        Duration::from_millis(ms.max(1))
    }

    pub fn resolve_scale(&self) -> f64 {
        self.scale
            .filter(|s| s.is_finite() && *s > 0.0 && *s <= 1.0)
            .unwrap_or(0.5)
    }

    pub fn resolve_jpeg_quality(&self) -> i64 {
        self.jpeg_quality.map(|q| q.clamp(1, 100)).unwrap_or(60)
    }
}

/// Browser session sub-config.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct SessionSettings {
    /// Persistent browser profile directory (keeps the login).
    pub profile_dir: Option<String>,
    /// Platform origin, e.g. `https://discord.com`.
    pub origin: Option<String>,
    pub viewport_width: Option<u32>,
    pub viewport_height: Option<u32>,
}

impl SessionSettings {
    /// Profile dir: JSON field → `MODPILOT_PROFILE_DIR` → `~/.modpilot/profile`.
    pub fn resolve_profile_dir(&self) -> PathBuf {
        if let Some(p) = self.profile_dir.as_ref().filter(|p| !p.trim().is_empty()) {
            return PathBuf::from(expand_tilde(p.trim()));
        }
        if let Some(p) = env_nonempty(ENV_PROFILE_DIR) {
            return PathBuf::from(expand_tilde(&p));
        }
        dirs::home_dir()
            .map(|h| h.join(".modpilot").join("profile"))
            .unwrap_or_else(|| PathBuf::from(".modpilot-profile"))
    }

    pub fn resolve_origin(&self) -> String {
        self.origin
            .as_ref()
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| crate::core::types::DEFAULT_PLATFORM_ORIGIN.to_string())
    }

    pub fn resolve_viewport(&self) -> (u32, u32) {
        (
            self.viewport_width.unwrap_or(1440),
            self.viewport_height.unwrap_or(900),
        )
    }
}

/// Timing budgets for the interaction state machine and batch loops.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct TimingSettings {
    /// Bounded wait for a message container after permalink navigation.
    pub attach_timeout_ms: Option<u64>,
    /// Per-strategy wait budget used by locator specs.
    pub strategy_budget_ms: Option<u64>,
    /// Wait for the confirmation dialog / reply banner.
    pub confirm_timeout_ms: Option<u64>,
    /// Wait for a mutation to become visible (container gone, composer empty).
    pub verify_timeout_ms: Option<u64>,
    /// Fixed settle pause after hover / menu open / clicks.
    pub settle_ms: Option<u64>,
    /// Hard deadline for login / channel-navigation waits.
    pub login_wait_secs: Option<u64>,
}

impl TimingSettings {
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms.unwrap_or(15_000))
    }

    pub fn strategy_budget(&self) -> Duration {
        Duration::from_millis(self.strategy_budget_ms.unwrap_or(2_500))
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms.unwrap_or(4_000))
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms.unwrap_or(6_000))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms.unwrap_or(400))
    }

    pub fn login_wait(&self) -> Duration {
        Duration::from_secs(self.login_wait_secs.unwrap_or(300))
    }
}

/// Reply fan-out sub-config.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct FanoutSettings {
    /// Channel URL that receives Chinese-language replies.
    pub zh_channel: Option<String>,
    /// Channel URL that receives every other reply.
    pub general_channel: Option<String>,
    pub delay_ms: Option<u64>,
}

impl FanoutSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.unwrap_or(2_500))
    }
}

/// Top-level config loaded from `modpilot.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct PilotConfig {
    #[serde(default)]
    pub vision: VisionSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub fanout: FanoutSettings,
    /// Root directory for per-run artifact folders.
    pub artifacts_dir: Option<String>,
}

impl PilotConfig {
    /// Artifacts root: JSON field → `MODPILOT_ARTIFACTS_DIR` → `./runs`.
    pub fn resolve_artifacts_root(&self) -> PathBuf {
        self.artifacts_dir
            .as_ref()
            .filter(|d| !d.trim().is_empty())
            .map(|d| PathBuf::from(expand_tilde(d.trim())))
            .or_else(|| env_nonempty(ENV_ARTIFACTS_DIR).map(|d| PathBuf::from(expand_tilde(&d))))
            .unwrap_or_else(|| PathBuf::from("runs"))
    }
}

/// Load `modpilot.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `MODPILOT_CONFIG` env var path
/// 2. `./modpilot.json`
/// 3. `../modpilot.json`
///
/// Missing file → `PilotConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `PilotConfig::default()`.
pub fn load_config() -> PilotConfig {
    let mut candidates = vec![
        PathBuf::from("modpilot.json"),
        PathBuf::from("../modpilot.json"),
    ];
    if let Some(env_path) = env_nonempty(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        if let Some(cfg) = load_config_from(path) {
            return cfg;
        }
    }

    PilotConfig::default()
}

/// Parse one candidate file. `None` when the file does not exist; a parse
/// error is logged and yields the default config so a typo never blocks a run.
pub fn load_config_from(path: &Path) -> Option<PilotConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<PilotConfig>(&contents) {
        Ok(cfg) => {
            tracing::info!("modpilot.json loaded from {}", path.display());
            Some(cfg)
        }
        Err(e) => {
            tracing::warn!(
                "modpilot.json parse error at {}: {}; using defaults",
                path.display(),
                e
            );
            Some(PilotConfig::default())
        }
    }
}

/// Optional override for the Chromium-family browser executable.
///
/// Only returns a value when `CHROME_EXECUTABLE` is set to an existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = env_nonempty(ENV_CHROME_EXECUTABLE)?;
    if Path::new(&p).exists() {
        Some(p)
    } else {
        None
    }
}

pub fn expand_tilde(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: PilotConfig = serde_json::from_str(
            r#"{"vision": {"model": "glm-4v-plus", "timeout_ms": 5000}, "timing": {"settle_ms": 100}}"#,
        )
        .unwrap();
        assert_eq!(cfg.vision.resolve_model(), "glm-4v-plus");
        assert_eq!(cfg.vision.resolve_timeout(), Duration::from_millis(5000));
        assert_eq!(cfg.timing.settle(), Duration::from_millis(100));
        assert_eq!(cfg.timing.login_wait(), Duration::from_secs(300));
        assert_eq!(cfg.fanout.delay(), Duration::from_millis(2500));
    }

    #[test]
    fn test_vision_scale_is_clamped_to_sane_values() {
        let v = VisionSettings {
            scale: Some(3.0),
            jpeg_quality: Some(500),
            ..Default::default()
        };
        assert_eq!(v.resolve_scale(), 0.5);
        assert_eq!(v.resolve_jpeg_quality(), 100);
    }

    #[test]
    fn test_explicit_blank_key_counts_as_missing_when_env_unset() {
        let v = VisionSettings {
            api_key: Some("  ".into()),
            ..Default::default()
        };
        if std::env::var(ENV_VISION_API_KEY).is_err() {
            assert!(v.resolve_api_key().is_none());
        }
    }

    #[test]
    fn test_origin_trailing_slash_trimmed() {
        let s = SessionSettings {
            origin: Some("https://discord.com/".into()),
            ..Default::default()
        };
        assert_eq!(s.resolve_origin(), "https://discord.com");
    }

    #[test]
    fn test_malformed_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modpilot.json");
        std::fs::write(&path, "{ not json").unwrap();
        let cfg = load_config_from(&path).expect("existing file yields a config");
        assert!(cfg.artifacts_dir.is_none());
        assert!(load_config_from(&dir.path().join("absent.json")).is_none());
    }
}
