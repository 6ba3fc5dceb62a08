//! Per-run artifact directory: JSON summaries, step screenshots, crash dumps.

use crate::browser::{PageDriver, ShotOptions};
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CRASH_LOG: &str = "modpilot-crash.log";

#[derive(Debug, Clone)]
pub struct RunArtifacts {
    dir: PathBuf,
}

impl RunArtifacts {
    /// Create `<root>/<command>-<YYYYmmdd-HHMMSS>/`.
    pub fn create(root: &Path, command: &str) -> Result<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let mut dir = root.join(format!("{}-{}", command, stamp));
        // Two runs in the same second get a numeric suffix.
        let mut n = 1;
        while dir.exists() {
            n += 1;
            dir = root.join(format!("{}-{}-{}", command, stamp, n));
        }
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow!("artifacts: failed to create {:?}: {}", dir, e))?;
        info!("artifacts: {}", dir.display());
        Ok(Self { dir })
    }

    /// Use an existing directory as-is.
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow!("artifacts: failed to create {:?}: {}", dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.path(name);
        let body = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, body)
            .map_err(|e| anyhow!("artifacts: failed to write {:?}: {}", path, e))?;
        Ok(path)
    }

    pub fn screenshot_path(&self, label: &str) -> PathBuf {
        let slug: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.path(&format!(
            "{}-{}.png",
            slug,
            chrono::Utc::now().timestamp_millis()
        ))
    }

    pub fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        std::fs::write(path, bytes)
            .map_err(|e| anyhow!("artifacts: failed to write {:?}: {}", path, e))
    }

    /// Viewport screenshot saved as `<label>-<millis>.png`.
    pub async fn capture(&self, driver: &dyn PageDriver, label: &str) -> Result<String> {
        let bytes = driver.screenshot(&ShotOptions::evidence()).await?;
        let path = self.screenshot_path(label);
        self.write_bytes(&path, &bytes)?;
        Ok(path.to_string_lossy().to_string())
    }

    /// Like [`capture`](Self::capture) but never fails; the error is logged.
    pub async fn try_capture(&self, driver: &dyn PageDriver, label: &str) -> Option<String> {
        match self.capture(driver, label).await {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("artifacts: screenshot {} failed: {}", label, e);
                None
            }
        }
    }
}

/// Append an unexpected process-level error to `<root>/modpilot-crash.log`.
pub fn write_crash_dump(root: &Path, err: &anyhow::Error) -> Option<PathBuf> {
    append_crash_entry(root, &format!("{:?}", err))
}

/// Append one timestamped entry to the crash log.
pub fn append_crash_entry(root: &Path, detail: &str) -> Option<PathBuf> {
    let _ = std::fs::create_dir_all(root);
    let path = root.join(CRASH_LOG);
    let body = format!("[{}] {}\n", chrono::Local::now().to_rfc3339(), detail);
    use std::io::Write;
    let written = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut f| f.write_all(body.as_bytes()));
    match written {
        Ok(()) => Some(path),
        Err(e) => {
            eprintln!("modpilot: could not write crash dump {:?}: {}", path, e);
            None
        }
    }
}

/// Route panics through the crash log and exit with status 1 instead of
/// unwinding to the default 101.
pub fn install_panic_hook(root: PathBuf) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        if let Some(path) = append_crash_entry(&root, &format!("panic: {}", info)) {
            eprintln!("modpilot: crash dump written to {}", path.display());
        }
        std::process::exit(1);
    }));
}
