//! Browser discovery and the single, profile-bound session.
//!
//! * Finding a usable browser executable (Chrome → Chromium → Brave, cross-platform).
//! * `BrowserSession`: one browser bound to a persistent `--user-data-dir`
//!   so the platform login survives between runs.
//!
//! The profile directory is owned by the operator. The session never deletes
//! it, and it only removes a `SingletonLock` that is provably stale.

use super::chromium::ChromeDriver;
use crate::core::config;
use crate::core::errors::ModerationError;
use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Handler};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan – finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Some(p) = config::chrome_executable_override() {
        return Some(p);
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
            "brave",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/local/bin/chromium",
            "/usr/bin/brave-browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Session config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub profile_dir: PathBuf,
    pub headed: bool,
    pub width: u32,
    pub height: u32,
}

/// Build a `BrowserConfig` bound to the persistent profile.
///
/// Headless unless `headed`; a headed window lets the operator log in or
/// watch the run in the same profile.
pub fn build_session_config(exe: &str, opts: &SessionOptions) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .user_data_dir(&opts.profile_dir)
        .viewport(Viewport {
            width: opts.width,
            height: opts.height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(opts.width, opts.height)
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-infobars")
        .arg("--disable-blink-features=AutomationControlled");

    if opts.headed {
        builder = builder.with_head();
    } else {
        builder = builder.arg("--disable-gpu").arg("--hide-scrollbars");
    }

    builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

/// Remove `SingletonLock` only when it is a dangling symlink to a host/pid
/// that no longer exists on this machine. Any doubt leaves it in place.
fn remove_stale_singleton_lock(profile_dir: &Path) {
    let lock = profile_dir.join("SingletonLock");
    let Ok(target) = std::fs::read_link(&lock) else {
        return;
    };
    let target = target.to_string_lossy().to_string();
    let Some((_, pid)) = target.rsplit_once('-') else {
        return;
    };
    let Ok(pid) = pid.parse::<u32>() else {
        return;
    };

    #[cfg(target_os = "linux")]
    {
        if Path::new(&format!("/proc/{}", pid)).exists() {
            return;
        }
        match std::fs::remove_file(&lock) {
            Ok(()) => info!("session: removed stale SingletonLock (pid {} gone)", pid),
            Err(e) => warn!("session: failed to remove stale SingletonLock: {}", e),
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
    }
}

fn spawn_handler_task(mut handler: Handler, closed: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("CDP handler error: {}", e);
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}

// ── Session ──────────────────────────────────────────────────────────────────

/// The one browser of this process plus its single working page.
pub struct BrowserSession {
    browser: Browser,
    driver: ChromeDriver,
    handler_task: tokio::task::JoinHandle<()>,
    closed: Arc<AtomicBool>,
    profile_dir: PathBuf,
}

impl BrowserSession {
    pub async fn launch(opts: SessionOptions) -> Result<Self> {
        let exe = find_chrome_executable().ok_or_else(|| {
            ModerationError::Browser(
                "no browser found; install Chrome or Chromium, or set CHROME_EXECUTABLE".into(),
            )
        })?;

        std::fs::create_dir_all(&opts.profile_dir).map_err(|e| {
            anyhow!(
                "session: cannot create profile dir {}: {}",
                opts.profile_dir.display(),
                e
            )
        })?;
        remove_stale_singleton_lock(&opts.profile_dir);

        info!(
            "session: launching {} ({}) with profile {}",
            exe,
            if opts.headed { "headed" } else { "headless" },
            opts.profile_dir.display()
        );

        let config = build_session_config(&exe, &opts)?;
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| ModerationError::Browser(format!("launch of {} failed: {}", exe, e)))?;

        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("Failed to open page: {}", e))?;

        Ok(Self {
            browser,
            driver: ChromeDriver::new(page),
            handler_task,
            closed,
            profile_dir: opts.profile_dir,
        })
    }

    pub fn driver(&self) -> &ChromeDriver {
        &self.driver
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the browser. The profile directory is left untouched.
    pub async fn close(mut self) {
        info!("session: closing browser");
        if let Err(e) = self.browser.close().await {
            warn!("Browser close error (non-fatal): {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }

    /// Keep the window open for the operator until the browser goes away
    /// (window closed) or Ctrl-C.
    pub async fn detach_until_closed(self) {
        info!("session: leaving browser open; close the window or press Ctrl-C to exit");
        loop {
            if self.is_closed() {
                break;
            }
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
            }
        }
        self.close().await;
    }
}
