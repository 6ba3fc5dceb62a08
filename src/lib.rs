pub mod browser;
pub mod core;
pub mod features;
pub mod tools;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::{ModerationError, PilotConfig, RunArtifacts};

// --- Short module paths ---
pub use browser::{BrowserSession, PageDriver};
pub use features::{accessibility, classify, locator, scanner, vision};
pub use tools::{audit, compose, delete, fanout, purge, reply};
