pub mod artifacts;
pub mod config;
pub mod errors;
pub mod types;

pub use artifacts::RunArtifacts;
pub use config::PilotConfig;
pub use errors::ModerationError;
