pub mod accessibility;
pub mod classify;
pub mod locator;
pub mod pacing;
pub mod scanner;
pub mod vision;
