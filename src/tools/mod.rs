pub mod audit;
pub mod compose;
pub mod delete;
pub mod executor;
pub mod fanout;
pub mod purge;
pub mod reply;
pub mod scan;
pub mod vision_debug;

pub use executor::{ActionExecutor, StepLog};
