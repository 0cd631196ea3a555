mod build;
mod cache;
mod hash;
mod worker;

pub use build::{BuildArgs, cmd_build};
pub use cache::{CacheCommand, cmd_cache};
pub use hash::cmd_hash;
pub use worker::cmd_worker;
