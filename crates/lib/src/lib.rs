//! assetforge-lib: an incremental asset build engine
//!
//! This crate turns trees of asset-compilation commands into cached outputs:
//! - `storage`: content hashes, the object database and input versions
//! - `diagnostics`: serializable, multicast build logging
//! - `build`: commands, build steps and the parallel `Builder`
//! - `remote`: running commands in a worker process
//! - `builtin`: generic file commands and JSON build plans

pub mod build;
pub mod builtin;
pub mod consts;
pub mod diagnostics;
pub mod platform;
pub mod remote;
pub mod storage;
