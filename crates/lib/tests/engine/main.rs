//! End-to-end tests of the build engine.

mod cache_tests;
mod cancellation_tests;
mod common;
mod dedup_tests;
mod propagation_tests;
mod remote_tests;
