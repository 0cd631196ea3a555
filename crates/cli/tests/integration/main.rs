mod build_tests;
mod cache_tests;
mod common;
mod remote_tests;
