//! E2E tests for the automation proxy: drive an in-memory server through
//! the public API, once inline and once on the worker thread.

mod common;
mod cache;
mod dispatch;
mod lifecycle;
mod state;

// Re-export common utilities for use in submodules
pub use common::*;
