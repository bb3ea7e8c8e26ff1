//! OSSI Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the OSSI workspace members.
//!
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]

pub mod logging;

pub use logging::{init_logging, LogConfig};
