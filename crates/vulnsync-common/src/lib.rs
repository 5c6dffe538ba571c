//! vulnsync common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Logging setup shared by the vulnsync binaries: an environment-driven `tracing`
//! subscriber writing to stdout, a rolling file, or both.
//!
//! # Example
//!
//! ```no_run
//! use vulnsync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

pub mod logging;
