//! SCATS Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and timestamp helpers for the SCATS
//! detector-count connector.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Time**: conversion of Transis offset timestamps to epoch seconds
//!
//! # Example
//!
//! ```no_run
//! use scats_common::time::epoch_from_timestamp;
//!
//! fn main() -> scats_common::Result<()> {
//!     let epoch = epoch_from_timestamp("2019-10-03T15:43:00+10:00")?;
//!     assert_eq!(epoch, 1_570_081_380);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod time;

// Re-export commonly used types
pub use error::{CommonError, Result};
