//! SCATS Ingest Library
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//!
//! Streams SCATS detector counts from the Transis push service into a Kinesis
//! stream, wrapping each received document in a data-integration audit job.
//!
//! # Pipeline
//!
//! - [`transis`]: null-byte framing, XML parsing, the reconnecting
//!   [`StreamClient`](transis::StreamClient) and the one-shot REST endpoints
//! - [`sink`]: the [`RecordSink`](sink::RecordSink) seam, the Kinesis
//!   implementation and the rate-limit-aware [`BatchPublisher`](sink::BatchPublisher)
//! - [`audit`]: audit jobs backed by the DI framework's Postgres functions
//! - [`orchestrator`]: one audit job and one publish per document
//!
//! # Example
//!
//! ```no_run
//! use scats_ingest::config::SourceConfig;
//! use scats_ingest::transis::{Endpoint, HttpTransport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = HttpTransport::new(&SourceConfig::load()?)?;
//!     let topology = transport.fetch(&Endpoint::CurrentTopology).await?;
//!     println!("{}", topology.xml);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod sink;
pub mod transis;

pub use error::{IngestError, Result};
