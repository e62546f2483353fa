//! Transis source: push-stream framing, parsing and HTTP access

pub mod client;
pub mod endpoints;
pub mod framer;
pub mod layouts;
pub mod models;
pub mod parser;
pub mod transport;

pub use client::{StreamClient, StreamState};
pub use endpoints::Endpoint;
pub use framer::DocumentFramer;
pub use layouts::{LayoutComponent, SiteLayouts};
pub use models::{DetectorCountRecord, ParsedResponse, ResponseKind};
pub use parser::parse_response;
pub use transport::{ByteStream, FetchedDocument, HttpTransport, StreamTransport};
