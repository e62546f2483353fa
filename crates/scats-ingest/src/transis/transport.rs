//! HTTP access to Transis
//!
//! [`StreamTransport`] is the seam the stream client reads through; the HTTP
//! implementation holds one `reqwest::Client` for its whole lifetime and
//! reuses it for the push stream and every one-shot REST call.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::{info, instrument};

use super::endpoints::{Endpoint, DETECTOR_COUNT_STREAM_PATH, DETECTOR_COUNT_TYPES};
use super::models::ParsedResponse;
use super::parser::parse_response;
use crate::config::SourceConfig;
use crate::error::{IngestError, ParseError, Result, TransportError};
use crate::transis::framer::DOCUMENT_TERMINATOR;

const XML_CONTENT_TYPE: &str = r#"text/xml;charset="utf-8""#;

/// Body chunks of an open stream, in arrival order
pub type ByteStream = BoxStream<'static, std::result::Result<Vec<u8>, TransportError>>;

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Issue the streaming request and hand back the response body
    ///
    /// Fails once the response headers show the request was refused; body
    /// read failures arrive later as `TransportError::Read` items.
    async fn open_stream(&self) -> std::result::Result<ByteStream, TransportError>;
}

/// A one-shot response: the first document in the body
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub xml: String,
    pub response: ParsedResponse,
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    /// Bounds the wait for the streaming response headers
    stream_timeout: Duration,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| IngestError::Connection(TransportError::Connect(e.to_string())))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            username: config.username.clone(),
            password: config.password.clone(),
            stream_timeout: config.stream_timeout(),
            request_timeout: config.request_timeout(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .header(CONNECTION, "close")
    }

    /// Issue one REST request and return its first document
    ///
    /// An error document from Transis is reported as [`IngestError::Upstream`].
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub async fn fetch(&self, endpoint: &Endpoint) -> Result<FetchedDocument> {
        info!(path = %endpoint.path(), "Making GET request to Transis");

        let response = self
            .get(&endpoint.path())
            .query(&endpoint.query())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| IngestError::from_connect(TransportError::Connect(e.to_string())))?;
        check_status(response.status()).map_err(IngestError::from_connect)?;

        let body = response
            .bytes()
            .await
            .map_err(|e| IngestError::Connection(TransportError::Read(e.to_string())))?;
        let document = body
            .split(|byte| *byte == DOCUMENT_TERMINATOR)
            .find(|document| !document.is_empty())
            .ok_or_else(|| ParseError::malformed("response body contained no documents"))?;

        let parsed = parse_response(document)?;
        if let Some(message) = parsed.error_message() {
            return Err(IngestError::Upstream(message.to_string()));
        }

        Ok(FetchedDocument {
            xml: String::from_utf8_lossy(document).into_owned(),
            response: parsed,
        })
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open_stream(&self) -> std::result::Result<ByteStream, TransportError> {
        info!(
            path = DETECTOR_COUNT_STREAM_PATH,
            types = DETECTOR_COUNT_TYPES,
            "Making streaming GET request to Transis"
        );

        let request = self
            .get(DETECTOR_COUNT_STREAM_PATH)
            .query(&[("types", DETECTOR_COUNT_TYPES)])
            .send();

        let response = match tokio::time::timeout(self.stream_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
            Err(_) => {
                return Err(TransportError::Connect(format!(
                    "no response within {}s",
                    self.stream_timeout.as_secs()
                )))
            },
        };
        check_status(response.status())?;

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TransportError::Read(e.to_string()))
            })
            .boxed())
    }
}

fn check_status(status: StatusCode) -> std::result::Result<(), TransportError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(TransportError::Unauthorized(status.as_u16()))
        },
        s if !s.is_success() => Err(TransportError::Status(s.as_u16())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status() {
        assert_eq!(check_status(StatusCode::OK), Ok(()));
        assert_eq!(
            check_status(StatusCode::UNAUTHORIZED),
            Err(TransportError::Unauthorized(401))
        );
        assert_eq!(
            check_status(StatusCode::FORBIDDEN),
            Err(TransportError::Unauthorized(403))
        );
        assert_eq!(
            check_status(StatusCode::SERVICE_UNAVAILABLE),
            Err(TransportError::Status(503))
        );
    }
}
