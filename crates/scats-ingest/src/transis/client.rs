//! Detector-count stream client
//!
//! Reads the push stream chunk by chunk, frames and parses documents, and
//! hands back every document that carries detector counts. Transis tends to
//! stop sending without closing the connection, so a read that produces no
//! bytes within the stream timeout is a stall: the connection is dropped and
//! reopened while the reconnect budget lasts. The budget refills whenever a
//! document with records is delivered.
//!
//! Everything else is terminal: refused credentials, a failed (re)connect,
//! an error document from Transis, or a document that cannot be parsed.

use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::framer::DocumentFramer;
use super::models::ParsedResponse;
use super::parser::parse_response;
use super::transport::{ByteStream, StreamTransport};
use crate::config::SourceConfig;
use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Streaming,
    Stalled,
    Reconnecting,
    Failed,
}

pub struct StreamClient<T> {
    transport: T,
    framer: DocumentFramer,
    body: Option<ByteStream>,
    /// Parsed documents not yet handed out
    ready: VecDeque<ParsedResponse>,
    /// Terminal error held back until `ready` is drained
    terminal: Option<IngestError>,
    state: StreamState,
    stream_timeout: Duration,
    max_reconnects: u32,
    reconnects_remaining: u32,
}

impl<T: StreamTransport> StreamClient<T> {
    pub fn new(
        transport: T,
        stream_timeout: Duration,
        max_reconnects: u32,
        max_document_bytes: usize,
    ) -> Self {
        Self {
            transport,
            framer: DocumentFramer::new(max_document_bytes),
            body: None,
            ready: VecDeque::new(),
            terminal: None,
            state: StreamState::Disconnected,
            stream_timeout,
            max_reconnects,
            reconnects_remaining: max_reconnects,
        }
    }

    pub fn from_config(transport: T, config: &SourceConfig) -> Self {
        Self::new(
            transport,
            config.stream_timeout(),
            config.max_reconnects,
            config.max_document_bytes,
        )
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn reconnects_remaining(&self) -> u32 {
        self.reconnects_remaining
    }

    /// Open the stream
    ///
    /// Refused credentials and connection failures are terminal here; they
    /// never consume the reconnect budget.
    pub async fn start_streaming(&mut self) -> Result<()> {
        self.state = StreamState::Connecting;
        info!("Waiting for detector count stream to receive data, this may take around 10 minutes");

        match self.transport.open_stream().await {
            Ok(body) => {
                self.body = Some(body);
                self.state = StreamState::Streaming;
                Ok(())
            },
            Err(e) => {
                self.state = StreamState::Failed;
                error!(error = %e, "Failed to open the Transis detector count stream");
                Err(IngestError::from_connect(e))
            },
        }
    }

    /// Next document with detector counts
    ///
    /// `Ok(None)` means Transis closed the stream cleanly (or the client has
    /// already failed). Opens the stream on first use.
    pub async fn next_response(&mut self) -> Result<Option<ParsedResponse>> {
        loop {
            if let Some(response) = self.ready.pop_front() {
                return Ok(Some(response));
            }
            if let Some(err) = self.terminal.take() {
                return Err(err);
            }
            if self.state == StreamState::Failed {
                return Ok(None);
            }

            let timeout = self.stream_timeout;
            let Some(body) = self.body.as_mut() else {
                if self.state == StreamState::Reconnecting {
                    info!(remaining = self.reconnects_remaining, "Reconnecting to Transis");
                }
                self.start_streaming().await?;
                continue;
            };

            let next = tokio::time::timeout(timeout, body.next()).await;
            match next {
                Ok(Some(Ok(chunk))) => self.handle_chunk(&chunk),
                Ok(Some(Err(e))) => self.stall(&e.to_string())?,
                Err(_) => self.stall(&format!("no data for {}s", timeout.as_secs()))?,
                Ok(None) => {
                    info!("Transis closed the detector count stream");
                    self.body = None;
                    self.framer.clear();
                    self.state = StreamState::Disconnected;
                    return Ok(None);
                },
            }
        }
    }

    /// Frame and parse one chunk; stops at the first terminal document
    fn handle_chunk(&mut self, chunk: &[u8]) {
        let documents = match self.framer.feed(chunk) {
            Ok(documents) => documents,
            Err(e) => return self.fail(e.into()),
        };

        for document in documents.into_iter().filter(|d| !d.is_empty()) {
            let response = match parse_response(&document) {
                Ok(response) => response,
                Err(e) => return self.fail(e.into()),
            };

            if let Some(message) = response.error_message() {
                return self.fail(IngestError::Upstream(message.to_string()));
            }

            if response.records().is_empty() {
                debug!("Dropping document without detector counts");
                continue;
            }

            debug!(records = response.records().len(), "Received detector count document");
            self.reconnects_remaining = self.max_reconnects;
            self.ready.push_back(response);
        }
    }

    fn fail(&mut self, err: IngestError) {
        error!(error = %err, "An error occurred when processing the Transis detector count stream");
        self.state = StreamState::Failed;
        self.body = None;
        self.terminal = Some(err);
    }

    /// Drop the stalled connection and spend one reconnect, if any remain
    fn stall(&mut self, reason: &str) -> Result<()> {
        self.state = StreamState::Stalled;
        self.body = None;
        if self.framer.pending() > 0 {
            debug!(bytes = self.framer.pending(), "Discarding partial document");
        }
        self.framer.clear();

        if self.reconnects_remaining == 0 {
            self.state = StreamState::Failed;
            let err = IngestError::ReconnectsExhausted(self.max_reconnects);
            error!(reason, "{err}");
            return Err(err);
        }

        warn!(
            reason,
            "Transis has not responded for {}s, will attempt to reconnect {} more time(s)",
            self.stream_timeout.as_secs(),
            self.reconnects_remaining
        );
        self.reconnects_remaining -= 1;
        self.state = StreamState::Reconnecting;
        Ok(())
    }
}

impl<T: StreamTransport + 'static> StreamClient<T> {
    /// The client as a stream, ending after the first error
    pub fn into_stream(self) -> impl Stream<Item = Result<ParsedResponse>> + Send {
        stream::unfold(Some(self), |client| async move {
            let mut client = client?;
            match client.next_response().await {
                Ok(Some(response)) => Some((Ok(response), Some(client))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const TIMEOUT: Duration = Duration::from_secs(1200);

    enum Tail {
        /// Connection stays open without sending anything
        Stall,
        End,
    }

    struct Session {
        chunks: Vec<std::result::Result<Vec<u8>, TransportError>>,
        tail: Tail,
    }

    fn session(chunks: &[&[u8]], tail: Tail) -> std::result::Result<Session, TransportError> {
        Ok(Session {
            chunks: chunks.iter().map(|c| Ok(c.to_vec())).collect(),
            tail,
        })
    }

    #[derive(Clone, Default)]
    struct ScriptedTransport {
        sessions: Arc<Mutex<VecDeque<std::result::Result<Session, TransportError>>>>,
        opens: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        fn new(sessions: Vec<std::result::Result<Session, TransportError>>) -> Self {
            Self {
                sessions: Arc::new(Mutex::new(sessions.into())),
                opens: Arc::default(),
            }
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StreamTransport for ScriptedTransport {
        async fn open_stream(&self) -> std::result::Result<ByteStream, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let next = self.sessions.lock().unwrap().pop_front();
            let session = next.unwrap_or_else(|| Err(TransportError::Connect("refused".into())))?;
            let head = stream::iter(session.chunks);
            Ok(match session.tail {
                Tail::Stall => head.chain(stream::pending()).boxed(),
                Tail::End => head.boxed(),
            })
        }
    }

    fn document(site_id: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><ns2:TransisResponse error="false" xmlns:ns2="http://model.transis.rta.nsw.gov.au/"><DetectorCountMessages><ns2:DetectorCountMessage Sid="{site_id}" date="2019-10-03T15:43:00+10:00" reg="ROZ"><Detectors><Detector Did="1" count="2"/></Detectors></ns2:DetectorCountMessage></DetectorCountMessages></ns2:TransisResponse>"#
        )
        .into_bytes()
    }

    fn framed(site_id: &str) -> Vec<u8> {
        let mut bytes = document(site_id);
        bytes.push(0);
        bytes
    }

    const EMPTY: &[u8] = b"<ns2:TransisResponse error=\"false\" xmlns:ns2=\"x\"><DetectorCountMessages/></ns2:TransisResponse>\x00";
    const UPSTREAM_ERROR: &[u8] = b"<ns2:TransisResponse error=\"true\" xmlns:ns2=\"x\"><Errors><Error msg=\"Session limit reached\"/></Errors></ns2:TransisResponse>\x00";

    fn client(transport: ScriptedTransport, max_reconnects: u32) -> StreamClient<ScriptedTransport> {
        StreamClient::new(transport, TIMEOUT, max_reconnects, 1024 * 1024)
    }

    fn site(response: &ParsedResponse) -> &str {
        &response.records()[0].site_id
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_documents_in_one_chunk() {
        let chunk = [framed("1"), framed("2")].concat();
        let transport = ScriptedTransport::new(vec![session(&[&chunk], Tail::End)]);
        let mut client = client(transport, 3);

        let first = client.next_response().await.unwrap().unwrap();
        let second = client.next_response().await.unwrap().unwrap();
        assert_eq!((site(&first), site(&second)), ("1", "2"));
        assert!(!first.is_error() && !second.is_error());

        assert!(client.next_response().await.unwrap().is_none());
        assert_eq!(client.state(), StreamState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_document_split_across_chunks() {
        let bytes = framed("9");
        let (head, tail) = bytes.split_at(40);
        let transport = ScriptedTransport::new(vec![session(&[head, tail], Tail::End)]);
        let mut client = client(transport, 3);

        let response = client.next_response().await.unwrap().unwrap();
        assert_eq!(site(&response), "9");
        assert_eq!(client.state(), StreamState::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_record_less_documents_are_dropped() {
        let chunk = [b"\x00".to_vec(), EMPTY.to_vec(), framed("4")].concat();
        let transport = ScriptedTransport::new(vec![session(&[&chunk], Tail::End)]);
        let mut client = client(transport, 3);

        assert_eq!(site(&client.next_response().await.unwrap().unwrap()), "4");
        assert!(client.next_response().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalls_exhaust_reconnect_budget() {
        let transport = ScriptedTransport::new(
            (0..4).map(|_| session(&[], Tail::Stall)).collect(),
        );
        let mut client = client(transport.clone(), 3);

        let err = client.next_response().await.unwrap_err();
        assert!(matches!(err, IngestError::ReconnectsExhausted(3)));
        assert_eq!(transport.opens(), 4);
        assert_eq!(client.state(), StreamState::Failed);
        assert!(client.next_response().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_document_refills_budget() {
        let transport = ScriptedTransport::new(vec![
            session(&[], Tail::Stall),
            session(&[], Tail::Stall),
            session(&[&framed("5")], Tail::Stall),
        ]);
        let mut client = client(transport.clone(), 3);

        let response = client.next_response().await.unwrap().unwrap();
        assert_eq!(site(&response), "5");
        assert_eq!(client.reconnects_remaining(), 3);

        // The stall after the delivery spends one reconnect; the script then runs dry
        let err = client.next_response().await.unwrap_err();
        assert!(matches!(err, IngestError::Connection(TransportError::Connect(_))));
        assert_eq!(client.reconnects_remaining(), 2);
        assert_eq!(transport.opens(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_less_documents_do_not_refill_budget() {
        let transport = ScriptedTransport::new(vec![
            session(&[], Tail::Stall),
            session(&[EMPTY], Tail::Stall),
        ]);
        let mut client = client(transport, 1);

        let err = client.next_response().await.unwrap_err();
        assert!(matches!(err, IngestError::ReconnectsExhausted(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_is_a_stall_and_discards_partial_bytes() {
        let partial = b"<ns2:TransisResponse error=\"false\"><Detector";
        let transport = ScriptedTransport::new(vec![
            Ok(Session {
                chunks: vec![Ok(partial.to_vec()), Err(TransportError::Read("reset".into()))],
                tail: Tail::End,
            }),
            session(&[&framed("7")], Tail::End),
        ]);
        let mut client = client(transport.clone(), 3);

        let response = client.next_response().await.unwrap().unwrap();
        assert_eq!(site(&response), "7");
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_failure_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Unauthorized(401))]);
        let mut client = client(transport.clone(), 3);

        let err = client.next_response().await.unwrap_err();
        assert!(matches!(err, IngestError::Authentication { status: 401 }));
        assert_eq!(transport.opens(), 1);
        assert_eq!(client.reconnects_remaining(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_error_after_earlier_documents() {
        let chunk = [framed("1"), UPSTREAM_ERROR.to_vec(), framed("2")].concat();
        let transport = ScriptedTransport::new(vec![session(&[&chunk], Tail::Stall)]);
        let mut client = client(transport, 3);

        assert_eq!(site(&client.next_response().await.unwrap().unwrap()), "1");
        let err = client.next_response().await.unwrap_err();
        assert!(matches!(err, IngestError::Upstream(ref m) if m == "Session limit reached"));
        assert_eq!(client.state(), StreamState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_document_fails_without_reconnect() {
        let transport = ScriptedTransport::new(vec![
            session(&[b"<a><b></a>\x00"], Tail::Stall),
            session(&[&framed("1")], Tail::End),
        ]);
        let mut client = client(transport.clone(), 3);

        let err = client.next_response().await.unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_document_fails() {
        let transport = ScriptedTransport::new(vec![session(&[&[b'x'; 64]], Tail::Stall)]);
        let mut client = StreamClient::new(transport, TIMEOUT, 3, 32);

        let err = client.next_response().await.unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_into_stream_ends_after_terminal_item() {
        let transport = ScriptedTransport::new(vec![session(
            &[&framed("1"), &framed("2"), UPSTREAM_ERROR],
            Tail::Stall,
        )]);
        let items: Vec<Result<ParsedResponse>> = client(transport, 3).into_stream().collect().await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert!(matches!(items[2], Err(IngestError::Upstream(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_into_stream_ends_on_clean_close() {
        let transport = ScriptedTransport::new(vec![session(&[&framed("3")], Tail::End)]);
        let sites: Vec<String> = client(transport, 3)
            .into_stream()
            .map_ok(|r| r.records()[0].site_id.clone())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(sites, vec!["3"]);
    }
}
