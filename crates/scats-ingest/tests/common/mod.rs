//! Shared fixtures and in-process doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use scats_ingest::audit::{AuditJob, AuditLog};
use scats_ingest::error::{AuditError, SinkError, TransportError};
use scats_ingest::sink::{ItemOutcome, RecordSink, SinkRecord};
use scats_ingest::transis::{ByteStream, StreamTransport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

pub const NAMESPACE: &str = "http://model.transis.rta.nsw.gov.au/";

/// A detector-count document for the given sites, each with `detectors` detectors
pub fn detector_count_document(sites: &[&str], detectors: u32) -> String {
    let messages: String = sites
        .iter()
        .map(|site| {
            let counts: String = (1..=detectors)
                .map(|did| format!(r#"<Detector Did="{did}" count="{}"/>"#, did % 3))
                .collect();
            format!(
                r#"<ns2:DetectorCountMessage Sid="{site}" date="2019-10-03T15:43:00+10:00" reg="ROZ"><Detectors>{counts}</Detectors></ns2:DetectorCountMessage>"#
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><ns2:TransisResponse error="false" xmlns:ns2="{NAMESPACE}"><DetectorCountMessages>{messages}</DetectorCountMessages></ns2:TransisResponse>"#
    )
}

pub fn error_document(message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><ns2:TransisResponse error="true" xmlns:ns2="{NAMESPACE}"><Errors><Error msg="{message}"/></Errors></ns2:TransisResponse>"#
    )
}

/// Documents joined the way the push service writes them
pub fn push_body(documents: &[String]) -> Vec<u8> {
    let mut body = Vec::new();
    for document in documents {
        body.extend_from_slice(document.as_bytes());
        body.push(0);
    }
    body
}

/// Serves one fixed body per open, then refuses
pub struct FixedTransport {
    bodies: Mutex<VecDeque<Vec<Vec<u8>>>>,
}

impl FixedTransport {
    pub fn new(bodies: Vec<Vec<Vec<u8>>>) -> Self {
        Self {
            bodies: Mutex::new(bodies.into()),
        }
    }
}

#[async_trait]
impl StreamTransport for FixedTransport {
    async fn open_stream(&self) -> Result<ByteStream, TransportError> {
        let chunks = self
            .bodies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Connect("connection refused".into()))?;
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

/// Accepts everything, remembering what it was given
#[derive(Default)]
pub struct MemorySink {
    pub batches: Mutex<Vec<Vec<SinkRecord>>>,
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn put_records(&self, records: &[SinkRecord]) -> Result<Vec<ItemOutcome>, SinkError> {
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(records
            .iter()
            .enumerate()
            .map(|(i, _)| ItemOutcome::Success {
                sequence_number: i.to_string(),
                shard_id: "shardId-000000000000".into(),
            })
            .collect())
    }
}

/// Audit calls as they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    Start(i64),
    Status(i64, String),
    End(i64),
    EndWithError(i64, String, i32),
    Close,
}

#[derive(Default)]
pub struct RecordingAudit {
    pub events: Mutex<Vec<AuditEvent>>,
    next_id: AtomicI64,
    pub fail_start: bool,
    pub fail_status: bool,
}

impl RecordingAudit {
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Default::default()
        }
    }

    pub fn failing_status() -> Self {
        Self {
            fail_status: true,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl AuditLog for RecordingAudit {
    async fn start_job(&self) -> Result<AuditJob, AuditError> {
        if self.fail_start {
            return Err(AuditError::NoActiveJob);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.push(AuditEvent::Start(id));
        Ok(AuditJob { id })
    }

    async fn log_status(&self, job: &AuditJob, status: &str) -> Result<bool, AuditError> {
        if self.fail_status {
            return Err(AuditError::NoActiveJob);
        }
        self.push(AuditEvent::Status(job.id, status.to_string()));
        Ok(true)
    }

    async fn end_job(&self, job: &AuditJob) -> Result<(), AuditError> {
        self.push(AuditEvent::End(job.id));
        Ok(())
    }

    async fn end_job_with_error(
        &self,
        job: &AuditJob,
        message: &str,
        code: i32,
    ) -> Result<(), AuditError> {
        self.push(AuditEvent::EndWithError(job.id, message.to_string(), code));
        Ok(())
    }

    async fn close(&self) {
        self.push(AuditEvent::Close);
    }
}
