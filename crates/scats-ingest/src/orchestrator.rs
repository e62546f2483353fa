//! Per-document audit and publish loop

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::audit::{AuditJob, AuditLog, FATAL_ERROR_CODE};
use crate::error::Result;
use crate::sink::{BatchPublisher, PublishReport};
use crate::transis::{ParsedResponse, StreamClient, StreamTransport};

/// Status line recorded against each document's audit job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub records_in_xml_doc: usize,
    /// Period end of the first record, as Transis sent it
    pub collectionendtimestamp_plus_3_mins: Option<String>,
    pub response_received_timestamp: String,
}

impl DocumentSummary {
    pub fn for_response(response: &ParsedResponse) -> Self {
        let records = response.records();
        Self {
            records_in_xml_doc: records.len(),
            collectionendtimestamp_plus_3_mins: records.first().map(|r| r.period_end.clone()),
            response_received_timestamp: scats_common::time::format_timestamp(response.received_at),
        }
    }
}

/// Totals for a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub documents: usize,
    pub records: usize,
    pub failed: usize,
}

pub struct IngestionOrchestrator<T> {
    client: StreamClient<T>,
    publisher: BatchPublisher,
    audit: Arc<dyn AuditLog>,
    failure_recorded: bool,
}

impl<T: StreamTransport> IngestionOrchestrator<T> {
    pub fn new(client: StreamClient<T>, publisher: BatchPublisher, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            client,
            publisher,
            audit,
            failure_recorded: false,
        }
    }

    /// Whether the error that ended the run was already closed out against
    /// the failing document's audit job
    pub fn failure_recorded(&self) -> bool {
        self.failure_recorded
    }

    /// Process documents until the stream ends or fails
    ///
    /// Errors are not isolated per document: the first one ends the run.
    pub async fn run(&mut self) -> Result<RunStats> {
        let mut stats = RunStats::default();

        while let Some(response) = self.client.next_response().await? {
            let report = self.process(&response).await?;
            stats.documents += 1;
            stats.records += report.attempted();
            stats.failed += report.failed();
        }

        info!(
            documents = stats.documents,
            records = stats.records,
            failed = stats.failed,
            "Detector count stream ended"
        );
        Ok(stats)
    }

    /// Publish one document inside its own audit job
    ///
    /// A failure after the job has started ends that job with the fatal
    /// error code before the error is returned.
    #[instrument(skip_all, fields(records = response.records().len()))]
    pub async fn process(&mut self, response: &ParsedResponse) -> Result<PublishReport> {
        let job = self.audit.start_job().await?;

        match self.process_in_job(response, &job).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let message = e.to_string();
                match self.audit.end_job_with_error(&job, &message, FATAL_ERROR_CODE).await {
                    Ok(()) => self.failure_recorded = true,
                    Err(audit_error) => {
                        warn!(job_id = job.id, error = %audit_error, "Failed to end the audit job with an error")
                    },
                }
                Err(e)
            },
        }
    }

    async fn process_in_job(&self, response: &ParsedResponse, job: &AuditJob) -> Result<PublishReport> {
        let report = self.publisher.publish(response.records(), job).await?;

        let summary = DocumentSummary::for_response(response);
        let status = serde_json::to_string(&summary)?;
        info!(job_id = job.id, summary = %status, "Processed detector count document");

        self.audit.log_status(job, &status).await?;
        self.audit.end_job(job).await?;
        Ok(report)
    }
}

/// Record a fatal error as its own failed audit job, best effort
pub async fn record_fatal_error(audit: &dyn AuditLog, message: &str) {
    match audit.start_job().await {
        Ok(job) => {
            if let Err(e) = audit.end_job_with_error(&job, message, FATAL_ERROR_CODE).await {
                warn!(job_id = job.id, error = %e, "Failed to record the fatal error in the audit log");
            }
        },
        Err(e) => warn!(error = %e, "Could not open an audit job for the fatal error"),
    }
}
