//! Batched, rate-limit-aware publishing
//!
//! Records are submitted in fixed-size batches, strictly in sequence. Items the
//! sink rejects for throughput are resubmitted once after a fixed backoff;
//! every other failure is terminal for that item. A batch whose submission
//! fails outright is abandoned: the failure goes to the audit log and into the
//! returned report, never up the call stack.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{ItemOutcome, PartitionKey, RecordSink, SinkRecord};
use crate::audit::{AuditJob, AuditLog};
use crate::config::{SinkConfig, DEFAULT_BATCH_SIZE, DEFAULT_RETRY_BACKOFF_MS};
use crate::error::{Result, SinkError};
use crate::transis::models::DetectorCountRecord;

/// Result of one submitted batch after any retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub attempted: usize,
    /// Items still failing after the retry
    pub failed: usize,
    /// Final outcome per item, in submission order
    pub outcomes: Vec<ItemOutcome>,
}

impl PublishOutcome {
    fn new(outcomes: Vec<ItemOutcome>) -> Self {
        Self {
            attempted: outcomes.len(),
            failed: outcomes.iter().filter(|o| !o.is_success()).count(),
            outcomes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Delivered(PublishOutcome),
    /// The submission itself failed; nothing is known about the items
    Abandoned { attempted: usize, reason: String },
}

/// Per-batch results of one `publish` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub batches: Vec<BatchOutcome>,
}

impl PublishReport {
    pub fn attempted(&self) -> usize {
        self.batches
            .iter()
            .map(|b| match b {
                BatchOutcome::Delivered(outcome) => outcome.attempted,
                BatchOutcome::Abandoned { attempted, .. } => *attempted,
            })
            .sum()
    }

    /// Items that ended in a per-item failure
    pub fn failed(&self) -> usize {
        self.batches
            .iter()
            .map(|b| match b {
                BatchOutcome::Delivered(outcome) => outcome.failed,
                BatchOutcome::Abandoned { .. } => 0,
            })
            .sum()
    }

    pub fn abandoned_batches(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| matches!(b, BatchOutcome::Abandoned { .. }))
            .count()
    }

    pub fn delivered(&self) -> usize {
        self.batches
            .iter()
            .map(|b| match b {
                BatchOutcome::Delivered(outcome) => outcome.attempted - outcome.failed,
                BatchOutcome::Abandoned { .. } => 0,
            })
            .sum()
    }
}

pub struct BatchPublisher {
    sink: Arc<dyn RecordSink>,
    audit: Arc<dyn AuditLog>,
    batch_size: usize,
    partition_key: PartitionKey,
    retry_backoff: Duration,
}

impl BatchPublisher {
    pub fn new(sink: Arc<dyn RecordSink>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            sink,
            audit,
            batch_size: DEFAULT_BATCH_SIZE,
            partition_key: PartitionKey::default(),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }

    pub fn from_config(
        sink: Arc<dyn RecordSink>,
        audit: Arc<dyn AuditLog>,
        config: &SinkConfig,
    ) -> Self {
        Self::new(sink, audit)
            .with_batch_size(config.batch_size)
            .with_partition_key(config.partition_key.clone())
            .with_retry_backoff(config.retry_backoff())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_partition_key(mut self, partition_key: PartitionKey) -> Self {
        self.partition_key = partition_key;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Publish records in order, one batch at a time
    ///
    /// Only a record that cannot be serialised is an error; sink failures
    /// are reported in the returned [`PublishReport`].
    pub async fn publish(
        &self,
        records: &[DetectorCountRecord],
        job: &AuditJob,
    ) -> Result<PublishReport> {
        let items = records
            .iter()
            .map(|record| -> Result<SinkRecord> {
                Ok(SinkRecord {
                    partition_key: self.partition_key.key_for(record).to_string(),
                    data: serde_json::to_vec(record)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut report = PublishReport::default();
        for (index, batch) in items.chunks(self.batch_size).enumerate() {
            debug!(batch = index, size = batch.len(), "Submitting batch");
            report.batches.push(self.publish_batch(batch, job).await);
        }

        info!(
            attempted = report.attempted(),
            delivered = report.delivered(),
            failed = report.failed(),
            abandoned_batches = report.abandoned_batches(),
            "Published records"
        );
        Ok(report)
    }

    async fn publish_batch(&self, batch: &[SinkRecord], job: &AuditJob) -> BatchOutcome {
        let mut outcomes = match self.sink.put_records(batch).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.report_sink_error(&e, job).await;
                return BatchOutcome::Abandoned {
                    attempted: batch.len(),
                    reason: e.0,
                };
            },
        };
        self.report_failures(&outcomes, job).await;

        let rejected: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| outcome.is_throughput_exceeded())
            .map(|(index, _)| index)
            .collect();

        // Exactly one retry round, for throughput rejections only
        if !rejected.is_empty() {
            warn!(
                count = rejected.len(),
                backoff_ms = self.retry_backoff.as_millis() as u64,
                "Throughput exceeded, retrying rejected records"
            );
            tokio::time::sleep(self.retry_backoff).await;

            let retry: Vec<SinkRecord> = rejected.iter().map(|&i| batch[i].clone()).collect();
            match self.sink.put_records(&retry).await {
                Ok(retried) => {
                    self.report_failures(&retried, job).await;
                    for (index, outcome) in rejected.into_iter().zip(retried) {
                        outcomes[index] = outcome;
                    }
                },
                Err(e) => self.report_sink_error(&e, job).await,
            }
        }

        BatchOutcome::Delivered(PublishOutcome::new(outcomes))
    }

    async fn report_failures(&self, outcomes: &[ItemOutcome], job: &AuditJob) {
        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        if failed == 0 {
            return;
        }

        let message = format!(
            "{failed} out of {} records failed when being added to kinesis",
            outcomes.len()
        );
        error!(failed, total = outcomes.len(), "{message}");
        self.audit_status(job, &message).await;
    }

    async fn report_sink_error(&self, err: &SinkError, job: &AuditJob) {
        error!(error = %err, "An error occurred when adding records to kinesis");
        self.audit_status(job, &err.to_string()).await;
    }

    /// Audit status lines here are best effort
    async fn audit_status(&self, job: &AuditJob, message: &str) {
        match self.audit.log_status(job, message).await {
            Ok(true) => {},
            Ok(false) => warn!(job_id = job.id, "Audit log did not acknowledge status"),
            Err(e) => warn!(job_id = job.id, error = %e, "Failed to write audit status"),
        }
    }
}
