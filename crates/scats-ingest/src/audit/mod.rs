//! Data-integration audit jobs
//!
//! Every processed document is wrapped in one audit job: opened before the
//! publish, annotated with status lines while it runs, and closed (or closed
//! with an error code) afterwards.

pub mod postgres;

use async_trait::async_trait;

use crate::error::AuditError;

pub use postgres::PgAuditLog;

/// Error code recorded when the connector shuts down on a fatal error
pub const FATAL_ERROR_CODE: i32 = -1;

/// Handle for an open audit job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditJob {
    pub id: i64,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn start_job(&self) -> Result<AuditJob, AuditError>;

    /// Append a status line to an open job, returning whether it was recorded
    async fn log_status(&self, job: &AuditJob, status: &str) -> Result<bool, AuditError>;

    async fn end_job(&self, job: &AuditJob) -> Result<(), AuditError>;

    async fn end_job_with_error(
        &self,
        job: &AuditJob,
        message: &str,
        code: i32,
    ) -> Result<(), AuditError>;

    /// Release any connection still held; safe to call at any time
    async fn close(&self);
}
