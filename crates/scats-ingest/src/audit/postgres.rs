//! Audit jobs backed by the DI framework's stored functions in Postgres

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{Connection, PgConnection};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{AuditJob, AuditLog};
use crate::config::{is_plain_identifier, AuditConfig};
use crate::error::AuditError;

/// Key of the job id in the reply from `strt_job`
const JOB_ID_KEY: &str = "job_id";

/// One entry of the key/value array the framework functions return
#[derive(Debug, Deserialize)]
struct ReplyEntry {
    key: String,
    value: serde_json::Value,
}

pub struct PgAuditLog {
    database_url: String,
    schema: String,
    job_name: String,
    /// Open from `start_job` until the job ends
    connection: Mutex<Option<PgConnection>>,
}

impl PgAuditLog {
    pub fn new(config: &AuditConfig) -> Result<Self, AuditError> {
        if !is_plain_identifier(&config.schema_name) {
            return Err(AuditError::InvalidSchema(config.schema_name.clone()));
        }
        Ok(Self {
            database_url: config.database_url.clone(),
            schema: config.schema_name.clone(),
            job_name: config.job_name.clone(),
            connection: Mutex::new(None),
        })
    }

    fn statement(&self, function: &str, arity: usize) -> String {
        let params: Vec<String> = (1..=arity).map(|i| format!("${i}")).collect();
        format!("SELECT {}.{}({})::text", self.schema, function, params.join(", "))
    }

    async fn end_with(&self, sql: String, bind: EndBinding<'_>) -> Result<(), AuditError> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(AuditError::NoActiveJob)?;

        let query = sqlx::query_scalar::<_, Option<String>>(&sql).bind(&self.job_name);
        let query = match bind {
            EndBinding::Success { job_id } => query.bind(job_id),
            EndBinding::Error {
                job_id,
                message,
                code,
            } => query.bind(message).bind(job_id).bind(code),
        };
        let reply = query.fetch_one(&mut *connection).await;

        // The connection is released whether or not the call succeeded
        if let Some(connection) = guard.take() {
            release(connection).await;
        }

        let reply = reply?.unwrap_or_default();
        debug!(reply = %reply, "Audit job ended");
        Ok(())
    }
}

enum EndBinding<'a> {
    Success {
        job_id: i64,
    },
    Error {
        job_id: i64,
        message: &'a str,
        code: i32,
    },
}

#[async_trait]
impl AuditLog for PgAuditLog {
    #[instrument(skip(self), fields(job = %self.job_name))]
    async fn start_job(&self) -> Result<AuditJob, AuditError> {
        let mut guard = self.connection.lock().await;
        if let Some(stale) = guard.take() {
            warn!("Previous audit job was not ended; dropping its connection");
            release(stale).await;
        }

        let mut connection = PgConnection::connect(&self.database_url).await?;
        let reply: Option<String> = sqlx::query_scalar(&self.statement("strt_job", 1))
            .bind(&self.job_name)
            .fetch_one(&mut connection)
            .await?;
        let reply = reply.unwrap_or_default();
        let id = job_id_from_reply(&reply)?;

        *guard = Some(connection);
        debug!(job_id = id, "Audit job started");
        Ok(AuditJob { id })
    }

    async fn log_status(&self, job: &AuditJob, status: &str) -> Result<bool, AuditError> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(AuditError::NoActiveJob)?;

        let reply: Option<String> = sqlx::query_scalar(&self.statement("log_job_stus", 3))
            .bind(&self.job_name)
            .bind(job.id)
            .bind(status)
            .fetch_one(&mut *connection)
            .await?;

        // The reply is not reliably valid JSON; only the success marker matters
        Ok(reply.is_some_and(|r| r.contains("success")))
    }

    async fn end_job(&self, job: &AuditJob) -> Result<(), AuditError> {
        self.end_with(self.statement("end_job", 2), EndBinding::Success { job_id: job.id })
            .await
    }

    async fn end_job_with_error(
        &self,
        job: &AuditJob,
        message: &str,
        code: i32,
    ) -> Result<(), AuditError> {
        self.end_with(
            self.statement("end_job", 4),
            EndBinding::Error {
                job_id: job.id,
                message,
                code,
            },
        )
        .await
    }

    async fn close(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            release(connection).await;
        }
    }
}

async fn release(connection: PgConnection) {
    if let Err(e) = connection.close().await {
        warn!(error = %e, "Failed to close audit connection cleanly");
    }
}

/// Extract the job id from a `strt_job` reply
fn job_id_from_reply(reply: &str) -> Result<i64, AuditError> {
    let unexpected = || AuditError::UnexpectedReply {
        procedure: "strt_job",
        reply: reply.to_string(),
    };

    let entries: Vec<ReplyEntry> = serde_json::from_str(reply).map_err(|_| unexpected())?;
    let value = entries
        .into_iter()
        .find(|entry| entry.key == JOB_ID_KEY)
        .map(|entry| entry.value)
        .ok_or_else(unexpected)?;

    match value {
        serde_json::Value::Number(n) => n.as_i64().ok_or_else(unexpected),
        serde_json::Value::String(s) => s.trim().parse().map_err(|_| unexpected()),
        _ => Err(unexpected()),
    }
}
