//! Kinesis implementation of [`RecordSink`]

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_kinesis::config::Region;
use aws_sdk_kinesis::error::DisplayErrorContext;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::{PutRecordsRequestEntry, PutRecordsResultEntry};
use aws_sdk_kinesis::Client;
use tracing::{debug, info, instrument};

use super::{ItemOutcome, RecordSink, SinkRecord};
use crate::config::SinkConfig;
use crate::error::SinkError;

#[derive(Clone)]
pub struct KinesisSink {
    client: Client,
    stream_name: String,
}

impl KinesisSink {
    pub async fn new(config: &SinkConfig) -> Self {
        debug!("Initializing Kinesis sink with config: {:?}", config);

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        let mut builder = aws_sdk_kinesis::config::Builder::from(&shared);

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            builder = builder.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "scats-ingest",
            ));
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(
            stream = %config.stream_name,
            region = %config.region,
            "Kinesis sink initialized"
        );

        Self::from_client(Client::from_conf(builder.build()), &config.stream_name)
    }

    pub fn from_client(client: Client, stream_name: impl Into<String>) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
        }
    }
}

#[async_trait]
impl RecordSink for KinesisSink {
    #[instrument(skip(self, records), fields(stream = %self.stream_name, count = records.len()))]
    async fn put_records(&self, records: &[SinkRecord]) -> Result<Vec<ItemOutcome>, SinkError> {
        let entries = records
            .iter()
            .map(|record| {
                PutRecordsRequestEntry::builder()
                    .data(Blob::new(record.data.clone()))
                    .partition_key(&record.partition_key)
                    .build()
                    .map_err(|e| SinkError(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .put_records()
            .stream_name(&self.stream_name)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(|e| SinkError(DisplayErrorContext(&e).to_string()))?;

        let results = output.records();
        if results.len() != records.len() {
            return Err(SinkError(format!(
                "{} outcomes returned for {} records",
                results.len(),
                records.len()
            )));
        }

        Ok(results.iter().map(item_outcome).collect())
    }
}

fn item_outcome(entry: &PutRecordsResultEntry) -> ItemOutcome {
    match entry.error_code() {
        Some(code) => ItemOutcome::Failure {
            code: code.to_string(),
            message: entry.error_message().unwrap_or_default().to_string(),
        },
        None => ItemOutcome::Success {
            sequence_number: entry.sequence_number().unwrap_or_default().to_string(),
            shard_id: entry.shard_id().unwrap_or_default().to_string(),
        },
    }
}
