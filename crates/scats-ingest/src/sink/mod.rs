//! Record sink seam and the batch publisher built on it

pub mod kinesis;
pub mod publisher;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SinkError;
use crate::transis::models::DetectorCountRecord;

pub use kinesis::KinesisSink;
pub use publisher::{BatchOutcome, BatchPublisher, PublishOutcome, PublishReport};

/// Rejection code the sink uses for rate limiting
pub const THROUGHPUT_EXCEEDED: &str = "ProvisionedThroughputExceededException";

/// One record ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRecord {
    pub partition_key: String,
    pub data: Vec<u8>,
}

/// Per-record result of a submission, in submission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success {
        sequence_number: String,
        shard_id: String,
    },
    Failure {
        code: String,
        message: String,
    },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Rejected for rate limiting, and so worth resubmitting
    pub fn is_throughput_exceeded(&self) -> bool {
        matches!(self, Self::Failure { code, .. } if code == THROUGHPUT_EXCEEDED)
    }
}

/// How records are spread across shards
///
/// In JSON config this is `{"fixed": "<key>"}` or `"per_record_region"`.
/// The environment equivalents are `KINESIS_PARTITION_KEY` and
/// `KINESIS_PARTITION_BY_REGION`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKey {
    /// The same key for every record
    Fixed(String),
    /// Each record's region code
    PerRecordRegion,
}

impl Default for PartitionKey {
    fn default() -> Self {
        Self::Fixed(crate::config::DEFAULT_PARTITION_KEY.to_string())
    }
}

impl PartitionKey {
    pub fn key_for<'a>(&'a self, record: &'a DetectorCountRecord) -> &'a str {
        match self {
            Self::Fixed(key) => key,
            Self::PerRecordRegion => &record.region,
        }
    }
}

/// Destination stream accepting batches of records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Submit a batch
    ///
    /// `Ok` carries exactly one outcome per submitted record, in order.
    /// `Err` means the call as a whole failed and nothing is known about the
    /// individual records.
    async fn put_records(&self, records: &[SinkRecord]) -> Result<Vec<ItemOutcome>, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_partition_key() {
        let record = DetectorCountRecord {
            site_id: "1".into(),
            region: "ROZ".into(),
            interval_seconds: 300,
            period_end: String::new(),
            period_end_timestamp: 0,
            detector_counts: BTreeMap::new(),
        };
        assert_eq!(PartitionKey::default().key_for(&record), "region");
        assert_eq!(PartitionKey::PerRecordRegion.key_for(&record), "ROZ");
    }

    #[test]
    fn test_throughput_detection() {
        let throttled = ItemOutcome::Failure {
            code: THROUGHPUT_EXCEEDED.into(),
            message: "Rate exceeded for shard".into(),
        };
        let internal = ItemOutcome::Failure {
            code: "InternalFailure".into(),
            message: "Internal service failure.".into(),
        };
        assert!(throttled.is_throughput_exceeded());
        assert!(!internal.is_throughput_exceeded());
        assert!(!internal.is_success());
    }
}
