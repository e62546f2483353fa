//! Structured Transis responses

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::layouts::SiteLayouts;

/// Collection interval of every detector-count message, in seconds
pub const COLLECTION_INTERVAL_SECS: u32 = 300;

/// One site's vehicle counts for a five-minute period
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectorCountRecord {
    #[serde(rename = "siteId")]
    pub site_id: String,

    pub region: String,

    #[serde(rename = "collectionIntervalSecs")]
    pub interval_seconds: u32,

    /// Period end as Transis sends it, e.g. `2019-10-03T15:43:00+10:00`
    #[serde(skip)]
    pub period_end: String,

    /// `period_end` in epoch seconds
    #[serde(rename = "collectionendtimestamp_plus_3_mins")]
    pub period_end_timestamp: i64,

    /// Detector id to count, both verbatim from the document
    #[serde(rename = "detectorCounts")]
    pub detector_counts: BTreeMap<String, String>,
}

/// Which kind of document Transis sent
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    /// The root carried `error="true"`
    Error { message: String },
    /// A `DetectorCountMessages` container, possibly with no messages
    DetectorCounts(Vec<DetectorCountRecord>),
    /// A topology document
    SiteLayouts(SiteLayouts),
    /// None of the containers above
    Empty,
}

/// A parsed Transis document
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub kind: ResponseKind,
    pub received_at: DateTime<Utc>,
}

impl ParsedResponse {
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            kind,
            received_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, ResponseKind::Error { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.kind {
            ResponseKind::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Detector-count records, empty for every other kind of document
    pub fn records(&self) -> &[DetectorCountRecord] {
        match &self.kind {
            ResponseKind::DetectorCounts(records) => records,
            _ => &[],
        }
    }

    pub fn site_layouts(&self) -> Option<&SiteLayouts> {
        match &self.kind {
            ResponseKind::SiteLayouts(layouts) => Some(layouts),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DetectorCountRecord {
        DetectorCountRecord {
            site_id: "2087".to_string(),
            region: "ROZ".to_string(),
            interval_seconds: COLLECTION_INTERVAL_SECS,
            period_end: "2019-10-03T15:43:00+10:00".to_string(),
            period_end_timestamp: 1_570_081_380,
            detector_counts: BTreeMap::from([
                ("1".to_string(), "0".to_string()),
                ("6".to_string(), "1".to_string()),
            ]),
        }
    }

    #[test]
    fn test_record_payload_shape() {
        let value = serde_json::to_value(record()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "siteId": "2087",
                "region": "ROZ",
                "collectionIntervalSecs": 300,
                "collectionendtimestamp_plus_3_mins": 1_570_081_380,
                "detectorCounts": {"1": "0", "6": "1"}
            })
        );
    }

    #[test]
    fn test_error_response_has_no_records() {
        let response = ParsedResponse::new(ResponseKind::Error {
            message: "bad request".to_string(),
        });
        assert!(response.is_error());
        assert_eq!(response.error_message(), Some("bad request"));
        assert!(response.records().is_empty());
    }

    #[test]
    fn test_detector_count_response() {
        let response = ParsedResponse::new(ResponseKind::DetectorCounts(vec![record()]));
        assert!(!response.is_error());
        assert_eq!(response.records().len(), 1);
        assert!(response.site_layouts().is_none());
    }
}
