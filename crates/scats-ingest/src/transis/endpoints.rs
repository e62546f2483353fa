//! Transis HTTP endpoints

use std::fmt;

/// Push-service path for the detector-count stream
pub const DETECTOR_COUNT_STREAM_PATH: &str = "/transis/pushservice";

/// Message types requested from the push service
pub const DETECTOR_COUNT_TYPES: &str = "DetectorCount";

/// One-shot REST requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Messages of `types` since `start_date`
    FromDate { start_date: String, types: String },
    /// Messages of `types` between two dates
    WithinDates {
        start_date: String,
        end_date: String,
        types: String,
    },
    CurrentTopology,
    TopologyChangesFromDate { date: String },
    /// Open Traffic Interruption Request Forms
    AllOpenTirf,
    ClosedTirfFromDate { date: String },
    /// Variable message signs
    AllVms,
}

impl Endpoint {
    /// Service operation name, as it appears in the URL
    pub fn operation(&self) -> &'static str {
        match self {
            Self::FromDate { .. } => "getFromDate",
            Self::WithinDates { .. } => "getWithinDates",
            Self::CurrentTopology => "getCurrentTopology",
            Self::TopologyChangesFromDate { .. } => "getTopologyChangesFromDate",
            Self::AllOpenTirf => "getAllOpenTIRF",
            Self::ClosedTirfFromDate { .. } => "getClosedTIRFFromDate",
            Self::AllVms => "getAllVMS",
        }
    }

    pub fn path(&self) -> String {
        format!("/transis/rest/{}", self.operation())
    }

    /// Query parameters in the order Transis documents them
    pub fn query(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::FromDate { start_date, types } => {
                vec![("startDate", start_date.as_str()), ("types", types.as_str())]
            },
            Self::WithinDates {
                start_date,
                end_date,
                types,
            } => vec![
                ("startDate", start_date.as_str()),
                ("endDate", end_date.as_str()),
                ("types", types.as_str()),
            ],
            Self::TopologyChangesFromDate { date } | Self::ClosedTirfFromDate { date } => {
                vec![("date", date.as_str())]
            },
            Self::CurrentTopology | Self::AllOpenTirf | Self::AllVms => Vec::new(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}
