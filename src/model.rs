//! Data models for hochwasser.
//!
//! Readings are the leaf type everything else is computed from. Jobs are
//! identified by `job_uuid` alone; every other field may change between
//! configuration reloads.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::{self, DedupKey};

/// Whether a reading was measured or forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingKind {
    /// An observed water level.
    Current,
    /// A point of an official forecast series.
    Forecast,
}

/// A single water-level value at a point in time.
///
/// Fields are private so a reading cannot be altered after construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    value: f64,
    kind: ReadingKind,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, value: f64, kind: ReadingKind) -> Self {
        Self {
            timestamp,
            value,
            kind,
        }
    }

    /// An observed value.
    pub fn current(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self::new(timestamp, value, ReadingKind::Current)
    }

    /// A forecast value.
    pub fn forecast(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self::new(timestamp, value, ReadingKind::Forecast)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn kind(&self) -> ReadingKind {
        self.kind
    }
}

/// Supported mail locales.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    De,
    En,
}

impl Locale {
    /// Parse a locale tag, returning `None` for unsupported values.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "de" => Some(Locale::De),
            "en" => Some(Locale::En),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::De => "de",
            Locale::En => "en",
        }
    }
}

/// A monitored station/limit combination with its own schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identity across reloads.
    pub job_uuid: String,
    pub name: String,
    pub station_uuid: String,
    pub limit_cm: f64,
    /// Alert recipients. Kept as a sorted set so ordering never matters.
    pub recipients: BTreeSet<String>,
    /// Extra recipient for job down/recovered mails.
    pub alert_recipient: Option<String>,
    pub locale: Locale,
    /// Five-field cron expression.
    pub schedule_cron: String,
}

impl Job {
    /// Tag used to prefix log lines for this job.
    pub fn log_tag(&self) -> String {
        format!("[job={}:{}]", self.job_uuid, self.name)
    }
}

/// Where a crossing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// The current measurement is already at or above the limit.
    Current,
    /// A point of the official forecast series crosses the limit.
    Official,
    /// Extrapolated from the recent trend; reduced confidence.
    Trend,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Current => "current",
            Provenance::Official => "official",
            Provenance::Trend => "trend",
        }
    }
}

/// An observed or predicted reading at or above the limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Crossing {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub provenance: Provenance,
}

/// Result of a threshold evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrossingDecision {
    Crossing(Crossing),
    NoCrossing,
}

impl CrossingDecision {
    pub fn crossing(&self) -> Option<&Crossing> {
        match self {
            CrossingDecision::Crossing(crossing) => Some(crossing),
            CrossingDecision::NoCrossing => None,
        }
    }
}

/// A crossing attributed to a job and its recipient set.
///
/// Not persisted; it is collapsed into a [`DedupKey`].
#[derive(Debug, Clone, PartialEq)]
pub struct CrossingEvent {
    pub job_uuid: String,
    pub crossing_timestamp: DateTime<Utc>,
    pub predicted_value: f64,
    /// Sorted lexicographically.
    pub recipients: Vec<String>,
}

impl CrossingEvent {
    pub fn new(job: &Job, crossing: &Crossing) -> Self {
        Self {
            job_uuid: job.job_uuid.clone(),
            crossing_timestamp: crossing.timestamp,
            predicted_value: crossing.value,
            recipients: job.recipients.iter().cloned().collect(),
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        dedup::derive(&self.job_uuid, self.crossing_timestamp, &self.recipients)
    }
}

/// One time series advertised in station metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesInfo {
    pub shortname: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// Station metadata used for mail content and horizon derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
    pub uuid: String,
    pub shortname: String,
    pub longname: String,
    pub water_shortname: String,
    pub water_longname: String,
    pub unit: String,
    pub timeseries: Vec<TimeseriesInfo>,
}

impl StationInfo {
    /// Find an advertised series by shortname, case-insensitively.
    pub fn series(&self, shortname: &str) -> Option<&TimeseriesInfo> {
        self.timeseries
            .iter()
            .find(|series| series.shortname.eq_ignore_ascii_case(shortname))
    }
}

/// Everything a data source returns for one station in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StationData {
    pub station: StationInfo,
    pub current: Reading,
    /// Recent observed readings, oldest first, all before the fetch time.
    pub history: Vec<Reading>,
    /// Future forecast points, oldest first.
    pub forecast: Vec<Reading>,
    /// Horizon derived from the advertised forecast series, if any.
    pub forecast_horizon: Option<Duration>,
}
