//! PEGELONLINE client.
//!
//! PEGELONLINE is the gauge service of the German federal waterways
//! administration. It publishes station metadata, the current water level
//! (`W` series) and, for some stations, official forecasts.
//!
//! # API Reference
//!
//! See: <https://www.pegelonline.wsv.de/webservice/dokuRestapi>

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::StationDataSource;
use crate::config::EvaluationSettings;
use crate::error::FetchError;
use crate::model::{Reading, StationData, StationInfo, TimeseriesInfo};
use crate::threshold::{derived_horizon, future_points};

/// Base URL for the PEGELONLINE REST API.
const PEGELONLINE_API_BASE: &str = "https://www.pegelonline.wsv.de/webservices/rest-api/v2";

/// Forecast endpoints, tried in order until one exists.
const FORECAST_ENDPOINTS: [&str; 4] = [
    "forecast.json",
    "shorttermforecast.json",
    "longtermforecast.json",
    "predictions.json",
];

/// Keys under which forecast payloads nest their point list.
const FORECAST_LIST_KEYS: [&str; 5] = ["forecast", "predictions", "measurements", "values", "data"];

/// Recent history window requested for trend extrapolation.
const HISTORY_WINDOW: &str = "PT24H";

/// Client for the PEGELONLINE REST API.
#[derive(Clone)]
pub struct PegelonlineClient {
    client: reqwest::Client,
    base_url: String,
    forecast_series_shortname: String,
    horizon: Option<Duration>,
    include_history: bool,
}

impl PegelonlineClient {
    /// Create a client with a per-request `timeout`.
    pub fn new(timeout: std::time::Duration, settings: &EvaluationSettings) -> Result<Self, reqwest::Error> {
        Self::with_base_url(PEGELONLINE_API_BASE, timeout, settings)
    }

    /// Create a client with a custom base URL (for testing).
    pub fn with_base_url(
        base_url: &str,
        timeout: std::time::Duration,
        settings: &EvaluationSettings,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            forecast_series_shortname: settings.forecast_series_shortname.clone(),
            horizon: settings.horizon,
            include_history: settings.trend.is_some(),
        })
    }

    /// Fetch station metadata including all advertised time series.
    pub async fn get_station_info(&self, station_uuid: &str) -> Result<StationInfo, FetchError> {
        let url = format!(
            "{}/stations/{}.json?includeTimeseries=true",
            self.base_url,
            urlencoding::encode(station_uuid)
        );
        let payload: StationPayload = self.get_json(&url).await?;
        Ok(payload.into_station_info())
    }

    /// Fetch the latest water level.
    pub async fn get_current_measurement(&self, station_uuid: &str) -> Result<Reading, FetchError> {
        let url = format!(
            "{}/stations/{}/W/currentmeasurement.json",
            self.base_url,
            urlencoding::encode(station_uuid)
        );
        let payload: serde_json::Value = self.get_json(&url).await?;

        parse_point(&payload)
            .map(|(timestamp, value)| Reading::current(timestamp, value))
            .ok_or_else(|| FetchError::Malformed {
                url,
                message: "missing timestamp or value".to_string(),
            })
    }

    /// Fetch observed water levels of the last 24 hours, oldest first.
    pub async fn get_recent_measurements(&self, station_uuid: &str) -> Result<Vec<Reading>, FetchError> {
        let url = format!(
            "{}/stations/{}/W/measurements.json?start={}",
            self.base_url,
            urlencoding::encode(station_uuid),
            HISTORY_WINDOW
        );
        let payload: serde_json::Value = self.get_json(&url).await?;

        let points = payload.as_array().ok_or_else(|| FetchError::Malformed {
            url: url.clone(),
            message: "expected a list of measurements".to_string(),
        })?;
        Ok(parse_points(points)
            .into_iter()
            .map(|(timestamp, value)| Reading::current(timestamp, value))
            .collect())
    }

    /// Fetch the official forecast, oldest point first.
    ///
    /// Endpoints answering 404 are skipped; an empty list means the station
    /// publishes no forecast.
    pub async fn get_official_forecast(&self, station_uuid: &str) -> Result<Vec<Reading>, FetchError> {
        for endpoint in FORECAST_ENDPOINTS {
            let url = format!(
                "{}/stations/{}/W/{}",
                self.base_url,
                urlencoding::encode(station_uuid),
                endpoint
            );
            let payload: serde_json::Value = match self.get_json(&url).await {
                Ok(payload) => payload,
                Err(e) if e.is_not_found() => {
                    debug!(url = %url, "Forecast endpoint not available");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let points = extract_forecast(&payload);
            if !points.is_empty() {
                return Ok(points);
            }
        }
        Ok(Vec::new())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

#[async_trait]
impl StationDataSource for PegelonlineClient {
    async fn fetch(&self, station_uuid: &str, now: DateTime<Utc>) -> Result<StationData, FetchError> {
        let (station, current) = tokio::try_join!(
            self.get_station_info(station_uuid),
            self.get_current_measurement(station_uuid)
        )?;

        let history = if self.include_history {
            self.get_recent_measurements(station_uuid)
                .await?
                .into_iter()
                .filter(|reading| reading.timestamp() <= now)
                .collect()
        } else {
            Vec::new()
        };

        let forecast_horizon = derived_horizon(now, &station, &self.forecast_series_shortname);
        let effective = self.horizon.or(forecast_horizon);
        let forecast = match effective {
            Some(horizon) if horizon > Duration::zero() => {
                future_points(&self.get_official_forecast(station_uuid).await?, now)
            }
            _ => {
                debug!(
                    station = %station_uuid,
                    series = %self.forecast_series_shortname,
                    "No forecast horizon, evaluating current level only"
                );
                Vec::new()
            }
        };

        Ok(StationData {
            station,
            current,
            history,
            forecast,
            forecast_horizon,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StationPayload {
    uuid: String,
    #[serde(default)]
    shortname: Option<String>,
    #[serde(default)]
    longname: Option<String>,
    #[serde(default)]
    water: Option<WaterPayload>,
    #[serde(default)]
    timeseries: Vec<TimeseriesPayload>,
}

#[derive(Debug, Deserialize)]
struct WaterPayload {
    #[serde(default)]
    shortname: String,
    #[serde(default)]
    longname: String,
}

#[derive(Debug, Deserialize)]
struct TimeseriesPayload {
    shortname: String,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
}

impl StationPayload {
    fn into_station_info(self) -> StationInfo {
        let unit = self
            .timeseries
            .iter()
            .find(|series| series.shortname == "W")
            .and_then(|series| series.unit.clone())
            .unwrap_or_else(|| "cm".to_string());

        let shortname = self.shortname.unwrap_or_else(|| self.uuid.clone());
        let longname = self.longname.unwrap_or_else(|| shortname.clone());
        let water = self.water.unwrap_or(WaterPayload {
            shortname: String::new(),
            longname: String::new(),
        });

        StationInfo {
            uuid: self.uuid,
            shortname,
            longname,
            water_shortname: water.shortname,
            water_longname: water.longname,
            unit,
            timeseries: self
                .timeseries
                .into_iter()
                .map(|series| TimeseriesInfo {
                    start: series.start.as_deref().and_then(parse_timestamp),
                    end: series.end.as_deref().and_then(parse_timestamp),
                    shortname: series.shortname,
                    unit: series.unit,
                })
                .collect(),
        }
    }
}

/// Pull forecast points out of a list payload or a wrapping object.
fn extract_forecast(payload: &serde_json::Value) -> Vec<Reading> {
    let list = match payload {
        serde_json::Value::Array(items) => Some(items),
        serde_json::Value::Object(map) => FORECAST_LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_array())),
        _ => None,
    };

    let mut readings: Vec<Reading> = list
        .map(|items| parse_points(items))
        .unwrap_or_default()
        .into_iter()
        .map(|(timestamp, value)| Reading::forecast(timestamp, value))
        .collect();
    readings.sort_by_key(|r| r.timestamp());
    readings
}

/// Parse `{timestamp, value}` entries, skipping incomplete ones.
fn parse_points(items: &[serde_json::Value]) -> Vec<(DateTime<Utc>, f64)> {
    items.iter().filter_map(parse_point).collect()
}

fn parse_point(item: &serde_json::Value) -> Option<(DateTime<Utc>, f64)> {
    let timestamp = item.get("timestamp")?.as_str().and_then(parse_timestamp)?;
    let value = match item.get("value")? {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    value.is_finite().then_some((timestamp, value))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
