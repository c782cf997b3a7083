//! Station data sources.
//!
//! A data source returns the current reading, recent history and the
//! official forecast for one station. Providers are selected by name at
//! startup; only [`pegelonline`] exists today.

pub mod pegelonline;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::error::{ConfigError, FetchError};
use crate::model::StationData;

pub use pegelonline::PegelonlineClient;

/// Fetches typed station readings.
#[async_trait]
pub trait StationDataSource: Send + Sync {
    /// Fetch everything needed to evaluate one station at `now`.
    async fn fetch(&self, station_uuid: &str, now: DateTime<Utc>) -> Result<StationData, FetchError>;
}

/// Build the data source named by `settings.provider`.
pub fn provider_for(settings: &Settings) -> Result<Arc<dyn StationDataSource>, ConfigError> {
    match settings.provider.as_str() {
        "pegelonline" => {
            let client = PegelonlineClient::new(settings.fetch_timeout, &settings.evaluation).map_err(|e| {
                ConfigError::Invalid {
                    key: "PROVIDER".to_string(),
                    message: format!("could not build HTTP client: {e}"),
                }
            })?;
            Ok(Arc::new(client))
        }
        other => Err(ConfigError::UnsupportedProvider(other.to_string())),
    }
}
