//! Per-minute station data cache.
//!
//! Jobs watching the same station often fire on the same cron minute. They
//! share one fetch: entries are keyed by station, forecast series and
//! minute bucket, and concurrent requests for the same key wait for the
//! fetch already in flight. Failed fetches are not cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::FetchError;
use crate::model::StationData;

type CacheKey = (String, String, i64);

#[derive(Debug, Default)]
pub struct StationDataCache {
    entries: Mutex<HashMap<CacheKey, Arc<OnceCell<StationData>>>>,
}

impl StationDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return cached data for this minute or run `fetch` once to fill it.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        now: DateTime<Utc>,
        station_uuid: &str,
        forecast_series_shortname: &str,
        fetch: F,
    ) -> Result<StationData, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StationData, FetchError>>,
    {
        let bucket = minute_bucket(now);
        let key = (
            station_uuid.to_string(),
            forecast_series_shortname.to_string(),
            bucket,
        );

        let cell = {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            entries.retain(|(_, _, entry_bucket), _| *entry_bucket >= bucket - 1);
            entries.entry(key).or_default().clone()
        };

        if cell.initialized() {
            debug!(station = %station_uuid, bucket, "Station cache hit");
        }
        let data = cell.get_or_try_init(fetch).await?;
        Ok(data.clone())
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn minute_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(60)
}
