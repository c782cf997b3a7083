//! Threshold evaluation.
//!
//! Decides whether the current reading or an in-horizon forecast point
//! reaches the limit. Boundaries are inclusive: a value equal to the limit
//! is a crossing, and a forecast point exactly at the horizon edge counts.

use chrono::{DateTime, Duration, Utc};

use crate::config::{EvaluationSettings, TrendSettings};
use crate::model::{Crossing, CrossingDecision, Provenance, Reading, StationData, StationInfo};

/// Horizon used for trend extrapolation when none is configured.
const DEFAULT_TREND_HORIZON_HOURS: i64 = 72;

/// Evaluate the current reading and forecast against `limit_cm`.
///
/// With `horizon == None` there is no usable forecast and only the current
/// reading is considered.
pub fn evaluate(
    now: DateTime<Utc>,
    current: &Reading,
    forecast: &[Reading],
    limit_cm: f64,
    horizon: Option<Duration>,
) -> CrossingDecision {
    if current.value() >= limit_cm {
        return CrossingDecision::Crossing(Crossing {
            timestamp: current.timestamp(),
            value: current.value(),
            provenance: Provenance::Current,
        });
    }

    let Some(horizon) = horizon else {
        return CrossingDecision::NoCrossing;
    };
    let edge = now.checked_add_signed(horizon).unwrap_or(DateTime::<Utc>::MAX_UTC);

    let mut in_horizon: Vec<&Reading> = forecast
        .iter()
        .filter(|point| point.timestamp() > now && point.timestamp() <= edge)
        .collect();
    in_horizon.sort_by_key(|point| point.timestamp());

    match in_horizon.into_iter().find(|point| point.value() >= limit_cm) {
        Some(point) => CrossingDecision::Crossing(Crossing {
            timestamp: point.timestamp(),
            value: point.value(),
            provenance: Provenance::Official,
        }),
        None => CrossingDecision::NoCrossing,
    }
}

/// Full evaluation for one job against freshly fetched station data.
///
/// An explicitly configured horizon wins over the one derived from station
/// metadata. When no forecast points are available and trend fallback is
/// enabled, the recent trend is extrapolated instead.
pub fn evaluate_station(
    now: DateTime<Utc>,
    data: &StationData,
    limit_cm: f64,
    settings: &EvaluationSettings,
) -> CrossingDecision {
    let horizon = settings.horizon.or(data.forecast_horizon);
    let decision = evaluate(now, &data.current, &data.forecast, limit_cm, horizon);

    if decision != CrossingDecision::NoCrossing || !data.forecast.is_empty() {
        return decision;
    }

    let Some(trend) = &settings.trend else {
        return decision;
    };

    let mut points = data.history.clone();
    points.push(data.current);
    let trend_horizon = horizon.unwrap_or_else(|| Duration::hours(DEFAULT_TREND_HORIZON_HOURS));

    match trend_crossing(now, &points, limit_cm, trend, trend_horizon) {
        Some(crossing) => CrossingDecision::Crossing(crossing),
        None => CrossingDecision::NoCrossing,
    }
}

/// Extrapolate the linear trend of the last `rising_points` readings.
///
/// Returns a crossing with [`Provenance::Trend`] when the slope is at least
/// `min_slope_cm_per_hour` and the projected crossing lies within the
/// horizon.
pub fn trend_crossing(
    now: DateTime<Utc>,
    readings: &[Reading],
    limit_cm: f64,
    trend: &TrendSettings,
    horizon: Duration,
) -> Option<Crossing> {
    let mut sorted: Vec<Reading> = readings.to_vec();
    sorted.sort_by_key(|r| r.timestamp());
    sorted.dedup_by_key(|r| r.timestamp());

    let take = trend.rising_points.max(2);
    if sorted.len() < take {
        return None;
    }
    let window = &sorted[sorted.len() - take..];

    let slope = least_squares_slope(window)?;
    if slope < trend.min_slope_cm_per_hour || slope <= 0.0 {
        return None;
    }

    let last = window.last()?;
    let hours_needed = ((limit_cm - last.value()) / slope).max(0.0);
    let millis = (hours_needed * 3_600_000.0).round();
    // A projection this far out cannot be represented, let alone be in range.
    if !millis.is_finite() || millis >= i64::MAX as f64 {
        return None;
    }
    let offset = Duration::try_milliseconds(millis as i64)?;
    let timestamp = last.timestamp().checked_add_signed(offset)?;

    let edge = now.checked_add_signed(horizon).unwrap_or(DateTime::<Utc>::MAX_UTC);
    if timestamp > edge {
        return None;
    }

    Some(Crossing {
        timestamp,
        value: limit_cm,
        provenance: Provenance::Trend,
    })
}

/// Least-squares slope of value over elapsed time, in cm per hour.
pub fn least_squares_slope(readings: &[Reading]) -> Option<f64> {
    let first = readings.first()?;
    let n = readings.len() as f64;
    if readings.len() < 2 {
        return None;
    }

    let xs: Vec<f64> = readings
        .iter()
        .map(|r| (r.timestamp() - first.timestamp()).num_milliseconds() as f64 / 3_600_000.0)
        .collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = readings.iter().map(|r| r.value()).sum::<f64>() / n;

    let (mut numerator, mut denominator) = (0.0, 0.0);
    for (x, reading) in xs.iter().zip(readings) {
        numerator += (x - mean_x) * (reading.value() - mean_y);
        denominator += (x - mean_x).powi(2);
    }

    if denominator == 0.0 {
        return None;
    }
    Some(numerator / denominator)
}

/// Horizon advertised by the station's forecast series.
///
/// Hours remaining until the series end, rounded up. `None` when the series
/// is missing, has no end, or has already ended.
pub fn derived_horizon(
    now: DateTime<Utc>,
    station: &StationInfo,
    forecast_series_shortname: &str,
) -> Option<Duration> {
    let series = station.series(forecast_series_shortname)?;
    series.start?;
    let end = series.end?;

    let remaining_seconds = (end - now).num_seconds();
    if remaining_seconds <= 0 {
        return None;
    }
    let hours = (remaining_seconds + 3599) / 3600;
    Some(Duration::hours(hours))
}

/// Drop forecast points at or before `now`.
pub fn future_points(forecast: &[Reading], now: DateTime<Utc>) -> Vec<Reading> {
    forecast
        .iter()
        .filter(|point| point.timestamp() > now)
        .copied()
        .collect()
}

/// Uncertainty band (±cm) for a forecast point `timestamp` issued at `reference`.
pub fn forecast_uncertainty_cm(reference: DateTime<Utc>, timestamp: DateTime<Utc>) -> Option<f64> {
    let hours_ahead = (timestamp - reference).num_seconds() as f64 / 3600.0;
    if hours_ahead <= 0.0 {
        None
    } else if hours_ahead <= 48.0 {
        Some(10.0)
    } else if hours_ahead <= 96.0 {
        Some(20.0)
    } else {
        None
    }
}
