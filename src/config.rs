//! Configuration from environment variables and the jobs file.
//!
//! Global settings come from the environment and are fatal when invalid.
//! Job definitions come from `JOBS_FILE` (or, without it, from the legacy
//! single-job variables) and are validated one by one: a broken job is
//! reported and skipped while the remaining jobs keep running.

use std::collections::{BTreeSet, HashSet};
use std::env;
use std::path::{Path, PathBuf};

use chrono::Duration;
use chrono_tz::Tz;
use serde::Deserialize;

use crate::dedup::KEY_SEPARATOR;
use crate::error::ConfigError;
use crate::model::{Job, Locale};
use crate::schedule::CronSchedule;

pub const DEFAULT_FORECAST_SERIES: &str = "WV";
pub const DEFAULT_DEDUPE_HOURS: i64 = 24;
pub const DEFAULT_MAX_STATE_KEYS: usize = 500;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_HEALTH_PORT: u16 = 8090;
pub const DEFAULT_MANAGER_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 20;
pub const DEFAULT_STATE_FILE: &str = "/data/state.json";
pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";
pub const DEFAULT_JOB_SCHEDULE: &str = "0 */1 * * *";
pub const DEFAULT_RUN_HOURS: &str = "0,12";
pub const DEFAULT_WATCHDOG_COOLDOWN_SECONDS: u64 = 900;

/// Settings that influence how a job cycle evaluates readings.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSettings {
    /// Shortname of the official forecast series (upper-case).
    pub forecast_series_shortname: String,
    /// Explicit forecast horizon; `None` derives it from station metadata.
    pub horizon: Option<Duration>,
    /// Minimum spacing between alerts for the same dedup key.
    pub dedupe_window: Duration,
    /// Trend extrapolation when no forecast exists; `None` disables it.
    pub trend: Option<TrendSettings>,
}

/// Parameters of the linear trend fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSettings {
    pub rising_points: usize,
    pub min_slope_cm_per_hour: f64,
}

/// Mail transport settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
    pub use_starttls: bool,
    pub use_ssl: bool,
}

/// Retention limits of the alert state store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreLimits {
    /// Entries older than this are pruned. Never shorter than the dedupe window.
    pub retention: Duration,
    /// Soft cap on stored keys; entries inside their window are never evicted.
    pub max_keys: usize,
}

/// Where job definitions come from.
#[derive(Debug, Clone)]
pub enum JobsSource {
    /// A JSON jobs file, re-read on every manager tick.
    File(PathBuf),
    /// A single job normalized from the legacy environment variables.
    Legacy(Job),
}

/// Alert service settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: String,
    pub jobs: JobsSource,
    pub admin_recipients: Vec<String>,
    pub evaluation: EvaluationSettings,
    pub store_limits: StoreLimits,
    pub failure_threshold: u32,
    pub health_host: String,
    pub health_port: u16,
    pub manager_interval: std::time::Duration,
    pub fetch_timeout: std::time::Duration,
    pub state_file: PathBuf,
    pub timezone: Tz,
    pub smtp: SmtpSettings,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let provider = vars
            .get("PROVIDER")
            .unwrap_or_else(|| "pegelonline".to_string())
            .trim()
            .to_ascii_lowercase();
        if provider != "pegelonline" {
            return Err(ConfigError::UnsupportedProvider(provider));
        }

        let dedupe_hours: i64 = vars.parse_or("ALERT_DEDUPE_HOURS", DEFAULT_DEDUPE_HOURS)?;
        let dedupe_window = hours_setting("ALERT_DEDUPE_HOURS", dedupe_hours)?;

        let default_retention = dedupe_hours
            .checked_mul(2)
            .ok_or_else(|| invalid("ALERT_DEDUPE_HOURS", "out of range"))?;
        let retention_hours: i64 = vars.parse_or("STATE_RETENTION_HOURS", default_retention)?;
        let retention = hours_setting("STATE_RETENTION_HOURS", retention_hours)?.max(dedupe_window);

        let horizon = match vars.get("FORECAST_HORIZON_HOURS") {
            Some(raw) => {
                let hours: i64 = parse_value("FORECAST_HORIZON_HOURS", &raw)?;
                Some(hours_setting("FORECAST_HORIZON_HOURS", hours)?)
            }
            None => None,
        };

        let trend = if vars.bool_or("TREND_FALLBACK", false) {
            let rising_points: usize = vars.parse_or("RISING_POINTS", 4)?;
            if rising_points < 2 {
                return Err(invalid("RISING_POINTS", "must be at least 2"));
            }
            let min_slope_cm_per_hour: f64 = vars.parse_or("MIN_SLOPE_CM_PER_HOUR", 1.0)?;
            if !(min_slope_cm_per_hour.is_finite() && min_slope_cm_per_hour > 0.0) {
                return Err(invalid("MIN_SLOPE_CM_PER_HOUR", "must be a positive number"));
            }
            Some(TrendSettings {
                rising_points,
                min_slope_cm_per_hour,
            })
        } else {
            None
        };

        let timezone_name = vars
            .get("TZ")
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|_| invalid("TZ", &format!("unknown time zone '{timezone_name}'")))?;

        let alert_recipients = vars.get("ALERT_RECIPIENTS").map(|raw| split_list(&raw));
        let admin_recipients = vars
            .get("ADMIN_RECIPIENTS")
            .map(|raw| split_list(&raw))
            .or_else(|| alert_recipients.clone())
            .unwrap_or_default();

        let jobs = match vars.get("JOBS_FILE") {
            Some(path) => JobsSource::File(PathBuf::from(path)),
            None => JobsSource::Legacy(legacy_job(&vars, alert_recipients)?),
        };

        Ok(Self {
            provider,
            jobs,
            admin_recipients,
            evaluation: EvaluationSettings {
                forecast_series_shortname: vars
                    .get("FORECAST_SERIES_SHORTNAME")
                    .unwrap_or_else(|| DEFAULT_FORECAST_SERIES.to_string())
                    .trim()
                    .to_ascii_uppercase(),
                horizon,
                dedupe_window,
                trend,
            },
            store_limits: StoreLimits {
                retention,
                max_keys: vars.parse_or("MAX_STATE_KEYS", DEFAULT_MAX_STATE_KEYS)?,
            },
            failure_threshold: vars
                .parse_or("HEALTH_FAILURE_THRESHOLD", DEFAULT_FAILURE_THRESHOLD)?
                .max(1),
            health_host: vars
                .get("HEALTH_HOST")
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            health_port: vars.parse_or("HEALTH_PORT", DEFAULT_HEALTH_PORT)?,
            manager_interval: std::time::Duration::from_secs(
                vars.parse_or("MANAGER_INTERVAL_SECONDS", DEFAULT_MANAGER_INTERVAL_SECONDS)?
                    .max(1),
            ),
            fetch_timeout: std::time::Duration::from_secs(
                vars.parse_or("FETCH_TIMEOUT_SECONDS", DEFAULT_FETCH_TIMEOUT_SECONDS)?
                    .max(1),
            ),
            state_file: PathBuf::from(
                vars.get("STATE_FILE")
                    .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string()),
            ),
            timezone,
            smtp: SmtpSettings::from_vars(&vars)?,
        })
    }
}

impl SmtpSettings {
    fn from_vars<F: Fn(&str) -> Option<String>>(vars: &Vars<'_, F>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: vars.required("SMTP_HOST")?,
            port: vars.parse_or("SMTP_PORT", 587)?,
            username: vars.get("SMTP_USERNAME").unwrap_or_default(),
            password: vars.get("SMTP_PASSWORD").unwrap_or_default(),
            sender: vars.required("SMTP_SENDER")?,
            use_starttls: vars.bool_or("SMTP_USE_STARTTLS", true),
            use_ssl: vars.bool_or("SMTP_USE_SSL", false),
        })
    }
}

/// Watchdog settings.
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub recipients: Vec<String>,
    /// Container names to watch; empty watches every container.
    pub watch_containers: Vec<String>,
    pub cooldown: Duration,
    pub auto_restart_unhealthy: bool,
    pub smtp: SmtpSettings,
}

impl WatchdogSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let recipients = split_list(&vars.required("WATCHDOG_ALERT_RECIPIENTS")?);
        if recipients.is_empty() {
            return Err(invalid("WATCHDOG_ALERT_RECIPIENTS", "must not be empty"));
        }

        let cooldown_seconds: i64 = vars.parse_or(
            "WATCHDOG_COOLDOWN_SECONDS",
            DEFAULT_WATCHDOG_COOLDOWN_SECONDS as i64,
        )?;

        Ok(Self {
            recipients,
            watch_containers: vars
                .get("WATCHDOG_WATCH_CONTAINERS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            cooldown: Duration::seconds(cooldown_seconds.max(0)),
            auto_restart_unhealthy: vars.bool_or("WATCHDOG_AUTO_RESTART_UNHEALTHY", true),
            smtp: SmtpSettings::from_vars(&vars)?,
        })
    }
}

/// Outcome of loading job definitions: the valid jobs plus per-job rejections.
#[derive(Debug, Default)]
pub struct LoadedJobs {
    pub jobs: Vec<Job>,
    pub rejected: Vec<ConfigError>,
}

/// Load the job set described by `source`.
///
/// Only an unreadable or structurally invalid jobs file is an error; single
/// broken definitions end up in [`LoadedJobs::rejected`].
pub fn load_jobs(source: &JobsSource) -> Result<LoadedJobs, ConfigError> {
    match source {
        JobsSource::Legacy(job) => Ok(LoadedJobs {
            jobs: vec![job.clone()],
            rejected: Vec::new(),
        }),
        JobsSource::File(path) => load_jobs_file(path),
    }
}

/// Read and validate a jobs file.
pub fn load_jobs_file(path: &Path) -> Result<LoadedJobs, ConfigError> {
    let jobs_file_error = |message: String| ConfigError::JobsFile {
        path: path.to_path_buf(),
        message,
    };

    if !path.exists() {
        return Err(jobs_file_error("JOBS_FILE does not exist".to_string()));
    }
    let raw = std::fs::read_to_string(path).map_err(|e| jobs_file_error(e.to_string()))?;
    parse_jobs(&raw).map_err(jobs_file_error)
}

#[derive(Debug, Deserialize)]
struct JobsDocument {
    jobs: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecipientsField {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawJob {
    job_uuid: Option<String>,
    name: Option<String>,
    station_uuid: Option<String>,
    limit_cm: Option<f64>,
    recipients: Option<RecipientsField>,
    alert_recipient: Option<String>,
    locale: Option<String>,
    schedule_cron: Option<String>,
}

/// Parse the JSON text of a jobs file.
///
/// Returns `Err` only when the document as a whole is unusable.
pub fn parse_jobs(raw: &str) -> Result<LoadedJobs, String> {
    let document: JobsDocument = serde_json::from_str(raw)
        .map_err(|e| format!("expected an object with a 'jobs' array: {e}"))?;

    let mut loaded = LoadedJobs::default();
    let mut seen = HashSet::new();

    for (offset, value) in document.jobs.into_iter().enumerate() {
        let index = offset + 1;
        match validate_job(index, value) {
            Ok(job) => {
                if seen.insert(job.job_uuid.clone()) {
                    loaded.jobs.push(job);
                } else {
                    loaded.rejected.push(ConfigError::DuplicateJob {
                        index,
                        job_uuid: job.job_uuid,
                    });
                }
            }
            Err(err) => loaded.rejected.push(err),
        }
    }

    Ok(loaded)
}

fn validate_job(index: usize, value: serde_json::Value) -> Result<Job, ConfigError> {
    let uuid_hint = value
        .get("job_uuid")
        .and_then(|v| v.as_str())
        .unwrap_or("?")
        .to_string();
    let reject = |message: String| ConfigError::InvalidJob {
        index,
        job_uuid: uuid_hint.clone(),
        message,
    };

    let raw: RawJob = serde_json::from_value(value).map_err(|e| reject(e.to_string()))?;

    let job_uuid = non_empty(raw.job_uuid).ok_or_else(|| reject("missing job_uuid".to_string()))?;
    if job_uuid.contains(KEY_SEPARATOR) {
        return Err(reject(format!("job_uuid must not contain '{KEY_SEPARATOR}'")));
    }
    let station_uuid =
        non_empty(raw.station_uuid).ok_or_else(|| reject("missing station_uuid".to_string()))?;

    let limit_cm = raw
        .limit_cm
        .ok_or_else(|| reject("missing limit_cm".to_string()))?;
    if !limit_cm.is_finite() {
        return Err(reject("limit_cm must be a finite number".to_string()));
    }

    let recipients: BTreeSet<String> = match raw.recipients {
        Some(RecipientsField::One(list)) => split_list(&list).into_iter().collect(),
        Some(RecipientsField::Many(list)) => list
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect(),
        None => BTreeSet::new(),
    };
    if recipients.is_empty() {
        return Err(reject("recipients must contain at least one address".to_string()));
    }
    if let Some(bad) = recipients.iter().find(|r| !looks_like_address(r)) {
        return Err(reject(format!("invalid recipient '{bad}'")));
    }

    let alert_recipient = non_empty(raw.alert_recipient);
    if let Some(addr) = &alert_recipient {
        if !looks_like_address(addr) {
            return Err(reject(format!("invalid alert_recipient '{addr}'")));
        }
    }

    let locale = match raw.locale {
        Some(tag) => Locale::parse(&tag).ok_or_else(|| reject(format!("invalid locale '{tag}'")))?,
        None => Locale::default(),
    };

    let schedule_cron = non_empty(raw.schedule_cron).unwrap_or_else(|| DEFAULT_JOB_SCHEDULE.to_string());
    CronSchedule::parse(&schedule_cron).map_err(|e| reject(e.to_string()))?;

    Ok(Job {
        name: non_empty(raw.name).unwrap_or_else(|| format!("job-{index}")),
        job_uuid,
        station_uuid,
        limit_cm,
        recipients,
        alert_recipient,
        locale,
        schedule_cron,
    })
}

/// Normalize the pre-jobs-file variables into exactly one job.
fn legacy_job<F: Fn(&str) -> Option<String>>(
    vars: &Vars<'_, F>,
    alert_recipients: Option<Vec<String>>,
) -> Result<Job, ConfigError> {
    let station_uuid = vars.required("STATION_UUID")?;
    if station_uuid.contains(KEY_SEPARATOR) {
        return Err(invalid("STATION_UUID", &format!("must not contain '{KEY_SEPARATOR}'")));
    }
    let limit_cm: f64 = parse_value("LIMIT_CM", &vars.required("LIMIT_CM")?)?;
    if !limit_cm.is_finite() {
        return Err(invalid("LIMIT_CM", "must be a finite number"));
    }

    let recipients: BTreeSet<String> = alert_recipients
        .ok_or_else(|| ConfigError::Missing("ALERT_RECIPIENTS".to_string()))?
        .into_iter()
        .collect();
    if recipients.is_empty() {
        return Err(invalid("ALERT_RECIPIENTS", "must contain at least one address"));
    }

    let locale = match vars.get("ALERT_LOCALE") {
        Some(tag) => Locale::parse(&tag)
            .ok_or_else(|| invalid("ALERT_LOCALE", &format!("unsupported locale '{tag}'")))?,
        None => Locale::default(),
    };

    let schedule_cron = match vars.get("SCHEDULE_CRON") {
        Some(expression) => expression,
        None => cron_from_run_hours(
            &vars
                .get("FORECAST_RUN_HOURS")
                .unwrap_or_else(|| DEFAULT_RUN_HOURS.to_string()),
        )?,
    };
    CronSchedule::parse(&schedule_cron)?;

    Ok(Job {
        job_uuid: format!("legacy-{station_uuid}"),
        name: "legacy".to_string(),
        station_uuid,
        limit_cm,
        recipients,
        alert_recipient: None,
        locale,
        schedule_cron,
    })
}

/// Turn a list of run hours (`"0,12"`) into a daily cron expression.
fn cron_from_run_hours(raw: &str) -> Result<String, ConfigError> {
    let mut hours = BTreeSet::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let hour: u32 = parse_value("FORECAST_RUN_HOURS", token)?;
        if hour > 23 {
            return Err(invalid(
                "FORECAST_RUN_HOURS",
                "must contain hours between 0 and 23",
            ));
        }
        hours.insert(hour);
    }
    if hours.is_empty() {
        return Err(invalid("FORECAST_RUN_HOURS", "must contain at least one hour"));
    }

    let list: Vec<String> = hours.iter().map(|h| h.to_string()).collect();
    Ok(format!("0 {} * * *", list.join(",")))
}

struct Vars<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(raw) => matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            None => default,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, &format!("cannot parse '{}'", raw.trim())))
}

/// A non-negative hour count that fits in a [`Duration`].
fn hours_setting(key: &str, hours: i64) -> Result<Duration, ConfigError> {
    if hours < 0 {
        return Err(invalid(key, "must not be negative"));
    }
    Duration::try_hours(hours).ok_or_else(|| invalid(key, "out of range"))
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn looks_like_address(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !value.contains(' '),
        None => false,
    }
}
