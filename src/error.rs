//! Error taxonomy shared by the alert service and the watchdog.
//!
//! Fetch and send failures are recovered locally and counted against the
//! job's health; configuration errors are isolated per job unless the
//! global configuration itself is unusable.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to obtain station readings from a data source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The whole fetch (all requests for one station) exceeded its deadline.
    #[error("station fetch exceeded {0:?}")]
    Deadline(std::time::Duration),

    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// The server could not be reached.
    #[error("could not reach {url}: {message}")]
    Network { url: String, message: String },

    /// The payload could not be interpreted.
    #[error("malformed payload from {url}: {message}")]
    Malformed { url: String, message: String },
}

impl FetchError {
    /// Map a transport-level `reqwest` error for `url`.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else if err.is_decode() {
            FetchError::Malformed {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Whether the failure was an HTTP 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Http { status: 404, .. })
    }
}

/// Failure to deliver a notification.
#[derive(Debug, Error)]
pub enum SendError {
    /// A sender or recipient address could not be parsed.
    #[error("invalid mail address '{0}'")]
    InvalidAddress(String),

    /// The message has no recipients.
    #[error("message has no recipients")]
    NoRecipients,

    /// The message could not be assembled.
    #[error("could not build message: {0}")]
    Build(String),

    /// The transport rejected or failed to deliver the message.
    #[error("mail transport failed: {0}")]
    Transport(String),
}

/// Invalid configuration, either global or for a single job definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("unsupported provider '{0}', only 'pegelonline' is available")]
    UnsupportedProvider(String),

    #[error("jobs file {path}: {message}")]
    JobsFile { path: PathBuf, message: String },

    /// A single job definition was rejected; other jobs keep running.
    #[error("job #{index} ({job_uuid}): {message}")]
    InvalidJob {
        index: usize,
        job_uuid: String,
        message: String,
    },

    #[error("job #{index}: duplicate job_uuid '{job_uuid}'")]
    DuplicateJob { index: usize, job_uuid: String },

    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },
}

/// The persisted state file could not be read or written.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A container restart request failed.
#[derive(Debug, Error)]
pub enum RestartError {
    #[error("container '{0}' not found")]
    NotFound(String),

    #[error("restart of '{container}' failed: {message}")]
    Api { container: String, message: String },
}

/// Failure of one job evaluation cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Send(#[from] SendError),
}
