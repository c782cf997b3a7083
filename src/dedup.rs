//! Dedup key derivation.
//!
//! A key identifies one predicted crossing event for one job:
//! `"<job_uuid>|<sha256 hex>"`, where the digest covers the crossing time
//! (whole seconds, UTC) and the sorted recipient set.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Separator between hashed parts (ASCII unit separator).
const PART_SEPARATOR: u8 = 0x1f;

/// Separator between the job uuid and the digest. Job uuids never contain it.
pub const KEY_SEPARATOR: char = '|';

/// Stable identity of a crossing event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Prefix shared by every key of `job_uuid`.
    pub fn job_prefix(job_uuid: &str) -> String {
        format!("{job_uuid}{KEY_SEPARATOR}")
    }

    /// Whether this key was derived for `job_uuid`.
    ///
    /// The digest never contains the separator, so the job part is whatever
    /// precedes the last one.
    pub fn belongs_to(&self, job_uuid: &str) -> bool {
        self.0
            .rsplit_once(KEY_SEPARATOR)
            .is_some_and(|(owner, _)| owner == job_uuid)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DedupKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Derive the dedup key for a crossing.
///
/// Recipient order and duplicates never affect the key, and neither does
/// sub-second jitter in the crossing timestamp.
pub fn derive<I, S>(job_uuid: &str, crossing_timestamp: DateTime<Utc>, recipients: I) -> DedupKey
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sorted: Vec<String> = recipients
        .into_iter()
        .map(|r| r.as_ref().trim().to_string())
        .collect();
    sorted.sort();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(canonical_timestamp(crossing_timestamp).as_bytes());
    hasher.update([PART_SEPARATOR]);
    hasher.update(sorted.join(",").as_bytes());
    hasher.update([PART_SEPARATOR]);

    DedupKey(format!(
        "{}{}",
        DedupKey::job_prefix(job_uuid),
        hex::encode(hasher.finalize())
    ))
}

fn canonical_timestamp(timestamp: DateTime<Utc>) -> String {
    DateTime::<Utc>::from_timestamp(timestamp.timestamp(), 0)
        .unwrap_or(timestamp)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}
