//! Persistent alert state.
//!
//! The store owns two pieces of state: the sent dedup keys with the time
//! each was first sent, and the per-job health counters. All reads and
//! writes go through one mutex, and the whole document is rewritten to disk
//! after every mutation:
//!
//! ```json
//! {
//!   "sent_keys": { "<job_uuid>|<sha256>": "2026-02-13T12:00:00Z" },
//!   "jobs": { "<job_uuid>": { "consecutive_failures": 0, "is_degraded": false, ... } }
//! }
//! ```
//!
//! Unknown fields are ignored on load so older and newer versions can share
//! a state file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::StoreLimits;
use crate::dedup::DedupKey;
use crate::error::PersistenceError;
use crate::health::{HealthTransition, JobHealth};

/// Result of [`AlertStateStore::try_claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller may send. `previous` is the entry the claim replaced, if
    /// any, and is needed to [`release`](AlertStateStore::release) the claim.
    Claimed { previous: Option<DateTime<Utc>> },
    /// A send for this key happened inside the dedupe window; suppress.
    AlreadyClaimed { first_sent_at: DateTime<Utc> },
}

#[derive(Debug, Default, Serialize)]
struct StateDocument {
    sent_keys: BTreeMap<DedupKey, DateTime<Utc>>,
    jobs: BTreeMap<String, JobHealth>,
}

/// On-disk shape, lenient about individual entries.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStateDocument {
    sent_keys: BTreeMap<String, serde_json::Value>,
    jobs: BTreeMap<String, serde_json::Value>,
}

impl From<RawStateDocument> for StateDocument {
    fn from(raw: RawStateDocument) -> Self {
        let sent_keys = raw
            .sent_keys
            .into_iter()
            .filter_map(|(key, value)| {
                let sent_at = value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc));
                if sent_at.is_none() {
                    warn!(key = %key, "Dropping state entry with unreadable timestamp");
                }
                sent_at.map(|t| (DedupKey::from(key), t))
            })
            .collect();

        let jobs = raw
            .jobs
            .into_iter()
            .filter_map(|(job_uuid, value)| match serde_json::from_value(value) {
                Ok(health) => Some((job_uuid, health)),
                Err(e) => {
                    warn!(job_uuid = %job_uuid, error = %e, "Dropping unreadable job health entry");
                    None
                }
            })
            .collect();

        Self { sent_keys, jobs }
    }
}

/// Sole owner of the persisted alert state.
#[derive(Debug)]
pub struct AlertStateStore {
    path: Option<PathBuf>,
    limits: StoreLimits,
    state: Mutex<StateDocument>,
}

impl AlertStateStore {
    /// Open the store backed by `path`.
    ///
    /// A missing file starts empty. An unreadable or corrupt file also starts
    /// empty and is logged as an error.
    pub fn open(path: impl Into<PathBuf>, limits: StoreLimits) -> Self {
        let path = path.into();
        let state = match load_document(&path) {
            Ok(Some(document)) => {
                info!(
                    path = %path.display(),
                    keys = document.sent_keys.len(),
                    jobs = document.jobs.len(),
                    "Loaded alert state"
                );
                document
            }
            Ok(None) => {
                info!(path = %path.display(), "No alert state yet, starting empty");
                StateDocument::default()
            }
            Err(e) => {
                error!(error = %e, "Could not load alert state, starting empty; duplicate alerts are possible");
                StateDocument::default()
            }
        };

        Self {
            path: Some(path),
            limits,
            state: Mutex::new(state),
        }
    }

    /// A store that never touches the filesystem.
    pub fn in_memory(limits: StoreLimits) -> Self {
        Self {
            path: None,
            limits,
            state: Mutex::new(StateDocument::default()),
        }
    }

    /// Atomically check whether `key` may be sent at `now` and, if so,
    /// record `now` as its send time.
    ///
    /// Concurrent claims of the same key see exactly one `Claimed`. A key
    /// whose window has elapsed is claimed again and its timestamp reset.
    pub fn try_claim(&self, key: &DedupKey, now: DateTime<Utc>, dedupe_window: Duration) -> ClaimOutcome {
        let mut state = self.lock();

        if let Some(&first_sent_at) = state.sent_keys.get(key) {
            if now - first_sent_at < dedupe_window {
                return ClaimOutcome::AlreadyClaimed { first_sent_at };
            }
        }

        let previous = state.sent_keys.insert(key.clone(), now);
        self.prune_locked(&mut state, now, dedupe_window);
        self.persist_locked(&state);

        ClaimOutcome::Claimed { previous }
    }

    /// Undo a claim made at `claimed_at` after the send failed.
    ///
    /// Nothing happens if the entry changed since, e.g. through invalidation.
    pub fn release(&self, key: &DedupKey, claimed_at: DateTime<Utc>, previous: Option<DateTime<Utc>>) {
        let mut state = self.lock();

        if state.sent_keys.get(key) != Some(&claimed_at) {
            return;
        }
        match previous {
            Some(sent_at) => {
                state.sent_keys.insert(key.clone(), sent_at);
            }
            None => {
                state.sent_keys.remove(key);
            }
        }
        self.persist_locked(&state);
    }

    /// Time `key` was last sent, if it is stored.
    pub fn first_sent_at(&self, key: &DedupKey) -> Option<DateTime<Utc>> {
        self.lock().sent_keys.get(key).copied()
    }

    /// Remove every dedup key belonging to `job_uuid`.
    pub fn invalidate_job(&self, job_uuid: &str) -> usize {
        let mut state = self.lock();

        let before = state.sent_keys.len();
        state.sent_keys.retain(|key, _| !key.belongs_to(job_uuid));
        let removed = before - state.sent_keys.len();

        if removed > 0 {
            self.persist_locked(&state);
        }
        removed
    }

    /// Drop expired entries and enforce the key cap.
    pub fn prune(&self, now: DateTime<Utc>, dedupe_window: Duration) -> usize {
        let mut state = self.lock();
        let removed = self.prune_locked(&mut state, now, dedupe_window);
        if removed > 0 {
            self.persist_locked(&state);
        }
        removed
    }

    pub fn key_count(&self) -> usize {
        self.lock().sent_keys.len()
    }

    /// Record a successful cycle for `job_uuid`.
    pub fn record_job_success(&self, job_uuid: &str, now: DateTime<Utc>) -> HealthTransition {
        self.update_job(job_uuid, |health| health.record_success(now))
    }

    /// Record a failed cycle for `job_uuid`.
    pub fn record_job_failure(
        &self,
        job_uuid: &str,
        now: DateTime<Utc>,
        error: &str,
        threshold: u32,
    ) -> HealthTransition {
        self.update_job(job_uuid, |health| health.record_failure(now, error, threshold))
    }

    /// Remember that the "job down" mail for the current degradation was sent.
    pub fn mark_down_notified(&self, job_uuid: &str) {
        self.update_job(job_uuid, |health| health.last_notified_down = true);
    }

    pub fn job_health(&self, job_uuid: &str) -> Option<JobHealth> {
        self.lock().jobs.get(job_uuid).cloned()
    }

    pub fn job_health_snapshot(&self) -> BTreeMap<String, JobHealth> {
        self.lock().jobs.clone()
    }

    /// Write the current state to disk.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let state = self.lock();
        match &self.path {
            Some(path) => write_document(path, &state),
            None => Ok(()),
        }
    }

    fn update_job<T>(&self, job_uuid: &str, f: impl FnOnce(&mut JobHealth) -> T) -> T {
        let mut state = self.lock();
        let result = f(state.jobs.entry(job_uuid.to_string()).or_default());
        self.persist_locked(&state);
        result
    }

    fn prune_locked(&self, state: &mut StateDocument, now: DateTime<Utc>, dedupe_window: Duration) -> usize {
        let before = state.sent_keys.len();
        let retention = self.limits.retention.max(dedupe_window);

        state
            .sent_keys
            .retain(|_, sent_at| now - *sent_at <= retention);

        if state.sent_keys.len() > self.limits.max_keys {
            let mut evictable: Vec<(DateTime<Utc>, DedupKey)> = state
                .sent_keys
                .iter()
                .filter(|(_, sent_at)| now - **sent_at >= dedupe_window)
                .map(|(key, sent_at)| (*sent_at, key.clone()))
                .collect();
            evictable.sort();

            let excess = state.sent_keys.len() - self.limits.max_keys;
            for (_, key) in evictable.into_iter().take(excess) {
                state.sent_keys.remove(&key);
            }
        }

        let removed = before - state.sent_keys.len();
        if removed > 0 {
            debug!(removed, remaining = state.sent_keys.len(), "Pruned alert state");
        }
        removed
    }

    fn persist_locked(&self, state: &StateDocument) {
        let Some(path) = &self.path else {
            return;
        };
        // Every mutation rewrites the full document, so the next one retries.
        if let Err(e) = write_document(path, state) {
            error!(error = %e, "Failed to persist alert state");
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateDocument> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn load_document(path: &Path) -> Result<Option<StateDocument>, PersistenceError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let document: RawStateDocument =
        serde_json::from_str(&raw).map_err(|source| PersistenceError::Serialization {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(Some(document.into()))
}

fn write_document(path: &Path, state: &StateDocument) -> Result<(), PersistenceError> {
    let io_error = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let body = serde_json::to_vec_pretty(state).map_err(|source| PersistenceError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, body).map_err(io_error)?;
    fs::rename(&tmp, path).map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 13, 12, 0, 0).unwrap()
    }

    fn limits() -> StoreLimits {
        StoreLimits {
            retention: Duration::hours(48),
            max_keys: 500,
        }
    }

    fn key(job: &str, offset_hours: i64) -> DedupKey {
        dedup::derive(job, t0() + Duration::hours(offset_hours), ["a@example.com"])
    }

    #[test]
    fn test_claim_window_lifecycle() {
        let store = AlertStateStore::in_memory(limits());
        let window = Duration::hours(24);
        let k = key("job-1", 0);

        assert_eq!(store.try_claim(&k, t0(), window), ClaimOutcome::Claimed { previous: None });
        assert_eq!(
            store.try_claim(&k, t0() + Duration::hours(23), window),
            ClaimOutcome::AlreadyClaimed { first_sent_at: t0() }
        );

        let later = t0() + window + Duration::seconds(1);
        assert_eq!(
            store.try_claim(&k, later, window),
            ClaimOutcome::Claimed { previous: Some(t0()) }
        );
        // Reclaiming resets the window instead of adding an entry.
        assert_eq!(store.first_sent_at(&k), Some(later));
        assert_eq!(store.key_count(), 1);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let store = AlertStateStore::in_memory(limits());
        let window = Duration::hours(24);
        let k = key("job-1", 0);
        store.try_claim(&k, t0(), window);

        assert!(matches!(
            store.try_claim(&k, t0() + window, window),
            ClaimOutcome::Claimed { .. }
        ));
    }

    #[test]
    fn test_release_restores_previous_entry() {
        let store = AlertStateStore::in_memory(limits());
        let window = Duration::hours(24);
        let k = key("job-1", 0);

        let ClaimOutcome::Claimed { previous } = store.try_claim(&k, t0(), window) else {
            panic!("expected claim");
        };
        store.release(&k, t0(), previous);
        assert_eq!(store.first_sent_at(&k), None);

        store.try_claim(&k, t0(), window);
        let later = t0() + Duration::hours(30);
        let ClaimOutcome::Claimed { previous } = store.try_claim(&k, later, window) else {
            panic!("expected claim");
        };
        store.release(&k, later, previous);
        assert_eq!(store.first_sent_at(&k), Some(t0()));
    }

    #[test]
    fn test_concurrent_claims_yield_one_winner() {
        let store = Arc::new(AlertStateStore::in_memory(limits()));
        let k = key("job-1", 0);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let k = k.clone();
                std::thread::spawn(move || store.try_claim(&k, t0(), Duration::hours(24)))
            })
            .collect();

        let claimed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| matches!(outcome, ClaimOutcome::Claimed { .. }))
            .count();

        assert_eq!(claimed, 1);
    }

    #[test]
    fn test_invalidate_job_only_touches_its_keys() {
        let store = AlertStateStore::in_memory(limits());
        let window = Duration::hours(24);
        store.try_claim(&key("job-1", 0), t0(), window);
        store.try_claim(&key("job-1", 5), t0(), window);
        store.try_claim(&key("job-10", 0), t0(), window);

        assert_eq!(store.invalidate_job("job-1"), 2);
        assert_eq!(store.key_count(), 1);
        assert!(matches!(
            store.try_claim(&key("job-1", 0), t0(), window),
            ClaimOutcome::Claimed { .. }
        ));
    }

    #[test]
    fn test_invalidate_job_spares_uuid_extending_it_past_separator() {
        let store = AlertStateStore::in_memory(limits());
        let window = Duration::hours(24);
        store.try_claim(&key("a|b", 0), t0(), window);

        assert_eq!(store.invalidate_job("a"), 0);
        assert_eq!(store.key_count(), 1);
    }

    #[test]
    fn test_prune_drops_only_expired_entries() {
        let store = AlertStateStore::in_memory(limits());
        let window = Duration::hours(24);
        store.try_claim(&key("job-1", 0), t0(), window);
        store.try_claim(&key("job-1", 1), t0() + Duration::hours(40), window);

        let removed = store.prune(t0() + Duration::hours(50), window);

        assert_eq!(removed, 1);
        assert!(store.first_sent_at(&key("job-1", 1)).is_some());
    }

    #[test]
    fn test_cap_never_evicts_active_entries() {
        let store = AlertStateStore::in_memory(StoreLimits {
            retention: Duration::hours(48),
            max_keys: 2,
        });
        let window = Duration::hours(24);
        store.try_claim(&key("job-1", 0), t0(), window);
        store.try_claim(&key("job-1", 1), t0() + Duration::hours(1), window);
        store.try_claim(&key("job-1", 2), t0() + Duration::hours(2), window);

        // Everything is inside its window, so the cap is exceeded.
        assert_eq!(store.key_count(), 3);

        let now = t0() + Duration::hours(25) + Duration::minutes(30);
        store.try_claim(&key("job-1", 3), now, window);

        // Keys 0 and 1 left their windows and are evicted oldest first.
        assert_eq!(store.key_count(), 2);
        assert_eq!(store.first_sent_at(&key("job-1", 0)), None);
        assert_eq!(store.first_sent_at(&key("job-1", 1)), None);
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let window = Duration::hours(24);
        let k = key("job-1", 0);

        {
            let store = AlertStateStore::open(&path, limits());
            store.try_claim(&k, t0(), window);
            store.record_job_failure("job-1", t0(), "timeout", 1);
            store.mark_down_notified("job-1");
        }

        let reopened = AlertStateStore::open(&path, limits());

        assert_eq!(
            reopened.try_claim(&k, t0() + Duration::hours(1), window),
            ClaimOutcome::AlreadyClaimed { first_sent_at: t0() }
        );
        let health = reopened.job_health("job-1").unwrap();
        assert!(health.is_degraded);
        assert!(health.last_notified_down);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_ignores_unknown_fields_and_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{
                "version": 7,
                "sent_keys": {
                    "job-1|aaaa": "2026-02-13T13:00:00+01:00",
                    "job-1|bbbb": "not a timestamp"
                },
                "jobs": { "job-1": { "consecutive_failures": 2, "future_field": true } }
            }"#,
        )
        .unwrap();

        let store = AlertStateStore::open(&path, limits());

        assert_eq!(store.key_count(), 1);
        assert_eq!(
            store.first_sent_at(&DedupKey::from("job-1|aaaa".to_string())),
            Some(t0())
        );
        assert_eq!(store.job_health("job-1").unwrap().consecutive_failures, 2);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let store = AlertStateStore::open(&path, limits());

        assert_eq!(store.key_count(), 0);
        assert!(store.job_health_snapshot().is_empty());
    }

    #[test]
    fn test_unwritable_path_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let store = AlertStateStore::open(blocker.join("state.json"), limits());
        let outcome = store.try_claim(&key("job-1", 0), t0(), Duration::hours(24));

        assert!(matches!(outcome, ClaimOutcome::Claimed { .. }));
        assert!(store.flush().is_err());
    }
}
