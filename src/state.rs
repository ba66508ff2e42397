//! Durable sync checkpoint.
//!
//! A small record persisted after every unit of progress so an interrupted
//! run resumes instead of re-downloading everything. Loading never fails:
//! an absent or unreadable state file simply means a fresh start.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

pub const STATE_FILE_NAME: &str = ".sync-state.json";

/// Diagnostics only; capped so the state file stays small across months of
/// scheduled runs.
const FAILED_ATTEMPT_CAP: usize = 50;

/// The process-wide checkpoint record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncState {
    /// Timestamp of the last successful checkpoint.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Opaque pagination token, present only while a cursor walk is
    /// unfinished. Cleared when the walk completes.
    pub last_cursor: Option<String>,
    /// Dates confirmed to hold zero remote records, so they are not
    /// needlessly re-queried. A `BTreeSet` serializes as a sorted list.
    pub empty_days: BTreeSet<NaiveDate>,
    /// Append-only failure log.
    pub failed_attempts: Vec<FailedAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub at: DateTime<Utc>,
    /// The cursor or date the failing request was scoped to.
    pub scope: String,
    pub error: String,
}

impl SyncState {
    pub fn record_failure(&mut self, scope: impl Into<String>, error: &ExportError) {
        self.failed_attempts.push(FailedAttempt {
            at: Utc::now(),
            scope: scope.into(),
            error: error.to_string(),
        });
        if self.failed_attempts.len() > FAILED_ATTEMPT_CAP {
            let excess = self.failed_attempts.len() - FAILED_ATTEMPT_CAP;
            self.failed_attempts.drain(..excess);
        }
    }

    pub fn mark_empty(&mut self, date: NaiveDate) {
        self.empty_days.insert(date);
    }

    pub fn clear_empty(&mut self, date: NaiveDate) {
        self.empty_days.remove(&date);
    }

    pub fn is_empty_day(&self, date: NaiveDate) -> bool {
        self.empty_days.contains(&date)
    }
}

/// Durable checkpoint storage. File-backed by default; alternate backends
/// (embedded DB, object storage) implement the same surface.
pub trait StateStore {
    /// Never fails: absent or corrupt storage yields the default state.
    fn load(&self) -> SyncState;
    /// Best-effort; the caller decides how loudly to treat a failure.
    fn save(&self, state: &SyncState) -> Result<()>;
}

/// State store backed by a single JSON file in the archive directory.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(archive_dir: &Path) -> Self {
        Self {
            path: archive_dir.join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> SyncState {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => SyncState::default(),
        }
    }

    fn save(&self, state: &SyncState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|err| ExportError::State(err.to_string()))?;
        // Write-then-rename: a crash mid-save must not truncate the
        // previous checkpoint.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|err| {
            ExportError::State(format!("{}: {err}", tmp.display()))
        })?;
        fs::rename(&tmp, &self.path).map_err(|err| {
            ExportError::State(format!("{}: {err}", self.path.display()))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day(text: &str) -> NaiveDate {
        text.parse().unwrap()
    }

    #[test]
    fn missing_file_loads_default_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path());
        assert_eq!(store.load(), SyncState::default());
    }

    #[test]
    fn corrupt_file_loads_default_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path());
        fs::write(store.path(), "not json {").unwrap();
        assert_eq!(store.load(), SyncState::default());
    }

    #[test]
    fn save_round_trips_and_replaces_prior_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path());

        let mut state = SyncState::default();
        state.last_sync_time = Some("2024-03-01T12:00:00Z".parse().unwrap());
        state.last_cursor = Some("cursor-9".into());
        state.mark_empty(day("2024-02-27"));
        state.mark_empty(day("2024-02-26"));
        store.save(&state).unwrap();

        assert_eq!(store.load(), state);

        state.clear_empty(day("2024-02-27"));
        store.save(&state).unwrap();
        assert_eq!(store.load(), state);

        // No temp file left behind.
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![STATE_FILE_NAME.to_string()]);
    }

    #[test]
    fn empty_days_serialize_as_a_sorted_list() {
        let mut state = SyncState::default();
        state.mark_empty(day("2024-03-02"));
        state.mark_empty(day("2024-03-01"));
        let value: serde_json::Value =
            serde_json::to_value(&state).unwrap();
        assert_eq!(
            value["empty_days"],
            serde_json::json!(["2024-03-01", "2024-03-02"])
        );
    }

    #[test]
    fn failure_log_is_capped() {
        let mut state = SyncState::default();
        for i in 0..(FAILED_ATTEMPT_CAP + 10) {
            state.record_failure(
                format!("cursor-{i}"),
                &ExportError::Protocol("bad shape".into()),
            );
        }
        assert_eq!(state.failed_attempts.len(), FAILED_ATTEMPT_CAP);
        // Oldest entries were dropped.
        assert_eq!(state.failed_attempts[0].scope, "cursor-10");
    }
}
