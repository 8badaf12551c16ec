//! Change log of key-set mutations and its last-writer-wins merge.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Kind of a key-set mutation.
///
/// The declaration order is the tie-break order of [`ChangeLog::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// Latest mutation of one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub fingerprint: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Unix time in milliseconds
    pub time: i64,
}

impl ChangeLogEntry {
    /// Entry stamped with the current wall-clock time.
    pub fn now(fingerprint: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            change_type,
            time: Utc::now().timestamp_millis(),
        }
    }

    /// Whether this entry replaces `other` in a merge.
    fn supersedes(&self, other: &ChangeLogEntry) -> bool {
        (self.time, self.change_type) >= (other.time, other.change_type)
    }
}

/// Per-fingerprint change log, ordered by fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeLog(BTreeMap<String, ChangeLogEntry>);

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `entry`, replacing whatever was logged for its fingerprint.
    pub fn record(&mut self, entry: ChangeLogEntry) {
        self.0.insert(entry.fingerprint.clone(), entry);
    }

    pub fn get(&self, fingerprint: &str) -> Option<&ChangeLogEntry> {
        self.0.get(fingerprint)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ChangeLogEntry> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge a remote log into this one.
    ///
    /// Per fingerprint the remote entry wins when it is newer or equally
    /// new; at equal times the greater change type wins, so the result does
    /// not depend on merge order. Entries only present locally are kept.
    ///
    /// Returns whether anything changed.
    pub fn merge(&mut self, remote: &ChangeLog) -> bool {
        let mut changed = false;
        for (fingerprint, theirs) in &remote.0 {
            let take = match self.0.get(fingerprint) {
                None => true,
                Some(ours) => ours != theirs && theirs.supersedes(ours),
            };
            if take {
                self.0.insert(fingerprint.clone(), theirs.clone());
                changed = true;
            }
        }
        changed
    }

    /// Fingerprints whose latest entry is a delete.
    pub fn delete_entries(&self) -> Vec<String> {
        self.fingerprints_with(|t| t == ChangeType::Delete)
    }

    /// Fingerprints whose latest entry is an insert or update.
    pub fn present_entries(&self) -> Vec<String> {
        self.fingerprints_with(|t| t != ChangeType::Delete)
    }

    /// Oldest and newest entry time, if the log is not empty.
    pub fn time_span(&self) -> Option<(i64, i64)> {
        let min = self.0.values().map(|e| e.time).min()?;
        let max = self.0.values().map(|e| e.time).max()?;
        Some((min, max))
    }

    fn fingerprints_with(&self, f: impl Fn(ChangeType) -> bool) -> Vec<String> {
        self.0
            .values()
            .filter(|e| f(e.change_type))
            .map(|e| e.fingerprint.clone())
            .collect()
    }
}

impl FromIterator<ChangeLogEntry> for ChangeLog {
    fn from_iter<I: IntoIterator<Item = ChangeLogEntry>>(iter: I) -> Self {
        let mut log = ChangeLog::new();
        for entry in iter {
            log.record(entry);
        }
        log
    }
}

/// Persisted sync state of a keyring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    /// Version tag of the last downloaded or uploaded sync message
    #[serde(rename = "eTag", default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub change_log: ChangeLog,
    /// Local changes not uploaded yet
    #[serde(default)]
    pub modified: bool,
}
