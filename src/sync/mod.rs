//! Change-log synchronization of keyring replicas.
//!
//! A keyring starts without sync state. Once [`KeyringSync::activate`] has
//! been called, every key-set mutation is recorded in its change log and
//! [`SyncController`] reconciles the log with the replicas sharing the
//! keyring.

mod change_log;
mod controller;

use std::sync::Arc;

use tracing::debug;

pub use change_log::{ChangeLog, ChangeLogEntry, ChangeType, SyncData};
pub use controller::{
    SyncController, SyncMessage, SyncPayload, SyncReport, SyncTransport, TimeWindow,
};

use crate::attributes::AttributeCache;
use crate::error::Result;

/// Sync state of one keyring.
pub struct KeyringSync {
    keyring_id: String,
    attributes: Arc<AttributeCache>,
    data: Option<SyncData>,
}

impl KeyringSync {
    /// Sync state of `keyring_id`; call [`KeyringSync::init`] before use.
    pub fn new(keyring_id: impl Into<String>, attributes: Arc<AttributeCache>) -> Self {
        Self {
            keyring_id: keyring_id.into(),
            attributes,
            data: None,
        }
    }

    /// Load persisted sync state.
    pub async fn init(&mut self) {
        self.data = self.attributes.get(&self.keyring_id).await.sync_data;
    }

    /// Whether mutations are being recorded.
    pub fn is_active(&self) -> bool {
        self.data.is_some()
    }

    /// Start recording mutations. Activating twice keeps the existing log.
    pub async fn activate(&mut self) -> Result<()> {
        if self.data.is_none() {
            self.data = Some(SyncData::default());
            self.save().await?;
            debug!(keyring = %self.keyring_id, "sync activated");
        }
        Ok(())
    }

    /// Record a local mutation of `fingerprint` and persist it.
    ///
    /// Does nothing while sync is inactive.
    pub async fn add(&mut self, fingerprint: &str, change_type: ChangeType) -> Result<()> {
        let Some(data) = self.data.as_mut() else {
            return Ok(());
        };
        data.change_log
            .record(ChangeLogEntry::now(fingerprint, change_type));
        data.modified = true;
        debug!(keyring = %self.keyring_id, fingerprint = %fingerprint, ?change_type, "change logged");
        self.save().await
    }

    /// Merge a remote change log. Returns whether the local log changed.
    pub fn merge(&mut self, remote: &ChangeLog) -> bool {
        match self.data.as_mut() {
            Some(data) => data.change_log.merge(remote),
            None => false,
        }
    }

    /// Fingerprints whose latest entry is a delete.
    pub fn get_delete_entries(&self) -> Vec<String> {
        self.data
            .as_ref()
            .map(|d| d.change_log.delete_entries())
            .unwrap_or_default()
    }

    pub fn change_log(&self) -> Option<&ChangeLog> {
        self.data.as_ref().map(|d| &d.change_log)
    }

    pub fn etag(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.etag.as_deref())
    }

    pub fn set_etag(&mut self, etag: Option<String>) {
        if let Some(data) = self.data.as_mut() {
            data.etag = etag;
        }
    }

    /// Whether local changes wait for upload.
    pub fn is_modified(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.modified)
    }

    pub(crate) fn set_modified(&mut self, modified: bool) {
        if let Some(data) = self.data.as_mut() {
            data.modified = modified;
        }
    }

    /// Persist the sync state into the keyring attributes.
    pub async fn save(&self) -> Result<()> {
        let data = self.data.clone();
        self.attributes
            .update(&self.keyring_id, move |a| a.sync_data = data)
            .await?;
        Ok(())
    }
}
