//! Workspace store trait definition.
//!
//! This module defines the common interface for workspace backends: the
//! cycle lock, the applied-action ledger and the cycle report archive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use super::lock::LockInfo;
use super::types::{ArchivedReport, Ledger};

/// Trait for workspace backends.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Acquires the cycle lock.
    ///
    /// An expired lock is taken over. `generation` is recorded in the lock
    /// for diagnostics only.
    async fn acquire_lock(&self, holder: &str, generation: Option<&str>) -> Result<LockInfo>;

    /// Releases the cycle lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Extends the expiry of the lock `lock_id` still owns.
    ///
    /// Fails with `StateError::LockFailed` if the lock was lost.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Gets current lock information if a lock file exists.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Removes the lock regardless of its holder.
    ///
    /// Returns the removed lock, if any.
    async fn force_unlock(&self) -> Result<Option<LockInfo>>;

    /// Loads the applied-action ledger, empty if none exists yet.
    async fn load_ledger(&self) -> Result<Ledger>;

    /// Saves the applied-action ledger.
    async fn save_ledger(&self, ledger: &Ledger) -> Result<()>;

    /// Archives a serialized cycle report under `name`.
    ///
    /// A suffix is added if the name is already taken.
    async fn archive_report(&self, name: &str, content: &str) -> Result<ArchivedReport>;

    /// Lists archived reports, newest first.
    async fn list_reports(&self) -> Result<Vec<ArchivedReport>>;

    /// Loads an archived report by file name.
    async fn load_report(&self, name: &str) -> Result<String>;

    /// Deletes all but the newest `keep` reports. Returns the number deleted.
    async fn prune_reports(&self, keep: usize) -> Result<usize>;

    /// Deletes reports created before `cutoff`. Returns the number deleted.
    ///
    /// Reports whose name carries no timestamp are kept.
    async fn prune_reports_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl WorkspaceStore for Box<dyn WorkspaceStore> {
    async fn acquire_lock(&self, holder: &str, generation: Option<&str>) -> Result<LockInfo> {
        (**self).acquire_lock(holder, generation).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        (**self).refresh_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        (**self).force_unlock().await
    }

    async fn load_ledger(&self) -> Result<Ledger> {
        (**self).load_ledger().await
    }

    async fn save_ledger(&self, ledger: &Ledger) -> Result<()> {
        (**self).save_ledger(ledger).await
    }

    async fn archive_report(&self, name: &str, content: &str) -> Result<ArchivedReport> {
        (**self).archive_report(name, content).await
    }

    async fn list_reports(&self) -> Result<Vec<ArchivedReport>> {
        (**self).list_reports().await
    }

    async fn load_report(&self, name: &str) -> Result<String> {
        (**self).load_report(name).await
    }

    async fn prune_reports(&self, keep: usize) -> Result<usize> {
        (**self).prune_reports(keep).await
    }

    async fn prune_reports_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        (**self).prune_reports_before(cutoff).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
