//! Local file-based workspace backend.
//!
//! Layout under the workspace directory:
//!
//! ```text
//! .driftguard/
//!   lock.json
//!   ledger.json
//!   reports/drift-report-YYYYmmdd_HHMMSS[-N].json
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{DriftError, Result, StateError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::WorkspaceStore;
use super::types::{ArchivedReport, Ledger};

/// Default workspace directory name.
pub const WORKSPACE_DIR: &str = ".driftguard";

/// Ledger file name.
const LEDGER_FILE: &str = "ledger.json";

/// Lock file name.
const LOCK_FILE: &str = "lock.json";

/// Report directory name.
const REPORTS_DIR: &str = "reports";

/// Local file-based workspace.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    /// Base directory for workspace files.
    base_dir: PathBuf,
}

impl LocalWorkspace {
    /// Creates a workspace rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the workspace directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn lock_path(&self) -> PathBuf {
        self.base_dir.join(LOCK_FILE)
    }

    fn ledger_path(&self) -> PathBuf {
        self.base_dir.join(LEDGER_FILE)
    }

    fn reports_dir(&self) -> PathBuf {
        self.base_dir.join(REPORTS_DIR)
    }

    /// Ensures a directory exists.
    async fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            debug!("Creating workspace directory: {}", dir.display());
            fs::create_dir_all(dir).await.map_err(|e| {
                StateError::write(format!("Failed to create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// Writes a file through a temporary sibling and a rename.
    async fn write_atomic(path: &Path, content: &str) -> Result<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StateError::write(format!("Failed to create {}: {e}", temp_path.display()))
        })?;
        file.write_all(content.as_bytes()).await.map_err(|e| {
            StateError::write(format!("Failed to write {}: {e}", temp_path.display()))
        })?;
        file.sync_all().await.map_err(|e| {
            StateError::write(format!("Failed to sync {}: {e}", temp_path.display()))
        })?;

        fs::rename(&temp_path, path).await.map_err(|e| {
            StateError::write(format!("Failed to rename to {}: {e}", path.display()))
        })?;
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(self.lock_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::Corrupted {
                    message: format!("Failed to read lock file: {e}"),
                }
                .into());
            }
        };

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock file: {e}"),
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path())
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }
                .into());
            }
        };

        file.write_all(content.as_bytes()).await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to write lock file: {e}"),
        })?;
        file.sync_all().await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to sync lock file: {e}"),
        })?;

        Ok(true)
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(self.lock_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            }
            .into()),
        }
    }

    /// Rejects report names that would escape the report directory.
    fn check_report_name(name: &str) -> Result<()> {
        let plain = Path::new(name)
            .file_name()
            .is_some_and(|f| f.to_string_lossy() == name);
        if name.is_empty() || !plain {
            return Err(DriftError::internal(format!("Invalid report name: {name}")));
        }
        Ok(())
    }

    /// Returns a free report path for `name`, adding a numeric suffix on collision.
    fn free_report_path(&self, name: &str) -> PathBuf {
        let dir = self.reports_dir();
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }

        let path = Path::new(name);
        let stem = path
            .file_stem()
            .map_or_else(|| name.to_string(), |s| s.to_string_lossy().to_string());
        let ext = path
            .extension()
            .map_or_else(String::new, |e| format!(".{}", e.to_string_lossy()));

        let mut n = 1u32;
        loop {
            let candidate = dir.join(format!("{stem}-{n}{ext}"));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

#[async_trait]
impl WorkspaceStore for LocalWorkspace {
    async fn acquire_lock(&self, holder: &str, generation: Option<&str>) -> Result<LockInfo> {
        Self::ensure_dir(&self.base_dir).await?;

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        // One takeover attempt for an expired lock; a second collision means
        // another process won the race.
        for _ in 0..2 {
            let lock_info = LockInfo::new(&holder_id, generation);
            if self.create_lock_file(&lock_info).await? {
                info!(
                    "Acquired cycle lock: {} (expires in {}s)",
                    lock_info.lock_id, LOCK_EXPIRY_SECS
                );
                return Ok(lock_info);
            }

            match self.read_lock_file().await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }
                    .into());
                }
                Some(existing) => {
                    warn!("Taking over expired lock held by {}", existing.holder);
                    self.delete_lock_file().await?;
                }
                None => debug!("Lock file vanished, retrying"),
            }
        }

        Err(StateError::LockFailed {
            message: String::from("lock file was recreated concurrently"),
        }
        .into())
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released cycle lock: {lock_id}");
            } else {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }
        Ok(())
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let Some(mut lock) = self.read_lock_file().await?.filter(|l| l.lock_id == lock_id) else {
            return Err(StateError::LockFailed {
                message: format!("lock {lock_id} is no longer held"),
            }
            .into());
        };

        lock.refresh();
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        Self::write_atomic(&self.lock_path(), &content).await?;

        debug!("Refreshed cycle lock {} until {}", lock.lock_id, lock.expires_at);
        Ok(lock)
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = match self.read_lock_file().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Removing unreadable lock file: {e}");
                None
            }
        };
        self.delete_lock_file().await?;
        Ok(existing)
    }

    async fn load_ledger(&self) -> Result<Ledger> {
        let path = self.ledger_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No ledger at {}, starting empty", path.display());
                return Ok(Ledger::new());
            }
            Err(e) => {
                return Err(StateError::Corrupted {
                    message: format!("Failed to read ledger: {e}"),
                }
                .into());
            }
        };

        let ledger = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse ledger: {e}"),
        })?;
        Ok(ledger)
    }

    async fn save_ledger(&self, ledger: &Ledger) -> Result<()> {
        Self::ensure_dir(&self.base_dir).await?;

        let content = serde_json::to_string_pretty(ledger)
            .map_err(|e| StateError::serialization(format!("Failed to serialize ledger: {e}")))?;
        Self::write_atomic(&self.ledger_path(), &content).await?;

        debug!("Ledger saved with {} entries", ledger.len());
        Ok(())
    }

    async fn archive_report(&self, name: &str, content: &str) -> Result<ArchivedReport> {
        Self::check_report_name(name)?;
        Self::ensure_dir(&self.reports_dir()).await?;

        let path = self.free_report_path(name);
        Self::write_atomic(&path, content).await?;

        let name = path
            .file_name()
            .map_or_else(|| name.to_string(), |f| f.to_string_lossy().to_string());
        info!("Archived cycle report: {}", path.display());

        Ok(ArchivedReport::new(name, path, content.len() as u64))
    }

    async fn list_reports(&self) -> Result<Vec<ArchivedReport>> {
        let dir = self.reports_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reports = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let size = entry.metadata().await.map_or(0, |m| m.len());
            let name = entry.file_name().to_string_lossy().to_string();
            reports.push(ArchivedReport::new(name, path, size));
        }

        reports.sort_by(ArchivedReport::newest_first);
        Ok(reports)
    }

    async fn load_report(&self, name: &str) -> Result<String> {
        Self::check_report_name(name)?;
        let path = self.reports_dir().join(name);
        fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                DriftError::internal(format!("Report not found: {name}"))
            } else {
                DriftError::Io(e)
            }
        })
    }

    async fn prune_reports(&self, keep: usize) -> Result<usize> {
        let reports = self.list_reports().await?;
        let mut deleted = 0;

        for report in reports.iter().skip(keep) {
            match fs::remove_file(&report.path).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete old report {}: {e}", report.name),
            }
        }

        if deleted > 0 {
            debug!("Pruned {deleted} old reports");
        }
        Ok(deleted)
    }

    async fn prune_reports_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let reports = self.list_reports().await?;
        let mut deleted = 0;

        for report in reports.iter().filter(|r| r.created_at.is_some_and(|t| t < cutoff)) {
            match fs::remove_file(&report.path).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Failed to delete expired report {}: {e}", report.name),
            }
        }

        if deleted > 0 {
            debug!("Pruned {deleted} reports older than {cutoff}");
        }
        Ok(deleted)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ActionKind;
    use crate::state::LedgerEntry;
    use tempfile::TempDir;

    fn create_test_workspace() -> (LocalWorkspace, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let workspace = LocalWorkspace::new(temp_dir.path().join(WORKSPACE_DIR));
        (workspace, temp_dir)
    }

    #[tokio::test]
    async fn test_ledger_roundtrip() {
        let (workspace, _temp) = create_test_workspace();

        assert!(workspace.load_ledger().await.unwrap().is_empty());

        let mut ledger = Ledger::new();
        ledger.record(LedgerEntry::new("k1", "web-1", ActionKind::Reconfigure, "gen"));
        workspace.save_ledger(&ledger).await.unwrap();

        let loaded = workspace.load_ledger().await.unwrap();
        assert!(loaded.contains("k1"));
        assert!(!workspace.base_dir().join("ledger.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupted_ledger_is_reported() {
        let (workspace, _temp) = create_test_workspace();
        std::fs::create_dir_all(workspace.base_dir()).unwrap();
        std::fs::write(workspace.base_dir().join(LEDGER_FILE), "{ nope").unwrap();

        let err = workspace.load_ledger().await.unwrap_err();
        assert!(matches!(err, DriftError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (workspace, _temp) = create_test_workspace();

        let lock = workspace.acquire_lock("holder-1", Some("gen")).await.unwrap();
        let info = workspace.get_lock_info().await.unwrap().unwrap();
        assert_eq!(info.generation.as_deref(), Some("gen"));

        workspace.release_lock(&lock.lock_id).await.unwrap();
        assert!(workspace.get_lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_live_lock_blocks_any_generation() {
        let (workspace, _temp) = create_test_workspace();

        let _lock = workspace.acquire_lock("holder-1", Some("gen-a")).await.unwrap();
        let err = workspace.acquire_lock("holder-2", Some("gen-b")).await.unwrap_err();

        match err {
            DriftError::State(StateError::LockedByOther { holder, .. }) => {
                assert_eq!(holder, "holder-1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (workspace, _temp) = create_test_workspace();
        std::fs::create_dir_all(workspace.base_dir()).unwrap();

        let mut stale = LockInfo::new("crashed", None);
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        std::fs::write(
            workspace.base_dir().join(LOCK_FILE),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let lock = workspace.acquire_lock("fresh", None).await.unwrap();
        assert_eq!(lock.holder, "fresh");
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let (workspace, _temp) = create_test_workspace();
        workspace.acquire_lock("holder-1", None).await.unwrap();

        let removed = workspace.force_unlock().await.unwrap();
        assert_eq!(removed.unwrap().holder, "holder-1");
        assert!(workspace.get_lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reports_archive_list_prune() {
        let (workspace, _temp) = create_test_workspace();

        workspace.archive_report("drift-report-20260101_000000.json", "{}").await.unwrap();
        workspace.archive_report("drift-report-20260102_000000.json", "{}").await.unwrap();
        let dup = workspace
            .archive_report("drift-report-20260102_000000.json", "{\"a\":1}")
            .await
            .unwrap();
        assert_eq!(dup.name, "drift-report-20260102_000000-1.json");

        let reports = workspace.list_reports().await.unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].name, "drift-report-20260102_000000-1.json");
        assert_eq!(reports[1].name, "drift-report-20260102_000000.json");

        let content = workspace.load_report(&dup.name).await.unwrap();
        assert_eq!(content, "{\"a\":1}");

        assert_eq!(workspace.prune_reports(1).await.unwrap(), 2);
        let kept = workspace.list_reports().await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(workspace.load_report(&kept[0].name).await.unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_prune_reports_before_cutoff() {
        let (workspace, _temp) = create_test_workspace();

        workspace.archive_report("drift-report-20250101_000000.json", "{}").await.unwrap();
        workspace.archive_report("drift-report-20260301_120000.json", "{}").await.unwrap();
        workspace.archive_report("drift-report-manual.json", "{}").await.unwrap();

        let cutoff = chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
            .and_utc();
        assert_eq!(workspace.prune_reports_before(cutoff).await.unwrap(), 1);

        let names: Vec<String> = workspace
            .list_reports()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["drift-report-20260301_120000.json", "drift-report-manual.json"]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_own_lock_alive() {
        let (workspace, _temp) = create_test_workspace();
        let lock = workspace.acquire_lock("holder-1", None).await.unwrap();

        let mut aged = lock.clone();
        aged.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        std::fs::write(workspace.base_dir().join(LOCK_FILE), serde_json::to_string(&aged).unwrap())
            .unwrap();

        let refreshed = workspace.refresh_lock(&lock.lock_id).await.unwrap();
        assert!(!refreshed.is_expired());
        assert!(workspace.acquire_lock("holder-2", None).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_of_lost_lock_fails() {
        let (workspace, _temp) = create_test_workspace();
        let lock = workspace.acquire_lock("holder-1", None).await.unwrap();
        workspace.force_unlock().await.unwrap();
        workspace.acquire_lock("holder-2", None).await.unwrap();

        let err = workspace.refresh_lock(&lock.lock_id).await.unwrap_err();
        assert!(matches!(err, DriftError::State(StateError::LockFailed { .. })));
    }

    #[tokio::test]
    async fn test_report_names_cannot_escape() {
        let (workspace, _temp) = create_test_workspace();
        assert!(workspace.load_report("../ledger.json").await.is_err());
        assert!(workspace.archive_report("", "{}").await.is_err());
    }
}
