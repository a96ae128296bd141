//! Workspace record types.
//!
//! The ledger remembers which remediation actions were applied and verified,
//! keyed by idempotency key, so a re-run of the same plan does not call the
//! provisioner again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::planner::ActionKind;

/// Current version of the ledger format.
pub const LEDGER_VERSION: &str = "1.0";

/// File name prefix of archived cycle reports.
pub const REPORT_PREFIX: &str = "drift-report-";

/// Timestamp format embedded in report names.
pub const REPORT_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Maximum ledger entries kept.
pub const MAX_LEDGER_ENTRIES: usize = 1000;

/// Applied-action ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    /// Ledger format version.
    pub version: String,
    /// Entries, oldest first.
    #[serde(default)]
    pub entries: Vec<LedgerEntry>,
    /// When the ledger was last updated.
    pub last_updated: DateTime<Utc>,
}

/// A single applied-and-verified action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Idempotency key of the action.
    pub key: String,
    /// Target resource id.
    pub resource_id: String,
    /// Action kind.
    pub action: ActionKind,
    /// Declared generation the action was planned against.
    pub generation: String,
    /// When the action was verified.
    pub applied_at: DateTime<Utc>,
}

/// An archived cycle report on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedReport {
    /// File name.
    pub name: String,
    /// Full path.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Cycle start time taken from the name, if it follows the naming scheme.
    pub created_at: Option<DateTime<Utc>>,
    /// Collision suffix (`-N`), zero for the first report of a second.
    pub sequence: u32,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: LEDGER_VERSION.to_string(),
            entries: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Returns true if the key was recorded.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    /// Records an entry, replacing any entry with the same key.
    pub fn record(&mut self, entry: LedgerEntry) {
        self.entries.retain(|e| e.key != entry.key);
        if self.entries.len() >= MAX_LEDGER_ENTRIES {
            self.entries.remove(0);
        }
        self.entries.push(entry);
        self.last_updated = Utc::now();
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ArchivedReport {
    /// Describes an archived file, parsing its time and suffix from the name.
    #[must_use]
    pub fn new(name: impl Into<String>, path: PathBuf, size: u64) -> Self {
        let name = name.into();
        let (created_at, sequence) = parse_report_name(&name);
        Self {
            name,
            path,
            size,
            created_at,
            sequence,
        }
    }

    /// Orders reports newest first: by embedded time, then by suffix.
    #[must_use]
    pub fn newest_first(&self, other: &Self) -> std::cmp::Ordering {
        (other.created_at, other.sequence, &other.name)
            .cmp(&(self.created_at, self.sequence, &self.name))
    }
}

/// Splits `drift-report-<time>[-N].json` into its time and suffix.
fn parse_report_name(name: &str) -> (Option<DateTime<Utc>>, u32) {
    let Some(stem) = name
        .strip_prefix(REPORT_PREFIX)
        .and_then(|rest| rest.strip_suffix(".json"))
    else {
        return (None, 0);
    };

    let (stamp, sequence) = match stem.rsplit_once('-') {
        Some((stamp, n)) => n.parse::<u32>().map_or((stem, 0), |n| (stamp, n)),
        None => (stem, 0),
    };

    let created_at = chrono::NaiveDateTime::parse_from_str(stamp, REPORT_TIME_FORMAT)
        .ok()
        .map(|t| t.and_utc());
    (created_at, sequence)
}

impl LedgerEntry {
    /// Creates an entry stamped now.
    #[must_use]
    pub fn new(key: &str, resource_id: &str, action: ActionKind, generation: &str) -> Self {
        Self {
            key: key.to_string(),
            resource_id: resource_id.to_string(),
            action,
            generation: generation.to_string(),
            applied_at: Utc::now(),
        }
    }
}
