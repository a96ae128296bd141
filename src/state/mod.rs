//! Workspace state for the drift engine.
//!
//! This module persists what must survive between cycles: the cycle lock,
//! the ledger of applied remediation actions and the archived cycle reports.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalWorkspace, WORKSPACE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use store::WorkspaceStore;
pub use types::{
    ArchivedReport, Ledger, LedgerEntry, LEDGER_VERSION, MAX_LEDGER_ENTRIES, REPORT_PREFIX,
    REPORT_TIME_FORMAT,
};
