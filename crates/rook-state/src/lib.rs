//! Durable per-issue workflow records for Rook.
//!
//! One `IssueRecord` exists per (owner, repo, issue number). The SQLite store is
//! the single source of truth for whether an issue has been seen and which
//! workflow stage it reached.

mod record;
mod sqlite;

pub use record::{ConversationMessage, ConversationRole, IssueRecord, IssueStatus, UsageTotals};
pub use sqlite::IssueStateStore;

use thiserror::Error;

/// Errors returned by the issue state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error("state store lock poisoned")]
    LockPoisoned,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Store result alias.
pub type StoreResult<T> = Result<T, StateStoreError>;
