//! SQLite-backed issue record store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{IssueRecord, IssueStatus, StateStoreError, StoreResult, UsageTotals};

const RECORD_COLUMNS: &str = "id, owner, repo, issue_number, status, branch_name, \
     pull_request_number, conversation_json, input_tokens, output_tokens, cost_usd, \
     created_at, updated_at, completed_at";

/// Persistent store of issue workflow records.
#[derive(Debug)]
pub struct IssueStateStore {
    connection: Mutex<Connection>,
}

impl IssueStateStore {
    /// Opens (or creates) the database at `path` and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let connection = Connection::open(path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Self::from_connection(connection)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> StoreResult<Self> {
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| StateStoreError::LockPoisoned)
    }

    pub fn get(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
    ) -> StoreResult<Option<IssueRecord>> {
        let connection = self.lock()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM issue_records \
             WHERE owner = ?1 AND repo = ?2 AND issue_number = ?3"
        );
        let raw = connection
            .query_row(
                &sql,
                params![owner, repo, issue_number_to_db(issue_number)?],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// Upserts by (owner, repo, issue number) and returns the stored row.
    ///
    /// `updated_at` is always stamped with the save time; `completed_at` is
    /// stamped the first time the record is saved as completed.
    pub fn save(&self, record: &IssueRecord) -> StoreResult<IssueRecord> {
        let now = Utc::now().trunc_subsecs(6);
        let completed_at = match (record.status, record.completed_at) {
            (_, Some(completed_at)) => Some(completed_at),
            (IssueStatus::Completed, None) => Some(now),
            _ => None,
        };
        let conversation_json = serde_json::to_string(&record.conversation)?;
        let pull_request_number = record
            .pull_request_number
            .map(issue_number_to_db)
            .transpose()?;

        let connection = self.lock()?;
        connection.execute(
            r#"
            INSERT INTO issue_records (
                owner, repo, issue_number, status, branch_name, pull_request_number,
                conversation_json, input_tokens, output_tokens, cost_usd,
                created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(owner, repo, issue_number) DO UPDATE SET
                status = excluded.status,
                branch_name = excluded.branch_name,
                pull_request_number = excluded.pull_request_number,
                conversation_json = excluded.conversation_json,
                input_tokens = excluded.input_tokens,
                output_tokens = excluded.output_tokens,
                cost_usd = excluded.cost_usd,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at
            "#,
            params![
                record.owner,
                record.repo,
                issue_number_to_db(record.issue_number)?,
                record.status.as_str(),
                record.branch_name,
                pull_request_number,
                conversation_json,
                counter_to_db("input_tokens", record.usage.input_tokens)?,
                counter_to_db("output_tokens", record.usage.output_tokens)?,
                record.usage.cost_usd,
                timestamp_to_db(record.created_at.trunc_subsecs(6)),
                timestamp_to_db(now),
                completed_at.map(timestamp_to_db),
            ],
        )?;

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM issue_records \
             WHERE owner = ?1 AND repo = ?2 AND issue_number = ?3"
        );
        let raw = connection.query_row(
            &sql,
            params![
                record.owner,
                record.repo,
                issue_number_to_db(record.issue_number)?
            ],
            RawRecord::from_row,
        )?;
        raw.into_record()
    }

    /// Removes one record. Returns whether a row existed.
    pub fn delete(&self, owner: &str, repo: &str, issue_number: u64) -> StoreResult<bool> {
        let connection = self.lock()?;
        let removed = connection.execute(
            "DELETE FROM issue_records WHERE owner = ?1 AND repo = ?2 AND issue_number = ?3",
            params![owner, repo, issue_number_to_db(issue_number)?],
        )?;
        Ok(removed > 0)
    }

    /// All records, newest created first.
    pub fn list_all(&self) -> StoreResult<Vec<IssueRecord>> {
        let connection = self.lock()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM issue_records ORDER BY created_at DESC, id DESC"
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map([], RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS issue_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            repo TEXT NOT NULL,
            issue_number INTEGER NOT NULL,
            status TEXT NOT NULL,
            branch_name TEXT NULL,
            pull_request_number INTEGER NULL,
            conversation_json TEXT NOT NULL,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT NULL,
            UNIQUE(owner, repo, issue_number)
        );

        CREATE INDEX IF NOT EXISTS idx_issue_records_created ON issue_records (created_at);
        "#,
    )?;
    Ok(())
}

struct RawRecord {
    id: i64,
    owner: String,
    repo: String,
    issue_number: i64,
    status: String,
    branch_name: Option<String>,
    pull_request_number: Option<i64>,
    conversation_json: String,
    input_tokens: i64,
    output_tokens: i64,
    cost_usd: f64,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            repo: row.get(2)?,
            issue_number: row.get(3)?,
            status: row.get(4)?,
            branch_name: row.get(5)?,
            pull_request_number: row.get(6)?,
            conversation_json: row.get(7)?,
            input_tokens: row.get(8)?,
            output_tokens: row.get(9)?,
            cost_usd: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            completed_at: row.get(13)?,
        })
    }

    fn into_record(self) -> StoreResult<IssueRecord> {
        Ok(IssueRecord {
            id: Some(self.id),
            owner: self.owner,
            repo: self.repo,
            issue_number: counter_from_db("issue_number", self.issue_number)?,
            status: self.status.parse()?,
            branch_name: self.branch_name,
            pull_request_number: self
                .pull_request_number
                .map(|value| counter_from_db("pull_request_number", value))
                .transpose()?,
            conversation: serde_json::from_str(&self.conversation_json)?,
            usage: UsageTotals {
                input_tokens: counter_from_db("input_tokens", self.input_tokens)?,
                output_tokens: counter_from_db("output_tokens", self.output_tokens)?,
                cost_usd: self.cost_usd,
            },
            created_at: timestamp_from_db(&self.created_at)?,
            updated_at: timestamp_from_db(&self.updated_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(timestamp_from_db)
                .transpose()?,
        })
    }
}

fn issue_number_to_db(value: u64) -> StoreResult<i64> {
    counter_to_db("issue_number", value)
}

fn counter_to_db(field: &'static str, value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StateStoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn counter_from_db(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StateStoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
