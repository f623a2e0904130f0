//! SqliteTaskStore - SQLite による永続 TaskStore
//!
//! # 設計
//! - `tokio_rusqlite::Connection` で専用スレッドに SQLite 操作を逃がす
//! - journal_mode=WAL, synchronous=FULL（コミット完了 = ディスクに到達）
//! - revision は `meta` テーブルの 1 行で管理し、書き込みと同じトランザクションで進める
//! - 時刻は UTC epoch ミリ秒（INTEGER）で保存

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, Transaction, params};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::domain::{DeadLetterEntry, TaskId, TaskRecord, TaskState, TaskType};
use crate::ports::{ScanFilter, StoreError, TaskStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    task_type TEXT NOT NULL,
    queue TEXT NOT NULL,
    message BLOB NOT NULL,
    state TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    next_run_at INTEGER,
    active_since INTEGER,
    completed_at INTEGER,
    revision INTEGER NOT NULL
);

-- Scheduler rebuild: waiting tasks by due time, FIFO on ties
CREATE INDEX IF NOT EXISTS idx_tasks_state_next_run ON tasks(state, next_run_at, revision);
-- Router rebuild and admission counts
CREATE INDEX IF NOT EXISTS idx_tasks_queue_state ON tasks(queue, state, revision);

CREATE TABLE IF NOT EXISTS dead_letters (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL UNIQUE,
    error TEXT NOT NULL,
    failed_at INTEGER NOT NULL,
    snapshot TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO meta (key, value) VALUES ('revision', 0);
"#;

const COLUMNS: &str = "id, task_type, queue, message, state, retry_count, max_retries, \
     last_error, created_at, updated_at, next_run_at, active_since, completed_at, revision";

pub struct SqliteTaskStore {
    conn: Connection,
}

impl SqliteTaskStore {
    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "opening sqlite task store");
        let conn = Connection::open(path).await.map_err(store_error)?;
        Self::init(conn).await
    }

    /// A private in-memory database; nothing survives the process.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(store_error)?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        let journal_mode = conn
            .call(|conn| {
                let mode: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                conn.pragma_update(None, "synchronous", "FULL")?;
                conn.busy_timeout(std::time::Duration::from_secs(5))?;
                conn.execute_batch(SCHEMA)?;
                Ok(mode)
            })
            .await
            .map_err(store_error)?;
        debug!(%journal_mode, "sqlite schema ready");
        Ok(Self { conn })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn put(&self, record: TaskRecord) -> Result<TaskRecord, StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut record = record;
                record.revision = bump_revision(&tx)?;
                record.next_run_at = record.next_run_at.map(ceil_millis);
                tx.execute(
                    &format!(
                        "INSERT OR REPLACE INTO tasks ({COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                    ),
                    params![
                        record.id.to_key(),
                        record.task_type.as_str(),
                        record.queue,
                        record.message,
                        record.state.as_str(),
                        record.retry_count,
                        record.max_retries,
                        record.last_error,
                        millis(record.created_at),
                        millis(record.updated_at),
                        record.next_run_at.map(millis),
                        record.active_since.map(millis),
                        record.completed_at.map(millis),
                        to_sql_revision(record.revision),
                    ],
                )?;
                tx.commit()?;
                Ok(record)
            })
            .await
            .map_err(store_error)
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let raw = self
            .conn
            .call(move |conn| {
                let raw = conn
                    .query_row(
                        &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"),
                        [id.to_key()],
                        RawTask::from_row,
                    )
                    .optional()?;
                Ok(raw)
            })
            .await
            .map_err(store_error)?;
        raw.map(RawTask::into_record).transpose()
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        self.conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM tasks WHERE id = ?1", [id.to_key()])?;
                Ok(n > 0)
            })
            .await
            .map_err(store_error)
    }

    async fn scan(&self, filter: ScanFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let raws = self
            .conn
            .call(move |conn| {
                let limit = filter
                    .limit
                    .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
                    .unwrap_or(-1);
                // NULL sorts first in ascending order.
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM tasks \
                     WHERE (?1 IS NULL OR state = ?1) AND (?2 IS NULL OR queue = ?2) \
                     ORDER BY next_run_at, revision LIMIT ?3"
                ))?;
                let rows = stmt.query_map(
                    params![filter.state.map(TaskState::as_str), filter.queue, limit],
                    RawTask::from_row,
                )?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(store_error)?;
        raws.into_iter().map(RawTask::into_record).collect()
    }

    async fn compare_and_set(
        &self,
        current: &TaskRecord,
        next: TaskRecord,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let expected = to_sql_revision(current.revision);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let stored = swap(&tx, expected, next)?;
                if stored.is_some() {
                    tx.commit()?;
                }
                Ok(stored)
            })
            .await
            .map_err(store_error)
    }

    async fn dead_letter(
        &self,
        current: &TaskRecord,
        next: TaskRecord,
        entry: DeadLetterEntry,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let expected = to_sql_revision(current.revision);
        let snapshot = serde_json::to_string(&entry.task)
            .map_err(|e| StoreError::Corrupt(format!("dead-letter snapshot: {e}")))?;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(stored) = swap(&tx, expected, next)? else {
                    return Ok(None);
                };
                tx.execute(
                    "INSERT OR IGNORE INTO dead_letters (task_id, error, failed_at, snapshot) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        entry.task_id().to_key(),
                        entry.error,
                        millis(entry.failed_at),
                        snapshot
                    ],
                )?;
                tx.commit()?;
                Ok(Some(stored))
            })
            .await
            .map_err(store_error)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT error, failed_at, snapshot FROM dead_letters ORDER BY seq DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(store_error)?;

        rows.into_iter()
            .map(|(error, failed_at, snapshot)| {
                let task: TaskRecord = serde_json::from_str(&snapshot)
                    .map_err(|e| StoreError::Corrupt(format!("dead-letter snapshot: {e}")))?;
                Ok(DeadLetterEntry::new(task, error, from_millis(failed_at)?))
            })
            .collect()
    }

    async fn count(&self, queue: &str, states: &[TaskState]) -> Result<usize, StoreError> {
        let queue = queue.to_string();
        let states: Vec<&'static str> = states.iter().map(|state| state.as_str()).collect();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare_cached("SELECT COUNT(*) FROM tasks WHERE queue = ?1 AND state = ?2")?;
                let mut total = 0usize;
                for state in states {
                    let n: i64 = stmt.query_row(params![queue, state], |row| row.get(0))?;
                    total += usize::try_from(n).unwrap_or(0);
                }
                Ok(total)
            })
            .await
            .map_err(store_error)
    }

    async fn purge_completed(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = millis(before);
        self.conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM tasks WHERE state = ?1 AND completed_at < ?2",
                    params![TaskState::Completed.as_str(), before],
                )?;
                Ok(n)
            })
            .await
            .map_err(store_error)
    }
}

/// Advance the global revision counter inside `tx`.
fn bump_revision(tx: &Transaction<'_>) -> rusqlite::Result<u64> {
    let value: i64 = tx.query_row(
        "UPDATE meta SET value = value + 1 WHERE key = 'revision' RETURNING value",
        [],
        |row| row.get(0),
    )?;
    Ok(value as u64)
}

/// Overwrite `next.id` iff its stored revision is `expected`.
fn swap(
    tx: &Transaction<'_>,
    expected: i64,
    mut next: TaskRecord,
) -> rusqlite::Result<Option<TaskRecord>> {
    next.revision = bump_revision(tx)?;
    next.next_run_at = next.next_run_at.map(ceil_millis);
    let changed = tx.execute(
        "UPDATE tasks SET task_type = ?2, queue = ?3, message = ?4, state = ?5, \
         retry_count = ?6, max_retries = ?7, last_error = ?8, created_at = ?9, \
         updated_at = ?10, next_run_at = ?11, active_since = ?12, completed_at = ?13, \
         revision = ?14 \
         WHERE id = ?1 AND revision = ?15",
        params![
            next.id.to_key(),
            next.task_type.as_str(),
            next.queue,
            next.message,
            next.state.as_str(),
            next.retry_count,
            next.max_retries,
            next.last_error,
            millis(next.created_at),
            millis(next.updated_at),
            next.next_run_at.map(millis),
            next.active_since.map(millis),
            next.completed_at.map(millis),
            to_sql_revision(next.revision),
            expected,
        ],
    )?;
    // On a miss the caller drops `tx`, which rolls the revision bump back.
    Ok((changed == 1).then_some(next))
}

/// Row image before validation.
struct RawTask {
    id: String,
    task_type: String,
    queue: String,
    message: Vec<u8>,
    state: String,
    retry_count: u32,
    max_retries: u32,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
    next_run_at: Option<i64>,
    active_since: Option<i64>,
    completed_at: Option<i64>,
    revision: i64,
}

impl RawTask {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_type: row.get(1)?,
            queue: row.get(2)?,
            message: row.get(3)?,
            state: row.get(4)?,
            retry_count: row.get(5)?,
            max_retries: row.get(6)?,
            last_error: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            next_run_at: row.get(10)?,
            active_since: row.get(11)?,
            completed_at: row.get(12)?,
            revision: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord, StoreError> {
        let id = TaskId::from_str(&self.id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let state = TaskState::from_str(&self.state)
            .map_err(|e| StoreError::Corrupt(format!("task {id}: {e}")))?;
        Ok(TaskRecord {
            id,
            task_type: TaskType::new(self.task_type),
            queue: self.queue,
            message: self.message,
            state,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            last_error: self.last_error,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            next_run_at: self.next_run_at.map(from_millis).transpose()?,
            active_since: self.active_since.map(from_millis).transpose()?,
            completed_at: self.completed_at.map(from_millis).transpose()?,
            revision: self.revision as u64,
        })
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Run times round up to whole milliseconds so a task is never due earlier
/// than requested once stored.
fn ceil_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let rem = at.timestamp_subsec_nanos() % 1_000_000;
    if rem == 0 {
        return at;
    }
    at.checked_add_signed(chrono::Duration::nanoseconds(i64::from(1_000_000 - rem)))
        .unwrap_or(at)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn to_sql_revision(revision: u64) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

fn store_error(err: tokio_rusqlite::Error) -> StoreError {
    match err {
        tokio_rusqlite::Error::Other(inner) => match inner.downcast::<StoreError>() {
            Ok(store) => *store,
            Err(other) => StoreError::Unavailable(other.to_string()),
        },
        other => StoreError::Unavailable(other.to_string()),
    }
}
