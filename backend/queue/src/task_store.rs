use std::sync::{Mutex, MutexGuard};

use cadence_core::{
    AttemptRecord, CadenceError, PendingTask, Result, TaskStatus, TaskStore, TaskType,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

const TASK_COLUMNS: &str = "id, tenant_id, task_type, target_record_id, payload, status,
    retry_count, time_taken_ms, last_error, next_attempt_at, created_at, updated_at";

/// SQLite-backed pending task queue.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

struct TaskRow {
    id: String,
    tenant_id: String,
    task_type: String,
    target_record_id: Option<String>,
    payload: String,
    status: String,
    retry_count: i64,
    time_taken_ms: Option<i64>,
    last_error: Option<String>,
    next_attempt_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        task_type: row.get(2)?,
        target_record_id: row.get(3)?,
        payload: row.get(4)?,
        status: row.get(5)?,
        retry_count: row.get(6)?,
        time_taken_ms: row.get(7)?,
        last_error: row.get(8)?,
        next_attempt_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| CadenceError::Storage(format!("timestamp {ms} out of range")))
}

impl TaskRow {
    fn into_task(self) -> Result<PendingTask> {
        Ok(PendingTask {
            id: self.id,
            tenant_id: self.tenant_id,
            task_type: TaskType::new(self.task_type),
            target_record_id: self.target_record_id,
            payload: serde_json::from_str(&self.payload)
                .map_err(|e| CadenceError::storage("decode task payload", e))?,
            status: self.status.parse()?,
            retry_count: self.retry_count as u32,
            time_taken_ms: self.time_taken_ms.map(|ms| ms as u64),
            last_error: self.last_error,
            next_attempt_at: self.next_attempt_at.map(millis_to_datetime).transpose()?,
            created_at: millis_to_datetime(self.created_at)?,
            updated_at: millis_to_datetime(self.updated_at)?,
        })
    }
}

impl SqliteTaskStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn =
            Connection::open(path).map_err(|e| CadenceError::storage("open task store", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| CadenceError::storage("enable WAL", e))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!(path = %path, "Task store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CadenceError::storage("open in-memory task store", e))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS pending_tasks (
                    id               TEXT PRIMARY KEY,
                    tenant_id        TEXT NOT NULL,
                    task_type        TEXT NOT NULL,
                    target_record_id TEXT,
                    payload          TEXT NOT NULL DEFAULT 'null',
                    status           TEXT NOT NULL,
                    retry_count      INTEGER NOT NULL DEFAULT 0,
                    time_taken_ms    INTEGER,
                    last_error       TEXT,
                    next_attempt_at  INTEGER,
                    created_at       INTEGER NOT NULL,
                    updated_at       INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_pending_tasks_due ON pending_tasks(status, next_attempt_at);
                CREATE INDEX IF NOT EXISTS idx_pending_tasks_tenant ON pending_tasks(tenant_id, created_at);",
            )
            .map_err(|e| CadenceError::storage("create pending_tasks table", e))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CadenceError::Storage("task store lock poisoned".to_string()))
    }

    fn query_tasks(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<PendingTask>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| CadenceError::storage("prepare task query", e))?;
        let rows = stmt
            .query_map(params, read_row)
            .map_err(|e| CadenceError::storage("query tasks", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CadenceError::storage("read task row", e))?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }
}

impl TaskStore for SqliteTaskStore {
    fn insert(&self, task: &PendingTask) -> Result<()> {
        let payload = serde_json::to_string(&task.payload)
            .map_err(|e| CadenceError::storage("encode task payload", e))?;
        self.conn()?
            .execute(
                "INSERT INTO pending_tasks
                 (id, tenant_id, task_type, target_record_id, payload, status, retry_count,
                  time_taken_ms, last_error, next_attempt_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    task.id,
                    task.tenant_id,
                    task.task_type.as_str(),
                    task.target_record_id,
                    payload,
                    task.status.as_str(),
                    task.retry_count,
                    task.time_taken_ms.map(|ms| ms as i64),
                    task.last_error,
                    task.next_attempt_at.map(|t| t.timestamp_millis()),
                    task.created_at.timestamp_millis(),
                    task.updated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| CadenceError::storage("insert task", e))?;
        debug!(task_id = %task.id, task_type = %task.task_type, "Task enqueued");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<PendingTask>> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM pending_tasks WHERE id = ?1"),
                params![id],
                read_row,
            )
            .optional()
            .map_err(|e| CadenceError::storage("get task", e))?;
        row.map(TaskRow::into_task).transpose()
    }

    fn claim(&self, id: &str) -> Result<Option<PendingTask>> {
        let row = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM pending_tasks WHERE id = ?1 AND status = 'pending'"
                ),
                params![id],
                read_row,
            )
            .optional()
            .map_err(|e| CadenceError::storage("claim task", e))?;
        row.map(TaskRow::into_task).transpose()
    }

    fn finish_attempt(&self, record: &AttemptRecord) -> Result<bool> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE pending_tasks SET
                   status = ?3, retry_count = ?4, time_taken_ms = ?5, last_error = ?6,
                   next_attempt_at = ?7, updated_at = ?8
                 WHERE id = ?1 AND status = 'pending' AND retry_count = ?2",
                params![
                    record.task_id,
                    record.expected_retry_count,
                    record.status.as_str(),
                    record.retry_count,
                    record.time_taken_ms as i64,
                    record.last_error,
                    record.next_attempt_at.map(|t| t.timestamp_millis()),
                    record.updated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| CadenceError::storage("finish attempt", e))?;
        Ok(updated > 0)
    }

    fn due_for_retry(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<PendingTask>> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM pending_tasks
                 WHERE status = 'pending' AND next_attempt_at IS NOT NULL AND next_attempt_at <= ?1
                 ORDER BY next_attempt_at ASC, created_at ASC
                 LIMIT ?2"
            ),
            &[&now.timestamp_millis(), &(limit as i64)],
        )
    }

    fn list_for_tenant(
        &self,
        tenant_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<PendingTask>> {
        match status {
            Some(status) => self.query_tasks(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM pending_tasks
                     WHERE tenant_id = ?1 AND status = ?2 ORDER BY created_at ASC"
                ),
                &[&tenant_id, &status.as_str()],
            ),
            None => self.query_tasks(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM pending_tasks
                     WHERE tenant_id = ?1 ORDER BY created_at ASC"
                ),
                &[&tenant_id],
            ),
        }
    }
}
