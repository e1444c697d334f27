//! Durable SQLite-backed storage for schedule definitions and their
//! execution ledgers.
//!
//! Instants are stored as epoch milliseconds; list fields as JSON arrays.
//! Every write bumps `version`, and updates are guarded by the version the
//! caller read, so concurrent passes cannot both fire one occurrence.

use std::sync::{Mutex, MutexGuard};

use cadence_core::{CadenceError, FiringCommit, Result, ScheduleDefinition, ScheduleStore, TaskType};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

const SCHEDULE_COLUMNS: &str = "id, tenant_id, kind, active, cron_expressions, fixed_times,
    timezone_name, timezone_offset_minutes, occurrences, executed_occurrences,
    execution_count, version, created_at, updated_at";

pub struct SqliteScheduleStore {
    conn: Mutex<Connection>,
}

/// Raw column values, decoded outside the rusqlite row callback.
struct ScheduleRow {
    id: String,
    tenant_id: String,
    kind: String,
    active: bool,
    cron_expressions: String,
    fixed_times: String,
    timezone_name: String,
    timezone_offset_minutes: i32,
    occurrences: String,
    executed_occurrences: String,
    execution_count: i64,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleRow> {
    Ok(ScheduleRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        kind: row.get(2)?,
        active: row.get::<_, i32>(3)? != 0,
        cron_expressions: row.get(4)?,
        fixed_times: row.get(5)?,
        timezone_name: row.get(6)?,
        timezone_offset_minutes: row.get(7)?,
        occurrences: row.get(8)?,
        executed_occurrences: row.get(9)?,
        execution_count: row.get(10)?,
        version: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| CadenceError::Storage(format!("timestamp {ms} out of range")))
}

fn encode_instants(instants: &[DateTime<Utc>]) -> Result<String> {
    let millis: Vec<i64> = instants.iter().map(DateTime::timestamp_millis).collect();
    serde_json::to_string(&millis).map_err(|e| CadenceError::storage("encode instants", e))
}

fn decode_instants(raw: &str) -> Result<Vec<DateTime<Utc>>> {
    let millis: Vec<i64> =
        serde_json::from_str(raw).map_err(|e| CadenceError::storage("decode instants", e))?;
    millis.into_iter().map(millis_to_datetime).collect()
}

impl ScheduleRow {
    fn into_definition(self) -> Result<ScheduleDefinition> {
        let cron_expressions: Vec<String> = serde_json::from_str(&self.cron_expressions)
            .map_err(|e| CadenceError::storage("decode cron expressions", e))?;
        let fixed_times: Vec<NaiveDateTime> = serde_json::from_str(&self.fixed_times)
            .map_err(|e| CadenceError::storage("decode fixed times", e))?;
        Ok(ScheduleDefinition {
            id: self.id,
            tenant_id: self.tenant_id,
            kind: TaskType::new(self.kind),
            active: self.active,
            cron_expressions,
            fixed_times,
            timezone_name: self.timezone_name,
            timezone_offset_minutes: self.timezone_offset_minutes,
            occurrences: decode_instants(&self.occurrences)?,
            executed_occurrences: decode_instants(&self.executed_occurrences)?,
            execution_count: self.execution_count as u64,
            version: self.version as u64,
            created_at: millis_to_datetime(self.created_at)?,
            updated_at: millis_to_datetime(self.updated_at)?,
        })
    }
}

fn conflict(id: &str, expected: u64) -> CadenceError {
    CadenceError::VersionConflict {
        entity: "schedule",
        id: id.to_string(),
        expected,
    }
}

impl SqliteScheduleStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| CadenceError::storage("open schedule store", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| CadenceError::storage("enable WAL", e))?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        info!(path = %db_path, "Schedule store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CadenceError::storage("open in-memory schedule store", e))?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS schedules (
                    id                      TEXT PRIMARY KEY,
                    tenant_id               TEXT NOT NULL,
                    kind                    TEXT NOT NULL,
                    active                  INTEGER NOT NULL DEFAULT 1,
                    cron_expressions        TEXT NOT NULL DEFAULT '[]',
                    fixed_times             TEXT NOT NULL DEFAULT '[]',
                    timezone_name           TEXT NOT NULL DEFAULT 'UTC',
                    timezone_offset_minutes INTEGER NOT NULL DEFAULT 0,
                    occurrences             TEXT NOT NULL DEFAULT '[]',
                    executed_occurrences    TEXT NOT NULL DEFAULT '[]',
                    execution_count         INTEGER NOT NULL DEFAULT 0,
                    version                 INTEGER NOT NULL DEFAULT 1,
                    created_at              INTEGER NOT NULL,
                    updated_at              INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_schedules_tenant_id ON schedules(tenant_id);
                "#,
            )
            .map_err(|e| CadenceError::storage("create schedules table", e))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CadenceError::Storage("schedule store lock poisoned".to_string()))
    }
}

impl ScheduleStore for SqliteScheduleStore {
    fn save(&self, schedule: &ScheduleDefinition) -> Result<u64> {
        let cron_expressions = serde_json::to_string(&schedule.cron_expressions)
            .map_err(|e| CadenceError::storage("encode cron expressions", e))?;
        let fixed_times = serde_json::to_string(&schedule.fixed_times)
            .map_err(|e| CadenceError::storage("encode fixed times", e))?;
        let occurrences = encode_instants(&schedule.occurrences)?;
        let executed = encode_instants(&schedule.executed_occurrences)?;
        let conn = self.conn()?;

        if schedule.version == 0 {
            let inserted = conn.execute(
                r#"INSERT INTO schedules
                   (id, tenant_id, kind, active, cron_expressions, fixed_times, timezone_name,
                    timezone_offset_minutes, occurrences, executed_occurrences, execution_count,
                    version, created_at, updated_at)
                   VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,1,?12,?13)"#,
                params![
                    schedule.id,
                    schedule.tenant_id,
                    schedule.kind.as_str(),
                    schedule.active as i32,
                    cron_expressions,
                    fixed_times,
                    schedule.timezone_name,
                    schedule.timezone_offset_minutes,
                    occurrences,
                    executed,
                    schedule.execution_count as i64,
                    schedule.created_at.timestamp_millis(),
                    schedule.updated_at.timestamp_millis(),
                ],
            );
            return match inserted {
                Ok(_) => {
                    debug!(schedule_id = %schedule.id, "Inserted schedule");
                    Ok(1)
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(conflict(&schedule.id, 0))
                }
                Err(e) => Err(CadenceError::storage("insert schedule", e)),
            };
        }

        let updated = conn
            .execute(
                r#"UPDATE schedules SET
                     tenant_id = ?3, kind = ?4, active = ?5, cron_expressions = ?6,
                     fixed_times = ?7, timezone_name = ?8, timezone_offset_minutes = ?9,
                     occurrences = ?10, executed_occurrences = ?11, execution_count = ?12,
                     version = version + 1, updated_at = ?13
                   WHERE id = ?1 AND version = ?2"#,
                params![
                    schedule.id,
                    schedule.version as i64,
                    schedule.tenant_id,
                    schedule.kind.as_str(),
                    schedule.active as i32,
                    cron_expressions,
                    fixed_times,
                    schedule.timezone_name,
                    schedule.timezone_offset_minutes,
                    occurrences,
                    executed,
                    schedule.execution_count as i64,
                    schedule.updated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| CadenceError::storage("update schedule", e))?;
        if updated == 0 {
            return Err(conflict(&schedule.id, schedule.version));
        }
        Ok(schedule.version + 1)
    }

    fn get(&self, id: &str) -> Result<Option<ScheduleDefinition>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                params![id],
                read_row,
            )
            .optional()
            .map_err(|e| CadenceError::storage("get schedule", e))?;
        row.map(ScheduleRow::into_definition).transpose()
    }

    fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<ScheduleDefinition>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules
                 WHERE tenant_id = ?1 ORDER BY created_at ASC, id ASC"
            ))
            .map_err(|e| CadenceError::storage("prepare schedule listing", e))?;
        let rows = stmt
            .query_map(params![tenant_id], read_row)
            .map_err(|e| CadenceError::storage("list schedules", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CadenceError::storage("read schedule row", e))?;
        rows.into_iter().map(ScheduleRow::into_definition).collect()
    }

    fn tenant_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT tenant_id FROM schedules ORDER BY tenant_id")
            .map_err(|e| CadenceError::storage("prepare tenant listing", e))?;
        let tenants = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| CadenceError::storage("list tenants", e))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| CadenceError::storage("list tenants", e))?;
        Ok(tenants)
    }

    fn commit_firing(&self, commit: &FiringCommit) -> Result<u64> {
        let occurrences = encode_instants(&commit.occurrences)?;
        let executed = encode_instants(&commit.executed_occurrences)?;
        let updated = self
            .conn()?
            .execute(
                r#"UPDATE schedules SET
                     occurrences = ?3, executed_occurrences = ?4, execution_count = ?5,
                     version = version + 1, updated_at = ?6
                   WHERE id = ?1 AND version = ?2"#,
                params![
                    commit.schedule_id,
                    commit.expected_version as i64,
                    occurrences,
                    executed,
                    commit.execution_count as i64,
                    commit.updated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| CadenceError::storage("commit firing", e))?;
        if updated == 0 {
            return Err(conflict(&commit.schedule_id, commit.expected_version));
        }
        Ok(commit.expected_version + 1)
    }

    fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE schedules SET active = ?2, version = version + 1, updated_at = ?3 WHERE id = ?1",
                params![id, active as i32, Utc::now().timestamp_millis()],
            )
            .map_err(|e| CadenceError::storage("set schedule active", e))?;
        Ok(updated > 0)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM schedules WHERE id = ?1", params![id])
            .map_err(|e| CadenceError::storage("delete schedule", e))?;
        Ok(deleted > 0)
    }
}
