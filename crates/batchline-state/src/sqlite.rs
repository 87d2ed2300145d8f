//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use batchline_types::state::{
    ErrorRecordRow, OffsetRecord, PipelineId, Revision, RunStats, RunStatus,
};
use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS source_offsets (
    pipeline TEXT NOT NULL,
    revision TEXT NOT NULL,
    source_offset TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (pipeline, revision)
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    revision TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    batches INTEGER DEFAULT 0,
    input_records INTEGER DEFAULT 0,
    output_records INTEGER DEFAULT 0,
    error_records INTEGER DEFAULT 0,
    error_messages INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS error_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    run_id INTEGER NOT NULL REFERENCES pipeline_runs(id),
    stage_name TEXT NOT NULL,
    record_json TEXT NOT NULL,
    error_code TEXT NOT NULL,
    error_message TEXT NOT NULL,
    failed_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_error_records_pipeline_run ON error_records (pipeline, run_id);
";

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend. State is lost with the process.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    /// Convert an ISO-8601 string to `SQLite` datetime format.
    fn iso8601_to_sqlite(iso: &str) -> String {
        chrono::DateTime::parse_from_rfc3339(iso).map_or_else(
            |_| iso.to_string(),
            |dt| dt.format(SQLITE_DATETIME_FMT).to_string(),
        )
    }

    #[cfg(test)]
    fn get_run_row(
        &self,
        run_id: i64,
    ) -> error::Result<(String, i64, i64, Option<String>, Option<String>)> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT status, batches, input_records, finished_at, error_message \
             FROM pipeline_runs WHERE id = ?1",
            [run_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .map_err(StateError::backend)
    }

    #[cfg(test)]
    fn count_error_records_for_run(&self, pipeline: &PipelineId, run_id: i64) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM error_records WHERE pipeline = ?1 AND run_id = ?2",
            rusqlite::params![pipeline.as_str(), run_id],
            |row| row.get(0),
        )
        .map_err(StateError::backend)
    }

    #[cfg(test)]
    fn first_error_stage_and_code(&self, pipeline: &PipelineId) -> error::Result<(String, String)> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT stage_name, error_code FROM error_records \
             WHERE pipeline = ?1 ORDER BY id LIMIT 1",
            rusqlite::params![pipeline.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(StateError::backend)
    }
}

impl StateBackend for SqliteStateBackend {
    fn get_offset(
        &self,
        pipeline: &PipelineId,
        revision: &Revision,
    ) -> error::Result<Option<OffsetRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT source_offset, updated_at \
                 FROM source_offsets WHERE pipeline = ?1 AND revision = ?2",
            )
            .map_err(|e| StateError::backend_context("get_offset: prepare", e))?;

        let result = stmt.query_row(
            rusqlite::params![pipeline.as_str(), revision.as_str()],
            |row| {
                let offset: Option<String> = row.get(0)?;
                let updated_at_str: String = row.get(1)?;
                Ok((offset, updated_at_str))
            },
        );

        match result {
            Ok((offset, updated_at_str)) => Ok(Some(OffsetRecord {
                offset,
                updated_at: Self::sqlite_to_iso8601(&updated_at_str),
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StateError::backend_context("get_offset: query", e)),
        }
    }

    fn put_offset(
        &self,
        pipeline: &PipelineId,
        revision: &Revision,
        record: &OffsetRecord,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        let updated_at = Self::iso8601_to_sqlite(&record.updated_at);
        conn.execute(
            "INSERT INTO source_offsets (pipeline, revision, source_offset, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(pipeline, revision) \
             DO UPDATE SET source_offset = ?3, updated_at = ?4",
            rusqlite::params![
                pipeline.as_str(),
                revision.as_str(),
                record.offset,
                updated_at,
            ],
        )
        .map_err(|e| StateError::backend_context("put_offset", e))?;
        Ok(())
    }

    fn start_run(&self, pipeline: &PipelineId, revision: &Revision) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO pipeline_runs (pipeline, revision, status) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                pipeline.as_str(),
                revision.as_str(),
                RunStatus::Running.as_str()
            ],
        )
        .map_err(|e| StateError::backend_context("start_run", e))?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE pipeline_runs SET status = ?1, finished_at = datetime('now'), \
             batches = ?2, input_records = ?3, output_records = ?4, error_records = ?5, \
             error_messages = ?6, error_message = ?7 \
             WHERE id = ?8",
            rusqlite::params![
                status.as_str(),
                stats.batches as i64,
                stats.input_records as i64,
                stats.output_records as i64,
                stats.error_records as i64,
                stats.error_messages as i64,
                stats.error_message,
                run_id,
            ],
        )
        .map_err(|e| StateError::backend_context("complete_run", e))?;
        Ok(())
    }

    fn insert_error_records(
        &self,
        pipeline: &PipelineId,
        run_id: i64,
        records: &[ErrorRecordRow],
    ) -> error::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::backend_context("insert_error_records: begin tx", e))?;
        let mut stmt = tx
            .prepare(
                "INSERT INTO error_records \
                 (pipeline, run_id, stage_name, record_json, error_code, error_message, failed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(|e| StateError::backend_context("insert_error_records: prepare", e))?;

        let mut count = 0u64;
        for record in records {
            stmt.execute(rusqlite::params![
                pipeline.as_str(),
                run_id,
                record.stage_name,
                record.record_json,
                record.error_code,
                record.error_message,
                record.failed_at,
            ])
            .map_err(|e| StateError::backend_context("insert_error_records: execute", e))?;
            count += 1;
        }
        drop(stmt);
        tx.commit()
            .map_err(|e| StateError::backend_context("insert_error_records: commit", e))?;

        Ok(count)
    }
}
