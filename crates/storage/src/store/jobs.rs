#![forbid(unsafe_code)]

use super::*;
use dw_core::{Fingerprint, JobHandle, JobStatus};
use rusqlite::{OptionalExtension, params};

const MAX_FINGERPRINT_LEN: usize = 4096;
const MAX_HANDLE_LEN: usize = 1024;

const TERMINAL_STATUSES_SQL: &str = "('SUCCEEDED', 'FAILED')";

fn normalize_fingerprint(fingerprint: &Fingerprint) -> Result<&str, StoreError> {
    let raw = fingerprint.as_str();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("fingerprint must not be empty"));
    }
    if raw.len() > MAX_FINGERPRINT_LEN {
        return Err(StoreError::InvalidInput("fingerprint is too long"));
    }
    Ok(raw)
}

fn normalize_handle(handle: &JobHandle) -> Result<&str, StoreError> {
    let raw = handle.id().trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("backend_handle must not be empty"));
    }
    if raw.len() > MAX_HANDLE_LEN {
        return Err(StoreError::InvalidInput("backend_handle is too long"));
    }
    Ok(raw)
}

fn read_job_row(row: &rusqlite::Row<'_>) -> Result<JobRecordRow, rusqlite::Error> {
    Ok(JobRecordRow {
        fingerprint: Fingerprint::from_stored(row.get::<_, String>(0)?),
        backend_handle: JobHandle::from_stored(row.get::<_, String>(1)?),
        status: JobStatus::parse(&row.get::<_, String>(2)?),
        updated_at_ms: row.get(3)?,
    })
}

fn job_get_tx(conn: &Connection, fingerprint: &str) -> Result<Option<JobRecordRow>, StoreError> {
    Ok(conn
        .query_row(
            r#"
            SELECT fingerprint, backend_handle, status, updated_at_ms
            FROM jobs
            WHERE fingerprint=?1
            ORDER BY updated_at_ms DESC, rowid DESC
            LIMIT 1
            "#,
            params![fingerprint],
            read_job_row,
        )
        .optional()?)
}

impl SqliteStore {
    pub fn job_get(&self, fingerprint: &Fingerprint) -> Result<Option<JobRecordRow>, StoreError> {
        let fingerprint = normalize_fingerprint(fingerprint)?;
        job_get_tx(&self.conn, fingerprint)
    }

    /// Records a fresh submission: every earlier row for the fingerprint is dropped and a single
    /// row with the new handle takes its place.
    pub fn job_replace(&mut self, request: JobReplaceRequest) -> Result<JobRecordRow, StoreError> {
        let fingerprint = normalize_fingerprint(&request.fingerprint)?.to_string();
        let handle = normalize_handle(&request.backend_handle)?.to_string();

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM jobs WHERE fingerprint=?1", params![fingerprint])?;
        tx.execute(
            r#"
            INSERT INTO jobs(fingerprint, backend_handle, status, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                fingerprint,
                handle,
                request.status.as_str(),
                request.now_ms
            ],
        )?;
        tx.commit()?;

        Ok(JobRecordRow {
            fingerprint: Fingerprint::from_stored(fingerprint),
            backend_handle: JobHandle::from_stored(handle),
            status: request.status,
            updated_at_ms: request.now_ms,
        })
    }

    /// Stores a status observed on the backend and returns the row as it stands afterwards.
    ///
    /// A terminal row is returned unchanged. An `UNKNOWN` observation only refreshes
    /// `updated_at_ms` when a row exists. A missing row is inserted.
    pub fn job_refresh(&mut self, request: JobRefreshRequest) -> Result<JobRecordRow, StoreError> {
        let fingerprint = normalize_fingerprint(&request.fingerprint)?.to_string();
        let handle = normalize_handle(&request.backend_handle)?.to_string();

        let tx = self.conn.transaction()?;
        let existing = job_get_tx(&tx, &fingerprint)?;

        let row = match existing {
            Some(row) if row.status.is_terminal() => row,
            Some(row) if request.status == JobStatus::Unknown => {
                tx.execute(
                    "UPDATE jobs SET updated_at_ms=?1 WHERE fingerprint=?2",
                    params![request.now_ms, fingerprint],
                )?;
                JobRecordRow {
                    updated_at_ms: request.now_ms,
                    ..row
                }
            }
            Some(_) => {
                tx.execute(
                    &format!(
                        "UPDATE jobs SET status=?1, backend_handle=?2, updated_at_ms=?3 \
                         WHERE fingerprint=?4 AND status NOT IN {TERMINAL_STATUSES_SQL}"
                    ),
                    params![
                        request.status.as_str(),
                        handle,
                        request.now_ms,
                        fingerprint
                    ],
                )?;
                JobRecordRow {
                    fingerprint: Fingerprint::from_stored(fingerprint),
                    backend_handle: JobHandle::from_stored(handle),
                    status: request.status,
                    updated_at_ms: request.now_ms,
                }
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO jobs(fingerprint, backend_handle, status, updated_at_ms)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![
                        fingerprint,
                        handle,
                        request.status.as_str(),
                        request.now_ms
                    ],
                )?;
                JobRecordRow {
                    fingerprint: Fingerprint::from_stored(fingerprint),
                    backend_handle: JobHandle::from_stored(handle),
                    status: request.status,
                    updated_at_ms: request.now_ms,
                }
            }
        };

        tx.commit()?;
        Ok(row)
    }

    /// Rows that still need backend resolution, oldest first.
    pub fn jobs_list_live(&self) -> Result<Vec<JobRecordRow>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT fingerprint, backend_handle, status, updated_at_ms \
             FROM jobs \
             WHERE status NOT IN {TERMINAL_STATUSES_SQL} \
             ORDER BY updated_at_ms ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map([], read_job_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Deletes every row whose last update is more than `retention_ms` before `now_ms`,
    /// regardless of status. Returns the number of deleted rows.
    pub fn jobs_purge_expired(&mut self, request: JobsPurgeRequest) -> Result<usize, StoreError> {
        if request.retention_ms < 0 {
            return Err(StoreError::InvalidInput("retention_ms must not be negative"));
        }
        let cutoff_ms = request.now_ms.saturating_sub(request.retention_ms);
        let deleted = self.conn.execute(
            "DELETE FROM jobs WHERE updated_at_ms < ?1",
            params![cutoff_ms],
        )?;
        Ok(deleted)
    }

    pub fn jobs_count(&self) -> Result<u64, StoreError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get::<_, i64>(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
