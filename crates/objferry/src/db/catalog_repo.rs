//! Per-job `job_<id>_objects` tables.
//!
//! Table names are derived from the integer job id and are the only part of
//! any statement built with `format!`; every value is bound as a parameter.
//!
//! Row writers that touch job counters run in one transaction together with
//! the counter update, and are guarded on the row's current state or pass
//! number. Replaying a writer after it was applied is therefore a no-op and
//! accounting happens once per row per pass.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::job_repo::{self, Counter};
use super::{Database, DatabaseError};
use crate::catalog::entry::{
    version_key, CatalogEntry, EntryFilter, EntryStatus, NewEntry, ObjectState,
};

/// Name of the object table of `job_id`.
pub fn table_name(job_id: i64) -> String {
    format!("job_{}_objects", job_id)
}

fn state_from_row(row: &Row<'_>, column: &str) -> Result<ObjectState, rusqlite::Error> {
    let code: i64 = row.get(column)?;
    ObjectState::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("unknown object_state {}", code).into(),
        )
    })
}

impl CatalogEntry {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            sequence: row.get("sequence")?,
            path: row.get("path")?,
            size: row.get::<_, i64>("size")? as u64,
            is_file: row.get("is_file")?,
            mtime: row.get("mtime")?,
            version_id: row.get("version_id")?,
            etag: row.get("etag")?,
            multipart_info: row.get("multipart_info")?,
            tag_set: row.get("tag_set")?,
            is_delete: row.get("is_delete")?,
            is_latest: row.get("is_latest")?,
            object_state: state_from_row(row, "object_state")?,
            skip_check: row.get("skip_check")?,
            pass_no: row.get("pass_no")?,
            error_date: row.get("error_date")?,
            error_code: row.get("error_code")?,
            error_desc: row.get("error_desc")?,
        })
    }
}

/// Creates the object table of a job if it does not exist yet.
pub fn create_table(db: &Database, job_id: i64) -> Result<(), DatabaseError> {
    let t = table_name(job_id);
    // The identity index leads with `path`, so it also serves path lookups.
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {t} (
            sequence       INTEGER PRIMARY KEY AUTOINCREMENT,
            path           TEXT    NOT NULL,
            size           INTEGER NOT NULL DEFAULT 0,
            is_file        INTEGER NOT NULL DEFAULT 1,
            mtime          TEXT    NOT NULL DEFAULT '',
            version_id     TEXT,
            version_key    TEXT    NOT NULL,
            etag           TEXT,
            multipart_info TEXT,
            tag_set        TEXT,
            is_delete      INTEGER NOT NULL DEFAULT 0,
            is_latest      INTEGER NOT NULL DEFAULT 0,
            object_state   INTEGER NOT NULL DEFAULT 1,
            skip_check     INTEGER NOT NULL DEFAULT 0,
            pass_no        INTEGER NOT NULL DEFAULT 1,
            error_date     TEXT,
            error_code     TEXT,
            error_desc     TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS {t}_identity ON {t}(path, version_key);
        CREATE INDEX IF NOT EXISTS {t}_state ON {t}(object_state, sequence);"
    );
    db.with_conn(|conn| {
        conn.execute_batch(&sql)?;
        Ok(())
    })
}

/// Drops the object table of a job together with its indexes.
pub fn drop_table(db: &Database, job_id: i64) -> Result<(), DatabaseError> {
    let sql = format!("DROP TABLE IF EXISTS {}", table_name(job_id));
    db.with_conn(|conn| {
        conn.execute_batch(&sql)?;
        Ok(())
    })
}

pub fn table_exists(db: &Database, job_id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table_name(job_id)],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Inserts `entry` as PENDING unless `(path, version)` already exists.
///
/// When inserted, `objects_count/size` grow by the entry in the same
/// transaction. Returns whether a row was inserted.
pub fn insert_entry(
    db: &Database,
    job_id: i64,
    entry: &NewEntry,
    pass_no: i64,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "INSERT OR IGNORE INTO {} (path, size, is_file, mtime, version_id, version_key, etag,
         multipart_info, tag_set, is_delete, is_latest, object_state, pass_no)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        table_name(job_id)
    );
    db.with_tx(|tx| {
        let inserted = tx.execute(
            &sql,
            params![
                entry.path,
                entry.size as i64,
                entry.is_file,
                entry.mtime,
                entry.version_id,
                entry.version_key(),
                entry.etag,
                entry.multipart_info,
                entry.tag_set,
                entry.is_delete,
                entry.is_latest,
                ObjectState::Pending.code(),
                pass_no,
            ],
        )?;
        if inserted == 1 {
            job_repo::increment(tx, job_id, Counter::Objects, 1, entry.size)?;
        }
        Ok(inserted == 1)
    })
}

/// Point lookup by `(path, version_id)`.
pub fn lookup(
    db: &Database,
    job_id: i64,
    path: &str,
    version_id: Option<&str>,
) -> Result<Option<EntryStatus>, DatabaseError> {
    let sql = format!(
        "SELECT sequence, object_state, mtime, etag, size, skip_check, pass_no
         FROM {} WHERE path = ?1 AND version_key = ?2",
        table_name(job_id)
    );
    db.with_conn(|conn| {
        let status = conn
            .query_row(&sql, params![path, version_key(version_id)], |row| {
                Ok(EntryStatus {
                    sequence: row.get("sequence")?,
                    object_state: state_from_row(row, "object_state")?,
                    mtime: row.get("mtime")?,
                    etag: row.get("etag")?,
                    size: row.get::<_, i64>("size")? as u64,
                    skip_check: row.get("skip_check")?,
                    pass_no: row.get("pass_no")?,
                })
            })
            .optional()?;
        Ok(status)
    })
}

/// Full row by `(path, version_id)`.
pub fn find(
    db: &Database,
    job_id: i64,
    path: &str,
    version_id: Option<&str>,
) -> Result<Option<CatalogEntry>, DatabaseError> {
    let sql = format!(
        "SELECT * FROM {} WHERE path = ?1 AND version_key = ?2",
        table_name(job_id)
    );
    db.with_conn(|conn| {
        let entry = conn
            .query_row(
                &sql,
                params![path, version_key(version_id)],
                CatalogEntry::from_row,
            )
            .optional()?;
        Ok(entry)
    })
}

/// PENDING → CLAIMED. Returns `false` if the row was not pending.
pub fn mark_claimed(db: &Database, job_id: i64, sequence: i64) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE {} SET object_state = ?2 WHERE sequence = ?1 AND object_state = ?3",
        table_name(job_id)
    );
    db.with_conn(|conn| {
        let changed = conn.execute(
            &sql,
            params![
                sequence,
                ObjectState::Claimed.code(),
                ObjectState::Pending.code()
            ],
        )?;
        Ok(changed == 1)
    })
}

/// PENDING|CLAIMED → DONE (or DELETED for delete markers), counting the
/// object as moved.
pub fn mark_done(
    db: &Database,
    job_id: i64,
    sequence: i64,
    size: u64,
    is_delete: bool,
) -> Result<bool, DatabaseError> {
    let final_state = if is_delete {
        ObjectState::Deleted
    } else {
        ObjectState::Done
    };
    let sql = format!(
        "UPDATE {} SET object_state = ?2, error_date = NULL, error_code = NULL, error_desc = NULL
         WHERE sequence = ?1 AND object_state IN (?3, ?4)",
        table_name(job_id)
    );
    db.with_tx(|tx| {
        let changed = tx.execute(
            &sql,
            params![
                sequence,
                final_state.code(),
                ObjectState::Pending.code(),
                ObjectState::Claimed.code()
            ],
        )?;
        if changed == 1 {
            job_repo::increment(tx, job_id, Counter::Moved, 1, size)?;
            if is_delete {
                job_repo::increment(tx, job_id, Counter::Delete, 1, size)?;
            }
        }
        Ok(changed == 1)
    })
}

/// PENDING|CLAIMED → FAILED with the adapter's code and message.
pub fn mark_failed(
    db: &Database,
    job_id: i64,
    sequence: i64,
    size: u64,
    error_code: &str,
    error_desc: &str,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE {} SET object_state = ?2, error_date = ?3, error_code = ?4, error_desc = ?5
         WHERE sequence = ?1 AND object_state IN (?6, ?7)",
        table_name(job_id)
    );
    db.with_tx(|tx| {
        let changed = tx.execute(
            &sql,
            params![
                sequence,
                ObjectState::Failed.code(),
                Utc::now().to_rfc3339(),
                error_code,
                error_desc,
                ObjectState::Pending.code(),
                ObjectState::Claimed.code()
            ],
        )?;
        if changed == 1 {
            job_repo::increment(tx, job_id, Counter::Failed, 1, size)?;
        }
        Ok(changed == 1)
    })
}

/// Records that a transferred row was found unchanged in pass `pass_no`.
///
/// `is_latest` is taken from the fresh listing: a newer version may have
/// appeared since the row was written.
pub fn mark_skipped(
    db: &Database,
    job_id: i64,
    sequence: i64,
    size: u64,
    is_latest: bool,
    pass_no: i64,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE {} SET skip_check = 1, is_latest = ?3, pass_no = ?2
         WHERE sequence = ?1 AND pass_no < ?2",
        table_name(job_id)
    );
    db.with_tx(|tx| {
        let changed = tx.execute(&sql, params![sequence, pass_no, is_latest])?;
        if changed == 1 {
            job_repo::increment(tx, job_id, Counter::Skip, 1, size)?;
            job_repo::increment(tx, job_id, Counter::Objects, 1, size)?;
        }
        Ok(changed == 1)
    })
}

/// Puts a row back to PENDING with the freshly observed attributes.
pub fn reset_pending(
    db: &Database,
    job_id: i64,
    sequence: i64,
    entry: &NewEntry,
    pass_no: i64,
) -> Result<bool, DatabaseError> {
    let sql = format!(
        "UPDATE {} SET object_state = ?2, size = ?3, is_file = ?4, mtime = ?5, etag = ?6,
           multipart_info = ?7, tag_set = ?8, is_delete = ?9, is_latest = ?10,
           skip_check = 0, pass_no = ?11, error_date = NULL, error_code = NULL, error_desc = NULL
         WHERE sequence = ?1 AND pass_no < ?11",
        table_name(job_id)
    );
    db.with_tx(|tx| {
        let changed = tx.execute(
            &sql,
            params![
                sequence,
                ObjectState::Pending.code(),
                entry.size as i64,
                entry.is_file,
                entry.mtime,
                entry.etag,
                entry.multipart_info,
                entry.tag_set,
                entry.is_delete,
                entry.is_latest,
                pass_no,
            ],
        )?;
        if changed == 1 {
            job_repo::increment(tx, job_id, Counter::Objects, 1, entry.size)?;
        }
        Ok(changed == 1)
    })
}

/// Clears every `skip_check` marker at the start of a reconciliation pass.
pub fn clear_skip_checks(db: &Database, job_id: i64) -> Result<usize, DatabaseError> {
    let sql = format!(
        "UPDATE {} SET skip_check = 0 WHERE skip_check = 1",
        table_name(job_id)
    );
    db.with_conn(|conn| Ok(conn.execute(&sql, [])?))
}

/// Deletes every row not discovered in pass `pass_no`.
pub fn prune_stale(db: &Database, job_id: i64, pass_no: i64) -> Result<usize, DatabaseError> {
    let sql = format!("DELETE FROM {} WHERE pass_no < ?1", table_name(job_id));
    db.with_conn(|conn| Ok(conn.execute(&sql, params![pass_no])?))
}

/// Up to `limit` rows with `sequence > after_sequence`, in sequence order.
pub fn page(
    db: &Database,
    job_id: i64,
    after_sequence: i64,
    limit: usize,
    filter: EntryFilter,
) -> Result<Vec<CatalogEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = vec!["sequence > ?1".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(after_sequence)];

        if let Some(is_delete) = filter.is_delete {
            conditions.push(format!("is_delete = ?{}", param_values.len() + 1));
            param_values.push(Box::new(is_delete));
        }
        if let Some(state) = filter.state {
            conditions.push(format!("object_state = ?{}", param_values.len() + 1));
            param_values.push(Box::new(state.code()));
        }

        param_values.push(Box::new(limit as i64));
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY sequence LIMIT ?{}",
            table_name(job_id),
            conditions.join(" AND "),
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), CatalogEntry::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// PENDING rows of one path with `after_sequence < sequence <= up_to`, in
/// sequence order. Served by the identity index.
pub fn pending_for_path(
    db: &Database,
    job_id: i64,
    path: &str,
    after_sequence: i64,
    up_to: i64,
) -> Result<Vec<CatalogEntry>, DatabaseError> {
    let sql = format!(
        "SELECT * FROM {} WHERE path = ?1 AND object_state = ?2 AND sequence > ?3 AND sequence <= ?4
         ORDER BY sequence",
        table_name(job_id)
    );
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![path, ObjectState::Pending.code(), after_sequence, up_to],
                CatalogEntry::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Highest sequence currently in the table (0 when empty).
pub fn max_sequence(db: &Database, job_id: i64) -> Result<i64, DatabaseError> {
    let sql = format!(
        "SELECT COALESCE(MAX(sequence), 0) FROM {}",
        table_name(job_id)
    );
    db.with_conn(|conn| Ok(conn.query_row(&sql, [], |r| r.get(0))?))
}

/// Row count per state, for STATUS and invariant checks.
pub fn count_by_state(
    db: &Database,
    job_id: i64,
) -> Result<Vec<(ObjectState, u64)>, DatabaseError> {
    let sql = format!(
        "SELECT object_state, COUNT(*) FROM {} GROUP BY object_state ORDER BY object_state",
        table_name(job_id)
    );
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next()? {
            let code: i64 = row.get(0)?;
            let state = ObjectState::from_code(code).ok_or(DatabaseError::InvalidValue {
                column: "object_state",
                value: code,
            })?;
            counts.push((state, row.get::<_, i64>(1)? as u64));
        }
        Ok(counts)
    })
}
