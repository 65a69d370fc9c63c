//! CRUD and counter updates for the `jobs` table.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::job::state::JobState;

/// One aggregate counter pair of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Objects,
    Moved,
    Failed,
    Skip,
    Delete,
}

impl Counter {
    /// `(count_column, size_column)`; only ever interpolated from this table.
    fn columns(self) -> (&'static str, &'static str) {
        match self {
            Counter::Objects => ("objects_count", "objects_size"),
            Counter::Moved => ("moved_count", "moved_size"),
            Counter::Failed => ("failed_count", "failed_size"),
            Counter::Skip => ("skip_count", "skip_size"),
            Counter::Delete => ("delete_count", "delete_size"),
        }
    }
}

/// A `(count, size)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub count: u64,
    pub size: u64,
}

/// A job row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub job_id: i64,
    pub job_state: JobState,
    pub pid: i64,
    pub job_type: String,
    pub source_point: String,
    pub target_point: String,
    pub objects: Tally,
    pub moved: Tally,
    pub failed: Tally,
    pub skip: Tally,
    pub delete: Tally,
    pub pass_no: i64,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub error_desc: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let state_code: i64 = row.get("job_state")?;
        let job_state = JobState::from_code(state_code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Integer,
                format!("unknown job_state {}", state_code).into(),
            )
        })?;
        let tally = |count: &str, size: &str| -> Result<Tally, rusqlite::Error> {
            Ok(Tally {
                count: row.get::<_, i64>(count)? as u64,
                size: row.get::<_, i64>(size)? as u64,
            })
        };

        Ok(Self {
            job_id: row.get("job_id")?,
            job_state,
            pid: row.get("pid")?,
            job_type: row.get("job_type")?,
            source_point: row.get("source_point")?,
            target_point: row.get("target_point")?,
            objects: tally("objects_count", "objects_size")?,
            moved: tally("moved_count", "moved_size")?,
            failed: tally("failed_count", "failed_size")?,
            skip: tally("skip_count", "skip_size")?,
            delete: tally("delete_count", "delete_size")?,
            pass_no: row.get("pass_no")?,
            start_at: row.get("start_at")?,
            end_at: row.get("end_at")?,
            error_desc: row.get("error_desc")?,
        })
    }

    /// Objects neither moved, failed nor skipped in the current pass.
    pub fn remaining(&self) -> u64 {
        self.objects
            .count
            .saturating_sub(self.moved.count + self.failed.count + self.skip.count)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Inserts a new job in INIT state and returns its id.
pub fn insert(
    db: &Database,
    job_type: &str,
    source_point: &str,
    target_point: &str,
    pid: i64,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (job_state, pid, job_type, source_point, target_point, start_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                JobState::Init.code(),
                pid,
                job_type,
                source_point,
                target_point,
                now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a job by its id.
pub fn find_by_id(db: &Database, job_id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE job_id = ?1",
                params![job_id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists all jobs, oldest first.
pub fn list(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY job_id")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Updates only the state of a job.
pub fn update_state(db: &Database, job_id: i64, state: JobState) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET job_state = ?2 WHERE job_id = ?1",
            params![job_id, state.code()],
        )?;
        Ok(())
    })
}

/// Moves a job into a final state (COMPLETE, STOP, REMOVE) and stamps `end_at`.
pub fn finish(db: &Database, job_id: i64, state: JobState) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET job_state = ?2, end_at = ?3 WHERE job_id = ?1",
            params![job_id, state.code(), now()],
        )?;
        Ok(())
    })
}

/// Marks a job as ERROR with a stored description.
pub fn set_error(db: &Database, job_id: i64, desc: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET job_state = ?2, error_desc = ?3, end_at = ?4 WHERE job_id = ?1",
            params![job_id, JobState::Error.code(), desc, now()],
        )?;
        Ok(())
    })
}

/// Adds `(count, size)` to one counter pair. Usable inside a transaction.
pub fn increment(
    conn: &Connection,
    job_id: i64,
    counter: Counter,
    count: u64,
    size: u64,
) -> Result<(), DatabaseError> {
    let (count_col, size_col) = counter.columns();
    let sql = format!(
        "UPDATE jobs SET {count_col} = {count_col} + ?2, {size_col} = {size_col} + ?3 WHERE job_id = ?1"
    );
    conn.execute(&sql, params![job_id, count as i64, size as i64])?;
    Ok(())
}

/// Zeroes every counter and starts a new reconciliation pass.
///
/// Returns the new pass number.
pub fn begin_rerun_pass(db: &Database, job_id: i64, pid: i64) -> Result<i64, DatabaseError> {
    db.with_tx(|tx| {
        tx.execute(
            "UPDATE jobs SET
               objects_count = 0, objects_size = 0, moved_count = 0, moved_size = 0,
               failed_count = 0, failed_size = 0, skip_count = 0, skip_size = 0,
               delete_count = 0, delete_size = 0,
               pass_no = pass_no + 1, pid = ?2, start_at = ?3, end_at = NULL, error_desc = NULL
             WHERE job_id = ?1",
            params![job_id, pid, now()],
        )?;
        let pass_no: i64 = tx.query_row(
            "SELECT pass_no FROM jobs WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(pass_no)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let id = insert(&db, "filesystem", "/data/proj/", "bucket-a", 42).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.job_state, JobState::Init);
        assert_eq!(found.pid, 42);
        assert_eq!(found.job_type, "filesystem");
        assert_eq!(found.source_point, "/data/proj/");
        assert_eq!(found.pass_no, 1);
        assert!(found.start_at.is_some());
        assert!(found.end_at.is_none());
        assert_eq!(found.objects, Tally::default());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let db = test_db();
        let a = insert(&db, "filesystem", "a", "b", 1).unwrap();
        let b = insert(&db, "filesystem", "a", "b", 1).unwrap();
        assert!(b > a);
        assert_eq!(list(&db).unwrap().len(), 2);
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, 99).unwrap().is_none());
    }

    #[test]
    fn test_increment_counters() {
        let db = test_db();
        let id = insert(&db, "filesystem", "a", "b", 1).unwrap();
        db.with_conn(|conn| {
            increment(conn, id, Counter::Objects, 1, 10)?;
            increment(conn, id, Counter::Objects, 2, 50)?;
            increment(conn, id, Counter::Moved, 1, 10)?;
            increment(conn, id, Counter::Delete, 1, 0)
        })
        .unwrap();

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.objects, Tally { count: 3, size: 60 });
        assert_eq!(job.moved, Tally { count: 1, size: 10 });
        assert_eq!(job.delete, Tally { count: 1, size: 0 });
        assert_eq!(job.remaining(), 2);
    }

    #[test]
    fn test_error_is_stored() {
        let db = test_db();
        let id = insert(&db, "filesystem", "a", "b", 1).unwrap();
        set_error(&db, id, "bucket not found").unwrap();

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.job_state, JobState::Error);
        assert_eq!(job.error_desc.as_deref(), Some("bucket not found"));
        assert!(job.end_at.is_some());
    }

    #[test]
    fn test_rerun_pass_resets_counters() {
        let db = test_db();
        let id = insert(&db, "filesystem", "a", "b", 1).unwrap();
        db.with_conn(|conn| increment(conn, id, Counter::Moved, 5, 500))
            .unwrap();
        finish(&db, id, JobState::Complete).unwrap();

        let pass = begin_rerun_pass(&db, id, 77).unwrap();
        assert_eq!(pass, 2);

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.moved, Tally::default());
        assert_eq!(job.pid, 77);
        assert!(job.end_at.is_none());
    }
}
