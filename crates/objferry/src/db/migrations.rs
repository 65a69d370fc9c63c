//! Schema upgrades for the catalog's `jobs` table.
//!
//! Applied steps are recorded in `_migrations`. Per-job object tables are
//! not migrated; they are created on demand by
//! [`super::catalog_repo::create_table`].

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
    /// Column the step adds. A step whose column is already present is
    /// recorded without running.
    adds_column: Option<(&'static str, &'static str)>,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
        adds_column: None,
    },
    Step {
        version: 2,
        name: "add_pass_no_to_jobs",
        sql: include_str!("sql/002_add_pass_no.sql"),
        adds_column: Some(("jobs", "pass_no")),
    },
];

/// Highest recorded schema version, 0 for a fresh catalog.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

/// Brings the catalog schema up to date. Returns how many steps were recorded.
pub fn run_all(conn: &Connection) -> Result<usize, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = schema_version(conn)?;
    let mut recorded = 0;
    for step in STEPS.iter().filter(|s| s.version > current) {
        apply(conn, step)?;
        recorded += 1;
    }
    Ok(recorded)
}

fn apply(conn: &Connection, step: &Step) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    let present = match step.adds_column {
        Some((table, column)) => has_column(&tx, table, column)?,
        None => false,
    };
    if present {
        log::info!("Schema v{} ({}) already in place", step.version, step.name);
    } else {
        log::info!("Applying schema v{}: {}", step.version, step.name);
        tx.execute_batch(step.sql)
            .map_err(|e| DatabaseError::Migration {
                version: step.version,
                reason: e.to_string(),
            })?;
    }

    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        params![step.version, step.name],
    )?;
    tx.commit()?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let mut stmt = conn.prepare("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")?;
    Ok(stmt.exists(params![table, column])?)
}
