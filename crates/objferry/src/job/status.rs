use std::fmt;

use serde::Serialize;

use crate::catalog::{JobRow, Tally};
use crate::job::state::JobState;

const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Formats a byte count with a binary unit chosen by magnitude.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Phase label shown to operators.
pub fn phase(state: JobState) -> &'static str {
    match state {
        JobState::Init => "initializing",
        JobState::Move => "moving",
        JobState::Complete => "complete",
        JobState::Stop => "stopped",
        JobState::Remove => "removed",
        JobState::Rerun => "re-scanning",
        JobState::RerunMove => "moving changes",
        JobState::Error => "failed",
    }
}

/// Per-job summary for STATUS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub job_id: i64,
    pub state: JobState,
    pub phase: &'static str,
    pub job_type: String,
    pub source_point: String,
    pub target_point: String,
    pub pass_no: i64,
    pub prepared: Tally,
    pub moved: Tally,
    pub failed: Tally,
    pub skipped: Tally,
    pub deleted: Tally,
    pub remaining: u64,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub error_desc: Option<String>,
}

impl From<JobRow> for JobStatus {
    fn from(row: JobRow) -> Self {
        Self {
            job_id: row.job_id,
            state: row.job_state,
            phase: phase(row.job_state),
            remaining: row.remaining(),
            job_type: row.job_type,
            source_point: row.source_point,
            target_point: row.target_point,
            pass_no: row.pass_no,
            prepared: row.objects,
            moved: row.moved,
            failed: row.failed,
            skipped: row.skip,
            deleted: row.delete,
            start_at: row.start_at,
            end_at: row.end_at,
            error_desc: row.error_desc,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Job {} [{}] {}: {} -> {} (pass {})",
            self.job_id, self.state, self.job_type, self.source_point, self.target_point, self.pass_no
        )?;

        if self.state == JobState::Error {
            return writeln!(
                f,
                "  error: {}",
                self.error_desc.as_deref().unwrap_or("unknown error")
            );
        }

        writeln!(f, "  phase:    {}", self.phase)?;
        for (label, tally) in [
            ("prepared", self.prepared),
            ("moved", self.moved),
            ("failed", self.failed),
            ("skipped", self.skipped),
            ("deleted", self.deleted),
        ] {
            writeln!(
                f,
                "  {:<9} {:>10} objects  {:>12}",
                format!("{}:", label),
                tally.count,
                format_bytes(tally.size)
            )?;
        }
        if self.remaining > 0 {
            writeln!(f, "  remaining: {} objects", self.remaining)?;
        }
        if let Some(start) = &self.start_at {
            writeln!(f, "  started:  {}", start)?;
        }
        if let Some(end) = &self.end_at {
            writeln!(f, "  finished: {}", end)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(state: JobState) -> JobRow {
        JobRow {
            job_id: 7,
            job_state: state,
            pid: 1,
            job_type: "filesystem".into(),
            source_point: "/src".into(),
            target_point: "/dst".into(),
            objects: Tally {
                count: 4,
                size: 3 * 1024 * 1024,
            },
            moved: Tally {
                count: 3,
                size: 2048,
            },
            failed: Tally::default(),
            skip: Tally::default(),
            delete: Tally::default(),
            pass_no: 1,
            start_at: Some("2026-10-17T10:00:00+00:00".into()),
            end_at: None,
            error_desc: None,
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
        assert_eq!(format_bytes(u64::MAX), "16384.00 PB");
    }

    #[test]
    fn test_render_progress() {
        let status = JobStatus::from(row(JobState::Move));
        let text = status.to_string();
        assert!(text.contains("Job 7 [MOVE]"));
        assert!(text.contains("3.00 MB"));
        assert!(text.contains("2.00 KB"));
        assert!(text.contains("remaining: 1 objects"));
        assert_eq!(status.phase, "moving");
    }

    #[test]
    fn test_error_job_prints_stored_error() {
        let mut failed = row(JobState::Error);
        failed.error_desc = Some("source scope is empty".into());
        let text = JobStatus::from(failed).to_string();
        assert!(text.contains("error: source scope is empty"));
        assert!(!text.contains("prepared"));
    }
}
