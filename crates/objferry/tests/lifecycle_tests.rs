//! Job lifecycle through the controller: CHECK, STOP, REMOVE and STATUS.

mod common;

use std::sync::Arc;

use common::TestHarness;

use objferry::db::{catalog_repo, job_repo};
use objferry::{FileSystemBackend, JobError, JobState, ObjectBackend};

#[test]
fn test_check_requires_content() {
    let h = TestHarness::new();
    let ctl = h.controller();

    let err = ctl
        .check(h.source().as_ref(), h.target().as_ref())
        .unwrap_err();
    assert!(err.to_string().contains("empty"));

    h.write_source("a.txt", b"a");
    ctl.check(h.source().as_ref(), h.target().as_ref()).unwrap();

    // CHECK never creates a job.
    assert!(ctl.status(None).unwrap().is_empty());
}

#[test]
fn test_missing_target_root_is_a_precondition_failure() {
    let h = TestHarness::new();
    h.write_source("a.txt", b"a");
    let target: Arc<dyn ObjectBackend> =
        Arc::new(FileSystemBackend::new(h.temp_path().join("nowhere"), ""));

    let err = h.controller().start_move(h.source(), target).unwrap_err();
    assert!(matches!(err, JobError::Precondition(_)));

    let status = h.controller().status(None).unwrap().remove(0);
    assert_eq!(status.state, JobState::Error);
    assert!(status.to_string().contains("error:"));
}

#[test]
fn test_empty_source_ends_in_error() {
    let h = TestHarness::new();
    assert!(h.controller().start_move(h.source(), h.target()).is_err());

    let jobs = job_repo::list(&h.database()).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_state, JobState::Error);
    assert!(jobs[0].error_desc.as_deref().unwrap().contains("empty"));
    assert!(jobs[0].end_at.is_some());
}

#[test]
fn test_remove_after_complete() {
    let h = TestHarness::new();
    h.write_source("a.txt", b"a");
    let report = h.controller().start_move(h.source(), h.target()).unwrap();

    h.controller().remove(report.job_id).unwrap();
    assert!(!catalog_repo::table_exists(&h.database(), report.job_id).unwrap());
    assert_eq!(h.job(report.job_id).job_state, JobState::Remove);
    // Moved data stays on the target.
    assert_eq!(h.read_target("a.txt").unwrap(), b"a");
}

#[test]
fn test_stop_then_remove() {
    let h = TestHarness::new();
    h.write_source("a.txt", b"a");
    let db = h.database();
    // A job abandoned mid-MOVE by a process that is gone.
    let job_id = job_repo::insert(&db, "filesystem", "/src", "/dst", 0).unwrap();
    job_repo::update_state(&db, job_id, JobState::Move).unwrap();

    let ctl = h.controller();
    ctl.stop(job_id).unwrap();
    assert_eq!(h.job(job_id).job_state, JobState::Stop);
    assert!(h.job(job_id).end_at.is_some());

    ctl.remove(job_id).unwrap();
    assert_eq!(h.job(job_id).job_state, JobState::Remove);
    assert!(matches!(ctl.stop(job_id), Err(JobError::InvalidState { .. })));
}

#[test]
fn test_status_lists_every_job() {
    let h = TestHarness::new();
    h.write_source_sized("big.bin", 3 * 1024);
    let first = h.controller().start_move(h.source(), h.target()).unwrap();
    let second = h.controller().start_move(h.source(), h.target()).unwrap();

    let statuses = h.controller().status(None).unwrap();
    let ids: Vec<i64> = statuses.iter().map(|s| s.job_id).collect();
    assert_eq!(ids, vec![first.job_id, second.job_id]);

    let text = statuses[0].to_string();
    assert!(text.contains("[COMPLETE]"));
    assert!(text.contains("3.00 KB"));
    assert!(text.contains("complete"));

    let json = serde_json::to_value(&statuses[1]).unwrap();
    assert_eq!(json["state"], "COMPLETE");
    assert_eq!(json["moved"]["count"], 1);
}

#[test]
fn test_jobs_have_independent_catalogs() {
    let h = TestHarness::new();
    h.write_source("a.txt", b"a");
    let first = h.controller().start_move(h.source(), h.target()).unwrap();
    h.write_source("b.txt", b"b");
    let second = h.controller().start_move(h.source(), h.target()).unwrap();

    assert_eq!(h.rows(first.job_id).len(), 1);
    assert_eq!(h.rows(second.job_id).len(), 2);

    h.controller().remove(first.job_id).unwrap();
    assert_eq!(h.rows(second.job_id).len(), 2);
}
