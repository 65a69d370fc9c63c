use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::backend::ObjectBackend;
use crate::catalog::CatalogStore;
use crate::config::MoveOptions;
use crate::db::{catalog_repo, job_repo, Database};
use crate::error::{JobError, ScanError};
use crate::job::process;
use crate::job::state::JobState;
use crate::job::status::JobStatus;
use crate::scan::{Enumerator, ScanMode, ScanReport};
use crate::worker::{
    DispatchReport, Dispatcher, MoveSummary, Mover, SummarySnapshot, VersioningGuard, WorkerPool,
};

/// Outcome of one MOVE or RERUN pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub job_id: i64,
    pub pass_no: i64,
    pub final_state: JobState,
    pub scan: ScanReport,
    pub dispatch: DispatchReport,
    pub summary: SummarySnapshot,
    /// Catalog writes still parked when the pass ended.
    pub backlog: usize,
}

/// Drives jobs through their lifecycle.
pub struct JobController {
    db: Database,
    options: MoveOptions,
    shutdown: Arc<AtomicBool>,
}

impl JobController {
    pub fn new(db: Database, options: MoveOptions) -> Self {
        Self {
            db,
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares an externally owned shutdown flag (e.g. set by a signal handler).
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn load(&self, job_id: i64) -> Result<job_repo::JobRow, JobError> {
        job_repo::find_by_id(&self.db, job_id)?.ok_or(JobError::NotFound(job_id))
    }

    fn transition(
        &self,
        job_id: i64,
        from: JobState,
        to: JobState,
        operation: &'static str,
    ) -> Result<(), JobError> {
        if !from.can_transition_to(to) {
            return Err(JobError::InvalidState {
                job_id,
                state: from,
                operation,
            });
        }
        job_repo::update_state(&self.db, job_id, to)?;
        info!(job_id, from = %from, to = %to, "Job state changed");
        Ok(())
    }

    /// Records a precondition failure and returns it.
    fn fail(&self, job_id: i64, err: JobError) -> JobError {
        let desc = match &err {
            JobError::Precondition(msg) => msg.clone(),
            other => other.to_string(),
        };
        if let Err(e) = job_repo::set_error(&self.db, job_id, &desc) {
            warn!(job_id, "Could not record job error: {}", e);
        }
        err
    }

    /// Verifies both endpoints and that the source scope has content.
    pub fn check(
        &self,
        source: &dyn ObjectBackend,
        target: &dyn ObjectBackend,
    ) -> Result<(), JobError> {
        source.check().map_err(|e| {
            JobError::Precondition(format!("source {}: {}", source.display_point(), e))
        })?;
        target.check().map_err(|e| {
            JobError::Precondition(format!("target {}: {}", target.display_point(), e))
        })?;

        let mut listing = source.list().map_err(|e| {
            JobError::Precondition(format!("source {}: {}", source.display_point(), e))
        })?;
        if listing.next().is_none() {
            return Err(JobError::Precondition(format!(
                "source scope {} is empty",
                source.display_point()
            )));
        }
        Ok(())
    }

    /// MOVE: creates a job, checks preconditions, enumerates and transfers.
    pub fn start_move(
        &self,
        source: Arc<dyn ObjectBackend>,
        target: Arc<dyn ObjectBackend>,
    ) -> Result<PassReport, JobError> {
        let job_id = job_repo::insert(
            &self.db,
            source.kind().as_str(),
            &source.display_point(),
            &target.display_point(),
            process::current_pid(),
        )?;
        info!(
            job_id,
            source = %source.display_point(),
            target = %target.display_point(),
            "Created job"
        );

        if let Err(e) = self.check(source.as_ref(), target.as_ref()) {
            return Err(self.fail(job_id, e));
        }

        self.transition(job_id, JobState::Init, JobState::Move, "move")?;
        let store = Arc::new(CatalogStore::new(self.db.clone(), job_id, self.options.retry));
        store.create_table()?;

        self.run_pass(job_id, 1, ScanMode::Initial, source, target, store)
    }

    /// RERUN: zeroes the counters, reconciles the catalog against the source
    /// and transfers whatever changed.
    pub fn rerun(
        &self,
        job_id: i64,
        source: Arc<dyn ObjectBackend>,
        target: Arc<dyn ObjectBackend>,
    ) -> Result<PassReport, JobError> {
        let job = self.load(job_id)?;
        let resumable = matches!(job.job_state, JobState::Complete | JobState::Stop);
        let abandoned = matches!(
            job.job_state,
            JobState::Move | JobState::Rerun | JobState::RerunMove
        );

        if abandoned && process::is_alive(job.pid) && job.pid != process::current_pid() {
            return Err(JobError::Active {
                job_id,
                pid: job.pid,
            });
        }
        if !resumable && !abandoned {
            return Err(JobError::InvalidState {
                job_id,
                state: job.job_state,
                operation: "rerun",
            });
        }
        if abandoned {
            info!(job_id, pid = job.pid, "Resuming job whose process is gone");
        }

        if let Err(e) = self.check(source.as_ref(), target.as_ref()) {
            return Err(self.fail(job_id, e));
        }

        let pass_no = job_repo::begin_rerun_pass(&self.db, job_id, process::current_pid())?;
        // An abandoned job jumps straight into RERUN.
        job_repo::update_state(&self.db, job_id, JobState::Rerun)?;
        info!(job_id, pass_no, "Starting rerun pass");

        let store = Arc::new(CatalogStore::new(self.db.clone(), job_id, self.options.retry));
        store.create_table()?;

        self.run_pass(job_id, pass_no, ScanMode::Reconcile, source, target, store)
    }

    fn run_pass(
        &self,
        job_id: i64,
        pass_no: i64,
        mode: ScanMode,
        source: Arc<dyn ObjectBackend>,
        target: Arc<dyn ObjectBackend>,
        store: Arc<CatalogStore>,
    ) -> Result<PassReport, JobError> {
        let _span = info_span!("pass", job_id, pass_no).entered();
        let (scan_state, move_state) = match mode {
            ScanMode::Initial => (JobState::Move, JobState::Move),
            ScanMode::Reconcile => (JobState::Rerun, JobState::RerunMove),
        };

        let scan = match Enumerator::new(source.as_ref(), &store, pass_no)
            .with_shutdown(&self.shutdown)
            .run(mode)
        {
            Ok(report) => report,
            Err(ScanError::Interrupted) => {
                self.transition(job_id, scan_state, JobState::Stop, "stop")?;
                job_repo::finish(&self.db, job_id, JobState::Stop)?;
                return Ok(PassReport {
                    job_id,
                    pass_no,
                    final_state: JobState::Stop,
                    scan: ScanReport::default(),
                    dispatch: DispatchReport::default(),
                    summary: SummarySnapshot::default(),
                    backlog: store.backlog_len(),
                });
            }
            Err(ScanError::Listing { point, source: e }) => {
                let err = JobError::Precondition(format!("listing {} failed: {}", point, e));
                return Err(self.fail(job_id, err));
            }
            Err(e) => return Err(e.into()),
        };

        if scan_state != move_state {
            self.transition(job_id, scan_state, move_state, "move")?;
        }

        let guard = match VersioningGuard::engage(source.as_ref(), Arc::clone(&target)) {
            Ok(guard) => guard,
            Err(e) => {
                let err = JobError::Precondition(format!(
                    "cannot enable versioning on {}: {}",
                    target.display_point(),
                    e
                ));
                return Err(self.fail(job_id, err));
            }
        };

        let summary = Arc::new(MoveSummary::new());
        let mover = Arc::new(Mover::new(
            source,
            target,
            Arc::clone(&store),
            self.options,
            Arc::clone(&summary),
            Arc::clone(&self.shutdown),
        ));
        let pool = WorkerPool::new(mover, self.options.threads, Arc::clone(&self.shutdown))?;
        let dispatch = Dispatcher::new(
            Arc::clone(&store),
            self.options.batch_size,
            Arc::clone(&self.shutdown),
        )
        .run(pool)?;
        drop(guard);

        let final_state = if dispatch.interrupted || self.shutdown.load(Ordering::Relaxed) {
            JobState::Stop
        } else {
            JobState::Complete
        };
        self.transition(job_id, move_state, final_state, "finish")?;
        job_repo::finish(&self.db, job_id, final_state)?;

        let backlog = store.backlog_len();
        if backlog > 0 {
            warn!(
                job_id,
                backlog, "Catalog writes still parked at end of pass; rerun to reconcile"
            );
        }

        let summary = summary.snapshot();
        info!(
            job_id,
            state = %final_state,
            moved = summary.moved,
            failed = summary.failed,
            "Pass finished"
        );
        Ok(PassReport {
            job_id,
            pass_no,
            final_state,
            scan,
            dispatch,
            summary,
            backlog,
        })
    }

    /// STOP: signals the recorded process and marks the job stopped.
    pub fn stop(&self, job_id: i64) -> Result<(), JobError> {
        let job = self.load(job_id)?;
        if !job.job_state.can_transition_to(JobState::Stop) {
            return Err(JobError::InvalidState {
                job_id,
                state: job.job_state,
                operation: "stop",
            });
        }

        if job.pid != process::current_pid() && process::is_alive(job.pid) {
            info!(job_id, pid = job.pid, "Sending SIGTERM");
            process::terminate(job.pid).map_err(|source| JobError::Signal {
                pid: job.pid,
                source,
            })?;
        }

        job_repo::finish(&self.db, job_id, JobState::Stop)?;
        info!(job_id, "Job stopped");
        Ok(())
    }

    /// REMOVE: drops the job's catalog and marks it removed.
    pub fn remove(&self, job_id: i64) -> Result<(), JobError> {
        let job = self.load(job_id)?;
        if job.job_state.is_active()
            && job.pid != process::current_pid()
            && process::is_alive(job.pid)
        {
            return Err(JobError::Active {
                job_id,
                pid: job.pid,
            });
        }
        if !job.job_state.can_transition_to(JobState::Remove) {
            return Err(JobError::InvalidState {
                job_id,
                state: job.job_state,
                operation: "remove",
            });
        }

        catalog_repo::drop_table(&self.db, job_id)?;
        job_repo::finish(&self.db, job_id, JobState::Remove)?;
        info!(job_id, "Job removed");
        Ok(())
    }

    /// STATUS of one job, or of every job when `job_id` is `None`.
    pub fn status(&self, job_id: Option<i64>) -> Result<Vec<JobStatus>, JobError> {
        let rows = match job_id {
            Some(id) => vec![self.load(id)?],
            None => job_repo::list(&self.db)?,
        };
        Ok(rows.into_iter().map(JobStatus::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryObjectStore;

    fn controller() -> JobController {
        let options = MoveOptions {
            threads: 2,
            ..MoveOptions::default()
        };
        JobController::new(Database::open_in_memory().unwrap(), options)
    }

    #[test]
    fn test_empty_source_is_a_precondition_error() {
        let ctl = controller();
        let source = Arc::new(MemoryObjectStore::new("src"));
        let target = Arc::new(MemoryObjectStore::new("dst"));

        let err = ctl.start_move(source, target).unwrap_err();
        assert!(matches!(err, JobError::Precondition(_)));

        let status = ctl.status(None).unwrap().remove(0);
        assert_eq!(status.state, JobState::Error);
        assert!(status.error_desc.unwrap().contains("is empty"));
    }

    #[test]
    fn test_unreachable_target_is_a_precondition_error() {
        let ctl = controller();
        let source = Arc::new(MemoryObjectStore::new("src"));
        source.put_bytes("a", b"x").unwrap();
        let target = Arc::new(MemoryObjectStore::new("dst"));
        target.set_reachable(false);

        assert!(matches!(
            ctl.start_move(source, target),
            Err(JobError::Precondition(_))
        ));
    }

    #[test]
    fn test_move_completes() {
        let ctl = controller();
        let source = Arc::new(MemoryObjectStore::new("src"));
        source.put_bytes("a", b"aa").unwrap();
        source.put_bytes("b", b"bbb").unwrap();
        let target = Arc::new(MemoryObjectStore::new("dst"));

        let report = ctl.start_move(source, target.clone()).unwrap();
        assert_eq!(report.final_state, JobState::Complete);
        assert_eq!(report.summary.moved, 2);
        assert_eq!(target.read_bytes("b", None).unwrap(), b"bbb");

        let status = ctl.status(Some(report.job_id)).unwrap().remove(0);
        assert_eq!(status.moved.size, 5);
        assert_eq!(status.remaining, 0);
        assert!(status.end_at.is_some());
    }

    #[test]
    fn test_rerun_rejected_for_error_job() {
        let ctl = controller();
        let source = Arc::new(MemoryObjectStore::new("src"));
        let target = Arc::new(MemoryObjectStore::new("dst"));
        let _ = ctl.start_move(source.clone(), target.clone());

        let job_id = ctl.status(None).unwrap()[0].job_id;
        assert!(matches!(
            ctl.rerun(job_id, source, target),
            Err(JobError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_rerun_resumes_abandoned_job() {
        let ctl = controller();
        let source = Arc::new(MemoryObjectStore::new("src"));
        source.put_bytes("a", b"x").unwrap();
        let target = Arc::new(MemoryObjectStore::new("dst"));

        // A job left in MOVE by a process that no longer exists.
        let job_id = job_repo::insert(ctl.database(), "objectstore", "src", "dst", 0).unwrap();
        job_repo::update_state(ctl.database(), job_id, JobState::Move).unwrap();

        let report = ctl.rerun(job_id, source, target.clone()).unwrap();
        assert_eq!(report.pass_no, 2);
        assert_eq!(report.final_state, JobState::Complete);
        assert_eq!(target.read_bytes("a", None).unwrap(), b"x");
    }

    #[test]
    fn test_remove_drops_catalog() {
        let ctl = controller();
        let source = Arc::new(MemoryObjectStore::new("src"));
        source.put_bytes("a", b"x").unwrap();
        let report = ctl
            .start_move(source, Arc::new(MemoryObjectStore::new("dst")))
            .unwrap();

        ctl.remove(report.job_id).unwrap();
        assert!(!catalog_repo::table_exists(ctl.database(), report.job_id).unwrap());
        assert_eq!(
            ctl.status(Some(report.job_id)).unwrap()[0].state,
            JobState::Remove
        );
        assert!(matches!(
            ctl.remove(report.job_id),
            Err(JobError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_remove_rejected_while_process_alive() {
        let ctl = controller();
        // pid 1 always exists and is never this test process.
        let job_id = job_repo::insert(ctl.database(), "filesystem", "/a", "/b", 1).unwrap();
        job_repo::update_state(ctl.database(), job_id, JobState::Move).unwrap();

        assert!(matches!(ctl.remove(job_id), Err(JobError::Active { .. })));
    }

    #[test]
    fn test_stop_marks_job() {
        let ctl = controller();
        let job_id = job_repo::insert(ctl.database(), "filesystem", "/a", "/b", 0).unwrap();
        job_repo::update_state(ctl.database(), job_id, JobState::Move).unwrap();

        ctl.stop(job_id).unwrap();
        assert_eq!(ctl.status(Some(job_id)).unwrap()[0].state, JobState::Stop);
        assert!(matches!(ctl.stop(job_id), Err(JobError::InvalidState { .. })));
    }

    #[test]
    fn test_shutdown_before_scan_stops_job() {
        let ctl = controller();
        ctl.shutdown_flag().store(true, Ordering::Relaxed);
        let source = Arc::new(MemoryObjectStore::new("src"));
        source.put_bytes("a", b"x").unwrap();

        let report = ctl
            .start_move(source, Arc::new(MemoryObjectStore::new("dst")))
            .unwrap();
        assert_eq!(report.final_state, JobState::Stop);
    }

    #[test]
    fn test_status_unknown_job() {
        assert!(matches!(
            controller().status(Some(42)),
            Err(JobError::NotFound(42))
        ));
    }
}
