use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::mover::Mover;
use crate::worker::task::TransferGroup;

/// A fixed set of mover threads fed through a bounded channel.
pub struct WorkerPool {
    group_sender: Sender<TransferGroup>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` workers (at least one).
    pub fn new(
        mover: Arc<Mover>,
        worker_count: usize,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        let (group_sender, group_receiver) = bounded::<TransferGroup>(worker_count * 2);

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx = group_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_mover = Arc::clone(&mover);

            let handle = thread::Builder::new()
                .name(format!("mover-{}", worker_id))
                .spawn(move || run_worker(worker_id, rx, shutdown_flag, worker_mover))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Mover pool started with {} threads", worker_count);

        Ok(Self {
            group_sender,
            workers,
            shutdown,
        })
    }

    /// Queues a group, blocking while all workers are busy.
    pub fn submit(&self, group: TransferGroup) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.group_sender
            .send(group)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn shutdown(&self) {
        info!("Stopping mover pool");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Closes the queue and joins every worker.
    pub fn wait(self) -> Result<(), WorkerError> {
        drop(self.group_sender);

        let mut panicked = None;
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("mover-{} panicked: {:?}", i, e);
                panicked.get_or_insert(i);
            } else {
                debug!("mover-{} joined", i);
            }
        }

        info!("Mover pool drained");
        match panicked {
            Some(i) => Err(WorkerError::Panicked(i)),
            None => Ok(()),
        }
    }
}

fn run_worker(
    worker_id: usize,
    group_receiver: Receiver<TransferGroup>,
    shutdown: Arc<AtomicBool>,
    mover: Arc<Mover>,
) {
    debug!("mover-{} waiting for groups", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("mover-{} leaving on shutdown", worker_id);
            break;
        }

        match group_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(group) => {
                debug!(
                    "mover-{} transferring {} ({} rows)",
                    worker_id,
                    group.path,
                    group.len()
                );
                mover.transfer_group(group);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("mover-{} queue closed", worker_id);
                break;
            }
        }
    }

    debug!("mover-{} exiting", worker_id);
}
