use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};
use tokio::sync::broadcast;

use crate::broadcast::categorize_progress::CategorizeEvent;
use crate::db::{queue_repo, Database};
use crate::error::WorkerError;
use crate::pipeline::{BroadcastProgress, NoopProgress, Orchestrator, ProgressReporter};
use crate::worker::job::{Disposition, JobResult, QueueJob};

pub struct WorkerPool {
    job_sender: Sender<QueueJob>,
    result_receiver: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(orchestrator: Arc<Orchestrator>, worker_count: usize) -> Self {
        Self::with_progress_sender(orchestrator, worker_count, None)
    }

    /// Creates a new worker pool with an optional progress broadcaster.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn with_progress_sender(
        orchestrator: Arc<Orchestrator>,
        worker_count: usize,
        progress_sender: Option<Arc<broadcast::Sender<CategorizeEvent>>>,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = bounded::<QueueJob>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<JobResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_orchestrator = Arc::clone(&orchestrator);
            let progress_sender = progress_sender.clone();

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    job_rx,
                    result_tx,
                    shutdown_flag,
                    worker_orchestrator,
                    progress_sender,
                );
            });

            workers.push(handle);
        }

        info!("Started {} categorization workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, job: QueueJob) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<JobResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<JobResult> {
        self.result_receiver.recv().ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Number of jobs that can be outstanding without blocking the
    /// submitter. Submitting more than this before receiving results
    /// can deadlock against the bounded result channel.
    pub fn capacity(&self) -> usize {
        self.job_sender.capacity().unwrap_or(1)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<QueueJob>,
    result_sender: Sender<JobResult>,
    shutdown: Arc<AtomicBool>,
    orchestrator: Arc<Orchestrator>,
    progress_sender: Option<Arc<broadcast::Sender<CategorizeEvent>>>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(job) => {
                debug!("Worker {} categorizing receipt {}", worker_id, job.receipt_id);

                let result = match &progress_sender {
                    Some(sender) => {
                        // Merchant is unknown until the receipt is loaded;
                        // events identify the receipt by id.
                        let progress =
                            BroadcastProgress::new(&job.receipt_id, "", Arc::clone(sender));
                        categorize_job(&orchestrator, &job, &progress)
                    }
                    None => categorize_job(&orchestrator, &job, &NoopProgress),
                };

                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn categorize_job(
    orchestrator: &Orchestrator,
    job: &QueueJob,
    progress: &dyn ProgressReporter,
) -> JobResult {
    match orchestrator.categorize(&job.receipt_id, progress) {
        Ok(outcome) => JobResult::from_outcome(job, &outcome),
        Err(e) => JobResult::error(job, e.to_string()),
    }
}

/// Counters from one queue drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub categorized: u64,
    pub already_categorized: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

/// Drains the categorization queue through the pool until no unprocessed
/// entries remain. Failed entries stay queued with an incremented attempt
/// count and are retried on a later batch; entries that reach
/// `max_attempts` move to the dead-letter table, so the loop terminates.
pub fn drain_queue(
    db: &Database,
    pool: &WorkerPool,
    max_attempts: u32,
) -> Result<DrainStats, WorkerError> {
    let mut stats = DrainStats::default();
    // Batches never exceed the channel capacity so the submit loop below
    // cannot block while results are waiting to be drained.
    let batch_size = pool.capacity() as u32;

    loop {
        let batch = queue_repo::claim_batch(db, batch_size)
            .map_err(|e| WorkerError::DrainFailed(e.to_string()))?;
        if batch.is_empty() {
            break;
        }

        for entry in &batch {
            pool.submit(QueueJob::from_entry(entry))?;
        }

        for _ in &batch {
            let result = pool.recv_result().ok_or(WorkerError::ChannelClosed)?;

            match result.disposition {
                Disposition::Categorized { category, .. } => {
                    debug!("Receipt {} categorized as {}", result.receipt_id, category);
                    queue_repo::mark_processed(db, result.queue_id)
                        .map_err(|e| WorkerError::DrainFailed(e.to_string()))?;
                    stats.categorized += 1;
                }
                Disposition::AlreadyCategorized => {
                    queue_repo::mark_processed(db, result.queue_id)
                        .map_err(|e| WorkerError::DrainFailed(e.to_string()))?;
                    stats.already_categorized += 1;
                }
                Disposition::NotCategorized { reason } => {
                    handle_failure(db, &mut stats, result.queue_id, &reason, max_attempts)?;
                }
                Disposition::Error { error } => {
                    handle_failure(db, &mut stats, result.queue_id, &error, max_attempts)?;
                }
            }
        }
    }

    Ok(stats)
}

fn handle_failure(
    db: &Database,
    stats: &mut DrainStats,
    queue_id: i64,
    error: &str,
    max_attempts: u32,
) -> Result<(), WorkerError> {
    let attempts = queue_repo::record_failure(db, queue_id, error)
        .map_err(|e| WorkerError::DrainFailed(e.to_string()))?;

    if attempts >= max_attempts {
        info!(
            "Queue entry {} exhausted {} attempts, dead-lettering: {}",
            queue_id, attempts, error
        );
        let now = chrono::Utc::now().to_rfc3339();
        queue_repo::move_to_dlq(db, queue_id, &now)
            .map_err(|e| WorkerError::DrainFailed(e.to_string()))?;
        stats.dead_lettered += 1;
    } else {
        stats.retried += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClassificationFailure, ModelClassifier, ModelVerdict, ReceiptSummary};
    use crate::config::builtin_config;
    use crate::db::receipt_repo;
    use crate::receipt::{Receipt, ReceiptStatus};

    struct FailingClassifier;

    impl ModelClassifier for FailingClassifier {
        fn classify(
            &self,
            _summary: &ReceiptSummary,
        ) -> Result<ModelVerdict, ClassificationFailure> {
            Err(ClassificationFailure::UpstreamError("no endpoint".to_string()))
        }
    }

    fn setup(db: &Database) -> Arc<Orchestrator> {
        let config = builtin_config().unwrap();
        Arc::new(Orchestrator::with_classifier(
            db.clone(),
            &config,
            Arc::new(FailingClassifier),
        ))
    }

    fn insert_receipt(db: &Database, merchant: &str) -> String {
        let receipt =
            Receipt::extracted("user-1", merchant, 42.0, 40.0, 2.0, None, None, vec![]);
        receipt_repo::insert(db, &receipt).unwrap();
        receipt.id
    }

    #[test]
    fn test_pool_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let pool = WorkerPool::new(setup(&db), 2);

        assert!(!pool.is_shutdown());
        pool.shutdown();
        assert!(pool.is_shutdown());
        pool.wait();
    }

    #[test]
    fn test_pool_categorizes_rule_match() {
        let db = Database::open_in_memory().unwrap();
        let pool = WorkerPool::new(setup(&db), 1);
        let receipt_id = insert_receipt(&db, "Shell Gas Station");

        pool.submit(QueueJob {
            queue_id: 1,
            receipt_id: receipt_id.clone(),
            attempts: 0,
        })
        .unwrap();

        let result = pool.recv_result().unwrap();
        assert!(matches!(result.disposition, Disposition::Categorized { .. }));

        let receipt = receipt_repo::find_by_id(&db, &receipt_id).unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Categorized);

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_drain_processes_queue() {
        let db = Database::open_in_memory().unwrap();
        let pool = WorkerPool::new(setup(&db), 2);

        let a = insert_receipt(&db, "Shell Gas Station");
        let b = insert_receipt(&db, "Hilton Garden Inn");
        queue_repo::enqueue(&db, &a, "2026-02-10T00:00:00Z").unwrap();
        queue_repo::enqueue(&db, &b, "2026-02-10T00:00:01Z").unwrap();

        let stats = drain_queue(&db, &pool, 3).unwrap();
        assert_eq!(stats.categorized, 2);
        assert_eq!(stats.dead_lettered, 0);
        assert_eq!(queue_repo::pending_count(&db).unwrap(), 0);

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_drain_dead_letters_after_max_attempts() {
        let db = Database::open_in_memory().unwrap();
        let pool = WorkerPool::new(setup(&db), 1);

        // No rule or keyword matches this merchant, and the model always
        // fails, so every attempt ends not-categorized.
        let receipt_id = insert_receipt(&db, "XYZ Mystery Store");
        queue_repo::enqueue(&db, &receipt_id, "2026-02-10T00:00:00Z").unwrap();

        let stats = drain_queue(&db, &pool, 2).unwrap();
        assert_eq!(stats.categorized, 0);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(queue_repo::pending_count(&db).unwrap(), 0);

        let dlq = queue_repo::list_dlq(&db).unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].receipt_id, receipt_id);
        assert_eq!(dlq[0].attempts, 2);

        // The receipt itself stays eligible for a later manual retry.
        let receipt = receipt_repo::find_by_id(&db, &receipt_id).unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::OcrDone);

        pool.shutdown();
        pool.wait();
    }
}
