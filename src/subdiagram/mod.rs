//! Parallel Sub-diagram Manager (C9) — bounds the number of concurrently
//! in-flight sub-diagram executions with a semaphore, queuing the rest FIFO.

use crate::envelope::{Envelope, EnvelopeFactory};
use crate::types::{ExecutionId, NodeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};

/// Interval `wait_for`/`wait_all` poll the shared stats table at.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Outcome of one sub-diagram submission.
#[derive(Debug, Clone)]
pub struct SubdiagramResult {
    pub node_id: NodeId,
    pub output: Envelope,
    pub failed: bool,
    pub duration_ms: u64,
}

/// Totals returned by [`SubdiagramManager::get_execution_summary`].
#[derive(Debug, Clone, Default)]
pub struct SubdiagramSummary {
    pub completed: usize,
    pub failed: usize,
    pub queue_used: bool,
    pub avg_duration_ms: f64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
}

#[derive(Default)]
struct Stats {
    durations_ms: Vec<u64>,
    completed: usize,
    failed: usize,
    queue_used: bool,
    submitted: usize,
    results: HashMap<NodeId, SubdiagramResult>,
}

/// Bounds concurrent sub-diagram executions. `max_parallel` permits are
/// handed out FIFO by `tokio::sync::Semaphore`; a submission beyond the cap
/// simply awaits a permit rather than being tracked in an explicit queue
/// data structure — `Semaphore` already serves callers in arrival order.
pub struct SubdiagramManager {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    max_parallel: usize,
    stats: Arc<Mutex<Stats>>,
    backup_warned: Arc<AtomicBool>,
}

impl std::fmt::Debug for SubdiagramManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubdiagramManager")
            .field("max_parallel", &self.max_parallel)
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}

impl SubdiagramManager {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallel)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_parallel,
            stats: Arc::new(Mutex::new(Stats::default())),
            backup_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs `task` once a permit is available, recording its outcome. If the
    /// cap is already saturated when this is called, the submission queues
    /// behind the semaphore and a single warning is logged the first time
    /// that happens.
    pub async fn submit<F, Fut>(
        &self,
        node_id: NodeId,
        execution_id: ExecutionId,
        task: F,
    ) -> oneshot::Receiver<SubdiagramResult>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Envelope, String>> + Send + 'static,
    {
        {
            let mut stats = self.stats.lock().expect("stats lock poisoned");
            stats.submitted += 1;
            if self.in_flight.load(Ordering::SeqCst) >= self.max_parallel
                && !self.backup_warned.swap(true, Ordering::SeqCst)
            {
                tracing::warn!(max_parallel = self.max_parallel, "subdiagram_queue_backed_up");
                stats.queue_used = true;
            }
        }

        let (tx, rx) = oneshot::channel();
        tokio::spawn(run_submission(
            self.semaphore.clone(),
            self.in_flight.clone(),
            self.stats.clone(),
            node_id,
            execution_id,
            task,
            tx,
        ));

        rx
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Polls the completed/failed results table until `node_id`'s submission
    /// has finished, then returns it. A failed submission is already an
    /// error envelope carrying `meta.execution_status = "failed"` by the
    /// time it lands here — `run_submission` performs that conversion.
    pub async fn wait_for(&self, node_id: &NodeId) -> SubdiagramResult {
        loop {
            if let Some(result) = self
                .stats
                .lock()
                .expect("stats lock poisoned")
                .results
                .get(node_id)
                .cloned()
            {
                return result;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Blocks until every submission made so far — queued or in-flight —
    /// has finished, then returns all of their results.
    pub async fn wait_all(&self) -> Vec<SubdiagramResult> {
        loop {
            {
                let stats = self.stats.lock().expect("stats lock poisoned");
                if stats.completed + stats.failed >= stats.submitted {
                    return stats.results.values().cloned().collect();
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn get_execution_summary(&self) -> SubdiagramSummary {
        let stats = self.stats.lock().expect("stats lock poisoned");
        let count = stats.durations_ms.len();
        let sum: u64 = stats.durations_ms.iter().sum();
        SubdiagramSummary {
            completed: stats.completed,
            failed: stats.failed,
            queue_used: stats.queue_used,
            avg_duration_ms: if count == 0 { 0.0 } else { sum as f64 / count as f64 },
            min_duration_ms: stats.durations_ms.iter().copied().min().unwrap_or(0),
            max_duration_ms: stats.durations_ms.iter().copied().max().unwrap_or(0),
        }
    }
}

async fn run_submission<F, Fut>(
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    stats: Arc<Mutex<Stats>>,
    node_id: NodeId,
    execution_id: ExecutionId,
    task: F,
    tx: oneshot::Sender<SubdiagramResult>,
) where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Envelope, String>>,
{
    let _permit = semaphore
        .acquire_owned()
        .await
        .expect("semaphore never closed while manager is alive");
    in_flight.fetch_add(1, Ordering::SeqCst);

    let started = Instant::now();
    let outcome = task().await;
    let duration_ms = started.elapsed().as_millis() as u64;
    in_flight.fetch_sub(1, Ordering::SeqCst);

    let result = match outcome {
        Ok(output) => SubdiagramResult {
            node_id,
            output,
            failed: false,
            duration_ms,
        },
        Err(message) => {
            let error = EnvelopeFactory::error(message, "SubdiagramError", execution_id, node_id.clone())
                .with_meta("execution_status", "failed");
            SubdiagramResult {
                node_id,
                output: error,
                failed: true,
                duration_ms,
            }
        }
    };

    {
        let mut stats = stats.lock().expect("stats lock poisoned");
        stats.durations_ms.push(result.duration_ms);
        if result.failed {
            stats.failed += 1;
        } else {
            stats.completed += 1;
        }
        // Keyed by node_id so wait_for can look a submission up without
        // holding onto the oneshot::Receiver submit() returned. A node
        // submitted more than once (e.g. re-entering a loop) overwrites its
        // prior entry with the latest result, same as `last_outputs` does.
        stats.results.insert(result.node_id.clone(), result.clone());
    }

    let _ = tx.send(result);
}
