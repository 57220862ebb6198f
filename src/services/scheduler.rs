//! Classification scheduler: owns the per-canvas state table and fans a
//! run's jobs out across a bounded pool of workers.
//!
//! The state table and the run queue are the only shared mutable state.
//! Both sit behind std mutexes that are never held across an await; the
//! classifier call is the only suspension point in a worker's loop.
//! Readers always get cloned snapshots, never live references.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::canvas::{CanvasState, CanvasStatus, JobDescriptor, Summary};
use crate::services::classifier::{ClassifierProvider, ImageClassifier, ProviderStatus};
use crate::services::scoring;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),
}

/// Result of an awaited `Scheduler::run` call.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunReport),
    /// A run was already active; the call had no effect.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub total: usize,
    pub classified: usize,
    pub errors: usize,
}

struct Table {
    /// Canvas ids in manifest order; key set of `entries`.
    order: Vec<String>,
    entries: HashMap<String, CanvasState>,
    last_run_error: Option<String>,
    last_run_finished_at: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    provider: Arc<dyn ClassifierProvider>,
    concurrency: usize,
    table: Mutex<Table>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(provider: Arc<dyn ClassifierProvider>, concurrency: usize) -> Self {
        Self {
            provider,
            concurrency: concurrency.max(1),
            table: Mutex::new(Table {
                order: Vec::new(),
                entries: HashMap::new(),
                last_run_error: None,
                last_run_finished_at: None,
            }),
            running: AtomicBool::new(false),
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, Table> {
        // Worker writes cannot leave the table inconsistent, so a panic
        // elsewhere while holding the lock is safe to recover from.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// (Re)build the state table from a fresh descriptor list. Replaces any
    /// prior table entirely; in-flight workers of an older run will find
    /// their ids either reset (still present) or gone (write discarded).
    pub fn initialize(&self, descriptors: Vec<JobDescriptor>) {
        let mut table = self.lock_table();
        table.order = descriptors.iter().map(|d| d.id.clone()).collect();
        table.entries = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.id.clone(), CanvasState::from_descriptor(descriptor)))
            .collect();
        table.last_run_error = None;
    }

    /// True exactly while a run's workers have not all finished.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_run_error(&self) -> Option<String> {
        self.lock_table().last_run_error.clone()
    }

    pub fn last_run_finished_at(&self) -> Option<DateTime<Utc>> {
        self.lock_table().last_run_finished_at
    }

    pub fn classifier_status(&self) -> ProviderStatus {
        self.provider.status()
    }

    /// Aggregate counts over the current table.
    pub fn summary(&self) -> Summary {
        let table = self.lock_table();
        let mut summary = Summary::default();
        for state in table.entries.values() {
            match state.status {
                CanvasStatus::Classified => summary.classified += 1,
                CanvasStatus::Pending | CanvasStatus::Classifying => summary.pending += 1,
                CanvasStatus::Error => summary.errors += 1,
                CanvasStatus::Skipped => {}
            }
        }
        summary
    }

    /// Consistent snapshot of every canvas state, in manifest order.
    pub fn snapshot(&self) -> Vec<CanvasState> {
        let table = self.lock_table();
        table
            .order
            .iter()
            .filter_map(|id| table.entries.get(id).cloned())
            .collect()
    }

    /// Threshold-filtered view: non-classified canvases stay visible so
    /// progress and failures can be watched; classified canvases appear
    /// when their confidence clears `threshold_percent`.
    pub fn visible_entries(&self, threshold_percent: u8) -> Vec<CanvasState> {
        self.snapshot()
            .into_iter()
            .filter(|state| {
                if state.status != CanvasStatus::Classified {
                    return true;
                }
                state
                    .confidence
                    .is_some_and(|confidence| confidence * 100.0 >= f64::from(threshold_percent))
            })
            .collect()
    }

    /// Execute one classification run over the current classifiable set.
    ///
    /// No-op while a run is already active. Resets every non-skipped canvas
    /// to pending, then drains the job queue with `min(concurrency, jobs)`
    /// workers. Per-canvas failures are isolated; only a classifier that
    /// never becomes available fails the run as a whole, leaving all
    /// classifiable canvases pending.
    pub async fn run(self: Arc<Self>) -> Result<RunOutcome, RunError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(RunOutcome::AlreadyRunning);
        }

        let run_id = Uuid::new_v4();
        let queue: Vec<String> = {
            let mut table = self.lock_table();
            table.last_run_error = None;
            let Table { order, entries, .. } = &mut *table;
            for id in order.iter() {
                if let Some(state) = entries.get_mut(id) {
                    state.reset_for_run();
                }
            }
            order
                .iter()
                .filter(|id| entries.get(*id).is_some_and(|state| state.image_url.is_some()))
                .cloned()
                .collect()
        };

        let total = queue.len();
        if total == 0 {
            tracing::info!(%run_id, "no classifiable canvases, run complete");
            return Ok(RunOutcome::Completed(self.finish_run(run_id, None, 0, 0, 0)));
        }

        let classifier = match self.provider.get().await {
            Ok(classifier) => classifier,
            Err(e) => {
                let message = e.to_string();
                tracing::error!(%run_id, error = %message, "run aborted, classifier unavailable");
                self.finish_run(run_id, Some(message.clone()), total, 0, 0);
                return Err(RunError::ClassifierUnavailable(message));
            }
        };

        let workers = self.concurrency.min(total);
        tracing::info!(%run_id, jobs = total, workers, "starting classification run");
        metrics::gauge!("classification_queue_depth").set(total as f64);

        let queue = Arc::new(Mutex::new(VecDeque::from(queue)));
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let scheduler = Arc::clone(&self);
                let queue = Arc::clone(&queue);
                let classifier = Arc::clone(&classifier);
                tokio::spawn(async move { scheduler.worker_loop(run_id, worker, queue, classifier).await })
            })
            .collect();

        let mut classified = 0;
        let mut errors = 0;
        for handle in futures::future::join_all(handles).await {
            match handle {
                Ok((worker_classified, worker_errors)) => {
                    classified += worker_classified;
                    errors += worker_errors;
                }
                Err(e) => {
                    tracing::error!(%run_id, error = %e, "classification worker panicked");
                }
            }
        }

        let report = self.finish_run(run_id, None, total, classified, errors);
        tracing::info!(%run_id, classified, errors, "classification run complete");
        Ok(RunOutcome::Completed(report))
    }

    /// Record the run's end and clear the running flag. The table update
    /// happens first so a reader observing `is_running() == false` sees the
    /// final state.
    fn finish_run(
        &self,
        run_id: Uuid,
        error: Option<String>,
        total: usize,
        classified: usize,
        errors: usize,
    ) -> RunReport {
        {
            let mut table = self.lock_table();
            table.last_run_error = error;
            table.last_run_finished_at = Some(Utc::now());
        }
        metrics::gauge!("classification_queue_depth").set(0.0);
        self.running.store(false, Ordering::SeqCst);
        RunReport {
            run_id,
            total,
            classified,
            errors,
        }
    }

    /// One worker: atomically pop the next canvas id, mark it classifying,
    /// await the classifier, write the terminal status back. Ids no longer
    /// present in the table (a concurrent re-initialize) are dropped on the
    /// floor rather than resurrected.
    async fn worker_loop(
        &self,
        run_id: Uuid,
        worker: usize,
        queue: Arc<Mutex<VecDeque<String>>>,
        classifier: Arc<dyn ImageClassifier>,
    ) -> (usize, usize) {
        let mut classified = 0;
        let mut errors = 0;

        loop {
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(canvas_id) = next else { break };

            // Claim the canvas and capture its image url in one critical
            // section, so no two workers ever classify the same id.
            let image_url = {
                let mut table = self.lock_table();
                match table.entries.get_mut(&canvas_id) {
                    Some(state) => match state.image_url.clone() {
                        Some(url) => {
                            state.status = CanvasStatus::Classifying;
                            state.error = None;
                            Some(url)
                        }
                        None => None,
                    },
                    None => None,
                }
            };
            let Some(image_url) = image_url else {
                tracing::debug!(%run_id, worker, canvas_id = %canvas_id, "canvas gone before claim, skipping");
                continue;
            };

            let start = Instant::now();
            let outcome = classifier.classify(&image_url).await;
            metrics::histogram!("classification_seconds").record(start.elapsed().as_secs_f64());
            metrics::gauge!("classification_queue_depth").decrement(1.0);

            let mut table = self.lock_table();
            let Some(state) = table.entries.get_mut(&canvas_id) else {
                tracing::debug!(%run_id, worker, canvas_id = %canvas_id, "canvas gone, discarding result");
                continue;
            };

            match outcome {
                Ok(scores) => {
                    let verdict = scoring::map_scores(&scores);
                    state.status = CanvasStatus::Classified;
                    state.predicted_label = Some(verdict.label);
                    state.confidence = Some(verdict.confidence);
                    state.error = None;
                    classified += 1;
                    metrics::counter!("classification_jobs_completed").increment(1);
                    tracing::debug!(
                        %run_id,
                        worker,
                        canvas_id = %canvas_id,
                        label = %verdict.label,
                        confidence = verdict.confidence,
                        "canvas classified"
                    );
                }
                Err(e) => {
                    state.status = CanvasStatus::Error;
                    state.predicted_label = None;
                    state.confidence = None;
                    state.error = Some(e.to_string());
                    errors += 1;
                    metrics::counter!("classification_jobs_failed").increment(1);
                    tracing::warn!(%run_id, worker, canvas_id = %canvas_id, error = %e, "canvas classification failed");
                }
            }
        }

        (classified, errors)
    }
}
