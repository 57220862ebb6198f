//! Scheduler integration tests.
//!
//! These run fully in-process against scripted classifier providers; no
//! model, network, or server is required.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_test::assert_ok;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use illustration_scan::models::canvas::{
    CanvasStatus, JobDescriptor, PredictedLabel, NO_IMAGE_REFERENCE,
};
use illustration_scan::services::classifier::{
    ClassifierError, ClassifierProvider, ImageClassifier, LabelScore, ProviderStatus,
};
use illustration_scan::services::scheduler::{RunError, RunOutcome, Scheduler};

fn descriptor(id: &str, image_url: Option<&str>) -> JobDescriptor {
    JobDescriptor {
        id: id.to_string(),
        label: format!("Canvas {id}"),
        thumbnail: None,
        image_url: image_url.map(str::to_string),
    }
}

/// n classifiable canvases with image urls derived from their ids.
fn classifiable(n: usize) -> Vec<JobDescriptor> {
    (0..n)
        .map(|i| {
            let id = format!("canvas-{i}");
            let url = format!("https://img.test/{i}.jpg");
            descriptor(&id, Some(&url))
        })
        .collect()
}

fn scores(illustrated: f64, not_illustrated: f64) -> Vec<LabelScore> {
    vec![
        LabelScore {
            label: "illustrated".to_string(),
            score: illustrated,
        },
        LabelScore {
            label: "not-illustrated".to_string(),
            score: not_illustrated,
        },
    ]
}

/// Replays a fixed outcome per image url.
struct ScriptedClassifier {
    outcomes: HashMap<String, Result<Vec<LabelScore>, String>>,
}

#[async_trait]
impl ImageClassifier for ScriptedClassifier {
    async fn classify(&self, image_url: &str) -> Result<Vec<LabelScore>, ClassifierError> {
        match self.outcomes.get(image_url) {
            Some(Ok(scores)) => Ok(scores.clone()),
            Some(Err(message)) => Err(ClassifierError::Api(message.clone())),
            None => Err(ClassifierError::Api(format!("unscripted url {image_url}"))),
        }
    }
}

/// Provider whose classifier is always ready.
struct ReadyProvider(Arc<dyn ImageClassifier>);

#[async_trait]
impl ClassifierProvider for ReadyProvider {
    async fn get(&self) -> Result<Arc<dyn ImageClassifier>, ClassifierError> {
        Ok(Arc::clone(&self.0))
    }

    fn status(&self) -> ProviderStatus {
        ProviderStatus::Ready
    }
}

/// Provider that never produces a classifier.
struct UnavailableProvider;

#[async_trait]
impl ClassifierProvider for UnavailableProvider {
    async fn get(&self) -> Result<Arc<dyn ImageClassifier>, ClassifierError> {
        Err(ClassifierError::Unavailable("model failed to load".to_string()))
    }

    fn status(&self) -> ProviderStatus {
        ProviderStatus::Unavailable
    }
}

fn scheduler_with(classifier: impl ImageClassifier + 'static, concurrency: usize) -> Arc<Scheduler> {
    Arc::new(Scheduler::new(
        Arc::new(ReadyProvider(Arc::new(classifier))),
        concurrency,
    ))
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn test_initialize_sets_pending_and_skipped() {
    let scheduler = scheduler_with(
        ScriptedClassifier {
            outcomes: HashMap::new(),
        },
        3,
    );

    let mut jobs = classifiable(3);
    jobs.push(descriptor("canvas-no-image-1", None));
    jobs.push(descriptor("canvas-no-image-2", None));
    scheduler.initialize(jobs);

    let summary = scheduler.summary();
    assert_eq!(summary.classified, 0);
    assert_eq!(summary.pending, 3);
    assert_eq!(summary.errors, 0);

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.len(), 5);
    for state in &snapshot {
        if state.image_url.is_some() {
            assert_eq!(state.status, CanvasStatus::Pending);
            assert!(state.error.is_none());
        } else {
            assert_eq!(state.status, CanvasStatus::Skipped);
            assert_eq!(state.error.as_deref(), Some(NO_IMAGE_REFERENCE));
        }
        assert!(state.predicted_label.is_none());
        assert!(state.confidence.is_none());
    }
}

#[tokio::test]
async fn test_successful_run_reaches_terminal_states() {
    let outcomes = HashMap::from([
        ("https://img.test/0.jpg".to_string(), Ok(scores(0.9, 0.1))),
        ("https://img.test/1.jpg".to_string(), Ok(scores(0.2, 0.8))),
        ("https://img.test/2.jpg".to_string(), Ok(scores(0.5, 0.5))),
    ]);
    let scheduler = scheduler_with(ScriptedClassifier { outcomes }, 3);

    let mut jobs = classifiable(3);
    jobs.push(descriptor("canvas-no-image", None));
    scheduler.initialize(jobs);

    let outcome = tokio_test::assert_ok!(scheduler.clone().run().await);
    let RunOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(report.total, 3);
    assert_eq!(report.classified, 3);
    assert_eq!(report.errors, 0);
    assert!(!scheduler.is_running());
    assert!(scheduler.last_run_error().is_none());
    assert!(scheduler.last_run_finished_at().is_some());

    let summary = scheduler.summary();
    assert_eq!(summary.classified, 3);
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.errors, 0);

    // Snapshot preserves manifest order.
    let snapshot = scheduler.snapshot();
    let ids: Vec<_> = snapshot.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["canvas-0", "canvas-1", "canvas-2", "canvas-no-image"]);

    assert_eq!(snapshot[0].predicted_label, Some(PredictedLabel::Illustrated));
    assert_eq!(snapshot[0].confidence, Some(0.9));
    assert_eq!(snapshot[1].predicted_label, Some(PredictedLabel::NotIllustrated));
    assert_eq!(snapshot[1].confidence, Some(0.2));
    // Ties go to illustrated.
    assert_eq!(snapshot[2].predicted_label, Some(PredictedLabel::Illustrated));
    // The skipped canvas never moved.
    assert_eq!(snapshot[3].status, CanvasStatus::Skipped);
}

#[tokio::test]
async fn test_per_canvas_failure_is_isolated() {
    let outcomes = HashMap::from([
        ("https://img.test/0.jpg".to_string(), Ok(scores(0.9, 0.1))),
        (
            "https://img.test/1.jpg".to_string(),
            Err("image decode failed".to_string()),
        ),
        ("https://img.test/2.jpg".to_string(), Ok(scores(0.7, 0.3))),
    ]);
    let scheduler = scheduler_with(ScriptedClassifier { outcomes }, 2);
    scheduler.initialize(classifiable(3));

    let outcome = scheduler.clone().run().await.expect("run succeeds");
    let RunOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(report.classified, 2);
    assert_eq!(report.errors, 1);

    let summary = scheduler.summary();
    assert_eq!(summary.classified, 2);
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.errors, 1);

    let snapshot = scheduler.snapshot();
    let failed = &snapshot[1];
    assert_eq!(failed.status, CanvasStatus::Error);
    assert!(failed.error.as_deref().unwrap().contains("image decode failed"));
    assert!(failed.predicted_label.is_none());
    assert!(failed.confidence.is_none());
}

#[tokio::test]
async fn test_unavailable_classifier_fails_run_level_only() {
    let scheduler = Arc::new(Scheduler::new(Arc::new(UnavailableProvider), 3));
    scheduler.initialize(classifiable(4));

    let err = scheduler.clone().run().await.expect_err("run must fail");
    assert!(matches!(err, RunError::ClassifierUnavailable(_)));
    assert!(!scheduler.is_running());
    assert!(scheduler
        .last_run_error()
        .expect("run error recorded")
        .contains("unavailable"));

    // No canvas was attempted: everything classifiable stays pending.
    let summary = scheduler.summary();
    assert_eq!(summary.classified, 0);
    assert_eq!(summary.pending, 4);
    assert_eq!(summary.errors, 0);
    for state in scheduler.snapshot() {
        assert_eq!(state.status, CanvasStatus::Pending);
    }
}

/// Fails the first classification of each url, succeeds afterwards.
struct FlakyOnceClassifier {
    seen: Mutex<HashSet<String>>,
}

#[async_trait]
impl ImageClassifier for FlakyOnceClassifier {
    async fn classify(&self, image_url: &str) -> Result<Vec<LabelScore>, ClassifierError> {
        let first_attempt = self
            .seen
            .lock()
            .expect("seen set lock")
            .insert(image_url.to_string());
        if first_attempt {
            Err(ClassifierError::Api("transient upstream error".to_string()))
        } else {
            Ok(scores(0.8, 0.2))
        }
    }
}

#[tokio::test]
async fn test_rerun_clears_prior_errors_and_overwrites() {
    let scheduler = scheduler_with(
        FlakyOnceClassifier {
            seen: Mutex::new(HashSet::new()),
        },
        3,
    );
    scheduler.initialize(classifiable(3));

    scheduler.clone().run().await.expect("first run completes");
    let summary = scheduler.summary();
    assert_eq!(summary.errors, 3);
    assert_eq!(summary.classified, 0);

    scheduler.clone().run().await.expect("second run completes");
    let summary = scheduler.summary();
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.classified, 3);
    for state in scheduler.snapshot() {
        assert_eq!(state.status, CanvasStatus::Classified);
        assert!(state.error.is_none());
        assert_eq!(state.confidence, Some(0.8));
    }
}

/// Blocks every classification until the gate receives permits.
struct GatedClassifier {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl ImageClassifier for GatedClassifier {
    async fn classify(&self, _image_url: &str) -> Result<Vec<LabelScore>, ClassifierError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ClassifierError::Api("gate closed".to_string()))?;
        Ok(scores(0.6, 0.4))
    }
}

#[tokio::test]
async fn test_trigger_while_running_is_noop() {
    let gate = Arc::new(Semaphore::new(0));
    let scheduler = scheduler_with(GatedClassifier { gate: Arc::clone(&gate) }, 2);
    scheduler.initialize(classifiable(2));

    let first = tokio::spawn(scheduler.clone().run());
    {
        let scheduler = Arc::clone(&scheduler);
        wait_until("first run active", move || scheduler.is_running()).await;
    }

    // Re-entrant trigger returns immediately without touching the table.
    let second = scheduler.clone().run().await.expect("no-op run");
    assert_eq!(second, RunOutcome::AlreadyRunning);
    assert!(scheduler.is_running());

    gate.add_permits(2);
    let outcome = first.await.expect("join").expect("first run completes");
    let RunOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(report.classified, 2);
    assert!(!scheduler.is_running());
}

/// Tracks the peak number of concurrent classify calls.
struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl ImageClassifier for ConcurrencyProbe {
    async fn classify(&self, _image_url: &str) -> Result<Vec<LabelScore>, ClassifierError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        sleep(Duration::from_millis(10)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(scores(0.9, 0.1))
    }
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let peak = Arc::new(AtomicUsize::new(0));
    let scheduler = scheduler_with(
        ConcurrencyProbe {
            current: AtomicUsize::new(0),
            peak: Arc::clone(&peak),
        },
        3,
    );
    scheduler.initialize(classifiable(10));

    scheduler.clone().run().await.expect("run completes");

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded limit 3");
    assert_eq!(scheduler.summary().classified, 10);
}

#[tokio::test]
async fn test_reinitialize_discards_stale_worker_writes() {
    let gate = Arc::new(Semaphore::new(0));
    let scheduler = scheduler_with(GatedClassifier { gate: Arc::clone(&gate) }, 1);
    scheduler.initialize(vec![descriptor("canvas-old", Some("https://img.test/old.jpg"))]);

    let run = tokio::spawn(scheduler.clone().run());
    {
        let scheduler = Arc::clone(&scheduler);
        wait_until("worker claims the canvas", move || {
            scheduler
                .snapshot()
                .first()
                .is_some_and(|s| s.status == CanvasStatus::Classifying)
        })
        .await;
    }

    // Source list changes mid-flight: the table is rebuilt around a new id.
    scheduler.initialize(vec![descriptor("canvas-new", Some("https://img.test/new.jpg"))]);

    gate.add_permits(1);
    run.await.expect("join").expect("run completes");

    // The in-flight result for canvas-old was discarded, not resurrected,
    // and the rebuilt entry is untouched.
    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, "canvas-new");
    assert_eq!(snapshot[0].status, CanvasStatus::Pending);
    assert!(snapshot[0].predicted_label.is_none());
}

#[tokio::test]
async fn test_filter_monotonic_and_keeps_non_classified_visible() {
    let outcomes = HashMap::from([
        ("https://img.test/0.jpg".to_string(), Ok(scores(0.9, 0.1))),
        ("https://img.test/1.jpg".to_string(), Ok(scores(0.4, 0.6))),
        (
            "https://img.test/2.jpg".to_string(),
            Err("broken image".to_string()),
        ),
    ]);
    let scheduler = scheduler_with(ScriptedClassifier { outcomes }, 3);
    let mut jobs = classifiable(3);
    jobs.push(descriptor("canvas-skipped", None));
    scheduler.initialize(jobs);
    scheduler.clone().run().await.expect("run completes");

    let ids = |threshold: u8| -> Vec<String> {
        scheduler
            .visible_entries(threshold)
            .into_iter()
            .map(|s| s.id)
            .collect()
    };

    // Threshold 0 shows everything.
    assert_eq!(ids(0).len(), 4);
    // Threshold 50 drops the 0.4-confidence canvas only.
    let at_50 = ids(50);
    assert!(!at_50.contains(&"canvas-1".to_string()));
    assert!(at_50.contains(&"canvas-0".to_string()));
    // Error and skipped canvases stay visible at any threshold.
    let at_95 = ids(95);
    assert!(at_95.contains(&"canvas-2".to_string()));
    assert!(at_95.contains(&"canvas-skipped".to_string()));
    assert!(!at_95.contains(&"canvas-0".to_string()));

    // Monotonicity: raising the threshold only ever shrinks the visible set.
    for (low, high) in [(0u8, 50u8), (50, 95), (95, 100)] {
        let low_ids: HashSet<_> = ids(low).into_iter().collect();
        let high_ids: HashSet<_> = ids(high).into_iter().collect();
        assert!(high_ids.is_subset(&low_ids));
    }
}

#[tokio::test]
async fn test_empty_classifiable_set_completes_immediately() {
    let scheduler = scheduler_with(
        ScriptedClassifier {
            outcomes: HashMap::new(),
        },
        3,
    );
    scheduler.initialize(vec![
        descriptor("canvas-a", None),
        descriptor("canvas-b", None),
    ]);

    let outcome = scheduler.clone().run().await.expect("run completes");
    let RunOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(report.total, 0);
    assert!(!scheduler.is_running());

    let summary = scheduler.summary();
    assert_eq!(summary.classified, 0);
    assert_eq!(summary.pending, 0);
    assert_eq!(summary.errors, 0);
}
