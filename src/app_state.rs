use std::sync::atomic::AtomicU8;
use std::sync::Arc;

use crate::services::scheduler::Scheduler;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    /// Current confidence threshold (percent) for the filtered canvas view.
    pub threshold: Arc<AtomicU8>,
}

impl AppState {
    pub fn new(scheduler: Scheduler, initial_threshold: u8) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            threshold: Arc::new(AtomicU8::new(initial_threshold.min(100))),
        }
    }
}
