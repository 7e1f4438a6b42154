//! Per-run shared state handed to every component.

use crate::events::{Event, EventSink};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Advisory stop request shared between the main flow, the liveness monitor
/// and signal handlers. Setting it never interrupts anything by itself;
/// consumers poll it at safe boundaries.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns `true` if this call flipped it.
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owned by the main flow; cloned into monitors and hooks.
#[derive(Clone)]
pub struct RunContext {
    run_id: String,
    stop: StopFlag,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("stop", &self.stop.is_set())
            .finish_non_exhaustive()
    }
}

impl RunContext {
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { run_id: Uuid::new_v4().to_string(), stop: StopFlag::new(), events }
    }

    #[must_use]
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop.is_set()
    }

    pub fn emit(&self, event: &Event) {
        self.events.emit(event);
    }

    /// Sets the stop flag and reports why. Only the first request is
    /// reported.
    pub fn request_stop(&self, reason: &str) -> bool {
        let first = self.stop.set();
        if first {
            tracing::info!(reason, "stop requested");
            self.emit(&Event::StopRequested { reason: reason.to_string() });
        }
        first
    }
}
