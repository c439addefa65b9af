use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Named pipeline stages, in the order the facade walks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    RuleParsing,
    ProviderInit,
    ProviderStart,
    ProviderPrepare,
    RuleEvaluation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RuleParsing => "rule_parsing",
            Stage::ProviderInit => "provider_init",
            Stage::ProviderStart => "provider_start",
            Stage::ProviderPrepare => "provider_prepare",
            Stage::RuleEvaluation => "rule_evaluation",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress update on the bus.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
    pub completed: usize,
    pub total: usize,
}

impl ProgressEvent {
    pub fn stage_started(stage: Stage) -> Self {
        ProgressEvent {
            stage,
            message: String::new(),
            completed: 0,
            total: 0,
        }
    }
}

/// Receives progress updates. Implementations must tolerate concurrent
/// delivery from multiple producers.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Handle for removing a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Multi-producer, multi-subscriber progress fanout.
///
/// Publication snapshots the subscriber list before delivering, so
/// unsubscribing concurrently with a publish is safe.
#[derive(Default)]
pub struct ProgressBus {
    subscribers: Mutex<Vec<(u64, Arc<dyn ProgressReporter>)>>,
    next_id: AtomicU64,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, reporter: Arc<dyn ProgressReporter>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push((id, reporter));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .retain(|(existing, _)| *existing != id.0);
    }

    pub fn unsubscribe_all(&self) {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .clear();
    }

    pub fn publish(&self, event: ProgressEvent) {
        let snapshot: Vec<Arc<dyn ProgressReporter>> = self
            .subscribers
            .lock()
            .expect("subscriber list poisoned")
            .iter()
            .map(|(_, reporter)| reporter.clone())
            .collect();
        for reporter in snapshot {
            reporter.report(&event);
        }
    }
}

/// Coalesces high-frequency updates to at most one per stage per interval.
/// Stage transitions always pass through.
pub struct Throttled<R> {
    inner: R,
    interval: Duration,
    last: Mutex<BTreeMap<Stage, Instant>>,
}

impl<R: ProgressReporter> Throttled<R> {
    pub fn new(inner: R, interval: Duration) -> Self {
        Throttled {
            inner,
            interval,
            last: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<R: ProgressReporter> ProgressReporter for Throttled<R> {
    fn report(&self, event: &ProgressEvent) {
        let now = Instant::now();
        {
            let mut last = self.last.lock().expect("throttle state poisoned");
            match last.get(&event.stage) {
                // Final updates always flush so a stage never ends dark
                Some(at)
                    if now.duration_since(*at) < self.interval
                        && event.completed < event.total =>
                {
                    return;
                }
                _ => {
                    last.insert(event.stage, now);
                }
            }
        }
        self.inner.report(event);
    }
}
