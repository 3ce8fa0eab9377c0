//! Latency collector
//!
//! At most one debug session is active at a time. A session names the
//! samples it expects and a deadline; it finalizes exactly once, either when
//! the last required sample arrives or when the deadline fires.
//!
//! Locking:
//! - `active` guards only the pointer to the current session
//! - each session guards its own samples and `closed` flag
//! - the completion handler runs with neither lock held, so it may start a
//!   new session or read samples without deadlocking

pub mod report;

pub use report::{LatencyReport, NO_DATA, UNIT};

use crate::infrastructure::metrics::MetricsCollector;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// Callback invoked once per finalized session
pub type CompletionHandler = Arc<dyn Fn(&LatencyReport) + Send + Sync>;

#[derive(Default)]
struct SampleState {
    values: HashMap<String, i64>,
    closed: bool,
}

struct CollectorSession {
    required: Vec<String>,
    samples: Mutex<SampleState>,
    complete: Notify,
    done: watch::Sender<Option<Arc<LatencyReport>>>,
    deadline: Instant,
}

impl CollectorSession {
    fn new(required: Vec<String>, timeout: Duration) -> Self {
        let (done, _) = watch::channel(None);
        Self {
            required,
            samples: Mutex::new(SampleState::default()),
            complete: Notify::new(),
            done,
            deadline: Instant::now() + timeout,
        }
    }

    fn is_complete(&self, state: &SampleState) -> bool {
        self.required.iter().all(|n| state.values.contains_key(n))
    }

    fn add(&self, name: &str, value: i64) -> bool {
        let mut state = self.samples.lock();
        if state.closed || Instant::now() >= self.deadline {
            return false;
        }
        state.values.insert(name.to_string(), value);
        if self.is_complete(&state) {
            state.closed = true;
            // notify_one stores a permit if the waiter has not parked yet
            self.complete.notify_one();
        }
        true
    }
}

/// Shared latency collector service
pub struct LatencyCollector {
    active: Mutex<Option<Arc<CollectorSession>>>,
    handler: RwLock<Option<CompletionHandler>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl LatencyCollector {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            handler: RwLock::new(None),
            metrics: None,
        }
    }

    /// Collector that records session outcomes
    pub fn with_metrics(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new()
        }
    }

    /// Register the completion callback, replacing any previous one
    pub fn on_complete<F>(&self, handler: F)
    where
        F: Fn(&LatencyReport) + Send + Sync + 'static,
    {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Begin a session. Returns false if one is already active.
    ///
    /// Spawns the deadline waiter, so it must be called inside a runtime.
    pub fn start_session<I, S>(self: &Arc<Self>, required: I, timeout: Duration) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut active = self.active.lock();
        if active.is_some() {
            crate::log_collector!(tracing::Level::WARN, "session already active, start ignored");
            return false;
        }

        let mut seen = std::collections::HashSet::new();
        let required: Vec<String> = required
            .into_iter()
            .map(Into::into)
            .filter(|name: &String| seen.insert(name.clone()))
            .collect();
        let session = Arc::new(CollectorSession::new(required, timeout));
        *active = Some(session.clone());
        drop(active);

        crate::log_collector!(
            tracing::Level::INFO,
            required = session.required.len(),
            timeout_ms = timeout.as_millis() as u64,
            "debug session started"
        );

        let collector = Arc::clone(self);
        tokio::spawn(async move { collector.run_session(session).await });
        true
    }

    /// Record a sample in the active session
    ///
    /// Returns false when no session is active or it already finalized.
    pub fn add_sample(&self, name: &str, value: i64) -> bool {
        let Some(session) = self.current() else {
            crate::log_collector!(tracing::Level::DEBUG, name, "sample without active session");
            return false;
        };
        let accepted = session.add(name, value);
        if accepted {
            crate::log_collector!(tracing::Level::DEBUG, name, value, "sample recorded");
        } else {
            crate::log_collector!(tracing::Level::DEBUG, name, "late sample rejected");
        }
        accepted
    }

    /// Value of a sample in the active session, if set
    pub fn get_sample(&self, name: &str) -> Option<i64> {
        let session = self.current()?;
        let state = session.samples.lock();
        state.values.get(name).copied()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Resolves with the report of the session active at call time
    ///
    /// The session is captured when this is called, not when the future is
    /// first polled. Resolves to `None` immediately if nothing is active.
    pub fn wait_for_completion(
        &self,
    ) -> impl Future<Output = Option<Arc<LatencyReport>>> + Send + 'static {
        let rx = self.current().map(|s| s.done.subscribe());
        async move {
            let mut rx = rx?;
            let report = (*rx.wait_for(Option::is_some).await.ok()?).clone();
            report
        }
    }

    fn current(&self) -> Option<Arc<CollectorSession>> {
        self.active.lock().clone()
    }

    async fn run_session(&self, session: Arc<CollectorSession>) {
        let already_complete = {
            let state = session.samples.lock();
            session.is_complete(&state)
        };
        if !already_complete {
            tokio::select! {
                _ = session.complete.notified() => {}
                _ = tokio::time::sleep_until(session.deadline) => {}
            }
        }
        self.finalize(&session);
    }

    fn finalize(&self, session: &Arc<CollectorSession>) {
        let report = {
            let mut state = session.samples.lock();
            state.closed = true;
            LatencyReport::from_samples(&session.required, &state.values)
        };

        {
            let mut active = self.active.lock();
            if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, session)) {
                *active = None;
            }
        }

        crate::log_collector!(
            tracing::Level::INFO,
            timed_out = report.timed_out(),
            "debug session finished"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_collector_finished(report.timed_out());
        }

        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(&report);
        }

        session.done.send_replace(Some(Arc::new(report)));
    }
}

impl Default for LatencyCollector {
    fn default() -> Self {
        Self::new()
    }
}
