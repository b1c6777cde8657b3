use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use super::Middleware;
use crate::dispatcher::DispatchOutcome;
use crate::models::{ApiError, CallModel};

/// Middleware for collecting Prometheus-compatible dispatch metrics
///
/// All counters are atomics; per-app counts live in a `DashMap` so
/// concurrent dispatches never contend on a global lock.
///
/// Metrics collected:
/// - Total dispatches, async acknowledgements, sync completions, failures
/// - Backpressure rejections (busy / timeout)
/// - Average dispatch latency
/// - Coroutine stack size
/// - Top-level requests (health, metrics, call lookups)
pub struct MetricsMiddleware {
    dispatch_count: AtomicUsize,
    enqueued_count: AtomicUsize,
    completed_count: AtomicUsize,
    failed_count: AtomicUsize,
    backpressure_count: AtomicUsize,
    total_latency_ns: AtomicU64,
    stack_size: AtomicUsize,
    top_level_requests: AtomicUsize,
    per_app: DashMap<String, AtomicUsize>,
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self {
            dispatch_count: AtomicUsize::new(0),
            enqueued_count: AtomicUsize::new(0),
            completed_count: AtomicUsize::new(0),
            failed_count: AtomicUsize::new(0),
            backpressure_count: AtomicUsize::new(0),
            total_latency_ns: AtomicU64::new(0),
            stack_size: AtomicUsize::new(0),
            top_level_requests: AtomicUsize::new(0),
            per_app: DashMap::new(),
        }
    }
}

impl MetricsMiddleware {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dispatch_count(&self) -> usize {
        self.dispatch_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn enqueued_count(&self) -> usize {
        self.enqueued_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn backpressure_count(&self) -> usize {
        self.backpressure_count.load(Ordering::Relaxed)
    }

    /// Dispatches seen for one application.
    #[must_use]
    pub fn app_dispatch_count(&self, app: &str) -> usize {
        self.per_app
            .get(app)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Mean dispatch latency; zero before the first dispatch.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let count = self.dispatch_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack_size.load(Ordering::Relaxed)
    }

    /// Count a request served outside the dispatcher (health, metrics, calls).
    pub fn inc_top_level_request(&self) {
        self.top_level_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn top_level_request_count(&self) -> usize {
        self.top_level_requests.load(Ordering::Relaxed)
    }

    /// Render all counters in Prometheus text exposition format.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let counters = [
            ("fn_dispatch_total", "Total dispatched invocations", self.dispatch_count()),
            ("fn_dispatch_enqueued_total", "Async calls acknowledged with 202", self.enqueued_count()),
            ("fn_dispatch_completed_total", "Sync calls completed", self.completed_count()),
            ("fn_dispatch_failed_total", "Dispatches that ended in an error", self.failed_count()),
            ("fn_dispatch_backpressure_total", "Busy or timeout rejections", self.backpressure_count()),
            ("fn_top_level_requests_total", "Requests served outside the dispatcher", self.top_level_request_count()),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }
        let _ = writeln!(out, "# HELP fn_dispatch_latency_seconds Average dispatch latency in seconds");
        let _ = writeln!(out, "# TYPE fn_dispatch_latency_seconds gauge");
        let _ = writeln!(out, "fn_dispatch_latency_seconds {}", self.average_latency().as_secs_f64());
        let _ = writeln!(out, "# HELP fn_coroutine_stack_bytes Configured coroutine stack size");
        let _ = writeln!(out, "# TYPE fn_coroutine_stack_bytes gauge");
        let _ = writeln!(out, "fn_coroutine_stack_bytes {}", self.stack_size());

        let mut apps: Vec<(String, usize)> = self
            .per_app
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        apps.sort();
        if !apps.is_empty() {
            let _ = writeln!(out, "# HELP fn_app_dispatch_total Dispatches per application");
            let _ = writeln!(out, "# TYPE fn_app_dispatch_total counter");
            for (app, count) in apps {
                let _ = writeln!(out, "fn_app_dispatch_total{{app=\"{app}\"}} {count}");
            }
        }
        out
    }
}

impl Middleware for MetricsMiddleware {
    fn before(&self, call: &CallModel) -> Result<(), ApiError> {
        self.dispatch_count.fetch_add(1, Ordering::Relaxed);
        self.per_app
            .entry(call.app_name().to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn after(
        &self,
        _call: &CallModel,
        outcome: &Result<DispatchOutcome, ApiError>,
        latency: Duration,
    ) {
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        match outcome {
            Ok(DispatchOutcome::Enqueued) => {
                self.enqueued_count.fetch_add(1, Ordering::Relaxed);
            }
            Ok(DispatchOutcome::Completed) => {
                self.completed_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.failed_count.fetch_add(1, Ordering::Relaxed);
                if err.is_backpressure() {
                    self.backpressure_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        // record stack metrics for the current coroutine when available
        if may::coroutine::is_coroutine() {
            let size = may::coroutine::current().stack_size();
            self.stack_size.store(size, Ordering::Relaxed);
        } else {
            self.stack_size
                .store(may::config().get_stack_size(), Ordering::Relaxed);
        }
    }
}
