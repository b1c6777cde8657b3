//! # Worker Pool Module
//!
//! Runs function invocations on a fixed set of `may` coroutines with bounded
//! admission.
//!
//! ## Features
//!
//! - **Worker Pool**: N worker coroutines share one job channel
//! - **Admission Control**: at most `queue_bound` jobs are in flight; the
//!   excess is shed or blocked according to [`BackpressureMode`]
//! - **Panic Isolation**: a panicking function is reported as
//!   [`ApiError::FunctionFailed`] and the worker keeps running
//! - **Metrics**: shed count, queue depth, dispatch and completion counts
//!
//! ## Configuration
//!
//! - `FN_HANDLER_WORKERS`: Number of worker coroutines (default: 4)
//! - `FN_HANDLER_QUEUE_BOUND`: Maximum in-flight jobs (default: 1024)
//! - `FN_BACKPRESSURE_MODE`: `block` or `shed` (default: block)
//! - `FN_BACKPRESSURE_TIMEOUT_MS`: How long block mode waits for a slot (default: 50)
//! - `FN_STACK_SIZE`: Worker coroutine stack size, decimal or `0x` hex (default: 64KB)

use crate::agent::CallContext;
use crate::ids::CallId;
use crate::models::ApiError;
use may::sync::mpsc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Poll interval used while waiting for a slot or a reply.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for worker pool backpressure behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressureMode {
    /// Wait up to the backpressure timeout for a free slot
    #[default]
    Block,
    /// Reject immediately when every slot is taken
    Shed,
}

impl BackpressureMode {
    /// Parse backpressure mode from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "block" => Some(Self::Block),
            "shed" => Some(Self::Shed),
            _ => None,
        }
    }
}

/// Parse a stack size given in decimal or `0x`-prefixed hex.
pub fn parse_stack_size(s: &str) -> Option<usize> {
    if let Some(hex) = s.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Configuration for a worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker coroutines
    pub num_workers: usize,
    /// Maximum number of admitted, unfinished jobs
    pub queue_bound: usize,
    /// Backpressure mode
    pub backpressure_mode: BackpressureMode,
    /// Timeout for block mode in milliseconds
    pub backpressure_timeout_ms: u64,
    /// Stack size for worker coroutines
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `FN_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("FN_HANDLER_WORKERS") {
            self.num_workers = v;
        }
        if let Some(v) = env_parse("FN_HANDLER_QUEUE_BOUND") {
            self.queue_bound = v;
        }
        if let Some(mode) = std::env::var("FN_BACKPRESSURE_MODE")
            .ok()
            .and_then(|s| BackpressureMode::parse(&s))
        {
            self.backpressure_mode = mode;
        }
        if let Some(v) = env_parse("FN_BACKPRESSURE_TIMEOUT_MS") {
            self.backpressure_timeout_ms = v;
        }
        if let Some(v) = std::env::var("FN_STACK_SIZE")
            .ok()
            .and_then(|s| parse_stack_size(&s))
        {
            self.stack_size = v;
        }
        self
    }

    /// Create a custom configuration
    pub fn new(
        num_workers: usize,
        queue_bound: usize,
        backpressure_mode: BackpressureMode,
        backpressure_timeout_ms: u64,
        stack_size: usize,
    ) -> Self {
        Self {
            num_workers,
            queue_bound,
            backpressure_mode,
            backpressure_timeout_ms,
            stack_size,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            queue_bound: 1024,
            backpressure_mode: BackpressureMode::Block,
            backpressure_timeout_ms: 50,
            stack_size: 0x10000, // 64KB
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Number of jobs rejected by admission control
    pub shed_count: AtomicU64,
    /// Admitted jobs not yet finished
    pub queue_depth: AtomicUsize,
    /// Total jobs admitted
    pub dispatched_count: AtomicU64,
    /// Total jobs finished (including panics)
    pub completed_count: AtomicU64,
}

impl WorkerPoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_shed(&self) {
        self.shed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completion event; releases the admission slot.
    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get_shed_count(&self) -> u64 {
        self.shed_count.load(Ordering::Relaxed)
    }

    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    /// Claim a slot if fewer than `bound` jobs are in flight.
    fn try_acquire(&self, bound: usize) -> bool {
        self.queue_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                (depth < bound).then_some(depth + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Unit of work executed by a worker coroutine.
pub struct Job {
    pub call_id: CallId,
    run: Box<dyn FnOnce() + Send + 'static>,
}

/// Reply side of an admitted job.
pub struct JobHandle<T> {
    call_id: CallId,
    reply_rx: mpsc::Receiver<T>,
}

impl<T> JobHandle<T> {
    #[must_use]
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Wait for the job's result.
    ///
    /// Returns [`ApiError::CallTimeout`] once `timeout` elapses,
    /// [`ApiError::CallStopped`] when `ctx` is cancelled, and
    /// [`ApiError::FunctionFailed`] when the job panicked.
    pub fn wait(self, timeout: Duration, ctx: &CallContext) -> Result<T, ApiError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.reply_rx.try_recv() {
                Ok(value) => return Ok(value),
                Err(TryRecvError::Disconnected) => {
                    return Err(ApiError::FunctionFailed("function panicked".to_string()));
                }
                Err(TryRecvError::Empty) => {}
            }
            if ctx.is_cancelled() {
                debug!(call_id = %self.call_id, "Caller cancelled while waiting for reply");
                return Err(ApiError::CallStopped);
            }
            if Instant::now() >= deadline {
                warn!(
                    call_id = %self.call_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Function exceeded its deadline"
                );
                return Err(ApiError::CallTimeout);
            }
            may::coroutine::sleep(POLL_INTERVAL);
        }
    }
}

/// A worker pool executing jobs with bounded admission
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: mpsc::Sender<Job>,
    metrics: Arc<WorkerPoolMetrics>,
    name: String,
}

impl WorkerPool {
    /// Create a new worker pool and spawn its coroutines
    ///
    /// # Safety
    ///
    /// Spawns coroutines with `may::coroutine::Builder::spawn()`, which is
    /// unsafe in the `may` runtime. The caller must not rely on thread-local
    /// storage inside jobs.
    pub unsafe fn new(name: impl Into<String>, config: WorkerPoolConfig) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();
        let metrics = Arc::new(WorkerPoolMetrics::new());
        let rx = Arc::new(rx);

        info!(
            pool = %name,
            num_workers = config.num_workers,
            queue_bound = config.queue_bound,
            backpressure_mode = ?config.backpressure_mode,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        for worker_id in 0..config.num_workers {
            let rx = Arc::clone(&rx);
            let pool_name = name.clone();
            let metrics = Arc::clone(&metrics);

            let spawn_result = may::coroutine::Builder::new()
                .stack_size(config.stack_size)
                .spawn(move || {
                    debug!(pool = %pool_name, worker_id = worker_id, "Worker coroutine started");

                    // All workers share the receiver, so jobs balance across them
                    while let Ok(job) = rx.recv() {
                        let call_id = job.call_id;
                        debug!(call_id = %call_id, worker_id = worker_id, "Worker running job");

                        if let Err(panic) =
                            std::panic::catch_unwind(std::panic::AssertUnwindSafe(job.run))
                        {
                            // The reply sender was dropped with the closure; the
                            // waiting caller sees a disconnect.
                            error!(
                                call_id = %call_id,
                                pool = %pool_name,
                                worker_id = worker_id,
                                panic_message = ?panic,
                                "Function panicked"
                            );
                        }
                        metrics.record_completion();
                    }

                    debug!(pool = %pool_name, worker_id = worker_id, "Worker coroutine exiting");
                });

            if let Err(e) = spawn_result {
                error!(
                    pool = %name,
                    worker_id = worker_id,
                    error = %e,
                    "Failed to spawn worker coroutine"
                );
            }
        }

        Self {
            config,
            sender: tx,
            metrics,
            name,
        }
    }

    /// Admit `work` and hand it to a worker.
    ///
    /// Rejections from admission control are [`ApiError::CallTimeoutServerBusy`].
    pub fn submit<T, F>(&self, call_id: CallId, work: F) -> Result<JobHandle<T>, ApiError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.admit(call_id)?;

        let (reply_tx, reply_rx) = mpsc::channel();
        let job = Job {
            call_id,
            run: Box::new(move || {
                let _ = reply_tx.send(work());
            }),
        };

        self.metrics.record_dispatch();
        if let Err(e) = self.sender.send(job) {
            self.metrics.release();
            error!(call_id = %call_id, pool = %self.name, error = %e, "Worker pool channel disconnected");
            return Err(ApiError::CallTimeoutServerBusy);
        }
        Ok(JobHandle { call_id, reply_rx })
    }

    fn admit(&self, call_id: CallId) -> Result<(), ApiError> {
        let bound = self.config.queue_bound;
        if self.metrics.try_acquire(bound) {
            return Ok(());
        }
        match self.config.backpressure_mode {
            BackpressureMode::Shed => {
                self.metrics.record_shed();
                warn!(
                    call_id = %call_id,
                    pool = %self.name,
                    queue_bound = bound,
                    "Worker pool full - shedding call"
                );
                Err(ApiError::CallTimeoutServerBusy)
            }
            BackpressureMode::Block => {
                let timeout = Duration::from_millis(self.config.backpressure_timeout_ms);
                let deadline = Instant::now() + timeout;
                while Instant::now() < deadline {
                    may::coroutine::sleep(POLL_INTERVAL);
                    if self.metrics.try_acquire(bound) {
                        return Ok(());
                    }
                }
                self.metrics.record_shed();
                warn!(
                    call_id = %call_id,
                    pool = %self.name,
                    queue_bound = bound,
                    timeout_ms = self.config.backpressure_timeout_ms,
                    "Worker pool full after backpressure timeout"
                );
                Err(ApiError::CallTimeoutServerBusy)
            }
        }
    }

    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
