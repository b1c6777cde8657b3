//! In-process execution agent.
//!
//! Sync calls run on the worker pool while the request coroutine waits.
//! Async calls go through a bounded [`MemoryQueue`] drained by runner
//! coroutines that execute on the same pool.

use super::core::{Agent, Call, CallContext, CallOptions, CallRecord, CallStatus};
use super::functions::{FunctionInput, FunctionOutput};
use super::queue::MemoryQueue;
use super::routes::{Route, RouteTable};
use super::store::CallStore;
use crate::dispatcher::capture_payload;
use crate::ids::CallId;
use crate::models::{ApiError, CallModel};
use crate::server::ResponseWriter;
use crate::worker_pool::{WorkerPool, WorkerPoolConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Header carrying the assigned call id to the function.
pub const CALL_ID_HEADER: &str = "Fn-Call-Id";
/// Header carrying the application name to the function.
pub const APP_NAME_HEADER: &str = "Fn-App-Name";
/// Header carrying the function path to the function.
pub const PATH_HEADER: &str = "Fn-Path";

/// How long an idle runner sleeps before polling the queue again.
const RUNNER_IDLE: Duration = Duration::from_millis(5);

/// Settings for [`LocalAgent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub pool: WorkerPoolConfig,
    /// Maximum queued async calls
    pub queue_capacity: usize,
    /// Coroutines draining the async queue
    pub async_runners: usize,
    /// Records kept in the call log
    pub call_log_capacity: usize,
    /// Body limit for sync calls (0 disables)
    pub max_request_size: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            pool: WorkerPoolConfig::default(),
            queue_capacity: 1024,
            async_runners: 2,
            call_log_capacity: 10_000,
            max_request_size: 6 * 1024 * 1024,
        }
    }
}

struct Inner {
    routes: Arc<RouteTable>,
    pool: WorkerPool,
    queue: MemoryQueue,
    store: CallStore,
    max_request_size: u64,
    stopped: AtomicBool,
}

/// Reference [`Agent`] running functions in this process.
pub struct LocalAgent {
    inner: Arc<Inner>,
}

impl LocalAgent {
    /// Create the agent, its worker pool and the async runners.
    pub fn new(routes: Arc<RouteTable>, config: AgentConfig) -> Self {
        // SAFETY: functions and runners keep no thread-local state across
        // yields, which is all `may` requires of spawned coroutines.
        let pool = unsafe { WorkerPool::new("functions", config.pool.clone()) };
        let inner = Arc::new(Inner {
            routes,
            pool,
            queue: MemoryQueue::new(config.queue_capacity),
            store: CallStore::new(config.call_log_capacity),
            max_request_size: config.max_request_size,
            stopped: AtomicBool::new(false),
        });

        for runner_id in 0..config.async_runners {
            let inner = Arc::clone(&inner);
            // SAFETY: see above
            let spawn_result = unsafe {
                may::coroutine::Builder::new()
                    .stack_size(config.pool.stack_size)
                    .spawn(move || run_async_calls(&inner, runner_id))
            };
            if let Err(e) = spawn_result {
                error!(runner_id = runner_id, error = %e, "Failed to spawn async runner");
            }
        }

        info!(
            routes = inner.routes.routes().len(),
            queue_capacity = config.queue_capacity,
            async_runners = config.async_runners,
            "Local agent started"
        );
        Self { inner }
    }

    #[must_use]
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.inner.routes
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Number of async calls waiting for a runner.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Stop the async runners. Calls already queued stay queued.
    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }
}

impl Drop for LocalAgent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Agent for LocalAgent {
    fn get_call<'a>(&self, opts: CallOptions<'a>) -> Result<Call<'a>, ApiError> {
        let source = opts
            .source
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("call options carry no request")))?;
        if source.app_name.trim().is_empty() {
            return Err(ApiError::MissingAppName);
        }
        let path = source.path.split('?').next().unwrap_or("/");
        let route = self.inner.routes.resolve(&source.app_name, path)?;

        let (head, body) = source.request.into_parts();
        let mut model = CallModel::new(source.app_name.as_str(), path, route.mode)?;
        model.method = head.method;
        for (name, value) in head.headers {
            model.headers.insert(name.to_string(), value);
        }
        model
            .headers
            .insert(CALL_ID_HEADER.to_string(), model.id().to_string());
        model
            .headers
            .insert(APP_NAME_HEADER.to_string(), route.app_name.clone());
        model
            .headers
            .insert(PATH_HEADER.to_string(), route.path.clone());
        model.timeout = route.timeout;

        debug!(
            call_id = %model.id(),
            app = %model.app_name(),
            path = %model.path(),
            mode = model.mode().as_str(),
            "Call built"
        );

        let writer = opts.writer.unwrap_or_default();
        Ok(Call::new(model, Some(body), writer, opts.context))
    }

    fn enqueue(&self, ctx: &CallContext, model: CallModel) -> Result<(), ApiError> {
        if ctx.is_cancelled() {
            return Err(ApiError::CallStopped);
        }
        self.inner.queue.push(&model)?;
        self.inner
            .store
            .insert(CallRecord::for_model(&model, CallStatus::Queued));
        debug!(call_id = %model.id(), depth = self.inner.queue.len(), "Async call queued");
        Ok(())
    }

    fn submit(&self, call: Call<'_>) -> Result<(), ApiError> {
        let (mut model, body, writer, ctx) = call.into_parts();
        if ctx.is_cancelled() {
            return Err(ApiError::CallStopped);
        }
        if let Some(mut body) = body {
            let payload = capture_payload(body.as_mut(), -1, self.inner.max_request_size)?;
            model.attach_payload(payload);
        }
        let route = self.inner.routes.resolve(model.app_name(), model.path())?;

        self.inner
            .store
            .insert(CallRecord::for_model(&model, CallStatus::Queued));
        let output = self.inner.execute(&route, &model, &ctx)?;
        write_output(&writer, &output);
        Ok(())
    }

    fn call_record(&self, id: &CallId) -> Result<CallRecord, ApiError> {
        self.inner.store.get(id).ok_or(ApiError::CallNotFound)
    }
}

impl Inner {
    /// Run `model` on the pool under its deadline and record the outcome.
    fn execute(
        &self,
        route: &Route,
        model: &CallModel,
        ctx: &CallContext,
    ) -> Result<FunctionOutput, ApiError> {
        let call_id = model.id();
        let function = Arc::clone(&route.function);
        let input = FunctionInput {
            call_id,
            app_name: model.app_name().to_string(),
            path: model.path().to_string(),
            method: model.method.clone(),
            headers: model.headers.clone(),
            payload: model.payload().to_vec(),
        };

        let result = self
            .pool
            .submit(call_id, move || function.invoke(input))
            .and_then(|handle| {
                self.store.mark_running(&call_id);
                handle.wait(model.timeout, ctx)
            })
            .and_then(|outcome| outcome);

        match &result {
            Ok(output) => {
                self.store.finish(&call_id, CallStatus::Success, None);
                debug!(call_id = %call_id, status = output.status, "Function returned");
            }
            Err(err) => {
                self.store
                    .finish(&call_id, record_status(err), Some(err.public_message()));
            }
        }
        result
    }
}

fn record_status(err: &ApiError) -> CallStatus {
    match err {
        ApiError::CallTimeout | ApiError::CallTimeoutServerBusy => CallStatus::Timeout,
        ApiError::CallStopped => CallStatus::Cancelled,
        _ => CallStatus::Error,
    }
}

fn write_output(writer: &ResponseWriter, output: &FunctionOutput) {
    let mut result = writer.set_status(output.status);
    for (name, value) in &output.headers {
        result = result.and_then(|()| writer.set_header(name, value.as_str()));
    }
    if let Err(e) = result {
        warn!(error = %e, "Function output headers not applied");
    }
    if output.body.is_empty() {
        if let Err(e) = writer.write_header(output.status) {
            warn!(error = %e, "Function status not written");
        }
    } else {
        writer.write(&output.body);
    }
}

fn run_async_calls(inner: &Inner, runner_id: usize) {
    debug!(runner_id = runner_id, "Async runner started");
    while !inner.stopped.load(Ordering::SeqCst) {
        let Some(model) = inner.queue.pop() else {
            may::coroutine::sleep(RUNNER_IDLE);
            continue;
        };
        let call_id = model.id();
        let route = match inner.routes.resolve(model.app_name(), model.path()) {
            Ok(route) => route,
            Err(err) => {
                warn!(call_id = %call_id, error = %err, "Queued call no longer routable");
                inner
                    .store
                    .finish(&call_id, CallStatus::Error, Some(err.public_message()));
                continue;
            }
        };
        match inner.execute(&route, &model, &CallContext::new()) {
            Ok(output) => info!(
                call_id = %call_id,
                status = output.status,
                wait_ms = model
                    .wait_time(std::time::SystemTime::now())
                    .as_millis() as u64,
                "Async call finished"
            ),
            Err(err) => warn!(call_id = %call_id, error = %err, "Async call failed"),
        }
    }
    debug!(runner_id = runner_id, "Async runner exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_status() {
        assert_eq!(record_status(&ApiError::CallTimeout), CallStatus::Timeout);
        assert_eq!(
            record_status(&ApiError::CallTimeoutServerBusy),
            CallStatus::Timeout
        );
        assert_eq!(record_status(&ApiError::CallStopped), CallStatus::Cancelled);
        assert_eq!(
            record_status(&ApiError::FunctionFailed("x".into())),
            CallStatus::Error
        );
    }

    #[test]
    fn test_write_output_empty_body_commits_status() {
        let writer = ResponseWriter::new();
        write_output(&writer, &FunctionOutput::empty(204));
        let snap = writer.snapshot();
        assert!(snap.committed);
        assert_eq!(snap.status, 204);
        assert!(snap.body.is_empty());
    }

    #[test]
    fn test_write_output_json() {
        let writer = ResponseWriter::new();
        write_output(
            &writer,
            &FunctionOutput::json(201, &serde_json::json!({"ok": true})),
        );
        let snap = writer.snapshot();
        assert_eq!(snap.status, 201);
        assert_eq!(snap.header("Content-Type"), Some("application/json"));
        assert_eq!(snap.body, br#"{"ok":true}"#.to_vec());
    }
}
