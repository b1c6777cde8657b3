use super::request::{split_invoke_path, InboundRequest, RequestHead};
use super::response::{write_response, ResponseWriter};
use crate::agent::CallContext;
use crate::dispatcher::{CallTarget, Dispatcher};
use crate::ids::CallId;
use crate::middleware::MetricsMiddleware;
use crate::models::ApiError;
use crate::worker_pool::WorkerPoolMetrics;
use may_minihttp::{HttpService, Request, Response};
use serde_json::json;
use std::fmt::Write as _;
use std::io;
use std::sync::Arc;
use tracing::debug;

/// Prefix of the call log lookup route: `GET /v1/calls/{id}`.
pub const CALLS_PREFIX: &str = "/v1/calls/";

/// HTTP front door: health, metrics, call lookups and function invocation.
#[derive(Clone)]
pub struct AppService {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Option<Arc<MetricsMiddleware>>,
    pub pool_metrics: Option<Arc<WorkerPoolMetrics>>,
    shutdown: CallContext,
}

impl AppService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            metrics: None,
            pool_metrics: None,
            shutdown: CallContext::new(),
        }
    }

    /// Context shared by every invocation. Cancelling it stops in-flight and
    /// new calls with `CallStopped`.
    pub fn shutdown_context(&self) -> &CallContext {
        &self.shutdown
    }

    pub fn set_metrics_middleware(&mut self, metrics: Arc<MetricsMiddleware>) {
        self.metrics = Some(metrics);
    }

    pub fn set_pool_metrics(&mut self, metrics: Arc<WorkerPoolMetrics>) {
        self.pool_metrics = Some(metrics);
    }

    /// Route one request into `writer`. Transport independent.
    pub fn handle(&self, req: InboundRequest<'_>, writer: &ResponseWriter) {
        let method = req.head().method.clone();
        let path = req.head().path.clone();

        if let Some((app, route)) = split_invoke_path(&path) {
            let target = CallTarget::new(app.as_deref(), route.as_deref());
            self.dispatcher
                .handle_function_call(target, req, writer, &self.shutdown);
            return;
        }

        if let Some(metrics) = &self.metrics {
            metrics.inc_top_level_request();
        }
        match (method.as_str(), path.as_str()) {
            ("GET", "/health") => health_endpoint(writer),
            ("GET", "/metrics") => match &self.metrics {
                Some(metrics) => {
                    metrics_endpoint(writer, metrics, self.pool_metrics.as_deref());
                }
                None => not_found(writer, &method, &path),
            },
            ("GET", p) if p.starts_with(CALLS_PREFIX) => {
                self.call_endpoint(writer, &p[CALLS_PREFIX.len()..]);
            }
            _ => not_found(writer, &method, &path),
        }
    }

    fn call_endpoint(&self, writer: &ResponseWriter, raw_id: &str) {
        let result = raw_id
            .parse::<CallId>()
            .map_err(|_| ApiError::CallNotFound)
            .and_then(|id| self.dispatcher.agent().call_record(&id));
        let outcome = match result {
            Ok(record) => serde_json::to_value(&record)
                .map_err(|e| ApiError::Internal(anyhow::Error::new(e)))
                .and_then(|body| {
                    writer
                        .write_json(200, &json!({ "call": body }))
                        .map_err(|e| ApiError::Internal(e.into()))
                }),
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            debug!(call_id = raw_id, error = %err, "Call lookup failed");
            crate::dispatcher::handle_error_response(writer, &err);
        }
    }
}

/// Basic health check endpoint returning `{ "status": "ok" }`.
pub fn health_endpoint(writer: &ResponseWriter) {
    let _ = writer.write_json(200, &json!({ "status": "ok" }));
}

/// Prometheus text exposition of dispatch and worker pool counters.
pub fn metrics_endpoint(
    writer: &ResponseWriter,
    metrics: &MetricsMiddleware,
    pool: Option<&WorkerPoolMetrics>,
) {
    let mut body = metrics.render_prometheus();
    if let Some(pool) = pool {
        let gauges = [
            ("fn_pool_shed_total", "counter", pool.get_shed_count()),
            ("fn_pool_dispatched_total", "counter", pool.get_dispatched_count()),
            ("fn_pool_completed_total", "counter", pool.get_completed_count()),
            ("fn_pool_queue_depth", "gauge", pool.get_queue_depth() as u64),
        ];
        for (name, kind, value) in gauges {
            let _ = writeln!(body, "# TYPE {name} {kind}");
            let _ = writeln!(body, "{name} {value}");
        }
    }
    let _ = writer.set_header("Content-Type", "text/plain; version=0.0.4");
    writer.write(body.as_bytes());
}

fn not_found(writer: &ResponseWriter, method: &str, path: &str) {
    debug!(method = method, path = path, "No route");
    let _ = writer.write_json(
        404,
        &json!({ "error": { "message": "Not Found" }, "method": method, "path": path }),
    );
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let head = RequestHead::from_request(&req);
        let writer = ResponseWriter::new();
        self.handle(InboundRequest::new(head, req.body()), &writer);
        write_response(res, writer.snapshot());
        Ok(())
    }
}
