//! Dispatcher core module - hot path for request dispatch.
//!
//! Every invocation flows through [`Dispatcher::handle_function_call`]:
//! build the call, pick the execution path from its mode, and translate
//! failures into responses.

use crate::agent::{Agent, Call, CallContext, CallOptions};
use crate::middleware::Middleware;
use crate::models::{ApiError, ExecutionMode};
use crate::server::{InboundRequest, ResponseWriter};
use serde_json::json;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, info_span, warn};

/// Floor for the async capture buffer; a missing or tiny declared length
/// would otherwise cause repeated reallocation while reading.
pub const MIN_CAPTURE_CAPACITY: usize = 128;

/// Diagnostic header carrying time spent since call construction on
/// busy/timeout rejections.
pub const WAIT_HEADER: &str = "XXX-FXLB-WAIT";

/// Routing identity of an inbound invocation, passed explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallTarget<'a> {
    /// Application name; `None` or empty is rejected before the agent is touched
    pub app_name: Option<&'a str>,
    /// Function path; defaults to `/`
    pub path: Option<&'a str>,
}

impl<'a> CallTarget<'a> {
    #[must_use]
    pub fn new(app_name: Option<&'a str>, path: Option<&'a str>) -> Self {
        Self { app_name, path }
    }
}

/// Terminal state of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Async call queued and acknowledged with 202
    Enqueued,
    /// Sync call executed; the agent produced the response
    Completed,
}

/// Routes built calls to the execution agent.
///
/// Holds no per-request state; one instance is shared by every connection.
#[derive(Clone)]
pub struct Dispatcher {
    agent: Arc<dyn Agent>,
    /// Ordered list of middleware applied around each dispatch
    pub middlewares: Vec<Arc<dyn Middleware>>,
    max_request_size: u64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Dispatcher {
            agent,
            middlewares: Vec::new(),
            max_request_size: 0,
        }
    }

    /// Cap async payloads at `limit` bytes (0 disables the cap).
    #[must_use]
    pub fn with_max_request_size(mut self, limit: u64) -> Self {
        self.max_request_size = limit;
        self
    }

    /// Add middleware to the processing pipeline. Runs in insertion order.
    pub fn add_middleware(&mut self, mw: Arc<dyn Middleware>) {
        self.middlewares.push(mw);
    }

    #[must_use]
    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// Execute the function for an invocation request, writing an error
    /// response when dispatch fails.
    pub fn handle_function_call(
        &self,
        target: CallTarget<'_>,
        req: InboundRequest<'_>,
        writer: &ResponseWriter,
        ctx: &CallContext,
    ) {
        if let Err(err) = self.try_handle_function_call(target, req, writer, ctx) {
            handle_error_response(writer, &err);
        }
    }

    /// Execute the function and return the error instead of writing it.
    pub fn try_handle_function_call(
        &self,
        target: CallTarget<'_>,
        req: InboundRequest<'_>,
        writer: &ResponseWriter,
        ctx: &CallContext,
    ) -> Result<DispatchOutcome, ApiError> {
        let app_name = match target.app_name {
            Some(name) if !name.is_empty() => name,
            _ => {
                debug!(path = ?target.path, "Rejecting invocation without app name");
                return Err(ApiError::MissingAppName);
            }
        };
        let path = clean_path(target.path.unwrap_or("/"));

        // Defaults only; nothing is committed until a write happens.
        if let Err(e) = writer
            .set_status(200)
            .and_then(|()| writer.set_header("Content-Type", "application/json"))
        {
            warn!(error = %e, "Response already committed before dispatch");
        }

        self.serve(app_name, &path, req, writer, ctx)
    }

    fn serve(
        &self,
        app_name: &str,
        path: &str,
        req: InboundRequest<'_>,
        writer: &ResponseWriter,
        ctx: &CallContext,
    ) -> Result<DispatchOutcome, ApiError> {
        let declared_length = req.content_length();

        // The agent may resolve the route, assign the id and inject headers.
        let call = self.agent.get_call(
            CallOptions::new()
                .with_writer(writer.clone())
                .from_request(app_name, path, req)
                .with_context(ctx.clone()),
        )?;

        let built = call.model().clone();
        let span = info_span!(
            "call",
            call_id = %built.id(),
            app = %built.app_name(),
            path = %built.path(),
            mode = built.mode().as_str()
        );
        let _entered = span.enter();

        for mw in &self.middlewares {
            mw.before(&built)?;
        }

        let start = Instant::now();
        let result = match built.mode() {
            ExecutionMode::Async => self.dispatch_async(call, declared_length, writer, ctx),
            ExecutionMode::Sync => self.dispatch_sync(call, writer),
        };
        let latency = start.elapsed();

        for mw in &self.middlewares {
            mw.after(&built, &result, latency);
        }
        result
    }

    fn dispatch_async(
        &self,
        mut call: Call<'_>,
        declared_length: i64,
        writer: &ResponseWriter,
        ctx: &CallContext,
    ) -> Result<DispatchOutcome, ApiError> {
        let payload = match call.take_body() {
            Some(mut body) => {
                capture_payload(body.as_mut(), declared_length, self.max_request_size)?
            }
            None => Vec::new(),
        };
        let payload_len = payload.len();
        call.attach_payload(payload);

        let model = call.into_model();
        let call_id = model.id();
        self.agent.enqueue(ctx, model)?;

        info!(
            call_id = %call_id,
            payload_bytes = payload_len,
            declared_length = declared_length,
            "Call enqueued"
        );

        if let Err(e) = writer.write_json(202, &json!({ "call_id": call_id.to_string() })) {
            warn!(call_id = %call_id, error = %e, "Could not write async receipt");
        }
        Ok(DispatchOutcome::Enqueued)
    }

    fn dispatch_sync(
        &self,
        call: Call<'_>,
        writer: &ResponseWriter,
    ) -> Result<DispatchOutcome, ApiError> {
        let call_id = call.model().id();
        let created_at = call.model().created_at();

        match self.agent.submit(call) {
            Ok(()) => {
                if writer.finalize() {
                    debug!(
                        call_id = %call_id,
                        status = writer.status(),
                        "Function wrote nothing - committing default status"
                    );
                }
                Ok(DispatchOutcome::Completed)
            }
            Err(err) => {
                if err.is_backpressure() {
                    let value = wait_header_value(created_at, SystemTime::now());
                    info!(
                        call_id = %call_id,
                        wait = %value,
                        error = %err,
                        "Call rejected by admission control"
                    );
                    if let Err(e) = writer.add_header(WAIT_HEADER, value) {
                        debug!(call_id = %call_id, error = %e, "Wait header not attached");
                    }
                }
                Err(err)
            }
        }
    }
}

/// Initial capacity of the async capture buffer.
///
/// The declared content length is used when it is at least
/// [`MIN_CAPTURE_CAPACITY`]; `-1` (absent) and small values fall back to the
/// floor. A positive `max_request_size` bounds the pre-allocation.
#[must_use]
pub fn capture_capacity(declared_length: i64, max_request_size: u64) -> usize {
    let declared = usize::try_from(declared_length).unwrap_or(0);
    let capacity = declared.max(MIN_CAPTURE_CAPACITY);
    if max_request_size == 0 {
        return capacity;
    }
    let limit = usize::try_from(max_request_size)
        .unwrap_or(usize::MAX)
        .max(MIN_CAPTURE_CAPACITY);
    capacity.min(limit)
}

/// Read the whole body into a buffer sized by [`capture_capacity`].
///
/// The stored length is whatever the body actually yields, independent of
/// the declared length.
pub fn capture_payload(
    body: &mut dyn Read,
    declared_length: i64,
    max_request_size: u64,
) -> Result<Vec<u8>, ApiError> {
    let mut buf = Vec::with_capacity(capture_capacity(declared_length, max_request_size));

    let read = if max_request_size > 0 {
        Read::take(&mut *body, max_request_size.saturating_add(1)).read_to_end(&mut buf)
    } else {
        body.read_to_end(&mut buf)
    };

    if let Err(e) = read {
        warn!(error = %e, declared_length = declared_length, "Failed to read request body");
        return Err(ApiError::InvalidPayload);
    }
    if max_request_size > 0 && buf.len() as u64 > max_request_size {
        warn!(
            limit = max_request_size,
            declared_length = declared_length,
            "Request body exceeds limit"
        );
        return Err(ApiError::RequestContentTooBig);
    }
    Ok(buf)
}

/// Generic error responder.
///
/// If the execution path already committed a response, the error is logged
/// and nothing else is written.
pub fn handle_error_response(writer: &ResponseWriter, err: &ApiError) {
    let status = err.status();
    match err {
        ApiError::Internal(inner) => {
            error!(status = status, error = ?inner, "Internal error during dispatch");
        }
        other => {
            debug!(status = status, error = %other, "Dispatch failed");
        }
    }
    if let Err(write_err) = writer.write_json(status, &err.body()) {
        debug!(
            status = status,
            error = %err,
            write_error = %write_err,
            "Error response skipped - response already written"
        );
    }
}

/// Value of [`WAIT_HEADER`]: whole milliseconds between `created_at` and `now`.
#[must_use]
pub fn wait_header_value(created_at: SystemTime, now: SystemTime) -> String {
    format_wait(now.duration_since(created_at).unwrap_or_default())
}

#[must_use]
pub fn format_wait(wait: Duration) -> String {
    format!("{}ms", wait.as_millis())
}

/// Lexically clean a slash-separated path: collapse repeated slashes and
/// resolve `.` and `..`. Rooted paths never climb above `/`.
#[must_use]
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
        }
    }

    #[test]
    fn test_capture_capacity_floor() {
        assert_eq!(capture_capacity(-1, 0), 128);
        assert_eq!(capture_capacity(0, 0), 128);
        assert_eq!(capture_capacity(50, 0), 128);
        assert_eq!(capture_capacity(127, 0), 128);
        assert_eq!(capture_capacity(128, 0), 128);
        assert_eq!(capture_capacity(4096, 0), 4096);
    }

    #[test]
    fn test_capture_capacity_bounded_by_limit() {
        assert_eq!(capture_capacity(i64::MAX, 1024), 1024);
        assert_eq!(capture_capacity(512, 1024), 512);
        assert_eq!(capture_capacity(50, 64), 128);
    }

    #[test]
    fn test_capture_ignores_declared_length() {
        let mut body = &b"hello"[..];
        assert_eq!(capture_payload(&mut body, 50, 0).unwrap(), b"hello".to_vec());

        let mut body = &b"hello"[..];
        assert_eq!(capture_payload(&mut body, -1, 0).unwrap(), b"hello".to_vec());

        let large = vec![7u8; 1000];
        let mut body = &large[..];
        assert_eq!(capture_payload(&mut body, 10, 0).unwrap().len(), 1000);
    }

    #[test]
    fn test_capture_read_failure_is_invalid_payload() {
        let mut body = FailingReader;
        assert!(matches!(
            capture_payload(&mut body, 10, 0),
            Err(ApiError::InvalidPayload)
        ));
    }

    #[test]
    fn test_capture_enforces_limit() {
        let data = vec![1u8; 11];
        let mut body = &data[..];
        assert!(matches!(
            capture_payload(&mut body, -1, 10),
            Err(ApiError::RequestContentTooBig)
        ));
        let mut body = &data[..10];
        assert_eq!(capture_payload(&mut body, -1, 10).unwrap().len(), 10);
    }

    #[test]
    fn test_wait_header_value() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let t1 = t0 + Duration::from_millis(1250);
        assert_eq!(wait_header_value(t0, t1), "1250ms");
        assert_eq!(wait_header_value(t1, t0), "0ms");
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path(""), ".");
        assert_eq!(clean_path("/a//b/"), "/a/b");
        assert_eq!(clean_path("/a/./b/../c"), "/a/c");
        assert_eq!(clean_path("/../.."), "/");
        assert_eq!(clean_path("a/../../b"), "../b");
    }

    #[test]
    fn test_error_response_skipped_when_committed() {
        let writer = ResponseWriter::new();
        writer.write(b"ok");
        handle_error_response(&writer, &ApiError::CallTimeout);
        let snap = writer.snapshot();
        assert_eq!(snap.status, 200);
        assert_eq!(snap.body, b"ok".to_vec());
    }

    #[test]
    fn test_error_response_written() {
        let writer = ResponseWriter::new();
        handle_error_response(&writer, &ApiError::InvalidPayload);
        let snap = writer.snapshot();
        assert_eq!(snap.status, 400);
        let body: serde_json::Value = serde_json::from_slice(&snap.body).unwrap();
        assert_eq!(body["error"]["message"], "Invalid payload");
    }
}
