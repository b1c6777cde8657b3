use crate::ids::CallId;
use crate::models::{ApiError, CallModel};
use crate::server::{InboundRequest, ResponseWriter};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Cancellation signal shared between the transport and the agent.
///
/// Cloning shares the flag, so the transport can cancel a call the agent is
/// already waiting on.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancelled: Arc<AtomicBool>,
}

impl CallContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Inputs for [`Agent::get_call`].
///
/// Application name and path are passed explicitly rather than looked up
/// from request-scoped state.
#[derive(Debug, Default)]
pub struct CallOptions<'a> {
    pub(crate) writer: Option<ResponseWriter>,
    pub(crate) source: Option<CallSource<'a>>,
    pub(crate) context: CallContext,
}

#[derive(Debug)]
pub(crate) struct CallSource<'a> {
    pub(crate) app_name: String,
    pub(crate) path: String,
    pub(crate) request: InboundRequest<'a>,
}

impl<'a> CallOptions<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            writer: None,
            source: None,
            context: CallContext::new(),
        }
    }

    /// Response sink the agent writes the function result into.
    #[must_use]
    pub fn with_writer(mut self, writer: ResponseWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Application identity, normalized path and the raw request.
    #[must_use]
    pub fn from_request(
        mut self,
        app_name: impl Into<String>,
        path: impl Into<String>,
        request: InboundRequest<'a>,
    ) -> Self {
        self.source = Some(CallSource {
            app_name: app_name.into(),
            path: path.into(),
            request,
        });
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    /// Decompose for agent implementations living outside this crate.
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        Option<ResponseWriter>,
        Option<(String, String, InboundRequest<'a>)>,
        CallContext,
    ) {
        (
            self.writer,
            self.source.map(|s| (s.app_name, s.path, s.request)),
            self.context,
        )
    }
}

/// A constructed call: the model plus the transport pieces the agent needs.
pub struct Call<'a> {
    model: CallModel,
    body: Option<Box<dyn Read + 'a>>,
    writer: ResponseWriter,
    context: CallContext,
}

impl<'a> Call<'a> {
    #[must_use]
    pub fn new(
        model: CallModel,
        body: Option<Box<dyn Read + 'a>>,
        writer: ResponseWriter,
        context: CallContext,
    ) -> Self {
        Self {
            model,
            body,
            writer,
            context,
        }
    }

    #[must_use]
    pub fn model(&self) -> &CallModel {
        &self.model
    }

    /// Attach a captured payload. The execution mode is not reachable from here.
    pub fn attach_payload(&mut self, payload: Vec<u8>) {
        self.model.attach_payload(payload);
    }

    /// Take the unread request body, if any.
    pub fn take_body(&mut self) -> Option<Box<dyn Read + 'a>> {
        self.body.take()
    }

    #[must_use]
    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    #[must_use]
    pub fn context(&self) -> &CallContext {
        &self.context
    }

    #[must_use]
    pub fn into_model(self) -> CallModel {
        self.model
    }

    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        CallModel,
        Option<Box<dyn Read + 'a>>,
        ResponseWriter,
        CallContext,
    ) {
        (self.model, self.body, self.writer, self.context)
    }
}

impl std::fmt::Debug for Call<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("model", &self.model)
            .field("has_body", &self.body.is_some())
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a call as recorded by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Queued,
    Running,
    Success,
    Error,
    Timeout,
    Cancelled,
}

/// Call log entry exposed at `/v1/calls/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: CallId,
    pub app_name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub mode: crate::models::ExecutionMode,
    pub status: CallStatus,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    pub error: Option<String>,
}

impl CallRecord {
    #[must_use]
    pub fn for_model(model: &CallModel, status: CallStatus) -> Self {
        Self {
            id: model.id(),
            app_name: model.app_name().to_string(),
            path: model.path().to_string(),
            mode: model.mode(),
            status,
            created_at: model.created_at(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// The execution agent as seen by the dispatch core.
pub trait Agent: Send + Sync {
    /// Build a normalized call from the request.
    ///
    /// Must not have side effects when it fails.
    fn get_call<'a>(&self, opts: CallOptions<'a>) -> Result<Call<'a>, ApiError>;

    /// Persist an asynchronous call for later execution.
    fn enqueue(&self, ctx: &CallContext, model: CallModel) -> Result<(), ApiError>;

    /// Execute a synchronous call to completion, writing the response into
    /// the call's writer as a side effect.
    fn submit(&self, call: Call<'_>) -> Result<(), ApiError>;

    /// Look up a call in the agent's call log.
    fn call_record(&self, _id: &CallId) -> Result<CallRecord, ApiError> {
        Err(ApiError::CallNotFound)
    }
}
