//! # fnrunner
//!
//! Coroutine-powered front door for function invocations, built on `may`
//! and `may_minihttp`.
//!
//! ## Overview
//!
//! Every request to `/r/{app}/{path}` becomes a [`models::CallModel`]. The
//! [`dispatcher::Dispatcher`] looks only at the call's
//! [`models::ExecutionMode`]:
//!
//! - **async**: the body is captured in full, the call is enqueued and the
//!   caller gets `202 {"call_id": "..."}` straight away;
//! - **sync**: the call is submitted and the caller waits while the agent
//!   writes the function's response.
//!
//! Failures are translated into JSON errors. Busy and timeout rejections
//! also carry an `XXX-FXLB-WAIT` header with the time spent since the call
//! was built.
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Service as server::AppService
//!     participant Dispatcher as dispatcher::Dispatcher
//!     participant Agent as agent::Agent
//!
//!     Client->>Service: POST /r/myapp/hello
//!     Service->>Dispatcher: handle_function_call(target, req)
//!     Dispatcher->>Agent: get_call(opts)
//!     Agent-->>Dispatcher: Call (mode = async)
//!     Dispatcher->>Dispatcher: capture_payload
//!     Dispatcher->>Agent: enqueue(ctx, model)
//!     Dispatcher-->>Client: 202 {"call_id": "01J..."}
//! ```
//!
//! ## Architecture
//!
//! - **[`dispatcher`]** - mode routing, payload capture, error translation
//! - **[`agent`]** - the execution agent contract and the in-process [`agent::LocalAgent`]
//! - **[`worker_pool`]** - function coroutines with bounded admission
//! - **[`server`]** - `may_minihttp` service, request head and response sink
//! - **[`middleware`]** - metrics and tracing around each dispatch
//! - **[`models`]** / **[`ids`]** - call model, error taxonomy, call ids
//! - **[`config`]** / **[`runtime_config`]** / **[`logging`]** - ambient setup
//! - **[`cli`]** - `fnrunner serve` and `fnrunner routes`

pub mod agent;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod runtime_config;
pub mod server;
pub mod worker_pool;

pub use agent::{Agent, LocalAgent};
pub use dispatcher::{CallTarget, DispatchOutcome, Dispatcher};
pub use models::{ApiError, CallModel, ExecutionMode};
