//! Execution agent boundary.
//!
//! [`Agent`] is the contract the dispatcher consumes. [`LocalAgent`] is an
//! in-process implementation backed by the worker pool, a bounded queue and
//! a call log.

mod core;
pub mod functions;
mod local;
mod queue;
mod routes;
mod store;

pub use core::{Agent, Call, CallContext, CallOptions, CallRecord, CallStatus};
pub use functions::{builtin, Function, FunctionInput, FunctionOutput};
pub use local::{AgentConfig, LocalAgent, APP_NAME_HEADER, CALL_ID_HEADER, PATH_HEADER};
pub use queue::MemoryQueue;
pub use routes::{Route, RouteTable};
pub use store::CallStore;
