//! # Dispatcher Module
//!
//! The dispatcher is the front door between an inbound invocation and the
//! execution agent. For every request it:
//!
//! 1. rejects requests without an application name before touching the agent;
//! 2. asks the agent to build a [`Call`](crate::agent::Call);
//! 3. routes on the call's execution mode:
//!    - **async**: captures the body into a buffer sized from the declared
//!      content length (floor of 128 bytes), enqueues the call and answers
//!      `202 {"call_id": ...}`;
//!    - **sync**: submits the call and blocks until the agent returns; the
//!      agent writes the response itself;
//! 4. translates failures through the generic error responder, adding the
//!    `XXX-FXLB-WAIT` header on busy/timeout rejections.
//!
//! ## Request Flow
//!
//! ```text
//! Received -> Built -> Async: Captured -> Enqueued -> Acknowledged
//!                   -> Sync:  Submitted -> Completed | Failed
//! ```
//!
//! No retries happen here; retry policy belongs to the agent.
//!
//! ## Partial writes
//!
//! If the function already wrote a response before failing, the error
//! responder finds the sink committed and only logs.

mod core;

pub use core::{
    capture_capacity, capture_payload, clean_path, format_wait, handle_error_response,
    wait_header_value, CallTarget, DispatchOutcome, Dispatcher, MIN_CAPTURE_CAPACITY,
    WAIT_HEADER,
};
