//! Call model and error taxonomy shared by the dispatcher and the agent.

mod call;
mod error;

pub use call::{CallModel, ExecutionMode, DEFAULT_CALL_TIMEOUT};
pub use error::{ApiError, STATUS_CLIENT_CLOSED_REQUEST};
