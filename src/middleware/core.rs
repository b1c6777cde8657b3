use std::time::Duration;

use crate::dispatcher::DispatchOutcome;
use crate::models::{ApiError, CallModel};

/// Hooks run around every dispatch once the call is built.
///
/// `before` may reject a call; the rejection is returned to the caller like
/// any other pre-dispatch failure and the agent is never invoked.
pub trait Middleware: Send + Sync {
    fn before(&self, _call: &CallModel) -> Result<(), ApiError> {
        Ok(())
    }
    fn after(
        &self,
        _call: &CallModel,
        _outcome: &Result<DispatchOutcome, ApiError>,
        _latency: Duration,
    ) {
    }
}
