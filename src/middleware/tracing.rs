use std::time::Duration;

use tracing::{info, warn};

use super::Middleware;
use crate::dispatcher::DispatchOutcome;
use crate::models::{ApiError, CallModel};

/// Logs one line per dispatch with its outcome and latency.
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn after(
        &self,
        call: &CallModel,
        outcome: &Result<DispatchOutcome, ApiError>,
        latency: Duration,
    ) {
        let latency_ms = latency.as_millis() as u64;
        match outcome {
            Ok(result) => info!(
                call_id = %call.id(),
                app = %call.app_name(),
                path = %call.path(),
                outcome = ?result,
                latency_ms = latency_ms,
                "Dispatch finished"
            ),
            Err(err) => warn!(
                call_id = %call.id(),
                app = %call.app_name(),
                path = %call.path(),
                status = err.status(),
                error = %err,
                latency_ms = latency_ms,
                "Dispatch failed"
            ),
        }
    }
}
