use crate::models::{ApiError, CallModel};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

/// Bounded in-memory queue of serialized async calls.
///
/// Entries are stored in their JSON wire form so anything that enqueues
/// here could equally well target an external broker.
pub struct MemoryQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
}

impl MemoryQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a call; [`ApiError::QueueFull`] once `capacity` entries wait.
    pub fn push(&self, model: &CallModel) -> Result<(), ApiError> {
        let bytes = serde_json::to_vec(model)
            .map_err(|e| anyhow::Error::new(e).context("serializing queued call"))?;
        let mut items = self.lock();
        if items.len() >= self.capacity {
            debug!(call_id = %model.id(), capacity = self.capacity, "Async queue full");
            return Err(ApiError::QueueFull);
        }
        items.push_back(bytes);
        Ok(())
    }

    /// Take the oldest call. Entries that fail to decode are dropped.
    pub fn pop(&self) -> Option<CallModel> {
        loop {
            let bytes = self.lock().pop_front()?;
            match serde_json::from_slice(&bytes) {
                Ok(model) => return Some(model),
                Err(e) => error!(error = %e, bytes = bytes.len(), "Dropping undecodable queue entry"),
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
