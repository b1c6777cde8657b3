use super::core::{CallRecord, CallStatus};
use crate::ids::CallId;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// Bounded call log; the least recently touched record is evicted first.
pub struct CallStore {
    records: Mutex<LruCache<CallId, CallRecord>>,
}

impl CallStore {
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            records: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CallId, CallRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, record: CallRecord) {
        self.lock().put(record.id, record);
    }

    #[must_use]
    pub fn get(&self, id: &CallId) -> Option<CallRecord> {
        self.lock().get(id).cloned()
    }

    /// Mark a call as running.
    pub fn mark_running(&self, id: &CallId) {
        if let Some(record) = self.lock().get_mut(id) {
            record.status = CallStatus::Running;
            record.started_at = Some(SystemTime::now());
        }
    }

    /// Record the terminal status of a call.
    pub fn finish(&self, id: &CallId, status: CallStatus, error: Option<String>) {
        if let Some(record) = self.lock().get_mut(id) {
            record.status = status;
            record.completed_at = Some(SystemTime::now());
            record.error = error;
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
}
