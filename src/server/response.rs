//! Response sink shared between the dispatcher and the execution agent.
//!
//! The agent writes the function result straight into a [`ResponseWriter`]
//! during `submit`; the dispatcher only writes when it owns the outcome
//! (async receipt, error translation). Nothing reaches the socket until
//! [`write_response`] flushes the final snapshot into `may_minihttp`.

use crate::dispatcher::WAIT_HEADER;
use crate::server::request::HeaderVec;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use may_minihttp::Response;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::warn;

/// Maximum number of headers `may_minihttp` accepts on a response.
pub const MAX_RESPONSE_HEADERS: usize = 16;

/// Upper bound on distinct interned header lines kept for reuse.
const MAX_INTERNED_HEADER_LINES: usize = 65_536;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("response headers already written with status {0}")]
    HeadersCommitted(u16),
}

#[derive(Debug)]
struct ResponseState {
    status: u16,
    headers: HeaderVec,
    body: Vec<u8>,
    committed: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderVec::new(),
            body: Vec::new(),
            committed: false,
        }
    }
}

/// Final response captured from a [`ResponseWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub committed: bool,
}

impl ResponseSnapshot {
    /// Header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Clonable handle on a single request's response.
///
/// Headers and status may change until the response is committed, either by
/// [`ResponseWriter::write_header`] or by the first body write. After that
/// header mutations fail with [`WriteError::HeadersCommitted`] and body
/// writes keep appending.
#[derive(Clone, Default)]
pub struct ResponseWriter {
    inner: Arc<Mutex<ResponseState>>,
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ResponseWriter")
            .field("status", &state.status)
            .field("committed", &state.committed)
            .field("bytes_written", &state.body.len())
            .finish()
    }
}

impl ResponseWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the status that will be committed by the next write.
    pub fn set_status(&self, status: u16) -> Result<(), WriteError> {
        let mut state = self.lock();
        if state.committed {
            return Err(WriteError::HeadersCommitted(state.status));
        }
        state.status = status;
        Ok(())
    }

    /// Replace any header with the same name.
    pub fn set_header(&self, name: &str, value: impl Into<String>) -> Result<(), WriteError> {
        let mut state = self.lock();
        if state.committed {
            return Err(WriteError::HeadersCommitted(state.status));
        }
        state.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        state.headers.push((Arc::from(name), value.into()));
        Ok(())
    }

    /// Append a header, keeping existing values with the same name.
    pub fn add_header(&self, name: &str, value: impl Into<String>) -> Result<(), WriteError> {
        let mut state = self.lock();
        if state.committed {
            return Err(WriteError::HeadersCommitted(state.status));
        }
        state.headers.push((Arc::from(name), value.into()));
        Ok(())
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.lock()
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    /// Commit the status and headers.
    pub fn write_header(&self, status: u16) -> Result<(), WriteError> {
        let mut state = self.lock();
        if state.committed {
            return Err(WriteError::HeadersCommitted(state.status));
        }
        state.status = status;
        state.committed = true;
        Ok(())
    }

    /// Append body bytes, committing the pending status first if needed.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut state = self.lock();
        state.committed = true;
        state.body.extend_from_slice(bytes);
        bytes.len()
    }

    /// Commit a JSON response in one step.
    pub fn write_json(&self, status: u16, body: &Value) -> Result<(), WriteError> {
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        let mut state = self.lock();
        if state.committed {
            return Err(WriteError::HeadersCommitted(state.status));
        }
        state
            .headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case("content-type"));
        state
            .headers
            .push((Arc::from("Content-Type"), "application/json".to_string()));
        state.status = status;
        state.committed = true;
        state.body.extend_from_slice(&bytes);
        Ok(())
    }

    /// Commit the pending status with whatever has been written so far.
    ///
    /// Returns `false` if the response was already committed.
    pub fn finalize(&self) -> bool {
        let mut state = self.lock();
        if state.committed {
            return false;
        }
        state.committed = true;
        true
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.lock().committed
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.lock().status
    }

    #[must_use]
    pub fn bytes_written(&self) -> usize {
        self.lock().body.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> ResponseSnapshot {
        let state = self.lock();
        ResponseSnapshot {
            status: state.status,
            headers: state
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            body: state.body.clone(),
            committed: state.committed,
        }
    }
}

pub(crate) fn status_reason(status: u16) -> &'static str {
    if status == crate::models::STATUS_CLIENT_CLOSED_REQUEST {
        return "Client Closed Request";
    }
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

/// Leaked `'static` header lines, each distinct line leaked once.
///
/// The capacity is checked before anything is leaked, so a full interner
/// stops allocating. Required lines bypass the bound; the wait header's
/// distinct values are limited by the configured deadlines.
struct HeaderInterner {
    lines: DashMap<String, &'static str>,
    capacity: usize,
}

impl HeaderInterner {
    fn new(capacity: usize) -> Self {
        Self {
            lines: DashMap::new(),
            capacity,
        }
    }

    /// Interned line for `name: value`, or `None` when the interner is full
    /// and the header is not required.
    fn intern(&self, name: &str, value: &str, required: bool) -> Option<&'static str> {
        let value: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
        let line = format!("{name}: {value}");
        if let Some(existing) = self.lines.get(line.as_str()) {
            return Some(*existing);
        }
        if !required && self.lines.len() >= self.capacity {
            return None;
        }
        let interned = match self.lines.entry(line) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let leaked: &'static str = Box::leak(entry.key().clone().into_boxed_str());
                entry.insert(leaked);
                leaked
            }
        };
        Some(interned)
    }

    fn len(&self) -> usize {
        self.lines.len()
    }
}

static HEADER_LINES: Lazy<HeaderInterner> =
    Lazy::new(|| HeaderInterner::new(MAX_INTERNED_HEADER_LINES));

/// Flush a captured response into the transport.
pub fn write_response(res: &mut Response, snapshot: ResponseSnapshot) {
    res.status_code(snapshot.status as usize, status_reason(snapshot.status));
    let mut written = 0usize;
    for (name, value) in &snapshot.headers {
        // may_minihttp computes Content-Length itself
        if name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if written == MAX_RESPONSE_HEADERS {
            warn!(
                header = %name,
                max_headers = MAX_RESPONSE_HEADERS,
                "Response header dropped - limit reached"
            );
            continue;
        }
        let required = name.eq_ignore_ascii_case(WAIT_HEADER);
        match HEADER_LINES.intern(name, value, required) {
            Some(line) => {
                res.header(line);
                written += 1;
            }
            None => warn!(
                header = %name,
                interned = HEADER_LINES.len(),
                "Response header dropped - header line interner is full"
            ),
        }
    }
    res.body_vec(snapshot.body);
}
