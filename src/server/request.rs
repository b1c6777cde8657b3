use may_minihttp::Request;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

/// Maximum inline headers before heap allocation
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage for the hot path.
///
/// Header names use `Arc<str>` since the same handful of names repeat on
/// every request.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Everything about an inbound request except its body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Parsed query string parameters
    pub query_params: HashMap<String, String>,
    /// HTTP headers (lowercase names)
    pub headers: HeaderVec,
}

impl RequestHead {
    #[must_use]
    pub fn new(method: &str, raw_path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: raw_path.split('?').next().unwrap_or("/").to_string(),
            query_params: parse_query_params(raw_path),
            headers: HeaderVec::new(),
        }
    }

    /// Builder-style header insertion; the name is lowercased.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.to_string()));
        self
    }

    /// Extract method, path, query and headers from a `may_minihttp::Request`.
    #[must_use]
    pub fn from_request(req: &Request) -> Self {
        let mut head = Self::new(req.method(), req.path());
        for h in req.headers() {
            head.headers.push((
                Arc::from(h.name.to_ascii_lowercase()),
                String::from_utf8_lossy(h.value).to_string(),
            ));
        }
        debug!(
            method = %head.method,
            path = %head.path,
            header_count = head.headers.len(),
            "Request head parsed"
        );
        head
    }

    /// Header value by name (case-insensitive per RFC 7230).
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared `Content-Length`, or `-1` when absent or unparsable.
    #[must_use]
    pub fn content_length(&self) -> i64 {
        self.header("content-length")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|n| *n >= 0)
            .unwrap_or(-1)
    }
}

/// An inbound request as seen by the dispatch core: a head plus a body stream.
pub struct InboundRequest<'a> {
    head: RequestHead,
    body: Box<dyn Read + 'a>,
}

impl<'a> InboundRequest<'a> {
    pub fn new<B: Read + 'a>(head: RequestHead, body: B) -> Self {
        Self {
            head,
            body: Box::new(body),
        }
    }

    #[must_use]
    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    #[must_use]
    pub fn content_length(&self) -> i64 {
        self.head.content_length()
    }

    /// Split into head and body so the body can travel with the call.
    #[must_use]
    pub fn into_parts(self) -> (RequestHead, Box<dyn Read + 'a>) {
        (self.head, self.body)
    }
}

impl std::fmt::Debug for InboundRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundRequest")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

/// Parse query string parameters from a URL path.
///
/// Extracts everything after the `?` character and URL-decodes names and values.
#[must_use]
pub fn parse_query_params(path: &str) -> HashMap<String, String> {
    if let Some(pos) = path.find('?') {
        let query_str = &path[pos + 1..];
        url::form_urlencoded::parse(query_str.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    } else {
        HashMap::new()
    }
}

/// Prefix under which functions are invoked: `/r/{app}/{path...}`.
pub const INVOKE_PREFIX: &str = "/r/";

/// Split an invocation path into the application name and the function path.
///
/// Returns `None` when the path is not an invocation path. The application
/// name is `None` when the segment is empty; the function path is `None`
/// when nothing follows the application.
#[must_use]
pub fn split_invoke_path(path: &str) -> Option<(Option<String>, Option<String>)> {
    let rest = path.strip_prefix(INVOKE_PREFIX).or_else(|| {
        if path == "/r" {
            Some("")
        } else {
            None
        }
    })?;
    let (app, route) = match rest.find('/') {
        Some(pos) => (&rest[..pos], Some(&rest[pos..])),
        None => (rest, None),
    };
    let app = urlencoding::decode(app)
        .map(|a| a.into_owned())
        .unwrap_or_else(|_| app.to_string());
    let app = if app.is_empty() { None } else { Some(app) };
    Some((app, route.map(str::to_string)))
}
