use crate::ids::CallId;
use crate::models::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// How a call is executed once it leaves the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Caller blocks until the function returns.
    #[default]
    Sync,
    /// Caller gets a receipt; the call is queued.
    Async,
}

impl ExecutionMode {
    /// Parse `sync` / `async` (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "async" => Some(Self::Async),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

/// Default per-call execution deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// The unit of work handed to the execution agent.
///
/// `id`, `mode` and `created_at` are fixed by [`CallModel::new`] and have no
/// setters. The payload may be attached once the body has been captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallModel {
    id: CallId,
    app_name: String,
    path: String,
    #[serde(rename = "type")]
    mode: ExecutionMode,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(with = "payload_base64")]
    payload: Vec<u8>,
    created_at: SystemTime,
    #[serde(rename = "timeout_ms", with = "timeout_ms")]
    pub timeout: Duration,
}

impl CallModel {
    /// Build a new call with a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::MissingAppName`] when `app_name` is empty.
    pub fn new(
        app_name: impl Into<String>,
        path: impl Into<String>,
        mode: ExecutionMode,
    ) -> Result<Self, ApiError> {
        let app_name = app_name.into();
        if app_name.trim().is_empty() {
            return Err(ApiError::MissingAppName);
        }
        Ok(Self {
            id: CallId::new(),
            app_name,
            path: path.into(),
            mode,
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            payload: Vec::new(),
            created_at: SystemTime::now(),
            timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    /// Same as [`CallModel::new`] but with an explicit creation time.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::MissingAppName`] when `app_name` is empty.
    pub fn new_at(
        app_name: impl Into<String>,
        path: impl Into<String>,
        mode: ExecutionMode,
        created_at: SystemTime,
    ) -> Result<Self, ApiError> {
        let mut model = Self::new(app_name, path, mode)?;
        model.created_at = created_at;
        Ok(model)
    }

    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }

    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Attach the fully captured request body.
    pub fn attach_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    /// Time elapsed between construction and `now`; zero if the clock went backwards.
    #[must_use]
    pub fn wait_time(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or_default()
    }
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("invalid payload encoding: {e}")))
    }
}

mod timeout_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(timeout: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_mode_parse() {
        assert_eq!(ExecutionMode::parse("sync"), Some(ExecutionMode::Sync));
        assert_eq!(ExecutionMode::parse("ASYNC"), Some(ExecutionMode::Async));
        assert_eq!(ExecutionMode::parse("later"), None);
    }

    #[test]
    fn test_empty_app_name_is_rejected() {
        assert!(matches!(
            CallModel::new("", "/", ExecutionMode::Sync),
            Err(ApiError::MissingAppName)
        ));
        assert!(matches!(
            CallModel::new("   ", "/", ExecutionMode::Async),
            Err(ApiError::MissingAppName)
        ));
    }

    #[test]
    fn test_wait_time_uses_created_at() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let model = CallModel::new_at("app", "/", ExecutionMode::Sync, t0).unwrap();
        let t1 = t0 + Duration::from_millis(1_500);
        assert_eq!(model.wait_time(t1), Duration::from_millis(1_500));
        // clock skew never underflows
        assert_eq!(model.wait_time(t0 - Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn test_serialized_form() {
        let mut model = CallModel::new("app", "/hello", ExecutionMode::Async).unwrap();
        model.attach_payload(b"hello".to_vec());
        let v = serde_json::to_value(&model).unwrap();
        assert_eq!(v["type"], "async");
        assert_eq!(v["payload"], "aGVsbG8=");
        assert_eq!(v["id"], model.id().to_string());

        let back: CallModel = serde_json::from_value(v).unwrap();
        assert_eq!(back.payload(), b"hello");
        assert_eq!(back.mode(), ExecutionMode::Async);
    }
}
