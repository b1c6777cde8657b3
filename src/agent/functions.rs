//! Built-in functions served by the reference agent.

use crate::ids::CallId;
use crate::models::ApiError;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default pause for `sleep` when no duration is given.
pub const DEFAULT_SLEEP: Duration = Duration::from_millis(100);

/// Everything a function sees about its invocation.
#[derive(Debug, Clone, Default)]
pub struct FunctionInput {
    pub call_id: CallId,
    pub app_name: String,
    pub path: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

impl FunctionInput {
    /// Payload parsed as JSON; `Value::Null` for an empty body.
    pub fn json(&self) -> Result<Value, ApiError> {
        if self.payload.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.payload).map_err(|_| ApiError::InvalidPayload)
    }
}

/// Result of a function invocation, written verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionOutput {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FunctionOutput {
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

pub trait Function: Send + Sync {
    fn name(&self) -> &str;
    fn invoke(&self, input: FunctionInput) -> Result<FunctionOutput, ApiError>;
}

/// Echo the request back: metadata plus the payload (JSON when it parses,
/// lossy UTF-8 otherwise).
pub struct EchoFunction;

impl Function for EchoFunction {
    fn name(&self) -> &str {
        "echo"
    }

    fn invoke(&self, input: FunctionInput) -> Result<FunctionOutput, ApiError> {
        let body = serde_json::from_slice::<Value>(&input.payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&input.payload).into_owned()));
        Ok(FunctionOutput::json(
            200,
            &json!({
                "call_id": input.call_id.to_string(),
                "app": input.app_name,
                "path": input.path,
                "method": input.method,
                "headers": input.headers,
                "body": body,
            }),
        ))
    }
}

/// Greets `name` from a JSON payload, or "world".
pub struct HelloFunction;

impl Function for HelloFunction {
    fn name(&self) -> &str {
        "hello"
    }

    fn invoke(&self, input: FunctionInput) -> Result<FunctionOutput, ApiError> {
        let payload = input.json()?;
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("world");
        Ok(FunctionOutput::json(
            200,
            &json!({ "message": format!("Hello {name}!") }),
        ))
    }
}

/// Sleeps on the current coroutine, then answers 200.
pub struct SleepFunction {
    duration: Duration,
}

impl SleepFunction {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Function for SleepFunction {
    fn name(&self) -> &str {
        "sleep"
    }

    fn invoke(&self, _input: FunctionInput) -> Result<FunctionOutput, ApiError> {
        may::coroutine::sleep(self.duration);
        Ok(FunctionOutput::json(
            200,
            &json!({ "slept_ms": self.duration.as_millis() as u64 }),
        ))
    }
}

/// Resolve a built-in by name. `sleep` takes an optional `:<ms>` suffix.
pub fn builtin(name: &str) -> Option<Arc<dyn Function>> {
    match name.split_once(':') {
        None => match name {
            "echo" => Some(Arc::new(EchoFunction)),
            "hello" => Some(Arc::new(HelloFunction)),
            "sleep" => Some(Arc::new(SleepFunction::new(DEFAULT_SLEEP))),
            _ => None,
        },
        Some(("sleep", ms)) => ms
            .parse()
            .ok()
            .map(|ms| Arc::new(SleepFunction::new(Duration::from_millis(ms))) as Arc<dyn Function>),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(payload: &[u8]) -> FunctionInput {
        FunctionInput {
            app_name: "myapp".to_string(),
            path: "/hello".to_string(),
            method: "POST".to_string(),
            payload: payload.to_vec(),
            ..Default::default()
        }
    }

    fn body(out: &FunctionOutput) -> Value {
        serde_json::from_slice(&out.body).unwrap()
    }

    #[test]
    fn test_hello_uses_name() {
        let out = HelloFunction.invoke(input(br#"{"name":"Ada"}"#)).unwrap();
        assert_eq!(out.status, 200);
        assert_eq!(body(&out)["message"], "Hello Ada!");
    }

    #[test]
    fn test_hello_defaults_to_world() {
        let out = HelloFunction.invoke(input(b"")).unwrap();
        assert_eq!(body(&out)["message"], "Hello world!");
    }

    #[test]
    fn test_hello_rejects_garbage() {
        assert!(matches!(
            HelloFunction.invoke(input(b"{nope")),
            Err(ApiError::InvalidPayload)
        ));
    }

    #[test]
    fn test_echo_reflects_request() {
        let out = EchoFunction.invoke(input(b"plain text")).unwrap();
        let v = body(&out);
        assert_eq!(v["app"], "myapp");
        assert_eq!(v["path"], "/hello");
        assert_eq!(v["method"], "POST");
        assert_eq!(v["body"], "plain text");
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(builtin("echo").unwrap().name(), "echo");
        assert_eq!(builtin("hello").unwrap().name(), "hello");
        assert_eq!(builtin("sleep:5").unwrap().name(), "sleep");
        assert!(builtin("sleep:abc").is_none());
        assert!(builtin("nope").is_none());
    }
}
