//! Server configuration.
//!
//! Loaded from an optional YAML file, then overridden by `FN_*` environment
//! variables:
//!
//! ```yaml
//! addr: 0.0.0.0:8080
//! max_request_size: 6291456
//! handler_workers: 4
//! backpressure_mode: shed
//! apps:
//!   myapp:
//!     routes:
//!       - path: /hello
//!         function: hello
//!         type: async
//!       - path: /slow
//!         function: sleep:250
//!         timeout_secs: 1
//! ```

use crate::agent::{builtin, AgentConfig, Route, RouteTable};
use crate::models::{ExecutionMode, DEFAULT_CALL_TIMEOUT};
use crate::worker_pool::{parse_stack_size, BackpressureMode, WorkerPoolConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: String, value: String },
    #[error("app {app:?}: route {path:?} uses unknown function {function:?}")]
    UnknownFunction {
        app: String,
        path: String,
        function: String,
    },
    #[error("app {app:?}: invalid route {path:?}: {reason}")]
    InvalidRoute {
        app: String,
        path: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub path: String,
    /// Built-in function name, e.g. `echo` or `sleep:250`
    pub function: String,
    #[serde(rename = "type", default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Body limit in bytes; 0 disables it
    pub max_request_size: u64,
    pub handler_workers: usize,
    pub handler_queue_bound: usize,
    /// `block` or `shed`
    pub backpressure_mode: String,
    pub backpressure_timeout_ms: u64,
    pub stack_size: usize,
    pub async_queue_capacity: usize,
    pub async_runners: usize,
    pub call_log_capacity: usize,
    pub apps: BTreeMap<String, AppConfig>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT.as_secs()
}

impl Default for ServerConfig {
    fn default() -> Self {
        let pool = WorkerPoolConfig::default();
        let agent = AgentConfig::default();
        Self {
            addr: "0.0.0.0:8080".to_string(),
            max_request_size: agent.max_request_size,
            handler_workers: pool.num_workers,
            handler_queue_bound: pool.queue_bound,
            backpressure_mode: "block".to_string(),
            backpressure_timeout_ms: pool.backpressure_timeout_ms,
            stack_size: pool.stack_size,
            async_queue_capacity: agent.queue_capacity,
            async_runners: agent.async_runners,
            call_log_capacity: agent.call_log_capacity,
            apps: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Load from `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_yaml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply `FN_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            name: &str,
            value: Option<String>,
        ) -> Result<Option<T>, ConfigError> {
            value
                .map(|v| {
                    v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                        name: name.to_string(),
                        value: v.clone(),
                    })
                })
                .transpose()
        }

        if let Some(addr) = lookup("FN_ADDR") {
            self.addr = addr;
        }
        if let Some(v) = parsed("FN_MAX_REQUEST_SIZE", lookup("FN_MAX_REQUEST_SIZE"))? {
            self.max_request_size = v;
        }
        if let Some(v) = parsed("FN_HANDLER_WORKERS", lookup("FN_HANDLER_WORKERS"))? {
            self.handler_workers = v;
        }
        if let Some(v) = parsed("FN_HANDLER_QUEUE_BOUND", lookup("FN_HANDLER_QUEUE_BOUND"))? {
            self.handler_queue_bound = v;
        }
        if let Some(mode) = lookup("FN_BACKPRESSURE_MODE") {
            self.backpressure_mode = mode;
        }
        if let Some(v) = parsed(
            "FN_BACKPRESSURE_TIMEOUT_MS",
            lookup("FN_BACKPRESSURE_TIMEOUT_MS"),
        )? {
            self.backpressure_timeout_ms = v;
        }
        if let Some(v) = lookup("FN_STACK_SIZE") {
            self.stack_size = parse_stack_size(&v).ok_or(ConfigError::InvalidEnv {
                name: "FN_STACK_SIZE".to_string(),
                value: v,
            })?;
        }
        if let Some(v) = parsed("FN_ASYNC_QUEUE_CAPACITY", lookup("FN_ASYNC_QUEUE_CAPACITY"))? {
            self.async_queue_capacity = v;
        }
        if let Some(v) = parsed("FN_ASYNC_RUNNERS", lookup("FN_ASYNC_RUNNERS"))? {
            self.async_runners = v;
        }
        if let Some(v) = parsed("FN_CALL_LOG_CAPACITY", lookup("FN_CALL_LOG_CAPACITY"))? {
            self.call_log_capacity = v;
        }
        Ok(())
    }

    /// Check routes and enumerated settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if BackpressureMode::parse(&self.backpressure_mode).is_none() {
            return Err(ConfigError::InvalidEnv {
                name: "backpressure_mode".to_string(),
                value: self.backpressure_mode.clone(),
            });
        }
        for (app, app_config) in &self.apps {
            for route in &app_config.routes {
                let invalid = |reason| ConfigError::InvalidRoute {
                    app: app.clone(),
                    path: route.path.clone(),
                    reason,
                };
                if !route.path.starts_with('/') {
                    return Err(invalid("path must start with '/'"));
                }
                if route.timeout_secs == 0 {
                    return Err(invalid("timeout_secs must be positive"));
                }
                if builtin(&route.function).is_none() {
                    return Err(ConfigError::UnknownFunction {
                        app: app.clone(),
                        path: route.path.clone(),
                        function: route.function.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(
            self.handler_workers,
            self.handler_queue_bound,
            BackpressureMode::parse(&self.backpressure_mode).unwrap_or_default(),
            self.backpressure_timeout_ms,
            self.stack_size,
        )
    }

    #[must_use]
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            pool: self.worker_pool_config(),
            queue_capacity: self.async_queue_capacity,
            async_runners: self.async_runners,
            call_log_capacity: self.call_log_capacity,
            max_request_size: self.max_request_size,
        }
    }

    /// Build the route table. With no apps configured a `demo` app exposing
    /// every built-in is registered.
    pub fn route_table(&self) -> Result<RouteTable, ConfigError> {
        let table = RouteTable::new();
        if self.apps.is_empty() {
            for (path, function, mode) in [
                ("/echo", "echo", ExecutionMode::Sync),
                ("/hello", "hello", ExecutionMode::Sync),
                ("/hello-async", "hello", ExecutionMode::Async),
                ("/sleep", "sleep", ExecutionMode::Sync),
            ] {
                let function = builtin(function).ok_or_else(|| ConfigError::UnknownFunction {
                    app: "demo".to_string(),
                    path: path.to_string(),
                    function: function.to_string(),
                })?;
                table.register(Route {
                    app_name: "demo".to_string(),
                    path: path.to_string(),
                    function,
                    mode,
                    timeout: DEFAULT_CALL_TIMEOUT,
                });
            }
            return Ok(table);
        }

        for (app, app_config) in &self.apps {
            for route in &app_config.routes {
                let function =
                    builtin(&route.function).ok_or_else(|| ConfigError::UnknownFunction {
                        app: app.clone(),
                        path: route.path.clone(),
                        function: route.function.clone(),
                    })?;
                table.register(Route {
                    app_name: app.clone(),
                    path: route.path.clone(),
                    function,
                    mode: route.mode,
                    timeout: Duration::from_secs(route.timeout_secs),
                });
            }
        }
        Ok(table)
    }
}
