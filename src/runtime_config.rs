//! # Runtime Configuration Module
//!
//! Coroutine runtime settings for the `may` scheduler.
//!
//! ## Environment Variables
//!
//! ### `FN_STACK_SIZE`
//!
//! Stack size for request and worker coroutines. Accepts decimal
//! (`65536`) or hexadecimal (`0x10000`). Default: `0x10000` (64 KB).
//!
//! Functions run on worker coroutines, so this bounds how deep a function's
//! call chain can go. Memory use is roughly
//! `stack_size × concurrent_coroutines`.
//!
//! ### `FN_MAY_WORKERS`
//!
//! Number of scheduler threads. Default: number of CPUs.
//!
//! ```rust
//! use fnrunner::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! assert!(config.stack_size > 0);
//! ```

use crate::worker_pool::parse_stack_size;
use std::env;
use tracing::info;

/// Default coroutine stack size (64 KB).
pub const DEFAULT_STACK_SIZE: usize = 0x10000;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes
    pub stack_size: usize,
    /// Scheduler threads; `None` keeps the `may` default
    pub workers: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            workers: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let stack_size = env::var("FN_STACK_SIZE")
            .ok()
            .and_then(|v| parse_stack_size(&v))
            .unwrap_or(DEFAULT_STACK_SIZE);
        let workers = env::var("FN_MAY_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0);
        RuntimeConfig {
            stack_size,
            workers,
        }
    }

    /// Apply to the global `may` configuration. Call before spawning anything.
    pub fn apply(&self) {
        let config = may::config();
        config.set_stack_size(self.stack_size);
        if let Some(workers) = self.workers {
            config.set_workers(workers);
        }
        info!(
            stack_size = self.stack_size,
            workers = ?self.workers,
            "Coroutine runtime configured"
        );
    }
}
