//! # CLI Module
//!
//! ```bash
//! # serve the built-in demo app on :8080
//! fnrunner serve
//!
//! # serve routes from a config file on another port
//! fnrunner serve --config fn.yaml --addr 127.0.0.1:9000
//!
//! # print the route table
//! fnrunner routes --config fn.yaml
//! ```

mod commands;

pub use commands::{build_service, run_cli, Cli, Commands, Service};
