//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter`, a sampling
//! layer and a JSON or pretty formatter, optionally behind a non-blocking
//! writer. Everything is driven by `FN_LOG_*` environment variables:
//!
//! | variable | default | meaning |
//! |---|---|---|
//! | `FN_LOG_LEVEL` | `info` | base level when `RUST_LOG` is unset |
//! | `FN_LOG_FORMAT` | `json` | `json` or `pretty` |
//! | `FN_LOG_SAMPLING_MODE` | `all` | `all`, `error-only` or `sampled` |
//! | `FN_LOG_SAMPLING_RATE` | `1.0` | share of sub-warn events kept when sampled |
//! | `FN_LOG_ASYNC` | `true` | write through `tracing-appender` |
//! | `FN_LOG_BUFFER_SIZE` | `8192` | lines buffered by the async writer |
//! | `FN_LOG_TARGET_FILTER` | unset | extra comma-separated filter directives |
//! | `FN_LOG_INCLUDE_LOCATION` | `false` | emit file and line |

use anyhow::{Context, Result};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::Level;
use tracing::{Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Sampling mode: how to decide which events to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Log everything
    All,
    /// Log only WARN and ERROR
    ErrorOnly,
    /// Sample below WARN, keep every WARN and ERROR
    Sampled,
}

impl SamplingMode {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error-only" | "error_only" => SamplingMode::ErrorOnly,
            "sampled" => SamplingMode::Sampled,
            _ => SamplingMode::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_level: String,
    pub format: LogFormat,
    pub sampling_mode: SamplingMode,
    /// Sampling rate (0.0-1.0) for Sampled mode
    pub sampling_rate: f64,
    pub async_logging: bool,
    pub buffer_size: usize,
    /// Extra filter directives (comma-separated)
    pub target_filter: Option<String>,
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            sampling_mode: SamplingMode::All,
            sampling_rate: 1.0,
            async_logging: true,
            buffer_size: 8192,
            target_filter: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Parse configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: env::var("FN_LOG_LEVEL").unwrap_or(defaults.log_level),
            format: env::var("FN_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.format),
            sampling_mode: env::var("FN_LOG_SAMPLING_MODE")
                .map(|s| SamplingMode::parse(&s))
                .unwrap_or(defaults.sampling_mode),
            sampling_rate: env::var("FN_LOG_SAMPLING_RATE")
                .ok()
                .and_then(|s| parse_sampling_rate(&s))
                .unwrap_or(defaults.sampling_rate),
            async_logging: env_parse("FN_LOG_ASYNC").unwrap_or(defaults.async_logging),
            buffer_size: env_parse("FN_LOG_BUFFER_SIZE").unwrap_or(defaults.buffer_size),
            target_filter: env::var("FN_LOG_TARGET_FILTER").ok(),
            include_location: env_parse("FN_LOG_INCLUDE_LOCATION")
                .unwrap_or(defaults.include_location),
        }
    }

    /// Development preset: pretty, synchronous, debug level.
    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            async_logging: false,
            buffer_size: 1024,
            include_location: true,
            ..Self::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Parse a sampling rate, rejecting NaN and infinities.
fn parse_sampling_rate(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|rate| rate.is_finite())
}

/// Sampling layer: decides whether to emit an event based on sampling rules
pub struct SamplingLayer {
    mode: SamplingMode,
    sampling_rate: f64,
    counter: AtomicU64,
}

impl SamplingLayer {
    pub fn new(mode: SamplingMode, sampling_rate: f64) -> Self {
        Self {
            mode,
            // NaN survives clamp and would silence every sampled event
            sampling_rate: if sampling_rate.is_finite() {
                sampling_rate.clamp(0.0, 1.0)
            } else {
                1.0
            },
            counter: AtomicU64::new(0),
        }
    }

    fn should_sample(&self, metadata: &Metadata<'_>) -> bool {
        // Spans must pass so the `call` span reaches the formatter
        if metadata.is_span() {
            return true;
        }
        let severe = matches!(metadata.level(), &Level::WARN | &Level::ERROR);
        match self.mode {
            SamplingMode::All => true,
            SamplingMode::ErrorOnly => severe,
            SamplingMode::Sampled => {
                if severe {
                    return true;
                }
                if self.sampling_rate <= 0.0 {
                    return false;
                }
                let count = self.counter.fetch_add(1, Ordering::Relaxed);
                let interval = (1.0 / self.sampling_rate) as u64;
                interval > 0 && count % interval == 0
            }
        }
    }
}

impl<S> Layer<S> for SamplingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: LayerContext<'_, S>) -> bool {
        self.should_sample(metadata)
    }
}

/// Keeps the non-blocking writer alive; drop it at exit to flush.
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

fn parse_level(s: &str) -> Level {
    match s.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let level = parse_level(&config.log_level);
    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // client disconnects are logged by the transport at info
    if let Ok(directive) = "may_minihttp=warn".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if let Some(target_filter) = &config.target_filter {
        for filter in target_filter.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match filter.parse() {
                Ok(directive) => env_filter = env_filter.add_directive(directive),
                Err(_) => eprintln!("Warning: Invalid log filter directive: {filter}"),
            }
        }
    }
    env_filter
}

/// Initialize logging with [`LogConfig::from_env`].
pub fn init_logging() -> Result<LoggingGuard> {
    init_logging_with_config(&LogConfig::from_env())
}

/// Initialize logging with an explicit configuration.
///
/// ```no_run
/// use fnrunner::logging::{init_logging_with_config, LogConfig};
///
/// let _guard = init_logging_with_config(&LogConfig::default_dev())?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn init_logging_with_config(config: &LogConfig) -> Result<LoggingGuard> {
    let registry = tracing_subscriber::registry()
        .with(build_filter(config))
        .with(SamplingLayer::new(config.sampling_mode, config.sampling_rate));

    let (writer, worker) = if config.async_logging {
        let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
            .buffered_lines_limit(config.buffer_size)
            .finish(std::io::stdout());
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(non_blocking), Some(guard))
    } else {
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stdout), None)
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_list(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    registry
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(LoggingGuard { _worker: worker })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(level: Level) -> Metadata<'static> {
        Metadata::new(
            "test",
            "test::module",
            level,
            None,
            None,
            None,
            tracing::field::FieldSet::new(&[], tracing::callsite::Identifier(&CALLSITE)),
            tracing::metadata::Kind::EVENT,
        )
    }

    #[test]
    fn test_log_config_default_dev() {
        let config = LogConfig::default_dev();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.sampling_mode, SamplingMode::All);
        assert!(!config.async_logging);
        assert!(config.include_location);
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("invalid"), LogFormat::Json);
        assert_eq!(SamplingMode::parse("error_only"), SamplingMode::ErrorOnly);
        assert_eq!(SamplingMode::parse("sampled"), SamplingMode::Sampled);
        assert_eq!(SamplingMode::parse("invalid"), SamplingMode::All);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("nonsense"), Level::INFO);
    }

    #[test]
    fn test_error_only_mode() {
        let layer = SamplingLayer::new(SamplingMode::ErrorOnly, 1.0);
        assert!(!layer.should_sample(&metadata(Level::INFO)));
        assert!(layer.should_sample(&metadata(Level::WARN)));
        assert!(layer.should_sample(&metadata(Level::ERROR)));
    }

    #[test]
    fn test_sampled_mode() {
        let layer = SamplingLayer::new(SamplingMode::Sampled, 0.5);
        let kept = (0..100)
            .filter(|_| layer.should_sample(&metadata(Level::INFO)))
            .count();
        assert_eq!(kept, 50);
        for _ in 0..10 {
            assert!(layer.should_sample(&metadata(Level::ERROR)));
        }
    }

    #[test]
    fn test_sampling_rate_clamping() {
        assert_eq!(SamplingLayer::new(SamplingMode::Sampled, -0.5).sampling_rate, 0.0);
        assert_eq!(SamplingLayer::new(SamplingMode::Sampled, 1.5).sampling_rate, 1.0);
        let never = SamplingLayer::new(SamplingMode::Sampled, 0.0);
        assert!(!never.should_sample(&metadata(Level::DEBUG)));
    }

    #[test]
    fn test_non_finite_sampling_rate_keeps_events() {
        for rate in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let layer = SamplingLayer::new(SamplingMode::Sampled, rate);
            assert_eq!(layer.sampling_rate, 1.0);
            assert!((0..5).all(|_| layer.should_sample(&metadata(Level::INFO))));
        }
    }

    #[test]
    fn test_parse_sampling_rate() {
        assert_eq!(parse_sampling_rate("0.25"), Some(0.25));
        assert_eq!(parse_sampling_rate(" 1 "), Some(1.0));
        assert_eq!(parse_sampling_rate("NaN"), None);
        assert_eq!(parse_sampling_rate("inf"), None);
        assert_eq!(parse_sampling_rate("often"), None);
    }

    struct TestCallsite;
    impl tracing::callsite::Callsite for TestCallsite {
        fn set_interest(&self, _interest: tracing::subscriber::Interest) {}
        fn metadata(&self) -> &tracing::Metadata<'_> {
            panic!("not used in tests")
        }
    }
    static CALLSITE: TestCallsite = TestCallsite;
}
