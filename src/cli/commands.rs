use crate::agent::{Agent, LocalAgent};
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::logging;
use crate::middleware::{MetricsMiddleware, Middleware, TracingMiddleware};
use crate::runtime_config::RuntimeConfig;
use crate::server::{AppService, HttpServer};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Command-line interface for the function runner
#[derive(Parser)]
#[command(name = "fnrunner")]
#[command(about = "Function invocation front door", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve function invocations over HTTP
    Serve {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address and port to bind, overriding the configuration
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print the resolved route table and exit
    Routes {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Everything needed to serve: the HTTP service plus the agent behind it.
pub struct Service {
    pub service: AppService,
    pub agent: Arc<LocalAgent>,
    pub metrics: Arc<MetricsMiddleware>,
}

/// Wire route table, agent, dispatcher and middleware from `config`.
pub fn build_service(config: &ServerConfig) -> Result<Service> {
    let routes = Arc::new(config.route_table().context("building route table")?);
    let agent = Arc::new(LocalAgent::new(routes, config.agent_config()));
    let metrics = Arc::new(MetricsMiddleware::new());

    let mut dispatcher = Dispatcher::new(Arc::clone(&agent) as Arc<dyn Agent>)
        .with_max_request_size(config.max_request_size);
    dispatcher.add_middleware(Arc::clone(&metrics) as Arc<dyn Middleware>);
    dispatcher.add_middleware(Arc::new(TracingMiddleware));

    let mut service = AppService::new(Arc::new(dispatcher));
    service.set_metrics_middleware(Arc::clone(&metrics));
    service.set_pool_metrics(Arc::clone(agent.pool().metrics()));

    Ok(Service {
        service,
        agent,
        metrics,
    })
}

/// Parse arguments and run the selected command.
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, addr } => serve(config, addr),
        Commands::Routes { config } => {
            let config = ServerConfig::load(config.as_deref())?;
            for route in config.route_table()?.routes() {
                println!(
                    "/r/{}{}\t{}\t{}\t{}s",
                    route.app_name,
                    route.path,
                    route.function.name(),
                    route.mode.as_str(),
                    route.timeout.as_secs()
                );
            }
            Ok(())
        }
    }
}

fn serve(config_path: Option<PathBuf>, addr: Option<String>) -> Result<()> {
    let _logging = logging::init_logging()?;

    let mut config = ServerConfig::load(config_path.as_deref())?;
    if let Some(addr) = addr {
        config.addr = addr;
    }
    RuntimeConfig {
        stack_size: config.stack_size,
        ..RuntimeConfig::from_env()
    }
    .apply();

    let Service { service, agent, .. } = build_service(&config)?;
    let shutdown = service.shutdown_context().clone();
    let handle = HttpServer(service)
        .start(config.addr.as_str())
        .with_context(|| format!("binding {}", config.addr))?;
    info!(addr = %handle.addr(), routes = agent.routes().routes().len(), "fnrunner ready");

    wait_for_shutdown()?;

    shutdown.cancel();
    agent.shutdown();
    handle.stop();
    info!("fnrunner stopped");
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown() -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("installing signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal = signal, "Shutdown signal received");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> Result<()> {
    loop {
        std::thread::park();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["fnrunner", "serve", "--addr", "127.0.0.1:9"]).unwrap();
        match cli.command {
            Commands::Serve { config, addr } => {
                assert!(config.is_none());
                assert_eq!(addr.as_deref(), Some("127.0.0.1:9"));
            }
            Commands::Routes { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn test_build_service_default_routes() {
        let built = build_service(&ServerConfig::default()).unwrap();
        assert!(built.agent.routes().resolve("demo", "/echo").is_ok());
        assert_eq!(built.metrics.dispatch_count(), 0);
    }
}
