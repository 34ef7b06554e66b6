use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, time::Duration};
use tracing::{error, info};

use crate::config::{Config, load_config};
use crate::engine::ForwardingEngine;
use crate::health::HealthChecker;
use crate::logging;

#[derive(Parser, Debug)]
#[command(
    name = "tcp-forwarder",
    about = "Forwards TCP traffic from local ports to target addresses",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    pub config: PathBuf,
}

pub const HELP: &str = r#"
TCP Forwarder

Usage:
  tcp-forwarder <config_file>

Forwards TCP traffic from local ports to target addresses over IPv4 or IPv6,
with connection retries, a global connection limit, logging and health checks.

Configuration file (TOML):
  [[forwarders]]          One or more forwarders, each with:
    listen_address        Address to listen on.
    listen_port           Port to listen on.
    target_address        Address to forward traffic to.
    target_port           Port to forward traffic to.
    port_range            Optional { start, end }. Forwards every port in the
                          range to the same port on the target.

  buffer_size             Bytes per relay buffer. Default: 8192.
  tcp_no_delay            Disable Nagle's algorithm. Default: true.
  retry_attempts          Connect retries after the first failure. Default: 3.
  retry_delay             Seconds between connect attempts. Default: 2.
  max_connections         Simultaneous connections across all forwarders.
                          Default: 100.

  [thread_pool]
    threads               Worker threads. At least the number of CPU cores
                          is recommended.

  [logging]
    enabled               Enable or disable logging.
    file                  File to append log output to.
    level                 TRACE, DEBUG, INFO, WARN or ERROR. Optional; any
                          other value logs everything.

  [health_check]
    enabled               Enable or disable the periodic health log line.
    interval              Seconds between health checks.

Example:
  buffer_size = 8192
  tcp_no_delay = true
  retry_attempts = 3
  retry_delay = 2
  max_connections = 100

  [[forwarders]]
  listen_address = "::"
  listen_port = 8080
  target_address = "2001:db8::1"
  target_port = 9090

  [thread_pool]
  threads = 4

  [logging]
  enabled = true
  file = "forwarder.log"
  level = "INFO"

  [health_check]
  enabled = true
  interval = 10
"#;

pub fn print_help() {
    println!("{HELP}");
}

/// Loads the configuration, builds the runtime and serves until killed.
/// Every returned error happened before any traffic was served.
pub fn run(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let _log_guard = logging::init(&config.logging);
    info!(config_file = %cli.config.display(), "Configuration loaded");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.thread_pool.threads)
        .enable_all()
        .build()
        .context("Failed to build the async runtime")?;

    runtime
        .block_on(serve(config))
        .inspect_err(|e| error!("Startup failed: {e:#}"))
}

async fn serve(config: Config) -> Result<()> {
    let rules = config.rules()?;
    let engine = ForwardingEngine::bind(&rules, config.engine_config()).await?;

    if config.health_check.enabled {
        HealthChecker::new(Duration::from_secs(config.health_check.interval)).spawn();
    }

    engine.run().await;
    Ok(())
}
