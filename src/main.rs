//! line-echo: a line-oriented TCP echo server
//!
//! Every newline-terminated line a client sends is written back prefixed
//! with `Echo: `. Each connection runs as its own task and shares nothing
//! with the others.
//!
//! Features:
//! - Concurrent connections on a multi-threaded tokio runtime
//! - Request/response logging through `tracing`
//! - Configuration via CLI arguments or TOML file

mod config;
mod events;
mod framer;
mod protocol;
mod server;
mod session;

use config::{CliArgs, Config, ConfigError};
use events::TracingSink;
use server::Server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::MissingPort) => {
            println!("{}", CliArgs::usage());
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen(),
        workers = ?config.workers,
        backlog = config.backlog,
        "Starting line-echo server"
    );

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Build the runtime and serve until ctrl-c or a fatal listener error.
fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers.filter(|&n| n > 0) {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async {
        let listener = Server::from_config(&config, Arc::new(TracingSink))
            .bind()
            .await?;

        listener
            .run_until(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Shutdown requested"),
                    Err(e) => {
                        warn!(error = %e, "Unable to listen for ctrl-c");
                        std::future::pending::<()>().await;
                    }
                }
            })
            .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
