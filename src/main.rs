//! Switchyard reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                      SWITCHYARD                      │
//!                  │                                                      │
//!  Client Request  │  ┌─────────┐   ┌─────────┐   ┌────────────────────┐  │
//!  ────────────────┼─▶│   net   │──▶│  http   │──▶│ proxy engine       │  │
//!                  │  │ tls     │   │ server  │   │ (snapshot, match)  │  │
//!                  │  └─────────┘   └─────────┘   └─────────┬──────────┘  │
//!                  │                                        │             │
//!                  │                  ┌─────────────┐       ▼             │
//!                  │                  │  routing    │◀── route table      │
//!                  │                  │  arc-swap   │    snapshot         │
//!                  │                  └─────────────┘       │             │
//!                  │                                        ▼             │
//!  Client Response │  ┌─────────────────┐        ┌──────────────────┐     │  unix socket
//!  ◀───────────────┼──│ response body   │◀───────│ upstream pool    │◀────┼── or TCP
//!                  │  │ (streamed)      │        │ + passive health │     │  backend
//!                  │  └─────────────────┘        └──────────────────┘     │
//!                  │                                                      │
//!                  │  config · health · lifecycle · observability · admin │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use switchyard::config::load_config;
use switchyard::net::validate_pem;
use switchyard::observability::logging::init_logging;
use switchyard::routing::RouteTable;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Host and path routing reverse proxy", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "switchyard.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("switchyard: {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?cli.config, "switchyard starting");

    if cli.check {
        return check(&config);
    }

    match switchyard::start(config, Some(cli.config)).await {
        Ok(proxy) => {
            proxy.wait().await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            ExitCode::FAILURE
        }
    }
}

fn check(config: &switchyard::ProxyConfig) -> ExitCode {
    let table = match RouteTable::from_config(config) {
        Ok(table) => table,
        Err(e) => {
            tracing::error!(error = %e, "Configuration invalid");
            return ExitCode::FAILURE;
        }
    };

    if let Some(tls) = &config.listener.tls {
        if let Err(e) = validate_pem(Path::new(&tls.cert_path), Path::new(&tls.key_path)) {
            tracing::error!(error = %e, "TLS material invalid");
            return ExitCode::FAILURE;
        }
    }

    tracing::info!(
        servers = table.servers().len(),
        routes = table.route_count(),
        targets = table.targets().len(),
        "Configuration OK"
    );
    ExitCode::SUCCESS
}
