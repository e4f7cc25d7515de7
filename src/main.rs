//! devhub server
//!
//! Runs the device listeners, the hub's background units and the REST and
//! WebSocket API in one process.
//!
//! Run with: cargo run --bin devhub -- --config devhub.toml
//!
//! Without `--config` the default locations are searched, then `DEVHUB_*`
//! environment variables are applied. `RUST_LOG` overrides the log level.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use devhub::api::{serve, AppState};
use devhub::config::{generate_default_config, Config};
use devhub::hub::{Hub, HubOptions};
use devhub::logging;
use devhub::shutdown::Shutdown;
use devhub::transport::{ConfigServer, DataServer};

#[derive(Parser)]
#[command(name = "devhub")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Configuration, data and live streaming hub for home appliances")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_default(),
    };
    config.validate().context("invalid configuration")?;

    logging::init(&config.logging);
    tracing::info!("Starting devhub v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();
    let signals = shutdown.listen_for_signals();

    let hub = Arc::new(Hub::in_memory(HubOptions::from(&config)));
    let mut handles = hub.start(&shutdown);

    // A port that cannot be bound is fatal
    let config_server = ConfigServer::bind(&config.devices.config_addr(), Arc::clone(&hub))
        .await
        .context("starting device config listener")?;
    let data_server = DataServer::bind(&config.devices.data_addr(), Arc::clone(&hub))
        .await
        .context("starting device data listener")?;
    handles.push(tokio::spawn(config_server.run_until(shutdown.clone())));
    handles.push(tokio::spawn(data_server.run_until(shutdown.clone())));

    let state = AppState::new(Arc::clone(&hub)).with_channel_capacity(config.delivery.channel_capacity);
    let served = serve(state, &config.api, shutdown.clone()).await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "API server failed");
    }

    // Whatever ended the server, stop everything else too
    shutdown.trigger("api server stopped");
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task failed");
        }
    }
    signals.abort();

    hub.shutdown().await;
    tracing::info!("devhub stopped");

    served.context("serving API")
}
