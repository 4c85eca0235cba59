//! # duplex
//!
//! Chat server binary: loads settings, wires the demo chat reactors and the
//! health route into a container, and serves both protocols on one port.

#![deny(unsafe_code)]

mod chat;
mod logging;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use duplex_container::ContainerBuilder;
use duplex_server::Server;
use duplex_settings::{ServerMode, ServerSettings, Settings};
use tokio::runtime::Runtime;

/// duplex chat server.
#[derive(Parser, Debug)]
#[command(name = "duplex", about = "Dual-protocol chat server")]
struct Cli {
    /// Settings file (JSON or TOML).
    #[arg(long)]
    settings: PathBuf,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init_subscriber(&args.log_level, args.json_logs);

    let settings = duplex_settings::load_from_path(&args.settings)
        .with_context(|| format!("Failed to load settings from {}", args.settings.display()))?;
    let runtime = build_runtime(&settings.server).context("Failed to start runtime")?;
    runtime.block_on(serve(Arc::new(settings)))
}

/// `process` runs `worker_num` worker threads; `base` runs on one thread.
fn build_runtime(server: &ServerSettings) -> std::io::Result<Runtime> {
    match server.mode {
        ServerMode::Process => tokio::runtime::Builder::new_multi_thread()
            .worker_threads(server.options.worker_num)
            .thread_name("duplex-worker")
            .enable_all()
            .build(),
        ServerMode::Base => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build(),
    }
}

fn assemble(settings: Arc<Settings>) -> Result<Server> {
    let container = chat::register(ContainerBuilder::from_settings(Arc::clone(&settings)))
        .build()
        .context("Failed to build container")?;
    let server = Server::build(
        settings,
        container,
        Box::new(routes::register),
        chat::bindings(),
    )
    .context("Failed to assemble server")?;
    Ok(server)
}

async fn serve(settings: Arc<Settings>) -> Result<()> {
    let server = assemble(settings)?;
    server.run().await.context("Server failed")?;
    tracing::info!("Shutdown complete");
    Ok(())
}
