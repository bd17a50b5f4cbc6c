mod config;
mod error;
mod storage;
mod mdns;
mod server;
mod api;

use std::net::IpAddr;
use anyhow::{Context, Result};
use shared::protocol::{STATUS_PATH, UPLOAD_PATH};
use crate::config::Config;
use crate::server::lifecycle::ServerLifecycle;
use crate::storage::{ingest::UploadIngestor, layout::StorageLayout};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("photobackupd=info,tower_http=info"))
        )
        .init();

    tracing::info!("Starting photobackupd");

    // Optional config file; every key has a default
    let config_path = std::env::args().nth(1);
    let config = Config::load_or_default(config_path.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    if let Some(path) = &config_path {
        tracing::info!("Loaded config from {}", path);
    }

    // Backup root must exist before we accept anything
    let layout = StorageLayout::open(&config.storage.backup_root)
        .context("Failed to create backup directory")?;
    let ingestor = UploadIngestor::new(layout, config.storage.max_upload_bytes);

    let lifecycle = ServerLifecycle::new(ingestor, &config);
    let port = lifecycle
        .start(config.server.port)
        .await
        .context("Failed to start server")?;

    log_reachable_urls(port);

    if !lifecycle.is_advertising().await {
        tracing::warn!("Not discoverable on the LAN; clients must be given the address by hand");
    }
    tracing::debug!("Server state: {:?}", lifecycle.status());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    lifecycle.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Print the URLs a phone on the LAN can use, one block per IPv4 interface
fn log_reachable_urls(port: u16) {
    let interfaces = match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::warn!("Failed to list network interfaces: {}", e);
            return;
        }
    };

    for iface in interfaces.iter().filter(|i| !i.is_loopback()) {
        if let IpAddr::V4(ip) = iface.ip() {
            let base = format!("http://{}:{}", ip, port);
            tracing::info!(
                "{}: base {} status {}{} upload {}{}",
                iface.name,
                base,
                base,
                STATUS_PATH,
                base,
                UPLOAD_PATH
            );
        }
    }
}
