//! Cipher Chat Server - Main Entry Point
//!
//! Serves the real-time chat channel and the token/file HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use cipher_chat::api::{self, AppState};
use cipher_chat::auth::StaticKeyAuthenticator;
use cipher_chat::config::{ContentBackend, StorageConfig};
use cipher_chat::files::ipfs::IpfsContentStore;
use cipher_chat::files::sqlite::SqliteMetadataStore;
use cipher_chat::files::store::{ContentStore, FsContentStore, MemoryContentStore};
use cipher_chat::{FileExchange, Hub, ServerConfig, TokenService};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "cipher-server")]
#[command(about = "Cipher Chat Server - encrypted group chat and file sharing")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Override host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Override listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (defaults to the config file's value)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = args.config.exists();
    let config = if config_found {
        ServerConfig::from_file(&args.config.to_string_lossy())?
    } else {
        ServerConfig::default()
    };

    // Initialize logging
    let log_level = args.log_level.clone().unwrap_or(config.log_level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level))
        .init();

    if !config_found {
        info!("Config file not found, using defaults");
    }
    if config.users.is_empty() {
        log::warn!("No users configured; file endpoints will reject every request");
    }

    let host = args.host.unwrap_or(config.host.clone());
    let port = args.port.unwrap_or(config.port);

    // Create server state
    let metadata = SqliteMetadataStore::connect(&config.storage.database_url)
        .await
        .context("failed to open metadata database")?;
    let content = open_content_store(&config.storage).await?;

    let tokens = Arc::new(TokenService::new(Duration::from_secs(config.tokens.ttl_secs)));
    if config.tokens.sweep_interval_secs > 0 {
        tokens.spawn_sweeper(Duration::from_secs(config.tokens.sweep_interval_secs));
    }

    let state = AppState {
        hub: Arc::new(Hub::new(config.chat)),
        tokens,
        files: FileExchange::new(Arc::new(metadata), content),
        auth: Arc::new(StaticKeyAuthenticator::new(&config.users)),
    };
    let app = api::app(state, config.storage.max_upload_bytes);

    // Bind TCP listener
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Cipher Chat Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

/// Build the configured content store
async fn open_content_store(storage: &StorageConfig) -> Result<Arc<dyn ContentStore>> {
    let store: Arc<dyn ContentStore> = match storage.content {
        ContentBackend::Memory => {
            log::warn!("Using in-memory content store; file bodies are lost on restart");
            Arc::new(MemoryContentStore::new())
        }
        ContentBackend::Fs => {
            info!("Storing file bodies in {}", storage.content_dir.display());
            Arc::new(
                FsContentStore::open(&storage.content_dir)
                    .await
                    .context("failed to open content directory")?,
            )
        }
        ContentBackend::Ipfs => {
            info!("Storing file bodies on IPFS node {}", storage.ipfs_api_url);
            Arc::new(IpfsContentStore::new(&storage.ipfs_api_url))
        }
    };
    Ok(store)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
