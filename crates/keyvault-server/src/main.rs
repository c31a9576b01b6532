//! `KeyVault` service entry point.
//!
//! Bootstraps the store, seal manager, and key engine, then idles until
//! SIGINT/SIGTERM. The process always starts sealed — an operator (or the
//! deployment's init hook) must unseal before any cryptographic operation
//! succeeds. The HTTP/JSON façade and the token service are separate
//! deployables that drive the engine through its library API.
//!
//! Exit codes: `0` on clean shutdown, `1` on unrecoverable startup failure.

mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use keyvault_core::{KeyEngine, SealManager};
use keyvault_store::{MemoryStore, VaultStore};

use config::{ServerConfig, StorageBackendType};

/// KeyVault — multi-tenant cryptographic key management.
#[derive(Parser)]
#[command(name = "keyvault", version, about = "KeyVault service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the service in normal mode (always starts sealed).
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    match cli.command {
        Command::Serve => serve(&config).await,
    }
}

async fn serve(config: &ServerConfig) -> anyhow::Result<()> {
    info!(
        storage = ?config.storage_backend,
        bind_addr = %config.bind_addr,
        "KeyVault starting"
    );

    if config.seal_unseal_require_int_key {
        info!("VAULT_SEAL_UNSEAL_REQUIRE_INT_KEY set — reserved for policy extensions, ignored");
    }

    let store: Arc<dyn VaultStore> = match config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryStore::new())
        }
    };

    let seal_manager = Arc::new(SealManager::with_iterations(
        Arc::clone(&store),
        config.pbkdf_iterations,
    ));
    let engine = Arc::new(KeyEngine::new(store, Arc::clone(&seal_manager)));

    info!(
        sealed = seal_manager.is_sealed().await,
        "KeyVault core ready"
    );

    // The engine handle is what the façade process drives; keep it alive for
    // the lifetime of the service.
    let _engine = engine;

    shutdown_signal().await;

    info!("KeyVault stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .context("failed to install SIGINT handler")
            .ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping service");
}
