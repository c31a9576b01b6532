//! Server configuration for `KeyVault`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `VAULT_*` environment variables.
//! Unrecognized values are startup failures, not silent fallbacks.

use std::net::SocketAddr;

use keyvault_core::crypto::DEFAULT_PBKDF_ITERATIONS;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the service façade binds to. The core itself opens no
    /// listener; the value is parsed, validated, and handed to the façade.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g. `info`, `debug`, `warn`).
    pub log_level: String,
    /// PBKDF2-HMAC-SHA512 iteration count for the unsealer KEK.
    pub pbkdf_iterations: u32,
    /// Reserved for policy extensions; parsed but not acted on.
    pub seal_unseal_require_int_key: bool,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `VAULT_BIND_ADDR` — façade bind address (default: `127.0.0.1:8200`)
    /// - `VAULT_STORAGE` — `memory` (default: `memory`; anything else is
    ///   rejected)
    /// - `VAULT_LOG_LEVEL` — log filter (default: `info`)
    /// - `VAULT_PBKDF_ITERATIONS` — unsealer KEK iteration count
    ///   (default: the compile-time constant)
    /// - `VAULT_SEAL_UNSEAL_REQUIRE_INT_KEY` — reserved, no-op
    ///
    /// # Errors
    ///
    /// Returns an error — an unrecoverable startup failure — when
    /// `VAULT_BIND_ADDR` does not parse or `VAULT_STORAGE` names an
    /// unsupported backend.
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = match std::env::var("VAULT_BIND_ADDR") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid VAULT_BIND_ADDR '{raw}'"))?,
            Err(_) => SocketAddr::from(([127, 0, 0, 1], 8200)),
        };

        // Relational backends implement the store trait out of tree; only
        // the in-memory backend ships here, and asking for anything else
        // must fail loudly rather than silently degrade.
        let storage_backend = match std::env::var("VAULT_STORAGE")
            .unwrap_or_else(|_| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackendType::Memory,
            other => anyhow::bail!("unsupported VAULT_STORAGE '{other}' (supported: memory)"),
        };

        let log_level = std::env::var("VAULT_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let pbkdf_iterations = std::env::var("VAULT_PBKDF_ITERATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PBKDF_ITERATIONS);

        let seal_unseal_require_int_key = std::env::var("VAULT_SEAL_UNSEAL_REQUIRE_INT_KEY")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            bind_addr,
            storage_backend,
            log_level,
            pbkdf_iterations,
            seal_unseal_require_int_key,
        })
    }
}
