// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::{fmt, net::SocketAddr};

/// Connection parameters for the OT engine's backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtStoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl Default for OtStoreConfig {
    fn default() -> Self {
        Self { host: "localhost".into(), port: 27017, database: "coedit".into() }
    }
}

impl fmt::Display for OtStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Backing store handed to the OT engine.
    pub ot_store: OtStoreConfig,
    /// Log filter directive (e.g. `info`, `coedit_relay=debug`).
    pub log_filter: String,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `COEDIT_RELAY_HOST` | `0.0.0.0` |
    /// | `COEDIT_RELAY_PORT` | `3000` |
    /// | `COEDIT_OT_STORE_HOST` | `localhost` |
    /// | `COEDIT_OT_STORE_PORT` | `27017` |
    /// | `COEDIT_OT_STORE_DATABASE` | `coedit` |
    /// | `COEDIT_RELAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("COEDIT_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("COEDIT_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(3000);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let store_defaults = OtStoreConfig::default();
        let ot_store = OtStoreConfig {
            host: env("COEDIT_OT_STORE_HOST").unwrap_or(store_defaults.host),
            port: env("COEDIT_OT_STORE_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(store_defaults.port),
            database: env("COEDIT_OT_STORE_DATABASE").unwrap_or(store_defaults.database),
        };

        let log_filter = env("COEDIT_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, ot_store, log_filter }
    }
}
