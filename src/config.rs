//! Runtime configuration loaded from `~/.config/nagare/config.toml`.
//!
//! Every field has a default, so a missing file is not an error. The
//! `NAGARE_*` environment variables override the file; CLI flags
//! override both.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Upstream catalog endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Primary catalog API root (`.../api/v1`).
    pub tatakai_base: String,
    /// Secondary catalog API root, used when the primary fails.
    pub hianime_base: String,
    /// WatchAnimeWorld scraper endpoint.
    pub watchanimeworld_url: Option<String>,
    /// AnimeHindiDubbed scraper endpoint.
    pub animehindidubbed_url: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            tatakai_base: "https://tatakaiapi.vercel.app/api/v1".to_string(),
            hianime_base: "https://aniwatch-api-taupe-eight.vercel.app/api/v2/hianime".to_string(),
            watchanimeworld_url: None,
            animehindidubbed_url: None,
        }
    }
}

/// Read-only persisted-state store (PostgREST-compatible).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Retry policy for upstream fetches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 3,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind: SocketAddr,
    /// Externally visible origin of this server, used to build
    /// self-referential proxy links. Derived from `Host` when unset.
    pub public_base_url: Option<String>,
    /// Access key forwarded as `apikey` in rewritten manifest links.
    pub api_key: Option<String>,
    /// CORS relay used by provider adapters; direct requests when unset.
    pub relay_url: Option<String>,
    pub catalog: CatalogConfig,
    pub store: StoreConfig,
    /// Offline id-mapping dataset.
    pub mapping_url: String,
    /// Skip-time API root.
    pub skip_times_base: String,
    pub fetch: FetchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            public_base_url: None,
            api_key: None,
            relay_url: None,
            catalog: CatalogConfig::default(),
            store: StoreConfig::default(),
            mapping_url: "https://raw.githubusercontent.com/soruly/burstlink/master/burstlink.json"
                .to_string(),
            skip_times_base: "https://api.aniskip.com".to_string(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (config_path(), false),
        };

        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        Self::from_toml(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `NAGARE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (testable).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("NAGARE_BIND") {
            self.bind = bind.parse().map_err(|_| ConfigError::InvalidValue {
                key: "NAGARE_BIND",
                value: bind.clone(),
            })?;
        }
        if let Some(v) = lookup("NAGARE_PUBLIC_URL") {
            self.public_base_url = Some(v);
        }
        if let Some(v) = lookup("NAGARE_RELAY_URL") {
            self.relay_url = Some(v);
        }
        if let Some(v) = lookup("NAGARE_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = lookup("NAGARE_STORE_URL") {
            self.store.url = Some(v);
        }
        if let Some(v) = lookup("NAGARE_STORE_KEY") {
            self.store.api_key = Some(v);
        }
        Ok(())
    }
}

/// Return the path to the default config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nagare")
        .join("config.toml")
}
