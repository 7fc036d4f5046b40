//! `nagare` - streaming-source aggregation and HLS-aware media proxy
//!
//! # Features
//!
//! - **Source aggregation**: one request fans out to the primary catalog and
//!   every supplementary provider, results merged in a fixed order
//! - **Id resolution**: catalog ids mapped to MAL/AniList ids through a
//!   strategy cascade, plus an offline cross-database mapping
//! - **Media proxy**: manifest rewriting, embed-page sanitizing, `Range`
//!   passthrough and permissive CORS
//! - **Retries**: every upstream call goes through one bounded-retry fetcher
//!
//! # Example
//!
//! ```rust,no_run
//! use nagare::{AppState, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let state = AppState::from_config(&config)?;
//!     nagare::server::serve(state, config.bind).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod fingerprint;
pub mod http_client;
pub mod identity;
pub mod ids;
pub mod proxy;
pub mod server;
pub mod store;
pub mod stream;

pub use config::{Config, ConfigError};
pub use fingerprint::{desktop_profile, BrowserProfile, RequestKind, DESKTOP_CHROME_UA};
pub use http_client::{FetchError, RetryingFetcher, Transport, UpstreamRequest, UpstreamResponse};
pub use identity::ClientIdentity;
pub use ids::{ExternalIds, IdResolver, IdSource, MappingDataset, NormalizedIds};
pub use proxy::{MediaProxy, ProxyError, ProxyKind, ProxyQuery};
pub use server::{router, AppError, AppState};
pub use store::{MemoryStore, RecordStore, RestStore};
pub use stream::{EpisodeRequest, SourceAggregator, SourceProvider, StreamingData, StreamingSource};

/// Version of nagare
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
