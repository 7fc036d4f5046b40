//! External identifier resolution.
//!
//! A catalog id is mapped to MAL / AniList ids by an ordered list of
//! [`IdStrategy`]s. Strategies run strictly in order and the first hit
//! wins; later strategies are never invoked. A strategy that fails is
//! logged and treated as a miss.

pub mod mapping;
pub mod strategies;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::store::{RecordStore, SavedIds, StoreError};
use crate::stream::provider::ProviderError;
use crate::stream::providers::CatalogClient;

pub use mapping::{MappingDataset, MappingEntry, NormalizedIds};
pub use strategies::{
    CommunityRecordsStrategy, EpisodeSourceStrategy, PrimaryMetadataStrategy, UserRecordsStrategy,
};

/// Where resolved ids came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdSource {
    Primary,
    Database,
    Episode,
    None,
}

/// Resolution result as exposed to clients.
///
/// `source` is [`IdSource::None`] exactly when both ids are absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIds {
    pub mal_id: Option<u64>,
    pub anilist_id: Option<u64>,
    pub source: IdSource,
}

/// Outcome of the strategy cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found { ids: SavedIds, source: IdSource },
    NotFound,
}

impl From<Resolution> for ExternalIds {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Found { ids, source } if !ids.is_empty() => Self {
                mal_id: ids.mal_id,
                anilist_id: ids.anilist_id,
                source,
            },
            _ => Self {
                mal_id: None,
                anilist_id: None,
                source: IdSource::None,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a strategy is asked to resolve.
#[derive(Debug, Clone, Copy)]
pub struct IdQuery<'a> {
    pub catalog_id: &'a str,
    pub user_id: Option<&'a str>,
}

#[async_trait]
pub trait IdStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Source reported when this strategy hits.
    fn source(&self) -> IdSource;

    /// `Ok(None)` is a miss; the cascade moves on.
    async fn attempt(&self, query: &IdQuery<'_>) -> Result<Option<SavedIds>, StrategyError>;
}

pub struct IdResolver {
    strategies: Vec<Box<dyn IdStrategy>>,
}

impl IdResolver {
    pub fn new(strategies: Vec<Box<dyn IdStrategy>>) -> Self {
        Self { strategies }
    }

    /// Catalog metadata, user records, community records, then episode
    /// sources.
    pub fn standard(catalog: Arc<CatalogClient>, store: Arc<dyn RecordStore>) -> Self {
        Self::new(vec![
            Box::new(PrimaryMetadataStrategy::new(catalog.clone())),
            Box::new(UserRecordsStrategy::new(store.clone())),
            Box::new(CommunityRecordsStrategy::new(store)),
            Box::new(EpisodeSourceStrategy::new(catalog)),
        ])
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, catalog_id: &str, user_id: Option<&str>) -> Resolution {
        let query = IdQuery { catalog_id, user_id };

        for strategy in &self.strategies {
            match strategy.attempt(&query).await {
                Ok(Some(ids)) if !ids.is_empty() => {
                    info!(strategy = strategy.name(), mal_id = ?ids.mal_id, anilist_id = ?ids.anilist_id, "Resolved external ids");
                    return Resolution::Found {
                        ids,
                        source: strategy.source(),
                    };
                }
                Ok(_) => debug!(strategy = strategy.name(), "No ids"),
                Err(e) => warn!(strategy = strategy.name(), error = %e, "Id strategy failed"),
            }
        }

        Resolution::NotFound
    }

    pub async fn resolve_external_ids(&self, catalog_id: &str, user_id: Option<&str>) -> ExternalIds {
        self.resolve(catalog_id, user_id).await.into()
    }
}
