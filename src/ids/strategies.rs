//! The standard id-resolution strategies, in cascade order.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{IdQuery, IdSource, IdStrategy, StrategyError};
use crate::store::{Collection, RecordStore, SavedIds};
use crate::stream::provider::EpisodeRequest;
use crate::stream::providers::CatalogClient;

/// MAL/AniList ids from the catalog's anime info page.
pub struct PrimaryMetadataStrategy {
    catalog: Arc<CatalogClient>,
}

impl PrimaryMetadataStrategy {
    pub fn new(catalog: Arc<CatalogClient>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl IdStrategy for PrimaryMetadataStrategy {
    fn name(&self) -> &'static str {
        "primary-metadata"
    }

    fn source(&self) -> IdSource {
        IdSource::Primary
    }

    async fn attempt(&self, query: &IdQuery<'_>) -> Result<Option<SavedIds>, StrategyError> {
        let (mal_id, anilist_id) = self.catalog.anime_ids(query.catalog_id).await?;
        Ok(Some(SavedIds { mal_id, anilist_id }))
    }
}

/// The user's own watchlist, then watch history.
pub struct UserRecordsStrategy {
    store: Arc<dyn RecordStore>,
}

impl UserRecordsStrategy {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IdStrategy for UserRecordsStrategy {
    fn name(&self) -> &'static str {
        "user-records"
    }

    fn source(&self) -> IdSource {
        IdSource::Database
    }

    async fn attempt(&self, query: &IdQuery<'_>) -> Result<Option<SavedIds>, StrategyError> {
        let Some(user_id) = query.user_id else {
            return Ok(None);
        };
        for collection in [Collection::Watchlist, Collection::WatchHistory] {
            if let Some(ids) = self
                .store
                .user_record(collection, user_id, query.catalog_id)
                .await?
            {
                debug!(collection = collection.table(), "Saved ids found");
                return Ok(Some(ids));
            }
        }
        Ok(None)
    }
}

/// Any user's saved watchlist entry for the same anime.
pub struct CommunityRecordsStrategy {
    store: Arc<dyn RecordStore>,
}

impl CommunityRecordsStrategy {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IdStrategy for CommunityRecordsStrategy {
    fn name(&self) -> &'static str {
        "community-records"
    }

    fn source(&self) -> IdSource {
        IdSource::Database
    }

    async fn attempt(&self, query: &IdQuery<'_>) -> Result<Option<SavedIds>, StrategyError> {
        Ok(self.store.community_record(query.catalog_id).await?)
    }
}

/// MAL id carried by the first episode's source payload.
pub struct EpisodeSourceStrategy {
    catalog: Arc<CatalogClient>,
}

impl EpisodeSourceStrategy {
    pub fn new(catalog: Arc<CatalogClient>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl IdStrategy for EpisodeSourceStrategy {
    fn name(&self) -> &'static str {
        "episode-sources"
    }

    fn source(&self) -> IdSource {
        IdSource::Episode
    }

    async fn attempt(&self, query: &IdQuery<'_>) -> Result<Option<SavedIds>, StrategyError> {
        let Some(episode_id) = self.catalog.first_episode_id(query.catalog_id).await? else {
            return Ok(None);
        };
        let output = self
            .catalog
            .fetch_episode(&EpisodeRequest::new(episode_id))
            .await?;
        Ok(output.mal_id.map(|mal_id| SavedIds {
            mal_id: Some(mal_id),
            anilist_id: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::ScriptedTransport;
    use crate::http_client::RetryingFetcher;
    use crate::identity::ClientIdentity;
    use crate::ids::{IdResolver, IdSource};
    use crate::store::MemoryStore;
    use crate::stream::relay::RelayClient;
    use std::sync::atomic::Ordering;

    fn catalog(transport: Arc<ScriptedTransport>) -> Arc<CatalogClient> {
        let fetcher = Arc::new(RetryingFetcher::new(transport).with_max_attempts(1));
        let relay = Arc::new(RelayClient::new(fetcher, Arc::new(ClientIdentity::fixed("t"))));
        Arc::new(CatalogClient::new(
            relay,
            "https://tatakai.example.com/api/v1",
            "https://hianime.example.com/api/v2/hianime",
        ))
    }

    #[tokio::test]
    async fn saved_record_beats_episode_fallback() {
        // catalog knows the anime but carries no ids
        let transport = Arc::new(ScriptedTransport::new(vec![Ok((
            200,
            r#"{"success": true, "data": {"anime": {"info": {"malId": null, "anilistId": 0}}}}"#,
        ))]));
        let store = MemoryStore::new().with_user_record(
            Collection::Watchlist,
            "u1",
            "fma-brotherhood-1",
            SavedIds {
                mal_id: Some(5114),
                anilist_id: None,
            },
        );
        let resolver = IdResolver::standard(catalog(transport.clone()), Arc::new(store));

        let ids = resolver
            .resolve_external_ids("fma-brotherhood-1", Some("u1"))
            .await;
        assert_eq!(ids.mal_id, Some(5114));
        assert_eq!(ids.anilist_id, None);
        assert_eq!(ids.source, IdSource::Database);
        // only the metadata call reached the network
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn watch_history_is_consulted_after_watchlist() {
        let store = Arc::new(MemoryStore::new().with_user_record(
            Collection::WatchHistory,
            "u1",
            "fma-1",
            SavedIds {
                mal_id: None,
                anilist_id: Some(5114),
            },
        ));
        let ids = UserRecordsStrategy::new(store.clone())
            .attempt(&IdQuery {
                catalog_id: "fma-1",
                user_id: Some("u1"),
            })
            .await
            .unwrap();
        assert_eq!(ids.unwrap().anilist_id, Some(5114));

        let anonymous = UserRecordsStrategy::new(store)
            .attempt(&IdQuery {
                catalog_id: "fma-1",
                user_id: None,
            })
            .await
            .unwrap();
        assert!(anonymous.is_none());
    }

    #[tokio::test]
    async fn episode_sources_yield_mal_id() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok((200, r#"{"success": true, "data": {"episodes": [{"episodeId": "fma-1?ep=1"}]}}"#)),
            Ok((200, r#"{"status": 200, "data": {"sources": [], "malID": 5114}}"#)),
        ]));
        let ids = EpisodeSourceStrategy::new(catalog(transport))
            .attempt(&IdQuery {
                catalog_id: "fma-1",
                user_id: None,
            })
            .await
            .unwrap();
        assert_eq!(
            ids,
            Some(SavedIds {
                mal_id: Some(5114),
                anilist_id: None
            })
        );
    }
}
