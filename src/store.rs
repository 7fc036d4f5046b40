//! Read-only access to persisted user and admin records.
//!
//! The identifier resolver reads saved MAL/AniList ids from user
//! collections, and the custom-source provider reads admin-curated
//! sources. [`RestStore`] speaks the PostgREST query dialect of the hosted
//! database; [`MemoryStore`] backs tests and store-less deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::fingerprint::{desktop_profile, RequestKind};
use crate::http_client::{FetchError, RetryingFetcher, UpstreamRequest};
use crate::stream::provider::{is_catalog_id, lenient_id};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("invalid store URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid anime id: {0:?}")]
    InvalidId(String),
}

fn checked_id(anime_id: &str) -> Result<&str, StoreError> {
    if is_catalog_id(anime_id) {
        Ok(anime_id)
    } else {
        Err(StoreError::InvalidId(anime_id.to_string()))
    }
}

/// User collections that may carry saved ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Watchlist,
    WatchHistory,
}

impl Collection {
    pub fn table(self) -> &'static str {
        match self {
            Self::Watchlist => "watchlist",
            Self::WatchHistory => "watch_history",
        }
    }
}

/// Saved external ids for one anime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct SavedIds {
    #[serde(default, alias = "malId", deserialize_with = "lenient_id")]
    pub mal_id: Option<u64>,
    #[serde(default, alias = "anilistId", deserialize_with = "lenient_id")]
    pub anilist_id: Option<u64>,
}

impl SavedIds {
    pub fn is_empty(&self) -> bool {
        self.mal_id.is_none() && self.anilist_id.is_none()
    }
}

/// How a custom source is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomSourceKind {
    Direct,
    Embed,
    #[serde(other)]
    Other,
}

/// Admin-curated source row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomSource {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: CustomSourceKind,
    /// `None` targets every anime.
    #[serde(default)]
    pub anime_id: Option<String>,
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The user's own saved ids in `collection` (latest first).
    async fn user_record(
        &self,
        collection: Collection,
        user_id: &str,
        anime_id: &str,
    ) -> Result<Option<SavedIds>, StoreError>;

    /// Any user's watchlist row for the anime with a MAL id.
    async fn community_record(&self, anime_id: &str) -> Result<Option<SavedIds>, StoreError>;

    /// Active custom sources that are global or target `anime_id`.
    async fn custom_sources(&self, anime_id: &str) -> Result<Vec<CustomSource>, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgREST
// ---------------------------------------------------------------------------

const APIKEY: HeaderName = HeaderName::from_static("apikey");

pub struct RestStore {
    fetcher: Arc<RetryingFetcher>,
    base: Url,
    headers: HeaderMap,
}

impl RestStore {
    /// `base` is the project URL; tables live under `/rest/v1/`.
    pub fn new(fetcher: Arc<RetryingFetcher>, base: &str, api_key: Option<&str>) -> Result<Self, StoreError> {
        let base = Url::parse(&format!("{}/rest/v1/", base.trim_end_matches('/')))?;

        let mut headers = desktop_profile(RequestKind::Api).to_headers();
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert(APIKEY, value);
            }
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        Ok(Self { fetcher, base, headers })
    }

    /// Table URL with PostgREST filters.
    pub fn query_url(&self, table: &str, filters: &[(&str, String)]) -> Result<Url, StoreError> {
        let mut url = self.base.join(table)?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in filters {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn rows<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, StoreError> {
        debug!(url = %url, "Store query");
        let request = UpstreamRequest::get(url).with_headers(self.headers.clone());
        Ok(self.fetcher.get_json(&request).await?)
    }

    async fn first_ids(&self, url: Url) -> Result<Option<SavedIds>, StoreError> {
        let rows: Vec<SavedIds> = self.rows(url).await?;
        Ok(rows.into_iter().find(|ids| !ids.is_empty()))
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn user_record(
        &self,
        collection: Collection,
        user_id: &str,
        anime_id: &str,
    ) -> Result<Option<SavedIds>, StoreError> {
        let anime_id = checked_id(anime_id)?;
        let mut filters = vec![
            ("select", "mal_id,anilist_id".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("anime_id", format!("eq.{anime_id}")),
        ];
        if collection == Collection::WatchHistory {
            filters.push(("order", "watched_at.desc".to_string()));
        }
        filters.push(("limit", "1".to_string()));
        self.first_ids(self.query_url(collection.table(), &filters)?).await
    }

    async fn community_record(&self, anime_id: &str) -> Result<Option<SavedIds>, StoreError> {
        let anime_id = checked_id(anime_id)?;
        let filters = [
            ("select", "mal_id,anilist_id".to_string()),
            ("anime_id", format!("eq.{anime_id}")),
            ("mal_id", "not.is.null".to_string()),
            ("limit", "1".to_string()),
        ];
        self.first_ids(self.query_url(Collection::Watchlist.table(), &filters)?)
            .await
    }

    async fn custom_sources(&self, anime_id: &str) -> Result<Vec<CustomSource>, StoreError> {
        let anime_id = checked_id(anime_id)?;
        let filters = [
            ("select", "*".to_string()),
            ("is_active", "eq.true".to_string()),
            ("or", format!("(anime_id.is.null,anime_id.eq.{anime_id})")),
            ("order", "created_at.desc".to_string()),
        ];
        self.rows(self.query_url("custom_sources", &filters)?).await
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Store held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    user: HashMap<(Collection, String, String), SavedIds>,
    community: HashMap<String, SavedIds>,
    custom: Vec<CustomSource>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user_record(mut self, collection: Collection, user_id: &str, anime_id: &str, ids: SavedIds) -> Self {
        self.user
            .insert((collection, user_id.to_string(), anime_id.to_string()), ids);
        self
    }

    #[must_use]
    pub fn with_community_record(mut self, anime_id: &str, ids: SavedIds) -> Self {
        self.community.insert(anime_id.to_string(), ids);
        self
    }

    #[must_use]
    pub fn with_custom_source(mut self, source: CustomSource) -> Self {
        self.custom.push(source);
        self
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn user_record(
        &self,
        collection: Collection,
        user_id: &str,
        anime_id: &str,
    ) -> Result<Option<SavedIds>, StoreError> {
        Ok(self
            .user
            .get(&(collection, user_id.to_string(), anime_id.to_string()))
            .copied()
            .filter(|ids| !ids.is_empty()))
    }

    async fn community_record(&self, anime_id: &str) -> Result<Option<SavedIds>, StoreError> {
        Ok(self
            .community
            .get(anime_id)
            .copied()
            .filter(|ids| ids.mal_id.is_some()))
    }

    async fn custom_sources(&self, anime_id: &str) -> Result<Vec<CustomSource>, StoreError> {
        Ok(self
            .custom
            .iter()
            .filter(|s| s.anime_id.as_deref().is_none_or(|id| id == anime_id))
            .cloned()
            .collect())
    }
}
