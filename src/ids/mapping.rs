//! Offline AniDB / MAL / AniList / ANN id mapping dataset.
//!
//! The dataset is fetched at most once per process. Concurrent callers
//! await the same in-flight load; a failed load leaves an empty dataset
//! in place for the rest of the process lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{error, info};
use url::Url;

use crate::fingerprint::{desktop_profile, RequestKind};
use crate::http_client::{FetchError, RetryingFetcher, UpstreamRequest};
use crate::stream::provider::lenient_id;

/// One dataset row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MappingEntry {
    #[serde(default, deserialize_with = "lenient_id")]
    pub anidb: Option<u64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub mal: Option<u64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub anilist: Option<u64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub ann: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anilist_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mal_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anidb_id: Option<u64>,
}

impl From<&MappingEntry> for NormalizedIds {
    fn from(entry: &MappingEntry) -> Self {
        Self {
            anilist_id: entry.anilist,
            mal_id: entry.mal,
            anidb_id: entry.anidb,
        }
    }
}

#[derive(Debug, Default)]
struct MappingIndex {
    entries: Vec<MappingEntry>,
    by_anilist: HashMap<u64, usize>,
    by_mal: HashMap<u64, usize>,
}

impl MappingIndex {
    fn build(entries: Vec<MappingEntry>) -> Self {
        let mut by_anilist = HashMap::with_capacity(entries.len());
        let mut by_mal = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            // first occurrence wins
            if let Some(id) = entry.anilist {
                by_anilist.entry(id).or_insert(i);
            }
            if let Some(id) = entry.mal {
                by_mal.entry(id).or_insert(i);
            }
        }
        Self {
            entries,
            by_anilist,
            by_mal,
        }
    }
}

struct RemoteSource {
    fetcher: Arc<RetryingFetcher>,
    url: Url,
}

pub struct MappingDataset {
    remote: Option<RemoteSource>,
    index: OnceCell<MappingIndex>,
}

impl MappingDataset {
    /// Dataset loaded lazily from `url` on first lookup.
    pub fn remote(fetcher: Arc<RetryingFetcher>, url: Url) -> Self {
        Self {
            remote: Some(RemoteSource { fetcher, url }),
            index: OnceCell::new(),
        }
    }

    /// Dataset from in-memory rows.
    pub fn from_entries(entries: Vec<MappingEntry>) -> Self {
        Self {
            remote: None,
            index: OnceCell::from(MappingIndex::build(entries)),
        }
    }

    async fn fetch(remote: &RemoteSource) -> Result<Vec<MappingEntry>, FetchError> {
        let request = UpstreamRequest::get(remote.url.clone())
            .with_headers(desktop_profile(RequestKind::Api).to_headers());
        remote.fetcher.get_json(&request).await
    }

    async fn index(&self) -> &MappingIndex {
        self.index
            .get_or_init(|| async {
                let Some(remote) = &self.remote else {
                    return MappingIndex::default();
                };
                match Self::fetch(remote).await {
                    Ok(entries) => {
                        info!(entries = entries.len(), url = %remote.url, "Mapping dataset loaded");
                        MappingIndex::build(entries)
                    }
                    Err(e) => {
                        error!(error = %e, url = %remote.url, "Mapping dataset failed to load");
                        MappingIndex::default()
                    }
                }
            })
            .await
    }

    /// Number of rows (loads the dataset).
    pub async fn len(&self) -> usize {
        self.index().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn by_anilist(&self, id: u64) -> Option<MappingEntry> {
        let index = self.index().await;
        index.by_anilist.get(&id).map(|&i| index.entries[i].clone())
    }

    pub async fn by_mal(&self, id: u64) -> Option<MappingEntry> {
        let index = self.index().await;
        index.by_mal.get(&id).map(|&i| index.entries[i].clone())
    }

    /// Normalize an id of unknown namespace.
    ///
    /// Tried as AniList first, then MAL; an unmapped number is assumed to
    /// be an AniList id. Non-numeric input yields empty ids.
    pub async fn normalize_id(&self, id: &str) -> NormalizedIds {
        let Ok(id) = id.trim().parse::<u64>() else {
            return NormalizedIds::default();
        };
        if let Some(entry) = self.by_anilist(id).await {
            return NormalizedIds::from(&entry);
        }
        if let Some(entry) = self.by_mal(id).await {
            return NormalizedIds::from(&entry);
        }
        NormalizedIds {
            anilist_id: Some(id),
            ..NormalizedIds::default()
        }
    }
}
