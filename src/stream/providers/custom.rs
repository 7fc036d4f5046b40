//! Admin-curated sources from the record store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::store::{CustomSource, CustomSourceKind, RecordStore, StoreError};
use crate::stream::provider::{
    retain_absolute, EpisodeRequest, ProviderError, ProviderGroup, ProviderOutput, SourceProvider,
    StreamingSource,
};

pub struct CustomSourceProvider {
    store: Arc<dyn RecordStore>,
}

impl CustomSourceProvider {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

fn to_source(row: CustomSource) -> StreamingSource {
    let is_embed = row.kind == CustomSourceKind::Embed;
    StreamingSource {
        is_manifest: row.kind == CustomSourceKind::Direct && row.url.contains(".m3u8"),
        quality: "HD".to_string(),
        language: "Custom".to_string(),
        language_tag: format!("custom-{}", row.id),
        is_dubbed: false,
        provider_label: row.name,
        is_embeddable: is_embed,
        requires_headless_resolution: is_embed,
        group: ProviderGroup::Custom,
        url: row.url,
    }
}

impl From<StoreError> for ProviderError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Fetch(e) => Self::Fetch(e),
            StoreError::Url(e) => Self::Payload(e.to_string()),
            StoreError::InvalidId(id) => Self::Rejected(format!("invalid anime id {id:?}")),
        }
    }
}

#[async_trait]
impl SourceProvider for CustomSourceProvider {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn group(&self) -> ProviderGroup {
        ProviderGroup::Custom
    }

    async fn fetch_sources(&self, request: &EpisodeRequest) -> Result<ProviderOutput, ProviderError> {
        let Some(anime_id) = request.catalog_id() else {
            return Ok(ProviderOutput::default());
        };
        let rows = self.store.custom_sources(anime_id).await?;
        Ok(retain_absolute(rows.into_iter().map(to_source).collect()).into())
    }
}
