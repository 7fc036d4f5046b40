//! Concurrent fan-out over every source provider.
//!
//! The primary catalog and every provider that doesn't need a MAL id
//! start together. Providers that need the MAL id start as soon as the
//! primary settles (after the identifier resolver, when neither the
//! request nor the primary carried a MAL id). A failing provider contributes nothing; it never
//! fails the whole request.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::ids::{ExternalIds, IdResolver};
use crate::stream::provider::{
    EpisodeRequest, NextEpisodeEstimate, ProviderGroup, ProviderOutput, RequestHeaders, SkipWindow,
    SourceProvider, StreamingSource, Subtitle,
};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("episode id is required")]
    MissingEpisode,
}

/// Which provider groups contributed at least one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderGroupFlags {
    pub has_primary: bool,
    pub has_watch_anime_world: bool,
    pub has_anime_hindi_dubbed: bool,
    pub has_animelok: bool,
    pub has_animeya: bool,
    pub has_custom: bool,
}

impl ProviderGroupFlags {
    pub fn from_sources(sources: &[StreamingSource]) -> Self {
        let groups: HashSet<ProviderGroup> = sources.iter().map(|s| s.group).collect();
        Self {
            has_primary: groups.contains(&ProviderGroup::Primary),
            has_watch_anime_world: groups.contains(&ProviderGroup::WatchAnimeWorld),
            has_anime_hindi_dubbed: groups.contains(&ProviderGroup::AnimeHindiDubbed),
            has_animelok: groups.contains(&ProviderGroup::Animelok),
            has_animeya: groups.contains(&ProviderGroup::Animeya),
            has_custom: groups.contains(&ProviderGroup::Custom),
        }
    }
}

/// Combined result for one episode.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingData {
    pub sources: Vec<StreamingSource>,
    pub subtitles: Vec<Subtitle>,
    pub headers: RequestHeaders,
    pub mal_id: Option<u64>,
    pub anilist_id: Option<u64>,
    pub groups: ProviderGroupFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intro: Option<SkipWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outro: Option<SkipWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_episode_estimates: Option<Vec<NextEpisodeEstimate>>,
}

pub struct SourceAggregator {
    primary: Arc<dyn SourceProvider>,
    /// Supplementary providers in output priority order.
    supplementary: Vec<Arc<dyn SourceProvider>>,
    resolver: Option<Arc<IdResolver>>,
}

impl SourceAggregator {
    pub fn new(primary: Arc<dyn SourceProvider>) -> Self {
        Self {
            primary,
            supplementary: Vec::new(),
            resolver: None,
        }
    }

    /// Append a provider; output order follows registration order.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.supplementary.push(provider);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<IdResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        std::iter::once(self.primary.name())
            .chain(self.supplementary.iter().map(|p| p.name()))
            .collect()
    }

    async fn run(provider: &dyn SourceProvider, request: &EpisodeRequest) -> ProviderOutput {
        match provider.fetch_sources(request).await {
            Ok(output) => {
                debug!(provider = provider.name(), sources = output.sources.len(), "Provider finished");
                output
            }
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "Provider failed");
                ProviderOutput::default()
            }
        }
    }

    async fn resolve(&self, request: &EpisodeRequest) -> Option<ExternalIds> {
        let resolver = self.resolver.as_ref()?;
        let catalog_id = request.catalog_id()?;
        Some(
            resolver
                .resolve_external_ids(catalog_id, request.user_id.as_deref())
                .await,
        )
    }

    async fn run_dependent(&self, request: &EpisodeRequest, dependent: &[usize]) -> Vec<(usize, ProviderOutput)> {
        join_all(
            dependent
                .iter()
                .map(|&i| async move { (i, Self::run(self.supplementary[i].as_ref(), request).await) }),
        )
        .await
    }

    /// Primary first, then the MAL-dependent providers.
    ///
    /// The resolver runs whenever the primary left an id missing. It sits
    /// between the primary and the dependent providers only when the MAL
    /// id is still unknown; otherwise it runs alongside them.
    async fn primary_chain(
        &self,
        request: &EpisodeRequest,
        dependent: &[usize],
    ) -> (ProviderOutput, Option<ExternalIds>, Vec<(usize, ProviderOutput)>) {
        let primary = Self::run(self.primary.as_ref(), request).await;

        let known_mal = request.mal_id.or(primary.mal_id);
        let (resolved, outputs) = match known_mal {
            Some(mal_id) => {
                let enriched = request.clone().with_mal_id(Some(mal_id));
                let resolve = async {
                    if primary.anilist_id.is_none() {
                        self.resolve(request).await
                    } else {
                        None
                    }
                };
                tokio::join!(resolve, self.run_dependent(&enriched, dependent))
            }
            None => {
                let resolved = self.resolve(request).await;
                let mal_id = resolved.as_ref().and_then(|ids| ids.mal_id);
                let enriched = request.clone().with_mal_id(mal_id);
                let outputs = self.run_dependent(&enriched, dependent).await;
                (resolved, outputs)
            }
        };

        (primary, resolved, outputs)
    }

    #[instrument(skip(self, request), fields(episode = %request.episode_key))]
    pub async fn resolve_combined_sources(
        &self,
        request: &EpisodeRequest,
    ) -> Result<StreamingData, AggregateError> {
        if request.catalog_id().is_none() {
            return Err(AggregateError::MissingEpisode);
        }

        let (dependent, independent): (Vec<usize>, Vec<usize>) =
            (0..self.supplementary.len()).partition(|&i| self.supplementary[i].needs_mal_id());

        let independent_outputs = join_all(independent.iter().map(|&i| async move {
            (i, Self::run(self.supplementary[i].as_ref(), request).await)
        }));

        let ((primary, resolved, dependent_outputs), independent_outputs) =
            tokio::join!(self.primary_chain(request, &dependent), independent_outputs);

        let mut slots: Vec<Vec<StreamingSource>> = vec![Vec::new(); self.supplementary.len()];
        for (i, output) in dependent_outputs.into_iter().chain(independent_outputs) {
            slots[i] = output.sources;
        }

        let mut sources = primary.sources;
        sources.extend(slots.into_iter().flatten());

        let groups = ProviderGroupFlags::from_sources(&sources);
        let (resolved_mal, resolved_anilist) = resolved.map_or((None, None), |ids| (ids.mal_id, ids.anilist_id));
        let mal_id = primary.mal_id.or(request.mal_id).or(resolved_mal);
        let anilist_id = primary.anilist_id.or(resolved_anilist);

        info!(sources = sources.len(), ?mal_id, "Combined sources resolved");
        Ok(StreamingData {
            sources,
            subtitles: primary.subtitles,
            headers: primary.headers.unwrap_or_default(),
            mal_id,
            anilist_id,
            groups,
            intro: primary.intro,
            outro: primary.outro,
            next_episode_estimates: primary.next_episode_estimates,
        })
    }
}
