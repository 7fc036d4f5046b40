//! HTTP surface: the media proxy plus a small JSON API over the
//! aggregator, the id resolver, the mapping dataset and skip times.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use crate::config::{Config, ConfigError};
use crate::http_client::{FetchError, RetryingFetcher};
use crate::identity::ClientIdentity;
use crate::ids::{ExternalIds, IdResolver, MappingDataset, NormalizedIds};
use crate::proxy::{self, MediaProxy, ProxyQuery, PROXY_PATH};
use crate::store::{MemoryStore, RecordStore, RestStore, StoreError};
use crate::stream::aggregate::{AggregateError, SourceAggregator, StreamingData};
use crate::stream::providers::{
    AnimelokProvider, AnimeyaProvider, CatalogClient, CustomSourceProvider, HindiDubbedProvider,
    PrimaryCatalogProvider, WatchAnimeWorldProvider,
};
use crate::stream::relay::RelayClient;
use crate::stream::skip::{SkipTime, SkipTimesClient};
use crate::stream::EpisodeRequest;

pub type AppResult<T> = Result<T, AppError>;

/// JSON API error.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<AggregateError> for AppError {
    fn from(err: AggregateError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        warn!(error = %err, "Upstream failure");
        Self::bad_gateway(err.to_string())
    }
}

/// Failure while wiring services from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

/// Services shared by every handler, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<RetryingFetcher>,
    pub identity: Arc<ClientIdentity>,
    pub aggregator: Arc<SourceAggregator>,
    pub resolver: Arc<IdResolver>,
    pub mapping: Arc<MappingDataset>,
    pub skip_times: Arc<SkipTimesClient>,
    pub proxy: Arc<MediaProxy>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let fetcher = Arc::new(
            RetryingFetcher::with_reqwest()?
                .with_timeout(config.fetch.timeout())
                .with_max_attempts(config.fetch.max_attempts),
        );
        let identity = Arc::new(ClientIdentity::new());

        let relay_url = config
            .relay_url
            .as_deref()
            .map(|u| parse_url("relay_url", u))
            .transpose()?;
        let relay = Arc::new(
            RelayClient::new(fetcher.clone(), identity.clone())
                .with_relay(relay_url, config.api_key.clone()),
        );

        let catalog = Arc::new(CatalogClient::new(
            relay.clone(),
            config.catalog.tatakai_base.clone(),
            config.catalog.hianime_base.clone(),
        ));

        let store: Arc<dyn RecordStore> = match &config.store.url {
            Some(url) => {
                let key = config.store.api_key.as_deref().or(config.api_key.as_deref());
                Arc::new(RestStore::new(fetcher.clone(), url, key)?)
            }
            None => {
                info!("No store configured, saved ids and custom sources are disabled");
                Arc::new(MemoryStore::new())
            }
        };

        let resolver = Arc::new(IdResolver::standard(catalog.clone(), store.clone()));

        let mut aggregator = SourceAggregator::new(Arc::new(PrimaryCatalogProvider::new(catalog.clone())));
        if let Some(url) = &config.catalog.watchanimeworld_url {
            let endpoint = parse_url("catalog.watchanimeworld_url", url)?;
            aggregator = aggregator.with_provider(Arc::new(WatchAnimeWorldProvider::new(relay.clone(), Some(endpoint))));
        }
        aggregator = aggregator
            .with_provider(Arc::new(AnimeyaProvider::new(relay.clone(), catalog.tatakai_base())))
            .with_provider(Arc::new(AnimelokProvider::new(relay.clone(), catalog.tatakai_base())));
        if let Some(url) = &config.catalog.animehindidubbed_url {
            let endpoint = parse_url("catalog.animehindidubbed_url", url)?;
            aggregator = aggregator.with_provider(Arc::new(HindiDubbedProvider::new(relay.clone(), Some(endpoint))));
        }
        let aggregator = aggregator
            .with_provider(Arc::new(CustomSourceProvider::new(store)))
            .with_resolver(resolver.clone());
        info!(providers = ?aggregator.provider_names(), "Providers registered");

        let mapping = Arc::new(MappingDataset::remote(
            fetcher.clone(),
            parse_url("mapping_url", &config.mapping_url)?,
        ));
        let skip_times = Arc::new(SkipTimesClient::new(fetcher.clone(), &config.skip_times_base));
        let proxy = Arc::new(
            MediaProxy::new(fetcher.clone())
                .with_public_base(config.public_base_url.clone())
                .with_api_key(config.api_key.clone()),
        );

        Ok(Self {
            fetcher,
            identity,
            aggregator: Arc::new(aggregator),
            resolver,
            mapping,
            skip_times,
            proxy,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PROXY_PATH, get(proxy_handler).post(proxy_handler).options(proxy_preflight))
        .route("/api/sources", get(sources_handler))
        .route("/api/ids/{catalog_id}", get(ids_handler))
        .route("/api/mapping/{id}", get(mapping_handler))
        .route("/api/skip-times/{mal_id}/{episode}", get(skip_times_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState, bind: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

async fn proxy_handler(State(state): State<AppState>, headers: HeaderMap, RawQuery(query): RawQuery) -> Response {
    let query = ProxyQuery::parse(query.as_deref());
    match state.proxy.handle(query, &headers).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn proxy_preflight() -> Response {
    proxy::preflight()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesParams {
    pub episode_id: Option<String>,
    pub anime_name: Option<String>,
    pub episode: Option<u32>,
    pub server: Option<String>,
    pub category: Option<String>,
    pub user_id: Option<String>,
    pub mal_id: Option<u64>,
}

impl SourcesParams {
    pub fn into_request(self) -> AppResult<EpisodeRequest> {
        let episode_id = self
            .episode_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::bad_request("episodeId is required"))?;

        let mut request = EpisodeRequest::new(episode_id).with_mal_id(self.mal_id);
        request.anime_name = self.anime_name.filter(|n| !n.is_empty());
        request.episode_number = self.episode;
        request.user_id = self.user_id.filter(|u| !u.is_empty());
        if let Some(server) = self.server.filter(|s| !s.is_empty()) {
            request.server = server;
        }
        if let Some(category) = self.category.filter(|c| !c.is_empty()) {
            request.category = category;
        }
        Ok(request)
    }
}

async fn sources_handler(
    State(state): State<AppState>,
    Query(params): Query<SourcesParams>,
) -> AppResult<Json<StreamingData>> {
    let request = params.into_request()?;
    Ok(Json(state.aggregator.resolve_combined_sources(&request).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdsParams {
    user_id: Option<String>,
}

async fn ids_handler(
    State(state): State<AppState>,
    Path(catalog_id): Path<String>,
    Query(params): Query<IdsParams>,
) -> Json<ExternalIds> {
    let user = params.user_id.filter(|u| !u.is_empty());
    Json(state.resolver.resolve_external_ids(&catalog_id, user.as_deref()).await)
}

async fn mapping_handler(State(state): State<AppState>, Path(id): Path<String>) -> Json<NormalizedIds> {
    Json(state.mapping.normalize_id(&id).await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkipParams {
    episode_length: Option<f64>,
}

async fn skip_times_handler(
    State(state): State<AppState>,
    Path((mal_id, episode)): Path<(u64, u32)>,
    Query(params): Query<SkipParams>,
) -> AppResult<Json<Vec<SkipTime>>> {
    Ok(Json(state.skip_times.fetch(mal_id, episode, params.episode_length).await?))
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "providers": state.aggregator.provider_names(),
    }))
}
