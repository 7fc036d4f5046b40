//! Media proxy
//!
//! `GET /proxy?url=<target>&type=<api|video|subtitle|m3u8>` fetches the
//! target with browser-like headers and returns it to the player with
//! permissive CORS:
//! - HTML embed pages are sanitized ([`html`])
//! - HLS manifests are rewritten so every reference routes back through
//!   the proxy ([`manifest`])
//! - everything else streams through unmodified, `Range` included

pub mod content;
pub mod html;
pub mod manifest;

use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH,
    CONTENT_RANGE, CONTENT_TYPE, HOST, ORIGIN, RANGE, REFERER,
};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use url::Url;

use crate::fingerprint::{desktop_profile, RequestKind};
use crate::http_client::{BodyStream, FetchError, RetryingFetcher, UpstreamRequest, UpstreamResponse};

use self::content::{
    cache_control, claims_manifest, is_html, manifest_cache_control, passthrough_content_type,
    HTML_CONTENT_TYPE, MANIFEST_CONTENT_TYPE,
};
use self::manifest::{rewrite_manifest, starts_like_manifest, RewriteContext};

/// Path the proxy is mounted at.
pub const PROXY_PATH: &str = "/proxy";

const ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type, range, accept";
const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const EXPOSE_HEADERS: &str = "Content-Length, Content-Range, Content-Type";

// Enough of a body prefix to tell a manifest from a media segment
const SNIFF_SIGNIFICANT_BYTES: usize = 7;
const SNIFF_LIMIT: usize = 1024;

/// What the caller expects back; drives headers and caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyKind {
    #[default]
    Api,
    Video,
    Subtitle,
    M3u8,
    Other,
}

impl ProxyKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "api" => Self::Api,
            "video" => Self::Video,
            "subtitle" => Self::Subtitle,
            "m3u8" => Self::M3u8,
            _ => Self::Other,
        }
    }

    fn is_media(self) -> bool {
        matches!(self, Self::Video | Self::M3u8)
    }
}

/// Parsed `/proxy` query string.
#[derive(Debug, Clone, Default)]
pub struct ProxyQuery {
    pub url: Option<String>,
    pub kind: ProxyKind,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub apikey: Option<String>,
}

impl ProxyQuery {
    /// Parse a raw query string; unknown keys are ignored, empty values
    /// count as absent.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut query = Self::default();
        let Some(raw) = raw else {
            return query;
        };

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let value = Some(value.to_string());
            match key.as_ref() {
                "url" => query.url = value,
                "type" => query.kind = ProxyKind::parse(value.as_deref().unwrap_or_default()),
                "referer" => query.referer = value,
                "userAgent" => query.user_agent = value,
                "apikey" => query.apikey = value,
                _ => {}
            }
        }
        query
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Missing url parameter")]
    MissingUrl,

    #[error("Invalid URL format")]
    InvalidUrl,

    #[error(transparent)]
    Upstream(#[from] FetchError),

    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingUrl | Self::InvalidUrl => StatusCode::BAD_REQUEST,
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = if status.is_client_error() {
            json!({ "error": self.to_string() })
        } else {
            error!(error = %self, "Proxy request failed");
            json!({
                "error": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })
        };
        with_cors((status, Json(body)).into_response())
    }
}

/// CORS headers carried by every proxy response.
pub fn cors_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert("access-control-allow-headers", HeaderValue::from_static(ALLOW_HEADERS));
    headers.insert("access-control-allow-methods", HeaderValue::from_static(ALLOW_METHODS));
    headers.insert("access-control-expose-headers", HeaderValue::from_static(EXPOSE_HEADERS));
    headers
}

fn with_cors(mut response: Response) -> Response {
    response.headers_mut().extend(cors_headers());
    response
}

/// Answer to a CORS preflight.
pub fn preflight() -> Response {
    (StatusCode::NO_CONTENT, cors_headers()).into_response()
}

fn content_type_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or(HeaderValue::from_static("application/octet-stream"))
}

fn build(status: StatusCode, body: Body, content_type: HeaderValue) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    with_cors(response)
}

fn is_proxied(proxy_base: &str, url: &str) -> bool {
    url.strip_prefix(proxy_base)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('?'))
}

/// Proxy link for a playable URL; URLs already on the proxy are returned as-is.
pub fn proxied_video_url(
    proxy_base: &str,
    url: &str,
    referer: Option<&str>,
    user_agent: Option<&str>,
) -> String {
    if is_proxied(proxy_base, url) {
        return url.to_string();
    }
    let mut link = format!("{proxy_base}?url={}&type=video", urlencoding::encode(url));
    if let Some(referer) = referer.filter(|r| !r.is_empty()) {
        link.push_str("&referer=");
        link.push_str(&urlencoding::encode(referer));
    }
    if let Some(ua) = user_agent.filter(|ua| !ua.is_empty()) {
        link.push_str("&userAgent=");
        link.push_str(&urlencoding::encode(ua));
    }
    link
}

/// Proxy link for a subtitle track.
pub fn proxied_subtitle_url(proxy_base: &str, url: &str) -> String {
    if is_proxied(proxy_base, url) {
        return url.to_string();
    }
    format!("{proxy_base}?url={}&type=subtitle", urlencoding::encode(url))
}

/// Stateless fetch-and-transform proxy.
pub struct MediaProxy {
    fetcher: Arc<RetryingFetcher>,
    public_base: Option<String>,
    api_key: Option<String>,
}

impl MediaProxy {
    pub fn new(fetcher: Arc<RetryingFetcher>) -> Self {
        Self {
            fetcher,
            public_base: None,
            api_key: None,
        }
    }

    /// Public origin of this service; the proxy path is appended.
    #[must_use]
    pub fn with_public_base(mut self, base: Option<String>) -> Self {
        self.public_base = base.map(|b| b.trim_end_matches('/').to_string()).filter(|b| !b.is_empty());
        self
    }

    /// Key appended to rewritten links when the caller sent none.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    /// Absolute proxy endpoint as seen by the client.
    pub fn proxy_base(&self, inbound: &HeaderMap) -> String {
        if let Some(base) = &self.public_base {
            return format!("{base}{PROXY_PATH}");
        }
        let host = inbound.get(HOST).and_then(|h| h.to_str().ok());
        let scheme = inbound
            .get("x-forwarded-proto")
            .and_then(|p| p.to_str().ok())
            .and_then(|p| p.split(',').next())
            .map_or("http", str::trim);
        match host {
            Some(host) => format!("{scheme}://{host}{PROXY_PATH}"),
            None => PROXY_PATH.to_string(),
        }
    }

    /// Upstream headers for a proxied request.
    pub fn upstream_headers(query: &ProxyQuery, target: &Url, inbound: &HeaderMap) -> HeaderMap {
        let kind = if query.kind == ProxyKind::Api {
            RequestKind::Api
        } else {
            RequestKind::Media
        };
        let mut headers = desktop_profile(kind)
            .with_user_agent(query.user_agent.as_deref())
            .to_headers();

        let referer = query.referer.as_deref().and_then(|r| Url::parse(r).ok());
        let (referer, origin) = match referer {
            Some(url) => (url.to_string(), url.origin().ascii_serialization()),
            None => {
                let origin = target.origin().ascii_serialization();
                (origin.clone(), origin)
            }
        };
        for (name, value) in [(REFERER, referer), (ORIGIN, origin)] {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }

        if let Some(range) = inbound.get(RANGE) {
            headers.insert(RANGE, range.clone());
        }
        headers
    }

    /// Serve one proxy request.
    #[instrument(skip_all, fields(kind = ?query.kind))]
    pub async fn handle(&self, query: ProxyQuery, inbound: &HeaderMap) -> Result<Response, ProxyError> {
        let raw = query.url.as_deref().ok_or(ProxyError::MissingUrl)?;
        let target = Url::parse(raw)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or(ProxyError::InvalidUrl)?;

        info!(target = %target, "Proxying");
        let request =
            UpstreamRequest::get(target.clone()).with_headers(Self::upstream_headers(&query, &target, inbound));
        let upstream = self.fetcher.fetch_with_retry(&request).await?;
        let status = upstream.status;
        let content_type = upstream.content_type();
        debug!(status = %status, content_type = %content_type, "Upstream responded");

        if is_html(&content_type) {
            let page = upstream.text().await?;
            let body = html::sanitize_html(&page);
            return Ok(build(status, Body::from(body), HeaderValue::from_static(HTML_CONTENT_TYPE)));
        }

        if claims_manifest(&target, &content_type) {
            return self
                .sniffed_response(upstream, &target, &query, inbound, BodyPolicy::AsIs)
                .await;
        }

        if query.kind.is_media() {
            return self
                .sniffed_response(upstream, &target, &query, inbound, BodyPolicy::ByKind)
                .await;
        }

        let headers = upstream.headers.clone();
        Ok(passthrough(status, &headers, upstream.into_stream(), &query, &target, BodyPolicy::ByKind))
    }

    fn manifest_response(
        &self,
        status: StatusCode,
        body: &str,
        target: &Url,
        query: &ProxyQuery,
        inbound: &HeaderMap,
    ) -> Response {
        let ctx = RewriteContext::new(self.proxy_base(inbound))
            .with_referer(query.referer.clone())
            .with_api_key(query.apikey.clone().or_else(|| self.api_key.clone()));
        let rewritten = rewrite_manifest(body, target, &ctx);
        let mut response = build(
            status,
            Body::from(rewritten),
            HeaderValue::from_static(MANIFEST_CONTENT_TYPE),
        );
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static(manifest_cache_control()));
        response
    }

    // Peek at the body before deciding: media requests may hit a manifest
    // served without a telling URL or content type, and a claimed manifest
    // may turn out to be plain media.
    async fn sniffed_response(
        &self,
        upstream: UpstreamResponse,
        target: &Url,
        query: &ProxyQuery,
        inbound: &HeaderMap,
        policy: BodyPolicy,
    ) -> Result<Response, ProxyError> {
        let status = upstream.status;
        let headers = upstream.headers.clone();
        let mut stream = upstream.into_stream();

        let mut head = BytesMut::new();
        while head.len() < SNIFF_LIMIT && head.trim_ascii_start().len() < SNIFF_SIGNIFICANT_BYTES {
            match stream.next().await {
                Some(Ok(chunk)) => head.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(FetchError::Body(e.to_string()).into()),
                None => break,
            }
        }

        if starts_like_manifest(&head) {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| FetchError::Body(e.to_string()))?;
                head.extend_from_slice(&chunk);
            }
            let text = String::from_utf8_lossy(&head);
            return Ok(self.manifest_response(status, &text, target, query, inbound));
        }

        if policy == BodyPolicy::AsIs {
            debug!("Claimed manifest is not HLS, returning as-is");
        }
        let prefix: Bytes = head.freeze();
        let rechained: BodyStream =
            Box::pin(futures::stream::once(async move { Ok::<_, std::io::Error>(prefix) }).chain(stream));
        Ok(passthrough(status, &headers, rechained, query, target, policy))
    }
}

/// How a non-manifest body's content type and caching are picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyPolicy {
    /// Upstream content type, no cache override.
    AsIs,
    /// Content type and cache policy from the requested kind.
    ByKind,
}

fn passthrough(
    status: StatusCode,
    upstream_headers: &HeaderMap,
    body: BodyStream,
    query: &ProxyQuery,
    target: &Url,
    policy: BodyPolicy,
) -> Response {
    let upstream_type = upstream_headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let content_type = match policy {
        BodyPolicy::AsIs => upstream_type.to_string(),
        BodyPolicy::ByKind => passthrough_content_type(query.kind, target.as_str(), upstream_type),
    };

    let mut response = build(status, Body::from_stream(body), content_type_value(&content_type));
    let headers = response.headers_mut();
    for name in [CONTENT_LENGTH, CONTENT_RANGE, ACCEPT_RANGES] {
        forward(upstream_headers, headers, name);
    }
    if let Some(cache) = cache_control(query.kind).filter(|_| policy == BodyPolicy::ByKind) {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache));
    }
    response
}

fn forward(from: &HeaderMap, to: &mut HeaderMap, name: HeaderName) {
    if let Some(value) = from.get(&name) {
        to.insert(name, value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parsing() {
        let q = ProxyQuery::parse(Some(
            "url=https%3A%2F%2Fcdn.example%2Fa.m3u8&type=m3u8&referer=https%3A%2F%2Fembed.example%2F&userAgent=VLC&apikey=",
        ));
        assert_eq!(q.url.as_deref(), Some("https://cdn.example/a.m3u8"));
        assert_eq!(q.kind, ProxyKind::M3u8);
        assert_eq!(q.referer.as_deref(), Some("https://embed.example/"));
        assert_eq!(q.user_agent.as_deref(), Some("VLC"));
        assert_eq!(q.apikey, None);

        let q = ProxyQuery::parse(None);
        assert_eq!(q.url, None);
        assert_eq!(q.kind, ProxyKind::Api);
        assert_eq!(ProxyKind::parse("Subtitle"), ProxyKind::Subtitle);
        assert_eq!(ProxyKind::parse("image"), ProxyKind::Other);
    }

    #[test]
    fn test_referer_param_sets_origin() {
        let target = Url::parse("https://cdn.example.com/v/seg.ts").unwrap();
        let query = ProxyQuery {
            kind: ProxyKind::Video,
            referer: Some("https://embed.example.org/e/123".into()),
            ..ProxyQuery::default()
        };
        let mut inbound = HeaderMap::new();
        inbound.insert(RANGE, HeaderValue::from_static("bytes=0-99"));

        let headers = MediaProxy::upstream_headers(&query, &target, &inbound);
        assert_eq!(headers[REFERER], "https://embed.example.org/e/123");
        assert_eq!(headers[ORIGIN], "https://embed.example.org");
        assert_eq!(headers[RANGE], "bytes=0-99");
        assert_eq!(headers[http::header::ACCEPT], "*/*");
    }

    #[test]
    fn test_missing_referer_uses_target_origin() {
        let target = Url::parse("https://api.example.com/data?x=1").unwrap();
        let query = ProxyQuery {
            referer: Some("not a url".into()),
            user_agent: Some("Custom/1.0".into()),
            ..ProxyQuery::default()
        };
        let headers = MediaProxy::upstream_headers(&query, &target, &HeaderMap::new());
        assert_eq!(headers[REFERER], "https://api.example.com");
        assert_eq!(headers[ORIGIN], "https://api.example.com");
        assert_eq!(headers[http::header::ACCEPT], "application/json");
        assert_eq!(headers[http::header::USER_AGENT], "Custom/1.0");
        assert!(!headers.contains_key(RANGE));
    }

    #[test]
    fn test_proxy_base() {
        let fetcher = Arc::new(RetryingFetcher::with_reqwest().unwrap());
        let mut inbound = HeaderMap::new();
        inbound.insert(HOST, HeaderValue::from_static("media.local:9000"));

        let proxy = MediaProxy::new(fetcher.clone());
        assert_eq!(proxy.proxy_base(&inbound), "http://media.local:9000/proxy");
        inbound.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(proxy.proxy_base(&inbound), "https://media.local:9000/proxy");

        let proxy = MediaProxy::new(fetcher).with_public_base(Some("https://api.example.com/".into()));
        assert_eq!(proxy.proxy_base(&inbound), "https://api.example.com/proxy");
    }

    #[test]
    fn test_proxied_urls_never_double_wrap() {
        let base = "https://api.example.com/proxy";
        let link = proxied_video_url(base, "https://cdn.example/a b.m3u8", Some("https://e.example/"), None);
        assert_eq!(
            link,
            "https://api.example.com/proxy?url=https%3A%2F%2Fcdn.example%2Fa%20b.m3u8&type=video&referer=https%3A%2F%2Fe.example%2F"
        );
        assert_eq!(proxied_video_url(base, &link, None, None), link);

        let sub = proxied_subtitle_url(base, "https://s.example/en.vtt");
        assert!(sub.ends_with("&type=subtitle"));
        assert_eq!(proxied_subtitle_url(base, &sub), sub);
        assert!(!is_proxied(base, "https://api.example.com/proxyish?url=x"));
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(ProxyError::MissingUrl.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::InvalidUrl.to_string(), "Invalid URL format");
        let err = ProxyError::from(FetchError::Status(StatusCode::BAD_GATEWAY));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ProxyError::MissingUrl.into_response();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(preflight().status(), StatusCode::NO_CONTENT);
    }
}
