//! Intro/outro/recap skip times (AniSkip API).

use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::fingerprint::{desktop_profile, RequestKind};
use crate::http_client::{classify, FetchError, Outcome, RetryingFetcher, UpstreamRequest, UpstreamResponse};

/// Fallback episode length in seconds.
pub const DEFAULT_EPISODE_LENGTH: u32 = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipType {
    #[serde(rename = "op")]
    Opening,
    #[serde(rename = "ed")]
    Ending,
    #[serde(rename = "mixed-op")]
    MixedOpening,
    #[serde(rename = "mixed-ed")]
    MixedEnding,
    #[serde(rename = "recap")]
    Recap,
}

impl SkipType {
    /// Player button label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Opening | Self::MixedOpening => "Skip Intro",
            Self::Ending | Self::MixedEnding => "Skip Outro",
            Self::Recap => "Skip Recap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipInterval {
    #[serde(alias = "start_time")]
    pub start_time: f64,
    #[serde(alias = "end_time")]
    pub end_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipTime {
    pub interval: SkipInterval,
    #[serde(alias = "skip_type")]
    pub skip_type: SkipType,
    #[serde(default, alias = "skip_id")]
    pub skip_id: String,
    #[serde(default, alias = "episode_length")]
    pub episode_length: f64,
}

#[derive(Debug, Deserialize)]
struct SkipResponse {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    results: Vec<SkipTime>,
}

/// The window containing `t` (`start <= t < end`).
pub fn active_skip(times: &[SkipTime], t: f64) -> Option<&SkipTime> {
    times
        .iter()
        .find(|s| t >= s.interval.start_time && t < s.interval.end_time)
}

pub struct SkipTimesClient {
    fetcher: Arc<RetryingFetcher>,
    base: String,
}

impl SkipTimesClient {
    pub fn new(fetcher: Arc<RetryingFetcher>, base: &str) -> Self {
        Self {
            fetcher,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn v2_url(&self, mal_id: u64, episode: u32, episode_length: Option<f64>) -> Result<Url, url::ParseError> {
        let length = episode_length
            .filter(|l| l.is_finite() && *l > 0.0)
            .map_or(DEFAULT_EPISODE_LENGTH.to_string(), |l| format!("{}", l.floor()));
        Url::parse_with_params(
            &format!("{}/v2/skip-times/{mal_id}/{episode}", self.base),
            &[
                ("types[]", "op"),
                ("types[]", "ed"),
                ("types[]", "recap"),
                ("episodeLength", length.as_str()),
            ],
        )
    }

    fn v1_url(&self, mal_id: u64, episode: u32) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            &format!("{}/v1/skip-times/{mal_id}/{episode}", self.base),
            &[("types", "op"), ("types", "ed"), ("types", "recap")],
        )
    }

    async fn get(&self, url: Url) -> Result<UpstreamResponse, FetchError> {
        let request = UpstreamRequest::get(url).with_headers(desktop_profile(RequestKind::Api).to_headers());
        self.fetcher.fetch_with_retry(&request).await
    }

    async fn parse(response: UpstreamResponse) -> Result<Vec<SkipTime>, FetchError> {
        let body: SkipResponse = response.json().await?;
        Ok(if body.found { body.results } else { Vec::new() })
    }

    /// Skip times for an episode; v2 first, v1 as fallback.
    ///
    /// "Not found" from either version is an empty list.
    pub async fn fetch(
        &self,
        mal_id: u64,
        episode: u32,
        episode_length: Option<f64>,
    ) -> Result<Vec<SkipTime>, FetchError> {
        let v2 = self
            .v2_url(mal_id, episode, episode_length)
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        match self.get(v2).await {
            Ok(resp) if classify(resp.status) == Outcome::Success => return Self::parse(resp).await,
            Ok(resp) => debug!(status = %resp.status, "Skip times v2 miss, trying v1"),
            Err(e) => warn!(error = %e, "Skip times v2 failed, trying v1"),
        }

        let v1 = self
            .v1_url(mal_id, episode)
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let resp = self.get(v1).await?;
        if resp.status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Self::parse(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::ScriptedTransport;
    use std::sync::atomic::Ordering;

    const V2_BODY: &str = r#"{"found": true, "statusCode": 200, "results": [
        {"interval": {"startTime": 85.5, "endTime": 175.5}, "skipType": "op", "skipId": "a", "episodeLength": 1420.2},
        {"interval": {"startTime": 1300, "endTime": 1390}, "skipType": "mixed-ed", "skipId": "b", "episodeLength": 1420.2}
    ]}"#;

    fn client(script: Vec<Result<(u16, &'static str), FetchError>>) -> (SkipTimesClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let fetcher = Arc::new(RetryingFetcher::new(transport.clone()).with_max_attempts(1));
        (SkipTimesClient::new(fetcher, "https://skip.example.com/"), transport)
    }

    #[test]
    fn test_v2_url_defaults_length() {
        let (c, _) = client(vec![]);
        let url = c.v2_url(21, 5, None).unwrap();
        assert_eq!(url.path(), "/v2/skip-times/21/5");
        assert!(url.query().unwrap().ends_with("episodeLength=1440"));
        let url = c.v2_url(21, 5, Some(1420.7)).unwrap();
        assert!(url.query().unwrap().ends_with("episodeLength=1420"));
    }

    #[tokio::test]
    async fn reads_v2_results() {
        let (c, transport) = client(vec![Ok((200, V2_BODY))]);
        let times = c.fetch(21, 5, None).await.unwrap();
        assert_eq!(times.len(), 2);
        assert_eq!(times[1].skip_type, SkipType::MixedEnding);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        assert_eq!(active_skip(&times, 100.0).unwrap().skip_type.label(), "Skip Intro");
        assert_eq!(active_skip(&times, 1390.0), None);
        assert_eq!(active_skip(&times, 1300.0).unwrap().skip_type.label(), "Skip Outro");
    }

    #[tokio::test]
    async fn falls_back_to_v1() {
        let v1 = r#"{"found": true, "results": [{"interval": {"start_time": 0, "end_time": 60}, "skip_type": "recap", "skip_id": "c", "episode_length": 1440}]}"#;
        let (c, transport) = client(vec![Ok((400, "{}")), Ok((200, v1))]);
        let times = c.fetch(21, 5, None).await.unwrap();
        assert_eq!(times[0].skip_type, SkipType::Recap);
        assert_eq!(times[0].skip_type.label(), "Skip Recap");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn not_found_is_empty() {
        let (c, _) = client(vec![Ok((404, "")), Ok((404, ""))]);
        assert!(c.fetch(1, 1, None).await.unwrap().is_empty());

        let (c, _) = client(vec![Ok((200, r#"{"found": false, "results": []}"#))]);
        assert!(c.fetch(1, 1, None).await.unwrap().is_empty());
    }
}
