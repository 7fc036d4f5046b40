//! CORS relay client used by provider adapters.
//!
//! When a relay is configured, adapters never talk to catalog APIs
//! directly: every call becomes
//! `{relay}?url=<target>&type=api&referer=<referer>[&apikey=<key>]`.
//! Without a relay the target is fetched directly with browser headers.

use std::sync::Arc;

use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, ORIGIN, REFERER};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::fingerprint::{desktop_profile, RequestKind};
use crate::http_client::{RetryingFetcher, UpstreamRequest};
use crate::identity::ClientIdentity;
use crate::stream::provider::ProviderError;

const APIKEY: HeaderName = HeaderName::from_static("apikey");
const CLIENT_INFO: HeaderName = HeaderName::from_static("x-client-info");

pub struct RelayClient {
    fetcher: Arc<RetryingFetcher>,
    relay: Option<Url>,
    api_key: Option<String>,
    identity: Arc<ClientIdentity>,
}

impl RelayClient {
    /// Direct client (no relay).
    pub fn new(fetcher: Arc<RetryingFetcher>, identity: Arc<ClientIdentity>) -> Self {
        Self {
            fetcher,
            relay: None,
            api_key: None,
            identity,
        }
    }

    #[must_use]
    pub fn with_relay(mut self, relay: Option<Url>, api_key: Option<String>) -> Self {
        self.relay = relay;
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    /// Request for `target`, routed through the relay when one is set.
    pub fn request_for(&self, target: &Url, referer: &str) -> UpstreamRequest {
        match &self.relay {
            Some(relay) => {
                let mut url = relay.clone();
                {
                    let mut query = url.query_pairs_mut();
                    query
                        .append_pair("url", target.as_str())
                        .append_pair("type", "api")
                        .append_pair("referer", referer);
                    if let Some(key) = &self.api_key {
                        query.append_pair("apikey", key);
                    }
                }
                UpstreamRequest::get(url).with_headers(self.platform_headers())
            }
            None => {
                let mut headers = desktop_profile(RequestKind::Api).to_headers();
                if let Ok(value) = HeaderValue::from_str(referer) {
                    headers.insert(REFERER, value);
                }
                if let Some(origin) = Url::parse(referer)
                    .ok()
                    .map(|u| u.origin().ascii_serialization())
                    .and_then(|o| HeaderValue::from_str(&o).ok())
                {
                    headers.insert(ORIGIN, origin);
                }
                UpstreamRequest::get(target.clone()).with_headers(headers)
            }
        }
    }

    /// Headers for calls to our own hosting platform (relay, scraper
    /// functions, the record store).
    pub fn platform_headers(&self) -> HeaderMap {
        let mut headers = desktop_profile(RequestKind::Api).to_headers();
        if let Ok(value) = HeaderValue::from_str(self.identity.header_value()) {
            headers.insert(CLIENT_INFO, value);
        }
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert(APIKEY, value);
            }
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// GET `target` through the relay and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        target: &Url,
        referer: &str,
    ) -> Result<T, ProviderError> {
        debug!(target = %target, relayed = self.relay.is_some(), "Provider request");
        let request = self.request_for(target, referer);
        Ok(self.fetcher.get_json(&request).await?)
    }

    /// GET `target` and unwrap its `{status|success, data}` envelope.
    pub async fn get_data<T: DeserializeOwned>(
        &self,
        target: &Url,
        referer: &str,
    ) -> Result<T, ProviderError> {
        let value: Value = self.get_json(target, referer).await?;
        Ok(serde_json::from_value(unwrap_envelope(value)?)?)
    }

    /// GET a platform function directly (never relayed).
    pub async fn get_platform_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
        let request = UpstreamRequest::get(url).with_headers(self.platform_headers());
        Ok(self.fetcher.get_json(&request).await?)
    }
}

/// Unwrap catalog envelopes: `{status: 2xx, data}` and `{success: true, data}`.
///
/// Bodies without an envelope are returned unchanged.
pub fn unwrap_envelope(value: Value) -> Result<Value, ProviderError> {
    let Value::Object(mut map) = value else {
        return Ok(value);
    };

    if let Some(success) = map.get("success").and_then(Value::as_bool) {
        if !success {
            return Err(ProviderError::Rejected(envelope_message(&map)));
        }
        return map
            .remove("data")
            .ok_or_else(|| ProviderError::Payload("envelope without data".to_string()));
    }

    if let Some(status) = map.get("status").and_then(Value::as_u64) {
        if !(200..300).contains(&status) {
            return Err(ProviderError::Rejected(format!(
                "status {status}: {}",
                envelope_message(&map)
            )));
        }
        if let Some(data) = map.remove("data") {
            return Ok(data);
        }
    }

    Ok(Value::Object(map))
}

fn envelope_message(map: &serde_json::Map<String, Value>) -> String {
    map.get("message")
        .or_else(|| map.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("no message")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::ScriptedTransport;
    use serde_json::json;

    fn client(relay: Option<&str>, key: Option<&str>) -> RelayClient {
        let fetcher = Arc::new(RetryingFetcher::new(Arc::new(ScriptedTransport::statuses(&[]))));
        RelayClient::new(fetcher, Arc::new(ClientIdentity::fixed("test")))
            .with_relay(relay.map(|r| Url::parse(r).unwrap()), key.map(String::from))
    }

    #[test]
    fn test_relayed_request_shape() {
        let client = client(Some("https://relay.example.com/functions/v1/rapid"), Some("k1"));
        let target = Url::parse("https://catalog.example.com/api?id=a b&x=1").unwrap();
        let req = client.request_for(&target, "https://catalog.example.com");

        assert_eq!(req.url.host_str(), Some("relay.example.com"));
        let pairs: Vec<(String, String)> = req.url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("url".to_string(), target.to_string()));
        assert_eq!(pairs[1], ("type".to_string(), "api".to_string()));
        assert_eq!(pairs[2].1, "https://catalog.example.com");
        assert_eq!(pairs[3], ("apikey".to_string(), "k1".to_string()));

        assert_eq!(req.headers["apikey"], "k1");
        assert_eq!(req.headers[AUTHORIZATION], "Bearer k1");
        assert!(req.headers[CLIENT_INFO].to_str().unwrap().ends_with(" test"));
    }

    #[test]
    fn test_direct_request_spoofs_referer() {
        let client = client(None, None);
        let target = Url::parse("https://catalog.example.com/api/x").unwrap();
        let req = client.request_for(&target, "https://site.example.org/watch");

        assert_eq!(req.url, target);
        assert_eq!(req.headers[REFERER], "https://site.example.org/watch");
        assert_eq!(req.headers[ORIGIN], "https://site.example.org");
        assert!(!req.headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn test_unwrap_envelopes() {
        let data = unwrap_envelope(json!({"status": 200, "data": {"a": 1}})).unwrap();
        assert_eq!(data, json!({"a": 1}));

        let data = unwrap_envelope(json!({"success": true, "data": [1, 2]})).unwrap();
        assert_eq!(data, json!([1, 2]));

        let bare = unwrap_envelope(json!({"sources": []})).unwrap();
        assert_eq!(bare, json!({"sources": []}));

        assert!(matches!(
            unwrap_envelope(json!({"success": false, "message": "nope"})),
            Err(ProviderError::Rejected(m)) if m == "nope"
        ));
        assert!(unwrap_envelope(json!({"status": 404, "message": "gone"})).is_err());
    }
}
