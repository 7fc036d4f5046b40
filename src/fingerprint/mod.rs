//! Upstream browser fingerprint
//!
//! Many video hosts refuse requests that don't look like a desktop
//! browser. Every upstream request starts from a [`BrowserProfile`] and
//! overrides only what the caller asks for.

use http::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use tracing::warn;

/// Desktop Chrome on Windows, the profile most hosts whitelist.
pub const DESKTOP_CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// What the request is for; drives the `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// JSON API payloads.
    Api,
    /// Manifests, segments, subtitles, embed pages.
    Media,
}

/// Browser profile used for upstream requests
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
}

/// The default desktop profile.
#[must_use]
pub fn desktop_profile(kind: RequestKind) -> BrowserProfile {
    let accept = match kind {
        RequestKind::Api => "application/json",
        RequestKind::Media => "*/*",
    };

    BrowserProfile {
        user_agent: DESKTOP_CHROME_UA.to_string(),
        accept: accept.to_string(),
        accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
    }
}

impl BrowserProfile {
    /// Replace the User-Agent, ignoring values that aren't valid header text.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        match user_agent.map(str::trim).filter(|ua| !ua.is_empty()) {
            Some(ua) if HeaderValue::from_str(ua).is_ok() => self.user_agent = ua.to_string(),
            Some(ua) => warn!(user_agent = %ua, "Ignoring invalid User-Agent override"),
            None => {}
        }
        self
    }

    /// Convert profile to a `HeaderMap`
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in [
            (USER_AGENT, &self.user_agent),
            (ACCEPT, &self.accept),
            (ACCEPT_LANGUAGE, &self.accept_language),
        ] {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_profile_is_chrome() {
        let profile = desktop_profile(RequestKind::Media);
        assert!(profile.user_agent.contains("Chrome/120"));
        assert!(profile.user_agent.contains("Windows NT 10.0"));
        assert_eq!(profile.accept, "*/*");
    }

    #[test]
    fn test_api_profile_accepts_json() {
        assert_eq!(desktop_profile(RequestKind::Api).accept, "application/json");
    }

    #[test]
    fn test_user_agent_override() {
        let profile = desktop_profile(RequestKind::Media).with_user_agent(Some("VLC/3.0.20"));
        assert_eq!(profile.user_agent, "VLC/3.0.20");

        let profile = desktop_profile(RequestKind::Media).with_user_agent(Some("   "));
        assert_eq!(profile.user_agent, DESKTOP_CHROME_UA);

        let profile = desktop_profile(RequestKind::Media).with_user_agent(Some("bad\nagent"));
        assert_eq!(profile.user_agent, DESKTOP_CHROME_UA);
    }

    #[test]
    fn test_headers_conversion() {
        let headers = desktop_profile(RequestKind::Api).to_headers();
        assert!(headers.contains_key(USER_AGENT));
        assert_eq!(headers[ACCEPT], "application/json");
        assert_eq!(headers[ACCEPT_LANGUAGE], "en-US,en;q=0.9");
    }
}
