//! Response content-type and cache policy for proxied bodies.

use url::Url;

use super::ProxyKind;

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

const SHORT_CACHE: &str = "public, max-age=60";
const LONG_CACHE: &str = "public, max-age=86400";

/// HTML or XHTML document.
pub fn is_html(content_type: &str) -> bool {
    content_type.contains("text/html") || content_type.contains("application/xhtml")
}

/// Whether the target path or upstream content type claims an HLS manifest.
///
/// Only the path counts; a `.m3u8` in the query string claims nothing.
pub fn claims_manifest(target: &Url, content_type: &str) -> bool {
    target.path().to_ascii_lowercase().ends_with(".m3u8")
        || content_type.contains("mpegurl")
        || content_type.contains("m3u8")
}

/// Content type for a passthrough body.
pub fn passthrough_content_type(kind: ProxyKind, target: &str, upstream: &str) -> String {
    let path = target.split(['?', '#']).next().unwrap_or(target).to_ascii_lowercase();
    match kind {
        ProxyKind::Subtitle if path.contains(".vtt") => "text/vtt; charset=utf-8".to_string(),
        ProxyKind::Subtitle if path.contains(".srt") || path.contains(".ass") => {
            "text/plain; charset=utf-8".to_string()
        }
        ProxyKind::Api => "application/json".to_string(),
        _ => upstream.to_string(),
    }
}

/// `Cache-Control` for a passthrough body; media is left to the upstream.
pub fn cache_control(kind: ProxyKind) -> Option<&'static str> {
    match kind {
        ProxyKind::Api => Some(SHORT_CACHE),
        ProxyKind::Video | ProxyKind::M3u8 => None,
        ProxyKind::Subtitle | ProxyKind::Other => Some(LONG_CACHE),
    }
}

/// `Cache-Control` for a rewritten manifest.
pub fn manifest_cache_control() -> &'static str {
    SHORT_CACHE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtitle_types() {
        let vtt = passthrough_content_type(ProxyKind::Subtitle, "https://s.example/en.vtt?sig=1", "text/plain");
        assert_eq!(vtt, "text/vtt; charset=utf-8");
        let ass = passthrough_content_type(ProxyKind::Subtitle, "https://s.example/en.ass", "application/octet-stream");
        assert_eq!(ass, "text/plain; charset=utf-8");
        let other = passthrough_content_type(ProxyKind::Subtitle, "https://s.example/sub", "text/x-custom");
        assert_eq!(other, "text/x-custom");
    }

    #[test]
    fn test_api_and_media_types() {
        assert_eq!(passthrough_content_type(ProxyKind::Api, "https://a.example/x", "text/plain"), "application/json");
        assert_eq!(passthrough_content_type(ProxyKind::Video, "https://a.example/seg.ts", "video/mp2t"), "video/mp2t");
    }

    #[test]
    fn test_cache_policy() {
        assert_eq!(cache_control(ProxyKind::Api), Some("public, max-age=60"));
        assert_eq!(cache_control(ProxyKind::Subtitle), Some("public, max-age=86400"));
        assert_eq!(cache_control(ProxyKind::Video), None);
    }

    #[test]
    fn test_detection() {
        assert!(is_html("text/html; charset=utf-8"));
        assert!(is_html("application/xhtml+xml"));
        assert!(!is_html("application/json"));
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(claims_manifest(&url("https://a.example/Master.M3U8"), "application/octet-stream"));
        assert!(claims_manifest(&url("https://a.example/hls/index.m3u8?token=1"), "video/mp2t"));
        assert!(claims_manifest(&url("https://a.example/playlist"), "application/x-mpegurl"));
        assert!(!claims_manifest(&url("https://a.example/seg.ts"), "video/mp2t"));
        assert!(!claims_manifest(&url("https://a.example/seg.ts?src=a.m3u8"), "video/mp2t"));
    }
}
