//! HLS manifest rewriting.
//!
//! Every reference in a manifest (segment, variant playlist, key, map) is
//! resolved against the manifest's base and replaced with a link back
//! through the proxy, so the player never talks to the upstream directly.
//! Lines that carry no reference are emitted byte-for-byte, line endings
//! included.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

static URI_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"URI="([^"]+)""#).unwrap());

const MANIFEST_TAG: &str = "#EXTM3U";

/// Where rewritten links point and what they carry along.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// Absolute proxy endpoint, e.g. `https://api.example.com/proxy`.
    pub proxy_base: String,
    pub referer: Option<String>,
    pub api_key: Option<String>,
}

impl RewriteContext {
    pub fn new(proxy_base: impl Into<String>) -> Self {
        Self {
            proxy_base: proxy_base.into(),
            referer: None,
            api_key: None,
        }
    }

    #[must_use]
    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer.filter(|r| !r.is_empty());
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }
}

/// Whether a body is an HLS manifest by content.
pub fn is_manifest(body: &str) -> bool {
    body.trim_start_matches('\u{feff}')
        .trim_start()
        .starts_with(MANIFEST_TAG)
}

/// Byte-level [`is_manifest`] for sniffing a body prefix.
pub fn starts_like_manifest(prefix: &[u8]) -> bool {
    let prefix = prefix.strip_prefix("\u{feff}".as_bytes()).unwrap_or(prefix);
    prefix.trim_ascii_start().starts_with(MANIFEST_TAG.as_bytes())
}

/// The manifest URL without query or fragment, cut after its last `/`.
pub fn manifest_base(target: &Url) -> String {
    let mut base = target.clone();
    base.set_query(None);
    base.set_fragment(None);
    let base = base.as_str();
    match base.rfind('/') {
        Some(i) => base[..=i].to_string(),
        None => base.to_string(),
    }
}

/// Resolve a manifest reference to an absolute URL.
pub fn resolve_reference(base: &str, reference: &str) -> String {
    let reference = reference.trim();
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(reference)) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{base}{reference}"),
    }
}

/// Proxy link for an absolute upstream URL.
pub fn proxy_link(ctx: &RewriteContext, absolute: &str) -> String {
    let kind = if absolute.to_ascii_lowercase().contains(".m3u8") {
        "m3u8"
    } else {
        "video"
    };
    let mut link = format!(
        "{}?url={}&type={kind}",
        ctx.proxy_base,
        urlencoding::encode(absolute)
    );
    if let Some(referer) = &ctx.referer {
        link.push_str("&referer=");
        link.push_str(&urlencoding::encode(referer));
    }
    if let Some(key) = &ctx.api_key {
        link.push_str("&apikey=");
        link.push_str(&urlencoding::encode(key));
    }
    link
}

/// Rewrite every reference in `body`, fetched from `target`.
pub fn rewrite_manifest(body: &str, target: &Url, ctx: &RewriteContext) -> String {
    let base = manifest_base(target);
    let mut out = String::with_capacity(body.len() * 2);

    for raw in body.split_inclusive('\n') {
        let (line, ending) = split_ending(raw);
        let trimmed = line.trim();

        if trimmed.is_empty() {
            out.push_str(raw);
        } else if trimmed.starts_with('#') {
            let rewritten = URI_ATTR.replace_all(line, |caps: &Captures<'_>| {
                let absolute = resolve_reference(&base, &caps[1]);
                format!("URI=\"{}\"", proxy_link(ctx, &absolute))
            });
            out.push_str(&rewritten);
            out.push_str(ending);
        } else {
            out.push_str(&proxy_link(ctx, &resolve_reference(&base, trimmed)));
            out.push_str(ending);
        }
    }

    out
}

fn split_ending(raw: &str) -> (&str, &str) {
    if let Some(line) = raw.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = raw.strip_suffix('\n') {
        (line, "\n")
    } else {
        (raw, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: &str = "http://localhost:8080/proxy";

    fn target() -> Url {
        Url::parse("https://cdn.example.com/hls/show/master.m3u8?token=abc").unwrap()
    }

    fn decode_url_param(link: &str) -> String {
        let query = link.split_once('?').unwrap().1;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "url")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[test]
    fn test_manifest_detection() {
        assert!(is_manifest("#EXTM3U\n#EXT-X-VERSION:3\n"));
        assert!(is_manifest("\u{feff}  \n#EXTM3U\n"));
        assert!(!is_manifest("<html>#EXTM3U</html>"));
        assert!(starts_like_manifest(b"\r\n#EXTM3U"));
        assert!(!starts_like_manifest(b"\x47\x40\x00"));
    }

    #[test]
    fn test_base_drops_query_and_file() {
        assert_eq!(manifest_base(&target()), "https://cdn.example.com/hls/show/");
        let root = Url::parse("https://cdn.example.com").unwrap();
        assert_eq!(manifest_base(&root), "https://cdn.example.com/");
    }

    #[test]
    fn test_reference_resolution() {
        let base = "https://cdn.example.com/hls/show/";
        assert_eq!(resolve_reference(base, "seg-1.ts"), "https://cdn.example.com/hls/show/seg-1.ts");
        assert_eq!(resolve_reference(base, "../key.bin"), "https://cdn.example.com/hls/key.bin");
        assert_eq!(resolve_reference(base, "/root/720.m3u8"), "https://cdn.example.com/root/720.m3u8");
        assert_eq!(resolve_reference(base, "https://other.example/a.ts"), "https://other.example/a.ts");
    }

    #[test]
    fn test_rewrites_segments_and_uri_attributes() {
        let body = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x1\n#EXTINF:10.0,\nseg-1.ts\n#EXT-X-ENDLIST\n";
        let ctx = RewriteContext::new(PROXY).with_referer(Some("https://embed.example/".into()));
        let out = rewrite_manifest(body, &target(), &ctx);
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert!(lines[1].starts_with("#EXT-X-KEY:METHOD=AES-128,URI=\"http://localhost:8080/proxy?url="));
        assert!(lines[1].ends_with("\",IV=0x1"));
        assert_eq!(lines[2], "#EXTINF:10.0,");
        assert!(lines[3].starts_with(PROXY));
        assert!(lines[3].contains("&type=video&referer=https%3A%2F%2Fembed.example%2F"));
        assert_eq!(decode_url_param(lines[3]), "https://cdn.example.com/hls/show/seg-1.ts");
        assert_eq!(lines[4], "#EXT-X-ENDLIST");
    }

    #[test]
    fn test_variant_playlists_use_m3u8_type() {
        let body = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\n720/index.m3u8\n";
        let out = rewrite_manifest(body, &target(), &RewriteContext::new(PROXY).with_api_key(Some("k 1".into())));
        let variant = out.lines().nth(2).unwrap();
        assert!(variant.contains("&type=m3u8"));
        assert!(variant.ends_with("&apikey=k%201"));
        assert_eq!(decode_url_param(variant), "https://cdn.example.com/hls/show/720/index.m3u8");
    }

    #[test]
    fn test_absolute_references_single_pass_keeps_other_lines() {
        let body = "#EXTM3U\r\n#EXT-X-TARGETDURATION:10\r\n\r\n#EXTINF:9.8,title\r\nhttps://edge.example.net/a/seg0.ts?x=1\r\n# comment with URI-less text\r\n";
        let out = rewrite_manifest(body, &target(), &RewriteContext::new(PROXY));

        let input: Vec<&str> = body.split_inclusive('\n').collect();
        let output: Vec<&str> = out.split_inclusive('\n').collect();
        assert_eq!(input.len(), output.len());
        for (i, (before, after)) in input.iter().zip(&output).enumerate() {
            if i == 4 {
                assert!(after.ends_with("\r\n"));
                assert_eq!(decode_url_param(after.trim_end()), "https://edge.example.net/a/seg0.ts?x=1");
            } else {
                assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn test_missing_trailing_newline() {
        let out = rewrite_manifest("#EXTM3U\nseg.ts", &target(), &RewriteContext::new(PROXY));
        assert!(!out.ends_with('\n'));
        assert!(out.starts_with("#EXTM3U\nhttp://localhost:8080/proxy?url="));
    }
}
