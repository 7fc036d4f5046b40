//! Embed-page sanitization.
//!
//! Embed hosts ship pop-under scripts and CSP meta tags that block the
//! proxy. Pages are returned with every CSP meta tag removed and a small
//! guard script as the first element of `<head>`.

use std::sync::LazyLock;

use regex::Regex;

/// Neutralizes `window.open` and document-level click hijacking.
pub const PROTECTIVE_SCRIPT: &str = "<script>(function(){window.open=()=>({closed:true,focus:()=>{}});Object.defineProperty(document,'onclick',{set:()=>{},get:()=>null,configurable:true});})();</script>";

static CSP_META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<meta[^>]+Content-Security-Policy[^>]*>").unwrap()
});

// `<head>` or `<head ...>`, not `<header>`
static HEAD_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").unwrap());

/// Remove CSP meta tags and inject [`PROTECTIVE_SCRIPT`].
pub fn sanitize_html(html: &str) -> String {
    let stripped = CSP_META.replace_all(html, "");

    match HEAD_OPEN.find(&stripped) {
        Some(head) => {
            let mut out = String::with_capacity(stripped.len() + PROTECTIVE_SCRIPT.len());
            out.push_str(&stripped[..head.end()]);
            out.push_str(PROTECTIVE_SCRIPT);
            out.push_str(&stripped[head.end()..]);
            out
        }
        None => format!("{PROTECTIVE_SCRIPT}{stripped}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_csp_and_injects_first() {
        let page = r#"<html><head lang="en"><META HTTP-EQUIV="Content-Security-Policy" content="default-src 'self'"><title>x</title></head><body></body></html>"#;
        let out = sanitize_html(page);
        assert!(!out.to_ascii_lowercase().contains("content-security-policy"));
        assert!(out.starts_with(&format!(r#"<html><head lang="en">{PROTECTIVE_SCRIPT}<title>"#)));
    }

    #[test]
    fn test_all_csp_tags_removed() {
        let page = "<head><meta http-equiv=\"Content-Security-Policy\" content=\"a\"><meta name=\"viewport\"><meta http-equiv='content-security-policy' content='b'></head>";
        let out = sanitize_html(page);
        assert_eq!(out, format!("<head>{PROTECTIVE_SCRIPT}<meta name=\"viewport\"></head>"));
    }

    #[test]
    fn test_header_tag_is_not_head() {
        let out = sanitize_html("<body><header>menu</header></body>");
        assert!(out.starts_with(PROTECTIVE_SCRIPT));
        assert!(out.ends_with("<header>menu</header></body>"));
    }
}
