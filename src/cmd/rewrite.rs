use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use url::Url;

use nagare::proxy::manifest::{is_manifest, rewrite_manifest, RewriteContext};
use nagare::proxy::PROXY_PATH;

use super::load_config;

pub fn cmd_rewrite(
    config_path: Option<&Path>,
    input: Option<&Path>,
    base_url: &str,
    proxy_base: Option<String>,
    referer: Option<String>,
    apikey: Option<String>,
) -> Result<()> {
    let target = Url::parse(base_url).with_context(|| format!("invalid --base-url: {base_url}"))?;

    let body = match input.filter(|p| p.as_os_str() != "-") {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
            buf
        }
    };

    if !is_manifest(&body) {
        bail!("input is not an HLS manifest (no #EXTM3U header)");
    }

    let proxy_base = match proxy_base {
        Some(base) => base,
        None => {
            let config = load_config(config_path)?;
            match config.public_base_url {
                Some(public) => format!("{}{PROXY_PATH}", public.trim_end_matches('/')),
                None => format!("http://{}{PROXY_PATH}", config.bind),
            }
        }
    };

    let ctx = RewriteContext::new(proxy_base)
        .with_referer(referer)
        .with_api_key(apikey);
    print!("{}", rewrite_manifest(&body, &target, &ctx));
    Ok(())
}
