//! Resolve a subscription reference into node records.
//!
//! A reference is one of:
//! - `sub://<base64>`: an envelope around another reference;
//! - a share link (`vless://...`), used as-is;
//! - an http(s) URL, fetched through the [`HttpClient`] port;
//! - a scheme-less string: an inline base64 link list, else a local file.
//!
//! Fetched bodies are classified by shape before decoding. Every failure
//! here degrades to an empty result; callers never see an error.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::codec::{decode_base64, DecodeReport, Registry};
use crate::http::{fetch_with_retry, HttpClient, HttpRequest};
use crate::model::{Result, SubsError};
use crate::parse_clash;
use crate::parse_singbox;
use crate::providers::{FetchOptions, Subscription};

/// Envelope scheme wrapping a base64-encoded reference.
pub const ENVELOPE_SCHEME: &str = "sub://";

/// Client identifier used when a provider answers the first request with an empty body.
pub const FALLBACK_USER_AGENT: &str = "clashmeta";

/// Prefixes that mark a body (or reference) as plain share-link text.
pub const LINK_PREFIXES: &[&str] = &[
    "vmess://",
    "vless://",
    "ss://",
    "ssr://",
    "trojan://",
    "tuic://",
    "hysteria://",
    "hysteria2://",
    "hy2://",
    "wg://",
    "wireguard://",
    "http2://",
    "socks://",
    "socks5://",
];

/// Raw content of a subscription, by shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// One share link per line.
    Links(String),
    /// YAML document with a `proxies` list.
    ProxyList(String),
    /// JSON document with an `outbounds` list.
    OutboundList(String),
}

impl Content {
    /// Decode into node records. Structured-document failures yield an empty report.
    pub fn decode(&self, registry: &Registry) -> DecodeReport {
        match self {
            Content::Links(text) => registry.decode_text(text),
            Content::ProxyList(yaml) => match parse_clash::share_links(yaml) {
                Ok(links) => registry.decode_text(&links.join("\n")),
                Err(e) => {
                    warn!(error = %e, "proxy-list document rejected");
                    DecodeReport::default()
                }
            },
            Content::OutboundList(json) => match parse_singbox::parse_outbounds(json) {
                Ok(nodes) => DecodeReport {
                    nodes: nodes
                        .into_iter()
                        .filter(|n| !registry.is_excluded(&n.kind))
                        .collect(),
                    ..DecodeReport::default()
                },
                Err(e) => {
                    warn!(error = %e, "outbound-list document rejected");
                    DecodeReport::default()
                }
            },
        }
    }
}

fn starts_with_link(text: &str) -> bool {
    LINK_PREFIXES.iter().any(|p| text.starts_with(p))
}

fn has_scheme(reference: &str) -> bool {
    match reference.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn without_blank_lines(text: &str) -> String {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Classify a fetched body.
///
/// Order: link prefix, `proxies` marker, `outbounds` marker, base64 payload,
/// raw text.
pub fn classify(body: &str) -> Content {
    if starts_with_link(body) {
        return Content::Links(without_blank_lines(body));
    }
    if body.contains("proxies") {
        let yaml = body.replace('\t', " ");
        if parse_clash::parse_proxies(&yaml).is_ok() {
            return Content::ProxyList(yaml);
        }
        debug!("body mentions proxies but is not YAML, treating as text");
        return Content::Links(body.to_string());
    }
    if body.contains("outbounds") {
        return Content::OutboundList(body.to_string());
    }
    match decode_base64(body) {
        Ok(text) => Content::Links(text),
        Err(_) => Content::Links(body.to_string()),
    }
}

/// Read a local subscription file. `.yaml`/`.yml` is a proxy-list document.
pub fn read_file(path: &Path) -> Result<Content> {
    let text = std::fs::read_to_string(path)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text).to_string();
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    Ok(if is_yaml {
        Content::ProxyList(text.replace('\t', " "))
    } else {
        Content::Links(text)
    })
}

/// Inline payload: base64 that decodes to something link-shaped.
fn inline_payload(reference: &str) -> Option<String> {
    decode_base64(reference)
        .ok()
        .filter(|text| text.contains("://"))
}

/// Per-invocation acquisition context.
pub struct Acquirer<'a> {
    registry: &'a Registry,
    client: &'a dyn HttpClient,
    fetch: FetchOptions,
}

impl<'a> Acquirer<'a> {
    pub fn new(registry: &'a Registry, client: &'a dyn HttpClient, fetch: FetchOptions) -> Self {
        Self {
            registry,
            client,
            fetch,
        }
    }

    /// Nodes for one subscription. Never fails; problems are logged.
    pub fn acquire(&self, sub: &Subscription) -> DecodeReport {
        let content = match self.resolve(sub) {
            Ok(Some(content)) => content,
            Ok(None) => {
                info!(tag = %sub.tag, "subscription returned no content");
                return DecodeReport::default();
            }
            Err(e) => {
                warn!(tag = %sub.tag, error = %e, "subscription unavailable, skipped");
                return DecodeReport::default();
            }
        };
        let report = content.decode(self.registry);
        debug!(
            tag = %sub.tag,
            nodes = report.nodes.len(),
            skipped = report.skipped,
            excluded = report.excluded,
            "subscription decoded"
        );
        report
    }

    /// Turn the subscription reference into raw content.
    pub fn resolve(&self, sub: &Subscription) -> Result<Option<Content>> {
        let mut reference = sub.url.trim().to_string();
        if let Some(inner) = reference.strip_prefix(ENVELOPE_SCHEME) {
            reference = decode_base64(inner)?.trim().to_string();
        }
        if reference.is_empty() {
            return Err(SubsError::Config("empty subscription reference".into()));
        }
        if !has_scheme(&reference) {
            if let Some(text) = inline_payload(&reference) {
                return Ok(Some(Content::Links(text)));
            }
            return read_file(Path::new(&reference)).map(Some);
        }
        if starts_with_link(&reference) {
            return Ok(Some(Content::Links(without_blank_lines(&reference))));
        }
        self.fetch_remote(&reference, sub)
    }

    fn request(&self, url: &str, sub: &Subscription, user_agent: &str) -> HttpRequest {
        let mut req = HttpRequest::get(url, self.fetch.timeout_secs);
        if !user_agent.is_empty() {
            req = req.with_header("User-Agent", user_agent);
        }
        if let Some(c) = &sub.credentials {
            req = req.with_basic_auth(&c.username, &c.password);
        }
        req
    }

    fn fetch_remote(&self, url: &str, sub: &Subscription) -> Result<Option<Content>> {
        let policy = self.fetch.retry_policy();
        let req = self.request(url, sub, sub.user_agent.trim());
        let mut body = fetch_with_retry(self.client, &req, policy)?.text();
        if body.is_empty() {
            debug!(url, "empty body, retrying with fallback client identifier");
            let req = self.request(url, sub, FALLBACK_USER_AGENT);
            body = fetch_with_retry(self.client, &req, policy)?.text();
        }
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(classify(&body)))
    }
}
