//! Share-link codecs.
//! 分享链接解析器：每种协议一个实现，由 [`Registry`] 统一调度。
//!
//! A codec turns one share-link line into one canonical [`Node`] (or a pair,
//! for chained protocols). Failures are values, never panics; the registry
//! absorbs them and reports how many lines were skipped.

mod http;
mod hysteria;
mod hysteria2;
mod shadowsocks;
mod shadowsocksr;
mod socks;
mod stream;
mod trojan;
mod tuic;
mod vless;
mod vmess;
mod wireguard;

use std::collections::{HashMap, HashSet};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tracing::debug;

use crate::model::{Node, Result, SubsError};

/// Output of a single decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Single(Node),
    /// Primary node plus the companion it detours through.
    Pair(Node, Node),
}

impl Decoded {
    pub fn into_nodes(self) -> Vec<Node> {
        match self {
            Decoded::Single(n) => vec![n],
            Decoded::Pair(a, b) => vec![a, b],
        }
    }
}

pub trait Codec: Send + Sync {
    /// Protocol token used for exclusion (`vless`, `ss`, `hysteria2`, ...).
    fn protocol(&self) -> &'static str;
    /// URI schemes handled, lowercase, without `://`.
    fn schemes(&self) -> &'static [&'static str];
    fn decode(&self, link: &str) -> Result<Decoded>;
}

/// Map protocol aliases onto the canonical exclusion token.
pub fn normalize_protocol(token: &str) -> String {
    let token = token.trim().to_ascii_lowercase();
    match token.as_str() {
        "hy2" => "hysteria2".into(),
        "wg" => "wireguard".into(),
        "shadowsocks" => "ss".into(),
        "shadowsocksr" => "ssr".into(),
        "socks5" => "socks".into(),
        "https" | "http2" => "http".into(),
        _ => token,
    }
}

/// Decode statistics for one block of share-link text.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecodeReport {
    pub nodes: Vec<Node>,
    /// Lines that looked like links but failed to decode.
    pub skipped: usize,
    /// Lines dropped because their protocol is excluded.
    pub excluded: usize,
}

impl DecodeReport {
    pub fn merge(&mut self, other: DecodeReport) {
        self.nodes.extend(other.nodes);
        self.skipped += other.skipped;
        self.excluded += other.excluded;
    }
}

/// Codec lookup by scheme, honoring a per-invocation exclusion set.
pub struct Registry {
    codecs: Vec<Box<dyn Codec>>,
    by_scheme: HashMap<&'static str, usize>,
    excluded: HashSet<String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("schemes", &self.by_scheme.keys().collect::<Vec<_>>())
            .field("excluded", &self.excluded)
            .finish()
    }
}

impl Registry {
    /// Registry with every built-in codec.
    pub fn new() -> Self {
        let mut reg = Self::empty();
        reg.register(Box::new(vmess::VmessCodec));
        reg.register(Box::new(vless::VlessCodec));
        reg.register(Box::new(trojan::TrojanCodec));
        reg.register(Box::new(shadowsocks::ShadowsocksCodec));
        reg.register(Box::new(shadowsocksr::ShadowsocksrCodec));
        reg.register(Box::new(tuic::TuicCodec));
        reg.register(Box::new(hysteria::HysteriaCodec));
        reg.register(Box::new(hysteria2::Hysteria2Codec));
        reg.register(Box::new(wireguard::WireguardCodec));
        reg.register(Box::new(http::HttpCodec));
        reg.register(Box::new(socks::SocksCodec));
        reg
    }

    pub fn empty() -> Self {
        Self {
            codecs: Vec::new(),
            by_scheme: HashMap::new(),
            excluded: HashSet::new(),
        }
    }

    /// Built-in registry with the given protocol tokens disabled.
    pub fn with_exclusions<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut reg = Self::new();
        for t in tokens {
            reg.exclude(t.as_ref());
        }
        reg
    }

    pub fn register(&mut self, codec: Box<dyn Codec>) {
        let idx = self.codecs.len();
        for scheme in codec.schemes() {
            self.by_scheme.insert(scheme, idx);
        }
        self.codecs.push(codec);
    }

    pub fn exclude(&mut self, token: &str) {
        let token = normalize_protocol(token);
        if !token.is_empty() {
            self.excluded.insert(token);
        }
    }

    pub fn is_excluded(&self, protocol: &str) -> bool {
        self.excluded.contains(&normalize_protocol(protocol))
    }

    /// Codec registered for the link's scheme, if any.
    pub fn lookup(&self, link: &str) -> Option<&dyn Codec> {
        let (scheme, _) = link.trim().split_once("://")?;
        let idx = self.by_scheme.get(scheme.to_ascii_lowercase().as_str())?;
        self.codecs.get(*idx).map(|c| &**c)
    }

    /// Decode one link. Excluded protocols yield `Unsupported`.
    pub fn decode_link(&self, link: &str) -> Result<Decoded> {
        let link = link.trim();
        let codec = self
            .lookup(link)
            .ok_or_else(|| SubsError::Unsupported(scheme_of(link).to_string()))?;
        if self.excluded.contains(codec.protocol()) {
            return Err(SubsError::Unsupported(format!(
                "{} (excluded)",
                codec.protocol()
            )));
        }
        let decoded = codec.decode(link)?;
        match self.excluded_kind(&decoded) {
            Some(kind) => Err(SubsError::Unsupported(format!("{kind} (excluded)"))),
            None => Ok(decoded),
        }
    }

    /// First excluded node type in a decode. A pair is dropped whole, since
    /// the primary detours through its companion.
    fn excluded_kind<'d>(&self, decoded: &'d Decoded) -> Option<&'d str> {
        let kinds = match decoded {
            Decoded::Single(n) => vec![n.kind.as_str()],
            Decoded::Pair(a, b) => vec![a.kind.as_str(), b.kind.as_str()],
        };
        kinds.into_iter().find(|k| self.is_excluded(k))
    }

    /// Decode every non-blank line. Failures are counted, not raised.
    pub fn decode_text(&self, text: &str) -> DecodeReport {
        let mut report = DecodeReport::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some(codec) = self.lookup(line) else {
                debug!(line = %truncate(line), "no codec for line");
                report.skipped += 1;
                continue;
            };
            if self.excluded.contains(codec.protocol()) {
                report.excluded += 1;
                continue;
            }
            match codec.decode(line) {
                Ok(decoded) if self.excluded_kind(&decoded).is_some() => report.excluded += 1,
                Ok(decoded) => report.nodes.extend(decoded.into_nodes()),
                Err(e) => {
                    debug!(protocol = codec.protocol(), error = %e, "skip share link");
                    report.skipped += 1;
                }
            }
        }
        report
    }
}

fn scheme_of(link: &str) -> &str {
    link.split_once("://").map_or(link, |(s, _)| s)
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(48) {
        Some((i, _)) => &line[..i],
        None => line,
    }
}

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Decode base64 text in either alphabet, padded or not, ignoring whitespace.
pub fn decode_base64(input: &str) -> Result<String> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(SubsError::parse("empty base64 payload"));
    }
    let bytes = STANDARD_LENIENT
        .decode(&cleaned)
        .or_else(|_| URL_SAFE_LENIENT.decode(&cleaned))
        .map_err(|e| SubsError::Parse(format!("base64: {e}")))?;
    String::from_utf8(bytes).map_err(|e| SubsError::Parse(format!("base64 utf-8: {e}")))
}

fn percent_decode(s: &str) -> String {
    urlencoding::decode(s).map_or_else(|_| s.to_string(), |c| c.into_owned())
}

/// Query parameters flattened to one value per key.
///
/// Later duplicates win; blank values are dropped.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Query(HashMap<String, String>);

impl Query {
    pub(crate) fn parse(raw: &str) -> Self {
        let mut map = HashMap::new();
        for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
            if v.trim().is_empty() {
                continue;
            }
            map.insert(k.into_owned(), v.into_owned());
        }
        Self(map)
    }

    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// First key present, in the order given.
    pub(crate) fn first(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    /// Truthiness of the first present key (`1`, `true`, `yes`).
    pub(crate) fn flag(&self, keys: &[&str]) -> Option<bool> {
        self.first(keys).map(is_truthy)
    }

    pub(crate) fn parse_num<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}

pub(crate) fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Comma list, tolerant of `{...}` wrapping and stray blanks.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `scheme://userinfo@host:port/path?query#fragment`, split the way share
/// links are written in the wild rather than per RFC 3986: the fragment is
/// cut at the first `#`, the query at the first `?`, so nested `?` inside a
/// query value survive.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ShareLink {
    pub scheme: String,
    pub userinfo: Option<String>,
    pub host: String,
    pub port_raw: String,
    pub path: String,
    pub query: Query,
    pub tag: String,
}

impl ShareLink {
    pub(crate) fn parse(link: &str) -> Result<Self> {
        let (scheme, rest) = link
            .trim()
            .split_once("://")
            .ok_or_else(|| SubsError::parse("missing scheme"))?;
        let (body, fragment) = rest.split_once('#').unwrap_or((rest, ""));
        let (pre, query) = body.split_once('?').unwrap_or((body, ""));
        let (netloc, path) = match pre.find('/') {
            Some(i) => (&pre[..i], &pre[i..]),
            None => (pre, ""),
        };
        let (userinfo, hostport) = match netloc.rsplit_once('@') {
            Some((u, h)) => (Some(percent_decode(u)), h),
            None => (None, netloc),
        };
        let (host, port_raw) = split_host_port(hostport);
        if host.is_empty() {
            return Err(SubsError::parse("missing host"));
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            userinfo,
            host: host.to_string(),
            port_raw: port_raw.to_string(),
            path: path.to_string(),
            query: Query::parse(query),
            tag: percent_decode(fragment).trim().to_string(),
        })
    }

    pub(crate) fn port(&self) -> Result<u16> {
        parse_port(&self.port_raw)
    }

    /// Non-empty userinfo or a parse error naming `what`.
    pub(crate) fn require_user(&self, what: &str) -> Result<&str> {
        self.userinfo
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SubsError::Parse(format!("missing {what}")))
    }
}

/// Split `host:port`, stripping IPv6 brackets. Port is empty when absent.
pub(crate) fn split_host_port(hostport: &str) -> (&str, &str) {
    if let Some(inner) = hostport.strip_prefix('[') {
        if let Some((host, tail)) = inner.split_once(']') {
            return (host, tail.strip_prefix(':').unwrap_or(""));
        }
    }
    match hostport.rsplit_once(':') {
        Some((h, p)) => (h, p),
        None => (hostport, ""),
    }
}

pub(crate) fn parse_port(raw: &str) -> Result<u16> {
    match raw.trim().parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(SubsError::Parse(format!("invalid port {raw:?}"))),
    }
}
