use super::{decode_base64, parse_port, Codec, Decoded, Query};
use crate::model::{Node, Result, SubsError};

/// `ssr://b64(host:port:protocol:method:obfs:b64(password)/?obfsparam=..&protoparam=..&remarks=..)`
pub(super) struct ShadowsocksrCodec;

/// Parameters inside the SSR body are themselves url-safe base64.
fn b64_param(q: &Query, key: &str) -> Option<String> {
    q.get(key)
        .map(|v| v.replace(' ', "+"))
        .and_then(|v| decode_base64(&v).ok())
        .filter(|v| !v.is_empty())
}

impl Codec for ShadowsocksrCodec {
    fn protocol(&self) -> &'static str {
        "ssr"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["ssr"]
    }

    fn decode(&self, link: &str) -> Result<Decoded> {
        let payload = link
            .trim()
            .strip_prefix("ssr://")
            .ok_or_else(|| SubsError::parse("not an ssr link"))?;
        let body = decode_base64(payload)?;
        let (main, query) = body.split_once("/?").unwrap_or((body.as_str(), ""));
        let main = main.trim_end_matches('/');

        // host may itself contain ':' (IPv6), so peel fields off the right
        let mut parts = main.rsplitn(6, ':');
        let (Some(password), Some(obfs), Some(method), Some(protocol), Some(port), Some(host)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(SubsError::parse("ssr: expected six fields"));
        };

        let q = Query::parse(query);
        let tag = b64_param(&q, "remarks").unwrap_or_default();
        let host = host.trim_start_matches('[').trim_end_matches(']');

        let mut node = Node::new("shadowsocksr", tag, host, parse_port(port)?);
        node.set("method", method);
        node.set("password", decode_base64(password)?);
        node.set("obfs", obfs);
        if let Some(p) = b64_param(&q, "obfsparam") {
            node.set("obfs_param", p);
        }
        node.set("protocol", protocol);
        if let Some(p) = b64_param(&q, "protoparam") {
            node.set("protocol_param", p);
        }
        Ok(Decoded::Single(node))
    }
}
