use serde::Deserialize;

use super::{decode_base64, parse_port, percent_decode, split_host_port, Codec, Decoded, Query};
use crate::model::{Node, Result, SubsError, Tls, Utls};

/// Shadowsocks links: SIP002 (`ss://b64(method:pass)@host:port`), the plain
/// userinfo variant used by 2022 ciphers, and the legacy whole-body base64
/// form. A `shadow-tls` parameter chains the node through a ShadowTLS
/// companion.
pub(super) struct ShadowsocksCodec;

/// Suffix of the companion tag produced for `shadow-tls` links.
pub const SHADOWTLS_SUFFIX: &str = "_shadowtls";

#[derive(Debug, Deserialize)]
struct ShadowTlsParam {
    host: String,
    password: String,
    #[serde(default)]
    version: Option<serde_json::Value>,
}

fn credentials(userinfo: &str) -> Result<(String, String)> {
    let userinfo = percent_decode(userinfo);
    let plain = if userinfo.contains(':') {
        userinfo
    } else {
        decode_base64(&userinfo)?
    };
    let (method, password) = plain
        .split_once(':')
        .ok_or_else(|| SubsError::parse("ss: missing method"))?;
    Ok((method.to_string(), password.to_string()))
}

impl Codec for ShadowsocksCodec {
    fn protocol(&self) -> &'static str {
        "ss"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["ss"]
    }

    fn decode(&self, link: &str) -> Result<Decoded> {
        let rest = link
            .trim()
            .strip_prefix("ss://")
            .ok_or_else(|| SubsError::parse("not an ss link"))?;
        let (body, fragment) = rest.split_once('#').unwrap_or((rest, ""));
        let (main, query) = body.split_once('?').unwrap_or((body, ""));

        let decoded_body;
        let main = if main.contains('@') {
            main
        } else {
            decoded_body = decode_base64(main)?;
            decoded_body.as_str()
        };
        let (userinfo, hostport) = main
            .rsplit_once('@')
            .ok_or_else(|| SubsError::parse("ss: missing host"))?;
        let (method, password) = credentials(userinfo)?;
        let (host, port) = split_host_port(hostport.trim_end_matches('/'));
        let q = Query::parse(query);

        let mut node = Node::new(
            "shadowsocks",
            percent_decode(fragment).trim(),
            host,
            parse_port(port)?,
        );
        node.set("method", method);
        node.set("password", password);
        if let Some(plugin) = q.get("plugin") {
            let (name, opts) = plugin.split_once(';').unwrap_or((plugin, ""));
            let name = if name == "simple-obfs" { "obfs-local" } else { name };
            node.set("plugin", name);
            node.set_opt("plugin_opts", Some(opts));
        }

        match q.get("shadow-tls") {
            Some(raw) => {
                let companion = shadowtls_companion(&node, raw)?;
                node.detour = Some(companion.tag.clone());
                Ok(Decoded::Pair(node, companion))
            }
            None => Ok(Decoded::Single(node)),
        }
    }
}

fn shadowtls_companion(ss: &Node, raw: &str) -> Result<Node> {
    // form decoding turns a literal '+' into a space
    let raw = raw.replace(' ', "+");
    let param: ShadowTlsParam = serde_json::from_str(&decode_base64(&raw)?)
        .map_err(|e| SubsError::Parse(format!("shadow-tls param: {e}")))?;
    let version = match param.version {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .unwrap_or(3);

    let tag = format!("{}{SHADOWTLS_SUFFIX}", ss.tag);
    let mut node = Node::new("shadowtls", tag, ss.server.as_str(), ss.server_port);
    node.set("version", version);
    node.set("password", param.password);
    let mut tls = Tls::enabled();
    tls.server_name = Some(param.host);
    tls.utls = Some(Utls::fingerprint("chrome"));
    node.tls = Some(tls);
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use base64::Engine;

    fn single(link: &str) -> Node {
        match ShadowsocksCodec.decode(link).unwrap() {
            Decoded::Single(n) => n,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sip002_with_plugin() {
        let user = URL_SAFE_NO_PAD.encode("aes-256-gcm:secret");
        let n = single(&format!(
            "ss://{user}@s.example:8388/?plugin=simple-obfs%3Bobfs%3Dhttp%3Bobfs-host%3Dbing.com#HK%20A"
        ));
        assert_eq!(n.kind, "shadowsocks");
        assert_eq!(n.tag, "HK A");
        assert_eq!(n.setting_str("method"), Some("aes-256-gcm"));
        assert_eq!(n.setting_str("password"), Some("secret"));
        assert_eq!(n.setting_str("plugin"), Some("obfs-local"));
        assert_eq!(n.setting_str("plugin_opts"), Some("obfs=http;obfs-host=bing.com"));
    }

    #[test]
    fn plain_userinfo_and_legacy_forms() {
        let n = single("ss://2022-blake3-aes-128-gcm:a%2Bb%3D@[::1]:443#x");
        assert_eq!(n.setting_str("password"), Some("a+b="));
        assert_eq!(n.server, "::1");

        let legacy = STANDARD.encode("chacha20-ietf-poly1305:pw@l.example:8000");
        let n = single(&format!("ss://{legacy}#legacy"));
        assert_eq!(n.server, "l.example");
        assert_eq!(n.server_port, 8000);
        assert_eq!(n.setting_str("method"), Some("chacha20-ietf-poly1305"));
    }

    #[test]
    fn shadow_tls_yields_pair() {
        let user = STANDARD.encode("2022-blake3-aes-128-gcm:k");
        let stls = STANDARD.encode(r#"{"host":"www.apple.com","password":"p","version":"3"}"#);
        let link = format!("ss://{user}@s.example:443?shadow-tls={stls}#edge");
        let Decoded::Pair(ss, companion) = ShadowsocksCodec.decode(&link).unwrap() else {
            panic!("expected pair")
        };
        assert_eq!(companion.tag, "edge_shadowtls");
        assert_eq!(companion.kind, "shadowtls");
        assert_eq!(ss.detour.as_deref(), Some("edge_shadowtls"));
        assert_eq!(companion.settings.get("version"), Some(&serde_json::json!(3)));
        assert_eq!(
            companion.tls.unwrap().server_name.as_deref(),
            Some("www.apple.com")
        );
    }
}
