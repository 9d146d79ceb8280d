use super::{stream, Codec, Decoded, ShareLink};
use crate::model::{Node, Result};

/// `vless://<uuid>@<host>:<port>?<params>#<tag>`
pub(super) struct VlessCodec;

impl Codec for VlessCodec {
    fn protocol(&self) -> &'static str {
        "vless"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["vless"]
    }

    fn decode(&self, link: &str) -> Result<Decoded> {
        let l = ShareLink::parse(link)?;
        let uuid = l.require_user("uuid")?;
        let q = &l.query;

        let mut node = Node::new("vless", l.tag.as_str(), l.host.as_str(), l.port()?);
        node.set("uuid", uuid);
        node.set("packet_encoding", q.get("packetEncoding").unwrap_or("xudp"));
        node.set_opt("flow", q.get("flow"));
        node.tls = stream::tls(q, q.get("security").unwrap_or_default())?;
        node.transport = stream::transport(q);
        node.multiplex = stream::multiplex(q);
        Ok(Decoded::Single(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransportKind;

    const REALITY_WS: &str = "vless://311f32f9-ab81-4ef0-80f8-7e7730ec4b54@111.250.125.24:8443?security=reality&flow=xtls-rprx-vision&sni=www.python.org&client-fingerprint=chrome&pbk=SbVKOEMjK0sIlbwg4akyBg5mL5KZwwB-ed4eEE7YnRc&sid=04d59340&type=ws&path=/ray?ed=2048#node1";

    fn decode(link: &str) -> Node {
        match VlessCodec.decode(link).unwrap() {
            Decoded::Single(n) => n,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reality_over_websocket() {
        let n = decode(REALITY_WS);
        assert_eq!(n.kind, "vless");
        assert_eq!(n.tag, "node1");
        assert_eq!(n.server, "111.250.125.24");
        assert_eq!(n.server_port, 8443);
        assert_eq!(n.setting_str("flow"), Some("xtls-rprx-vision"));
        assert_eq!(n.setting_str("packet_encoding"), Some("xudp"));

        let tls = n.tls.unwrap();
        assert!(tls.enabled);
        assert_eq!(tls.server_name.as_deref(), Some("www.python.org"));
        assert_eq!(tls.utls.unwrap().fingerprint, "chrome");
        let reality = tls.reality.unwrap();
        assert!(reality.enabled);
        assert_eq!(reality.short_id.as_deref(), Some("04d59340"));

        let t = n.transport.unwrap();
        assert_eq!(t.kind, TransportKind::WebSocket);
        assert_eq!(t.path.as_deref(), Some("/ray"));
        assert_eq!(t.max_early_data, Some(2048));
        assert_eq!(t.headers.get("Host").and_then(|v| v.as_str()), Some("www.python.org"));
    }

    #[test]
    fn tls_presence_follows_security() {
        for (security, expect) in [("", false), ("none", false), ("tls", true), ("xtls", true)] {
            let link = format!("vless://u@h.example:443?security={security}#x");
            assert_eq!(decode(&link).tls.is_some(), expect, "security={security:?}");
        }
        assert!(decode("vless://u@h.example:443#x").tls.is_none());
    }

    #[test]
    fn missing_uuid_or_port_fails() {
        assert!(VlessCodec.decode("vless://h.example:443").is_err());
        assert!(VlessCodec.decode("vless://u@h.example").is_err());
        assert!(VlessCodec.decode("vless://u@h.example:443?security=reality").is_err());
    }
}
