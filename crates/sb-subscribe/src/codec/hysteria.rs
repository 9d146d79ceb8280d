use super::{split_list, Codec, Decoded, ShareLink};
use crate::model::{Node, Result, Tls};

/// Hysteria v1: `hysteria://<host>:<port>?auth=..&peer=..&upmbps=..&downmbps=..#tag`
pub(super) struct HysteriaCodec;

impl Codec for HysteriaCodec {
    fn protocol(&self) -> &'static str {
        "hysteria"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["hysteria"]
    }

    fn decode(&self, link: &str) -> Result<Decoded> {
        let l = ShareLink::parse(link)?;
        let q = &l.query;

        let mut node = Node::new("hysteria", l.tag.as_str(), l.host.as_str(), l.port()?);
        // bandwidth is omitted rather than guessed when the link leaves it out
        if let Some(up) = q.parse_num::<u64>("upmbps") {
            node.set("up_mbps", up);
        }
        if let Some(down) = q.parse_num::<u64>("downmbps") {
            node.set("down_mbps", down);
        }
        node.set_opt("auth_str", q.first(&["auth", "auth_str"]));
        node.set_opt("obfs", q.first(&["obfsParam", "obfs-password"]));

        let mut tls = Tls::enabled();
        tls.server_name = q.first(&["peer", "sni"]).map(String::from);
        tls.insecure = q.flag(&["insecure", "allowInsecure"]);
        tls.alpn = split_list(q.get("alpn").unwrap_or("hysteria"));
        node.tls = Some(tls);
        Ok(Decoded::Single(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_bandwidth_and_obfs() {
        let Decoded::Single(n) = HysteriaCodec
            .decode("hysteria://h.example:36712?protocol=udp&auth=tok&peer=p.example&insecure=1&upmbps=50&downmbps=200&obfsParam=xp#h1")
            .unwrap()
        else {
            panic!("pair")
        };
        assert_eq!(n.settings.get("up_mbps"), Some(&json!(50)));
        assert_eq!(n.settings.get("down_mbps"), Some(&json!(200)));
        assert_eq!(n.setting_str("auth_str"), Some("tok"));
        assert_eq!(n.setting_str("obfs"), Some("xp"));
        let tls = n.tls.unwrap();
        assert_eq!(tls.server_name.as_deref(), Some("p.example"));
        assert_eq!(tls.insecure, Some(true));
        assert_eq!(tls.alpn, vec!["hysteria"]);
    }

    #[test]
    fn bandwidth_optional() {
        let Decoded::Single(n) = HysteriaCodec.decode("hysteria://h.example:443").unwrap() else {
            panic!("pair")
        };
        assert!(n.settings.get("up_mbps").is_none());
        assert!(n.settings.get("down_mbps").is_none());
    }
}
