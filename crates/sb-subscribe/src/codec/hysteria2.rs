use serde_json::json;

use super::{parse_port, split_list, Codec, Decoded, ShareLink};
use crate::model::{Node, Result, Tls};

/// `hysteria2://<auth>@<host>:<port>[,<hop ports>]?sni=..&obfs=salamander&obfs-password=..#tag`
/// (`hy2://` is the short alias).
pub(super) struct Hysteria2Codec;

impl Codec for Hysteria2Codec {
    fn protocol(&self) -> &'static str {
        "hysteria2"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["hysteria2", "hy2"]
    }

    fn decode(&self, link: &str) -> Result<Decoded> {
        let l = ShareLink::parse(link)?;
        let q = &l.query;

        // `443,20000-30000` style port hopping
        let (port, hop) = l
            .port_raw
            .split_once(',')
            .unwrap_or((l.port_raw.as_str(), ""));
        let mut hops: Vec<String> = hop
            .split(',')
            .chain(q.get("mport").into_iter().flat_map(|m| m.split(',')))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.replace('-', ":"))
            .collect();
        hops.dedup();

        let mut node = Node::new("hysteria2", l.tag.as_str(), l.host.as_str(), parse_port(port)?);
        if !hops.is_empty() {
            node.set("server_ports", hops);
        }
        node.set_opt("password", l.userinfo.as_deref().or(q.get("auth")));
        if let Some(up) = q.parse_num::<u64>("upmbps") {
            node.set("up_mbps", up);
        }
        if let Some(down) = q.parse_num::<u64>("downmbps") {
            node.set("down_mbps", down);
        }
        if let Some(kind) = q.get("obfs") {
            node.set(
                "obfs",
                json!({
                    "type": kind,
                    "password": q.get("obfs-password").unwrap_or_default(),
                }),
            );
        }

        let mut tls = Tls::enabled();
        tls.server_name = q.first(&["sni", "peer"]).map(String::from);
        tls.insecure = q.flag(&["insecure", "allowInsecure"]);
        tls.alpn = split_list(q.get("alpn").unwrap_or("h3"));
        node.tls = Some(tls);
        Ok(Decoded::Single(node))
    }
}
