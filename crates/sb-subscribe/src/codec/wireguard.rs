use serde_json::Value;

use super::{split_list, Codec, Decoded, ShareLink};
use crate::model::{Node, Result};

/// `wireguard://<private key>@<host>:<port>?publickey=..&address=..&reserved=..&mtu=..#tag`
/// (`wg://` is the short alias). Emitted as a legacy wireguard outbound; the
/// assembler later moves it under `endpoints`.
pub(super) struct WireguardCodec;

impl Codec for WireguardCodec {
    fn protocol(&self) -> &'static str {
        "wireguard"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["wireguard", "wg"]
    }

    fn decode(&self, link: &str) -> Result<Decoded> {
        let l = ShareLink::parse(link)?;
        let private_key = l.require_user("private key")?;
        let q = &l.query;

        let mut node = Node::new("wireguard", l.tag.as_str(), l.host.as_str(), l.port()?);
        let address = q.first(&["address", "ip"]).map(split_list).unwrap_or_default();
        if !address.is_empty() {
            node.set("local_address", address);
        }
        node.set("private_key", private_key);
        node.set_opt("peer_public_key", q.first(&["publickey", "publicKey", "public_key"]));
        node.set_opt("pre_shared_key", q.first(&["presharedkey", "preSharedKey"]));
        if let Some(reserved) = q.get("reserved") {
            let bytes: Vec<Value> = split_list(reserved)
                .iter()
                .filter_map(|b| b.parse::<u8>().ok())
                .map(Value::from)
                .collect();
            if !bytes.is_empty() {
                node.set("reserved", bytes);
            }
        }
        if let Some(mtu) = q.parse_num::<u32>("mtu") {
            node.set("mtu", mtu);
        }
        Ok(Decoded::Single(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_peer_fields() {
        let Decoded::Single(n) = WireguardCodec
            .decode("wg://cHJpdg%3D%3D@w.example:51820?publickey=cHVi&address=172.16.0.2/32,fd01::2/128&reserved=1,2,3&mtu=1280#warp")
            .unwrap()
        else {
            panic!("pair")
        };
        assert_eq!(n.kind, "wireguard");
        assert_eq!(n.setting_str("private_key"), Some("cHJpdg=="));
        assert_eq!(n.setting_str("peer_public_key"), Some("cHVi"));
        assert_eq!(n.settings["local_address"], json!(["172.16.0.2/32", "fd01::2/128"]));
        assert_eq!(n.settings["reserved"], json!([1, 2, 3]));
        assert_eq!(n.settings["mtu"], json!(1280));
    }
}
