use super::{split_list, Codec, Decoded, ShareLink};
use crate::model::{Node, Result, Tls};

/// `tuic://<uuid>:<password>@<host>:<port>?<params>#<tag>`
pub(super) struct TuicCodec;

impl Codec for TuicCodec {
    fn protocol(&self) -> &'static str {
        "tuic"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["tuic"]
    }

    fn decode(&self, link: &str) -> Result<Decoded> {
        let l = ShareLink::parse(link)?;
        let userinfo = l.require_user("uuid")?;
        let q = &l.query;
        let (uuid, password) = match userinfo.split_once(':') {
            Some((u, p)) => (u, p),
            None => (userinfo, q.get("password").unwrap_or_default()),
        };

        let mut node = Node::new("tuic", l.tag.as_str(), l.host.as_str(), l.port()?);
        node.set("uuid", uuid.trim());
        node.set("password", password.trim());
        node.set(
            "congestion_control",
            q.get("congestion_control").unwrap_or("bbr"),
        );
        node.set_opt("udp_relay_mode", q.get("udp_relay_mode"));
        node.set("zero_rtt_handshake", false);
        node.set("heartbeat", "10s");

        let mut tls = Tls::enabled();
        tls.alpn = split_list(q.get("alpn").unwrap_or("h3"));
        if q.get("disable_sni") != Some("1") {
            tls.server_name = q.get("sni").map(String::from);
        }
        if q.get("allow_insecure") == Some("1") {
            tls.insecure = Some(true);
        }
        node.tls = Some(tls);
        Ok(Decoded::Single(node))
    }
}
