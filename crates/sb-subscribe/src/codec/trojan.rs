use super::{stream, Codec, Decoded, ShareLink};
use crate::model::{Node, Result};

/// `trojan://<password>@<host>:<port>?<params>#<tag>`; TLS unless `security=none`.
pub(super) struct TrojanCodec;

impl Codec for TrojanCodec {
    fn protocol(&self) -> &'static str {
        "trojan"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["trojan"]
    }

    fn decode(&self, link: &str) -> Result<Decoded> {
        let l = ShareLink::parse(link)?;
        let password = l.require_user("password")?;
        let q = &l.query;

        let mut node = Node::new("trojan", l.tag.as_str(), l.host.as_str(), l.port()?);
        node.set("password", password);
        let security = q.get("security").unwrap_or("tls");
        node.tls = stream::tls(q, security)?;
        if let Some(tls) = node.tls.as_mut() {
            if tls.server_name.is_none() {
                tls.server_name = q.get("peer").map(String::from);
            }
        }
        node.transport = stream::transport(q);
        node.multiplex = stream::multiplex(q);
        Ok(Decoded::Single(node))
    }
}
