use super::{Codec, Decoded, ShareLink};
use crate::model::{Node, Result, Tls};

/// HTTP CONNECT proxies. `https://` and `http2://` turn TLS on.
pub(super) struct HttpCodec;

impl Codec for HttpCodec {
    fn protocol(&self) -> &'static str {
        "http"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["http", "https", "http2"]
    }

    fn decode(&self, link: &str) -> Result<Decoded> {
        let l = ShareLink::parse(link)?;
        let mut node = Node::new("http", l.tag.as_str(), l.host.as_str(), l.port()?);
        if let Some(userinfo) = l.userinfo.as_deref().filter(|u| !u.is_empty()) {
            let (user, pass) = userinfo.split_once(':').unwrap_or((userinfo, ""));
            node.set("username", user);
            node.set_opt("password", Some(pass));
        }
        if l.scheme != "http" {
            let mut tls = Tls::enabled();
            tls.server_name = l.query.get("sni").map(String::from);
            tls.insecure = l.query.flag(&["insecure", "allowInsecure"]);
            node.tls = Some(tls);
        }
        Ok(Decoded::Single(node))
    }
}
