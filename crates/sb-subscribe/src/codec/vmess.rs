use serde_json::Value;

use super::{decode_base64, is_truthy, parse_port, split_list, Codec, Decoded};
use crate::model::{Node, Result, SubsError, Tls, Transport, Utls};

/// `vmess://<base64 JSON>` in the v2rayN layout.
pub(super) struct VmessCodec;

/// String view of a JSON field that may be written as a string or a number.
fn field(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Codec for VmessCodec {
    fn protocol(&self) -> &'static str {
        "vmess"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["vmess"]
    }

    fn decode(&self, link: &str) -> Result<Decoded> {
        let payload = link
            .trim()
            .strip_prefix("vmess://")
            .ok_or_else(|| SubsError::parse("not a vmess link"))?;
        let payload = payload.split('#').next().unwrap_or_default();
        let obj: Value = serde_json::from_str(&decode_base64(payload)?)
            .map_err(|e| SubsError::Parse(format!("vmess json: {e}")))?;

        let server = field(&obj, "add").ok_or_else(|| SubsError::parse("vmess: missing add"))?;
        let port = parse_port(&field(&obj, "port").unwrap_or_default())?;
        let uuid = field(&obj, "id").ok_or_else(|| SubsError::parse("vmess: missing id"))?;
        let tag = field(&obj, "ps").unwrap_or_default();

        let mut node = Node::new("vmess", tag, server, port);
        node.set("uuid", uuid);
        node.set(
            "security",
            field(&obj, "scy").unwrap_or_else(|| "auto".into()),
        );
        let alter_id = field(&obj, "aid")
            .and_then(|a| a.parse::<u64>().ok())
            .unwrap_or(0);
        node.set("alter_id", alter_id);
        node.set("packet_encoding", "xudp");

        let host = field(&obj, "host");
        let path = field(&obj, "path");

        if field(&obj, "tls").as_deref() == Some("tls") {
            let mut tls = Tls::enabled();
            tls.insecure = Some(
                field(&obj, "allowInsecure")
                    .or_else(|| field(&obj, "skip-cert-verify"))
                    .map_or(true, |v| is_truthy(&v)),
            );
            tls.server_name = field(&obj, "sni").or_else(|| host.clone());
            tls.alpn = field(&obj, "alpn").map(|a| split_list(&a)).unwrap_or_default();
            tls.utls = field(&obj, "fp").map(|fp| Utls::fingerprint(&fp));
            node.tls = Some(tls);
        }

        let net = field(&obj, "net").unwrap_or_else(|| "tcp".into());
        node.transport = match net.as_str() {
            "ws" => Some(Transport::websocket(
                path.as_deref().unwrap_or("/"),
                host.as_deref(),
            )),
            "grpc" => Some(Transport::grpc(path.as_deref().unwrap_or_default())),
            "h2" | "http" => Some(http_transport(host.as_deref(), path)),
            "httpupgrade" => Some(Transport::http_upgrade(
                path.as_deref().unwrap_or("/"),
                host.as_deref(),
            )),
            "quic" => Some(Transport::quic()),
            "tcp" if field(&obj, "type").as_deref() == Some("http") => {
                Some(http_transport(host.as_deref(), path))
            }
            _ => None,
        };
        Ok(Decoded::Single(node))
    }
}

fn http_transport(host: Option<&str>, path: Option<String>) -> Transport {
    let mut t = Transport::http();
    if let Some(h) = host {
        t.host = Some(Value::from(split_list(h)));
    }
    t.path = path;
    t
}
