//! TLS / transport / multiplex blocks shared by the V2Ray-family links
//! (vless, trojan).

use super::Query;
use crate::model::{Multiplex, Reality, Result, SubsError, Tls, Transport, Utls};

const FINGERPRINT_KEYS: &[&str] = &["fp", "client-fingerprint", "fingerprint"];

/// Build the TLS block for `security`. `none` and empty mean plaintext.
pub(super) fn tls(q: &Query, security: &str) -> Result<Option<Tls>> {
    if security.is_empty() || security == "none" {
        return Ok(None);
    }
    let mut tls = Tls::enabled();
    tls.insecure = Some(q.flag(&["allowInsecure", "insecure"]).unwrap_or(true));
    tls.server_name = q
        .first(&["sni", "host"])
        .filter(|s| *s != "none")
        .map(String::from);
    tls.utls = q.first(FINGERPRINT_KEYS).map(Utls::fingerprint);
    if let Some(alpn) = q.get("alpn") {
        tls.alpn = super::split_list(alpn);
    }
    if security == "reality" {
        let public_key = q
            .get("pbk")
            .ok_or_else(|| SubsError::parse("reality without public key"))?;
        tls.reality = Some(Reality {
            enabled: true,
            public_key: public_key.to_string(),
            short_id: q.get("sid").map(String::from),
        });
    }
    Ok(Some(tls))
}

/// Transport from the `type` parameter. Plain tcp yields `None`.
pub(super) fn transport(q: &Query) -> Option<Transport> {
    match q.get("type")? {
        "http" | "h2" => Some(Transport::http()),
        "ws" => {
            let path = q.get("path").unwrap_or_default();
            Some(Transport::websocket(path, q.first(&["sni", "host"])))
        }
        "grpc" => Some(Transport::grpc(q.get("serviceName").unwrap_or_default())),
        "httpupgrade" => Some(Transport::http_upgrade(
            q.get("path").unwrap_or("/"),
            q.get("host"),
        )),
        "quic" => Some(Transport::quic()),
        _ => None,
    }
}

/// Multiplex block, present only when a `protocol` parameter is given.
pub(super) fn multiplex(q: &Query) -> Option<Multiplex> {
    let protocol = q.get("protocol")?;
    Some(Multiplex {
        enabled: true,
        protocol: protocol.to_string(),
        max_connections: q.parse_num("max_connections"),
        min_streams: q.parse_num("min_streams"),
        max_streams: q.parse_num("max_streams"),
        padding: q.flag(&["padding"]).unwrap_or(false),
        extra: Default::default(),
    })
}
