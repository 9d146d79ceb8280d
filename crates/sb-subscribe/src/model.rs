//! Canonical node record and the typed sub-objects shared by every codec.
//! 所有协议解析器共享的规范节点记录及其子对象。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubsError {
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl SubsError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

pub type Result<T, E = SubsError> = std::result::Result<T, E>;

fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// One proxy endpoint in sing-box outbound shape.
///
/// Protocol-specific fields (uuid, password, method, ...) live in `settings`
/// and are flattened into the outbound object on output. `tag` and `detour`
/// are the only fields mutated after decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub server_port: u16,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Tls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplex: Option<Multiplex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detour: Option<String>,
}

impl Node {
    pub fn new(kind: &str, tag: impl Into<String>, server: impl Into<String>, port: u16) -> Self {
        let server = server.into();
        let mut tag = tag.into();
        if tag.trim().is_empty() {
            tag = format!("{kind}-{server}:{port}");
        }
        Self {
            tag,
            kind: kind.to_string(),
            server,
            server_port: port,
            settings: Map::new(),
            tls: None,
            transport: None,
            multiplex: None,
            detour: None,
        }
    }

    /// Set a protocol-specific field, keeping insertion order.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    /// Set a string field only when the value is non-empty.
    pub fn set_opt(&mut self, key: &str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            self.settings.insert(key.to_string(), Value::String(v.to_string()));
        }
        self
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Outbound TLS block (`tls` in sing-box).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tls {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(
        default,
        deserialize_with = "crate::de::string_or_list::deserialize",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub alpn: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utls: Option<Utls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality: Option<Reality>,
    /// Fields this crate never produces but must carry through (ech, certificate, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tls {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utls {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub fingerprint: String,
}

impl Utls {
    pub fn fingerprint(fp: &str) -> Self {
        Self {
            enabled: true,
            fingerprint: fp.to_string(),
        }
    }
}

/// REALITY camouflage parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reality {
    #[serde(default)]
    pub enabled: bool,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "ws")]
    WebSocket,
    #[serde(rename = "grpc")]
    Grpc,
    #[serde(rename = "httpupgrade")]
    HttpUpgrade,
    #[serde(rename = "quic")]
    Quic,
}

/// V2Ray transport (`transport` in sing-box).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transport {
    #[serde(rename = "type")]
    pub kind: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_early_data: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_data_header_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Header that carries WebSocket early data.
pub const EARLY_DATA_HEADER: &str = "Sec-WebSocket-Protocol";

impl Transport {
    fn of(kind: TransportKind) -> Self {
        Self {
            kind,
            host: None,
            path: None,
            headers: Map::new(),
            service_name: None,
            max_early_data: None,
            early_data_header_name: None,
            extra: Map::new(),
        }
    }

    pub fn http() -> Self {
        Self::of(TransportKind::Http)
    }

    pub fn quic() -> Self {
        Self::of(TransportKind::Quic)
    }

    pub fn grpc(service_name: &str) -> Self {
        let mut t = Self::of(TransportKind::Grpc);
        t.service_name = Some(service_name.to_string());
        t
    }

    /// WebSocket transport. A `?ed=<n>` suffix on `raw_path` is stripped and
    /// turned into early-data settings.
    pub fn websocket(raw_path: &str, host: Option<&str>) -> Self {
        let mut t = Self::of(TransportKind::WebSocket);
        let path = raw_path.rsplit_once('?').map_or(raw_path, |(p, _)| p);
        t.path = Some(path.to_string());
        if let Some(h) = host.filter(|h| !h.is_empty()) {
            t.headers.insert("Host".into(), Value::String(h.to_string()));
        }
        if let Some((_, ed)) = raw_path.rsplit_once("?ed=") {
            if let Ok(limit) = ed.parse::<u32>() {
                t.max_early_data = Some(limit);
                t.early_data_header_name = Some(EARLY_DATA_HEADER.to_string());
            }
        }
        t
    }

    pub fn http_upgrade(path: &str, host: Option<&str>) -> Self {
        let mut t = Self::of(TransportKind::HttpUpgrade);
        t.path = Some(path.to_string());
        t.host = host
            .filter(|h| !h.is_empty())
            .map(|h| Value::String(h.to_string()));
        t
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multiplex {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_streams: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_streams: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub padding: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Subgroup marker appended to composite group keys.
pub const SUBGROUP_SUFFIX: &str = "-subgroup";

/// Named node buckets in subscription processing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Groups {
    entries: Vec<(String, Vec<Node>)>,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append nodes under `key`, creating the group at the end if it is new.
    pub fn extend(&mut self, key: &str, nodes: Vec<Node>) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => existing.extend(nodes),
            None => self.entries.push((key.to_string(), nodes)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[Node]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Node])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Vec<Node>)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).sum()
    }

    /// All nodes across groups, in group then node order.
    pub fn flatten(&self) -> Vec<Node> {
        self.entries
            .iter()
            .flat_map(|(_, v)| v.iter().cloned())
            .collect()
    }
}

/// Whether a group key carries the subgroup marker.
pub fn is_subgroup_key(key: &str) -> bool {
    key.ends_with(SUBGROUP_SUFFIX)
}

/// Short display name of a subgroup key: `tag-label-subgroup` → `label`.
pub fn subgroup_label(key: &str) -> &str {
    let head = key.rsplit_once('-').map_or(key, |(h, _)| h);
    head.rsplit_once('-').map_or(head, |(_, l)| l)
}
