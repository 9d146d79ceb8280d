//! Clash `proxies:` documents.
//! 把 Clash 代理列表的每一项转成等价的分享链接，再交给 codec 解析。

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;
use url::form_urlencoded::Serializer;

use crate::model::SubsError;

#[derive(Deserialize)]
struct ClashDoc {
    #[serde(default)]
    proxies: Vec<Value>,
}

/// Parse a proxy-list document and return its raw entries.
pub fn parse_proxies(yaml: &str) -> Result<Vec<Value>, SubsError> {
    let doc: ClashDoc = serde_yaml::from_str(yaml).map_err(|e| SubsError::Parse(e.to_string()))?;
    Ok(doc.proxies)
}

/// Bridge every supported entry to a share link; unsupported ones are dropped.
pub fn share_links(yaml: &str) -> Result<Vec<String>, SubsError> {
    Ok(parse_proxies(yaml)?
        .iter()
        .filter_map(|p| {
            let link = to_share_link(p);
            if link.is_none() {
                debug!(
                    name = %text(p, "name").unwrap_or_default(),
                    kind = %text(p, "type").unwrap_or_default(),
                    "clash proxy not bridged"
                );
            }
            link
        })
        .collect())
}

/// Scalar field as text; numbers and booleans are stringified.
fn text(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn flag(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.as_str(), "true" | "1"),
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

/// Sequence (or comma string) field joined by commas.
fn list(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::Sequence(items) => {
            let joined = items
                .iter()
                .filter_map(|i| match i {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(",");
            (!joined.is_empty()).then_some(joined)
        }
        _ => text(v, key),
    }
}

/// Nested `<section>.<key>` lookup, e.g. `ws-opts.path`.
fn nested<'a>(v: &'a Value, section: &str, key: &str) -> Option<&'a Value> {
    v.get(section)?.get(key)
}

fn host_port(server: &str, port: &str) -> String {
    if server.contains(':') && !server.starts_with('[') {
        format!("[{server}]:{port}")
    } else {
        format!("{server}:{port}")
    }
}

/// `<scheme>://[<user>@]<host>:<port>?<query>#<name>`
struct LinkBuilder {
    scheme: &'static str,
    user: Option<String>,
    authority: String,
    query: Serializer<'static, String>,
    name: String,
}

impl LinkBuilder {
    fn new(scheme: &'static str, proxy: &Value) -> Option<Self> {
        let server = text(proxy, "server")?;
        let port = text(proxy, "port")?;
        Some(Self {
            scheme,
            user: None,
            authority: host_port(&server, &port),
            query: Serializer::new(String::new()),
            name: text(proxy, "name").unwrap_or_default(),
        })
    }

    fn user(mut self, user: &str) -> Self {
        self.user = Some(urlencoding::encode(user).into_owned());
        self
    }

    fn raw_user(mut self, user: String) -> Self {
        self.user = Some(user);
        self
    }

    fn param(&mut self, key: &str, value: Option<impl AsRef<str>>) -> &mut Self {
        if let Some(v) = value {
            if !v.as_ref().is_empty() {
                self.query.append_pair(key, v.as_ref());
            }
        }
        self
    }

    fn build(mut self) -> String {
        let mut out = format!("{}://", self.scheme);
        if let Some(u) = &self.user {
            out.push_str(u);
            out.push('@');
        }
        out.push_str(&self.authority);
        let query = self.query.finish();
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query);
        }
        if !self.name.is_empty() {
            out.push('#');
            out.push_str(&urlencoding::encode(&self.name));
        }
        out
    }
}

/// Convert one Clash proxy entry to a share link.
pub fn to_share_link(proxy: &Value) -> Option<String> {
    let kind = text(proxy, "type")?.to_ascii_lowercase();
    match kind.as_str() {
        "ss" => shadowsocks(proxy),
        "ssr" => shadowsocksr(proxy),
        "vmess" => vmess(proxy),
        "vless" => vless(proxy),
        "trojan" => trojan(proxy),
        "hysteria" => hysteria(proxy),
        "hysteria2" | "hy2" => hysteria2(proxy),
        "tuic" => tuic(proxy),
        "wireguard" => wireguard(proxy),
        "http" => http(proxy),
        "socks5" => socks5(proxy),
        _ => None,
    }
}

fn shadowsocks(p: &Value) -> Option<String> {
    let cipher = text(p, "cipher")?;
    let password = text(p, "password")?;
    let creds = URL_SAFE_NO_PAD.encode(format!("{cipher}:{password}"));
    let mut b = LinkBuilder::new("ss", p)?.raw_user(creds);

    let plugin = text(p, "plugin").unwrap_or_default();
    let opts = |k: &str| nested(p, "plugin-opts", k);
    match plugin.as_str() {
        "obfs" | "obfs-local" | "simple-obfs" => {
            let mut s = format!("obfs-local;obfs={}", opts("mode").and_then(Value::as_str).unwrap_or("http"));
            if let Some(host) = opts("host").and_then(Value::as_str) {
                s.push_str(&format!(";obfs-host={host}"));
            }
            b.param("plugin", Some(s));
        }
        "v2ray-plugin" => {
            let mut s = format!("v2ray-plugin;mode={}", opts("mode").and_then(Value::as_str).unwrap_or("websocket"));
            if opts("tls").and_then(Value::as_bool).unwrap_or(false) {
                s.push_str(";tls");
            }
            if let Some(host) = opts("host").and_then(Value::as_str) {
                s.push_str(&format!(";host={host}"));
            }
            if let Some(path) = opts("path").and_then(Value::as_str) {
                s.push_str(&format!(";path={path}"));
            }
            b.param("plugin", Some(s));
        }
        "shadow-tls" => {
            let param = serde_json::json!({
                "host": opts("host").and_then(Value::as_str).unwrap_or_default(),
                "password": opts("password").and_then(Value::as_str).unwrap_or_default(),
                "version": opts("version").and_then(Value::as_u64).unwrap_or(3),
            });
            b.param("shadow-tls", Some(URL_SAFE_NO_PAD.encode(param.to_string())));
        }
        _ => {}
    }
    Some(b.build())
}

fn shadowsocksr(p: &Value) -> Option<String> {
    let enc = |s: &str| URL_SAFE_NO_PAD.encode(s);
    let server = text(p, "server")?;
    let body = format!(
        "{}:{}:{}:{}:{}:{}/?obfsparam={}&protoparam={}&remarks={}",
        server,
        text(p, "port")?,
        text(p, "protocol").unwrap_or_else(|| "origin".into()),
        text(p, "cipher")?,
        text(p, "obfs").unwrap_or_else(|| "plain".into()),
        enc(&text(p, "password")?),
        enc(&text(p, "obfs-param").unwrap_or_default()),
        enc(&text(p, "protocol-param").unwrap_or_default()),
        enc(&text(p, "name").unwrap_or_default()),
    );
    Some(format!("ssr://{}", enc(&body)))
}

fn vmess(p: &Value) -> Option<String> {
    let network = text(p, "network").unwrap_or_else(|| "tcp".into());
    let (host, path) = match network.as_str() {
        "ws" => (
            nested(p, "ws-opts", "headers")
                .and_then(|h| h.get("Host"))
                .and_then(Value::as_str),
            nested(p, "ws-opts", "path").and_then(Value::as_str),
        ),
        "grpc" => (
            None,
            nested(p, "grpc-opts", "grpc-service-name").and_then(Value::as_str),
        ),
        "h2" => (
            nested(p, "h2-opts", "host")
                .and_then(Value::as_sequence)
                .and_then(|s| s.first())
                .and_then(Value::as_str),
            nested(p, "h2-opts", "path").and_then(Value::as_str),
        ),
        _ => (None, None),
    };
    let (server, port, uuid) = (text(p, "server")?, text(p, "port")?, text(p, "uuid")?);
    let tls = if flag(p, "tls") { "tls" } else { "" };
    let obj = serde_json::json!({
        "v": "2",
        "ps": text(p, "name").unwrap_or_default(),
        "add": server,
        "port": port,
        "id": uuid,
        "aid": text(p, "alterId").unwrap_or_else(|| "0".into()),
        "scy": text(p, "cipher").unwrap_or_else(|| "auto".into()),
        "net": network,
        "type": "none",
        "host": host.unwrap_or_default(),
        "path": path.unwrap_or_default(),
        "tls": tls,
        "sni": text(p, "servername").unwrap_or_default(),
        "alpn": list(p, "alpn").unwrap_or_default(),
        "fp": text(p, "client-fingerprint").unwrap_or_default(),
        "allowInsecure": flag(p, "skip-cert-verify"),
    });
    Some(format!(
        "vmess://{}",
        base64::engine::general_purpose::STANDARD.encode(obj.to_string())
    ))
}

/// Shared transport parameters for vless / trojan.
fn stream_params(b: &mut LinkBuilder, p: &Value) {
    let network = text(p, "network").unwrap_or_else(|| "tcp".into());
    b.param("type", Some(network.as_str()));
    match network.as_str() {
        "ws" => {
            b.param("path", nested(p, "ws-opts", "path").and_then(Value::as_str));
            b.param(
                "host",
                nested(p, "ws-opts", "headers")
                    .and_then(|h| h.get("Host"))
                    .and_then(Value::as_str),
            );
        }
        "grpc" => {
            b.param(
                "serviceName",
                nested(p, "grpc-opts", "grpc-service-name").and_then(Value::as_str),
            );
        }
        _ => {}
    }
    b.param("fp", text(p, "client-fingerprint"));
    b.param("alpn", list(p, "alpn"));
    b.param(
        "allowInsecure",
        Some(if flag(p, "skip-cert-verify") { "1" } else { "0" }),
    );
}

fn vless(p: &Value) -> Option<String> {
    let uuid = text(p, "uuid")?;
    let mut b = LinkBuilder::new("vless", p)?.user(&uuid);
    let reality_key = nested(p, "reality-opts", "public-key").and_then(Value::as_str);
    let security = match (reality_key, flag(p, "tls")) {
        (Some(_), _) => "reality",
        (None, true) => "tls",
        (None, false) => "none",
    };
    b.param("encryption", Some("none"));
    b.param("security", Some(security));
    b.param("sni", text(p, "servername"));
    b.param("flow", text(p, "flow"));
    b.param("pbk", reality_key);
    b.param(
        "sid",
        nested(p, "reality-opts", "short-id").and_then(Value::as_str),
    );
    stream_params(&mut b, p);
    Some(b.build())
}

fn trojan(p: &Value) -> Option<String> {
    let password = text(p, "password")?;
    let mut b = LinkBuilder::new("trojan", p)?.user(&password);
    b.param("security", Some("tls"));
    b.param("sni", text(p, "sni"));
    stream_params(&mut b, p);
    Some(b.build())
}

/// Clash writes bandwidth as `100` or `"100 Mbps"`.
fn mbps(p: &Value, key: &str) -> Option<String> {
    let raw = text(p, key)?;
    let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

fn hysteria(p: &Value) -> Option<String> {
    let mut b = LinkBuilder::new("hysteria", p)?;
    b.param("auth", text(p, "auth-str").or_else(|| text(p, "auth_str")));
    b.param("peer", text(p, "sni"));
    b.param("insecure", flag(p, "skip-cert-verify").then_some("1"));
    b.param("upmbps", mbps(p, "up"));
    b.param("downmbps", mbps(p, "down"));
    b.param("alpn", list(p, "alpn"));
    b.param("obfsParam", text(p, "obfs"));
    Some(b.build())
}

fn hysteria2(p: &Value) -> Option<String> {
    let password = text(p, "password").or_else(|| text(p, "auth"))?;
    let mut b = LinkBuilder::new("hysteria2", p)?.user(&password);
    b.param("sni", text(p, "sni"));
    b.param("insecure", flag(p, "skip-cert-verify").then_some("1"));
    b.param("obfs", text(p, "obfs"));
    b.param("obfs-password", text(p, "obfs-password"));
    b.param("mport", text(p, "ports"));
    b.param("upmbps", mbps(p, "up"));
    b.param("downmbps", mbps(p, "down"));
    Some(b.build())
}

fn tuic(p: &Value) -> Option<String> {
    let uuid = text(p, "uuid")?;
    let password = text(p, "password").unwrap_or_default();
    let user = format!(
        "{}:{}",
        urlencoding::encode(&uuid),
        urlencoding::encode(&password)
    );
    let mut b = LinkBuilder::new("tuic", p)?.raw_user(user);
    b.param("sni", text(p, "sni"));
    b.param("alpn", list(p, "alpn"));
    b.param("congestion_control", text(p, "congestion-controller"));
    b.param("udp_relay_mode", text(p, "udp-relay-mode"));
    b.param("allow_insecure", flag(p, "skip-cert-verify").then_some("1"));
    b.param("disable_sni", flag(p, "disable-sni").then_some("1"));
    Some(b.build())
}

fn wireguard(p: &Value) -> Option<String> {
    let key = text(p, "private-key")?;
    let mut b = LinkBuilder::new("wireguard", p)?.user(&key);
    let address: Vec<String> = ["ip", "ipv6"]
        .iter()
        .filter_map(|k| text(p, k))
        .map(|a| if a.contains('/') { a } else if a.contains(':') { format!("{a}/128") } else { format!("{a}/32") })
        .collect();
    b.param("publickey", text(p, "public-key"));
    b.param("presharedkey", text(p, "pre-shared-key"));
    b.param("address", (!address.is_empty()).then(|| address.join(",")));
    b.param("reserved", list(p, "reserved"));
    b.param("mtu", text(p, "mtu"));
    Some(b.build())
}

fn credentials(p: &Value) -> Option<String> {
    let user = text(p, "username")?;
    let pass = text(p, "password").unwrap_or_default();
    Some(format!(
        "{}:{}",
        urlencoding::encode(&user),
        urlencoding::encode(&pass)
    ))
}

fn http(p: &Value) -> Option<String> {
    let scheme = if flag(p, "tls") { "https" } else { "http" };
    let mut b = LinkBuilder::new(scheme, p)?;
    if let Some(c) = credentials(p) {
        b = b.raw_user(c);
    }
    b.param("sni", text(p, "sni"));
    Some(b.build())
}

fn socks5(p: &Value) -> Option<String> {
    let mut b = LinkBuilder::new("socks5", p)?;
    if let Some(c) = credentials(p) {
        b = b.raw_user(c);
    }
    Some(b.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decoded, Registry};

    const DOC: &str = r#"
proxies:
  - name: "HK 01"
    type: ss
    server: ss.example
    port: 8388
    cipher: aes-128-gcm
    password: "p@ss"
    plugin: obfs
    plugin-opts: {mode: tls, host: bing.com}
  - name: vless-reality
    type: vless
    server: "2001:db8::5"
    port: 443
    uuid: 311f32f9-ab81-4ef0-80f8-7e7730ec4b54
    tls: true
    servername: www.python.org
    flow: xtls-rprx-vision
    network: ws
    ws-opts: {path: "/ray?ed=2048", headers: {Host: cdn.example}}
    reality-opts: {public-key: PBK, short-id: "04d5"}
    client-fingerprint: chrome
  - name: vm
    type: vmess
    server: vm.example
    port: 443
    uuid: b831381d-6324-4d53-ad4f-8cda48b30811
    alterId: 0
    cipher: auto
    tls: true
    network: grpc
    grpc-opts: {grpc-service-name: svc}
  - name: tu
    type: tuic
    server: tu.example
    port: 443
    uuid: id
    password: pw
    alpn: [h3]
    disable-sni: true
    sni: s.example
  - name: wg
    type: wireguard
    server: wg.example
    port: 51820
    ip: 172.16.0.2
    private-key: cHJpdg==
    public-key: cHVi
    reserved: [1, 2, 3]
  - name: unknown
    type: snell
    server: s.example
    port: 1
"#;

    fn decode_all() -> Vec<crate::model::Node> {
        let reg = Registry::new();
        share_links(DOC)
            .unwrap()
            .iter()
            .flat_map(|l| match reg.decode_link(l).unwrap() {
                Decoded::Single(n) => vec![n],
                Decoded::Pair(a, b) => vec![a, b],
            })
            .collect()
    }

    #[test]
    fn unsupported_entries_are_dropped() {
        assert_eq!(share_links(DOC).unwrap().len(), 5);
    }

    #[test]
    fn bridged_links_decode_back() {
        let nodes = decode_all();
        let tags: Vec<&str> = nodes.iter().map(|n| n.tag.as_str()).collect();
        assert_eq!(tags, ["HK 01", "vless-reality", "vm", "tu", "wg"]);

        let ss = &nodes[0];
        assert_eq!(ss.setting_str("password"), Some("p@ss"));
        assert_eq!(ss.setting_str("plugin"), Some("obfs-local"));
        assert_eq!(ss.setting_str("plugin_opts"), Some("obfs=tls;obfs-host=bing.com"));

        let vless = &nodes[1];
        assert_eq!(vless.server, "2001:db8::5");
        let tls = vless.tls.as_ref().unwrap();
        assert_eq!(tls.reality.as_ref().unwrap().public_key, "PBK");
        assert_eq!(tls.insecure, Some(false));
        let ws = vless.transport.as_ref().unwrap();
        assert_eq!(ws.max_early_data, Some(2048));

        assert_eq!(
            nodes[2].transport.as_ref().unwrap().service_name.as_deref(),
            Some("svc")
        );
        assert!(nodes[3].tls.as_ref().unwrap().server_name.is_none());
        assert_eq!(nodes[4].setting_str("peer_public_key"), Some("cHVi"));
    }

    #[test]
    fn not_yaml_is_error() {
        assert!(parse_proxies("proxies: [unclosed").is_err());
    }
}
