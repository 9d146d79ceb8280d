mod common;

use common::StaticClient;
use sb_subscribe::document::ConfigDocument;
use sb_subscribe::{generate, Groups, Node, Output, ProvidersConfig, SubsError};
use serde_json::{json, Value};

const TROJAN_HK: &str = "trojan://pw@hk.example:443#HK-01";
const TROJAN_JP: &str = "trojan://pw@jp.example:443#JP-01";
const VLESS_US: &str = "vless://311f32f9-ab81-4ef0-80f8-7e7730ec4b54@us.example:443?security=tls#US-01";

fn template() -> Value {
    json!({
        "log": {"level": "info"},
        "dns": {
            "servers": [
                {"tag": "remote", "address": "tls://8.8.8.8", "detour": "Proxy"},
                {"tag": "local", "address": "223.5.5.5", "detour": "direct"}
            ],
            "rules": []
        },
        "inbounds": [{"type": "tun", "tag": "tun-in"}],
        "outbounds": [
            {"tag": "Proxy", "type": "selector", "outbounds": ["auto", "{all}"]},
            {"tag": "auto", "type": "urltest", "outbounds": ["{all}"]},
            {"tag": "Asia", "type": "selector", "outbounds": ["{all}"],
             "filter": [{"action": "exclude", "keywords": ["US"]}]},
            {"tag": "Netflix", "type": "selector", "outbounds": ["{air}"],
             "filter": [{"action": "include", "keywords": ["SG"]}]},
            {"tag": "direct", "type": "direct"},
            {"tag": "block", "type": "block"}
        ],
        "route": {"rules": [
            {"protocol": "dns", "outbound": "dns-out"},
            {"geosite": "netflix", "outbound": "Netflix"},
            {"domain_suffix": [".cn"], "outbound": "direct"}
        ]}
    })
}

fn providers(template_path: &str) -> ProvidersConfig {
    let mut cfg = ProvidersConfig::from_json(&format!(
        r#"{{
          "subscribes": [
            {{"url": "https://air.example/sub", "tag": "air", "User-Agent": "sing-box"}},
            {{"url": "{VLESS_US}", "tag": "us", "subgroup": "west"}},
            {{"url": "https://dead.example/sub", "tag": "dead"}}
          ],
          "config_template": "{template_path}",
          "auto_set_outbounds_dns": {{"proxy": "remote", "direct": "local"}}
        }}"#
    ))
    .unwrap();
    cfg.fetch.retries = 2;
    cfg.fetch.retry_delay_ms = 0;
    cfg
}

fn client() -> StaticClient {
    StaticClient::default().with("https://air.example/sub", &format!("{TROJAN_HK}\n{TROJAN_JP}\n"))
}

fn write_template(dir: &tempfile::TempDir) -> String {
    let path = dir.path().join("template.json");
    std::fs::write(&path, serde_json::to_string(&template()).unwrap()).unwrap();
    path.to_string_lossy().into_owned()
}

fn document(out: Output) -> ConfigDocument {
    match out {
        Output::Document(doc) => doc,
        Output::Nodes(_) => panic!("expected a document"),
    }
}

fn outbound<'a>(doc: &'a ConfigDocument, tag: &str) -> &'a Value {
    doc.get("outbounds")
        .and_then(Value::as_array)
        .and_then(|list| list.iter().find(|o| o["tag"] == tag))
        .unwrap_or_else(|| panic!("no outbound {tag}"))
}

#[test]
fn full_document_from_local_template() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = providers(&write_template(&dir));
    let doc = document(generate(&cfg, &client()).unwrap());

    assert_eq!(
        doc.keys().collect::<Vec<_>>(),
        ["log", "dns", "inbounds", "outbounds", "route"]
    );
    assert_eq!(outbound(&doc, "Proxy")["outbounds"], json!(["auto", "west", "HK-01", "JP-01"]));
    assert_eq!(outbound(&doc, "west")["outbounds"], json!(["US-01"]));
    assert_eq!(outbound(&doc, "auto")["outbounds"], json!(["HK-01", "JP-01", "US-01"]));
    assert_eq!(outbound(&doc, "Asia")["outbounds"], json!(["HK-01", "JP-01"]));
    assert!(outbound(&doc, "Asia").get("filter").is_none());
    // no SG node survives the filter
    assert_eq!(outbound(&doc, "Netflix")["outbounds"], json!(["direct"]));
    assert_eq!(outbound(&doc, "US-01")["type"], "vless");

    let dns = doc.get("dns").unwrap();
    assert_eq!(
        dns["rules"],
        json!([
            {"geosite": "netflix", "server": "Netflix_dns"},
            {"domain_suffix": [".cn"], "server": "local"}
        ])
    );
    assert_eq!(dns["servers"][2]["tag"], "Netflix_dns");
    assert_eq!(dns["servers"][2]["detour"], "Netflix");
}

#[test]
fn runs_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = providers(&write_template(&dir));
    let a = generate(&cfg, &client()).unwrap().to_pretty_json().unwrap();
    let b = generate(&cfg, &client()).unwrap().to_pretty_json().unwrap();
    assert_eq!(a, b);
}

#[test]
fn nodes_only_skips_template() {
    let mut cfg = providers("/nonexistent/template.json");
    cfg.only_nodes = true;
    let c = client();
    let Output::Nodes(nodes) = generate(&cfg, &c).unwrap() else {
        panic!("expected nodes");
    };
    let tags: Vec<&str> = nodes.iter().map(|n| n.tag.as_str()).collect();
    assert_eq!(tags, ["HK-01", "JP-01", "US-01"]);
    let hits = c.hits.lock().unwrap();
    assert_eq!(hits.iter().filter(|u| u.contains("dead")).count(), 2);
}

#[test]
fn config_errors_are_fatal() {
    let empty = ProvidersConfig::default();
    assert!(matches!(generate(&empty, &client()), Err(SubsError::Config(_))));

    let mut no_template = providers("");
    no_template.config_template = None;
    assert!(matches!(generate(&no_template, &client()), Err(SubsError::Config(_))));

    let missing = providers("/nonexistent/template.json");
    assert!(matches!(generate(&missing, &client()), Err(SubsError::Config(_))));
}

#[test]
fn wireguard_outbounds_become_endpoints() {
    let doc = ConfigDocument::from_value(json!({
        "outbounds": [
            {"tag": "Proxy", "type": "selector", "outbounds": ["wg-a", "wg-b"]},
            {"tag": "wg-a", "type": "wireguard", "server": "a.example", "server_port": 51820},
            {"tag": "direct", "type": "direct"},
            {"tag": "wg-b", "type": "wireguard", "server": "b.example", "server_port": 51820},
            {"tag": "block", "type": "block"}
        ],
        "route": {"final": "Proxy"}
    }))
    .unwrap();
    let out = sb_subscribe::assemble::assemble(doc, &Groups::new(), None).unwrap();
    assert_eq!(out.keys().collect::<Vec<_>>(), ["outbounds", "endpoints", "route"]);
    assert_eq!(out.get("outbounds").unwrap().as_array().unwrap().len(), 3);
    let endpoints = out.get("endpoints").unwrap().as_array().unwrap();
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0]["tag"], "wg-a");
    assert_eq!(endpoints[1]["tag"], "wg-b");
}

#[test]
fn subscription_wireguard_nodes_join_template_endpoints() {
    let doc = ConfigDocument::from_value(json!({
        "endpoints": [{"tag": "warp", "type": "wireguard"}],
        "outbounds": [{"tag": "direct", "type": "direct"}]
    }))
    .unwrap();
    let mut groups = Groups::new();
    groups.extend("wg", vec![Node::new("wireguard", "peer", "w.example", 51820)]);
    let out = sb_subscribe::assemble::assemble(doc, &groups, None).unwrap();
    assert_eq!(out.keys().collect::<Vec<_>>(), ["outbounds", "endpoints"]);
    let endpoints = out.get("endpoints").unwrap().as_array().unwrap();
    let tags: Vec<&str> = endpoints.iter().map(|e| e["tag"].as_str().unwrap()).collect();
    assert_eq!(tags, ["warp", "peer"]);
}
