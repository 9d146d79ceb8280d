//! DNS leak prevention: mirror route rules into DNS rules so every domain is
//! resolved through the outbound its traffic will take.
//! 根据 route 规则自动生成对应的 DNS 规则与 DNS 服务器，避免 DNS 泄露。

use serde_json::{Map, Value};
use tracing::debug;

use crate::document::ConfigDocument;
use crate::providers::DnsLeakTags;

/// Route-rule fields that are also valid DNS-rule matchers.
pub const DNS_MATCH_FIELDS: &[&str] = &[
    "inbound",
    "ip_version",
    "network",
    "protocol",
    "domain",
    "domain_suffix",
    "domain_keyword",
    "domain_regex",
    "geosite",
    "source_geoip",
    "source_ip_cidr",
    "source_port",
    "source_port_range",
    "port",
    "port_range",
    "process_name",
    "process_path",
    "package_name",
    "user",
    "user_id",
    "clash_mode",
    "invert",
];

/// Route targets that never get a DNS mapping.
const SKIPPED_TARGETS: &[&str] = &["block", "dns-out"];

const DIRECT: &str = "direct";

fn server_tags(doc: &ConfigDocument) -> Vec<&str> {
    doc.get("dns")
        .and_then(|d| d.get("servers"))
        .and_then(Value::as_array)
        .map(|servers| {
            servers
                .iter()
                .filter_map(|s| s.get("tag").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Both leak-prevention tags are declared among the template's DNS servers.
pub fn servers_declared(doc: &ConfigDocument, tags: &DnsLeakTags) -> bool {
    let declared = server_tags(doc);
    !tags.proxy.is_empty()
        && !tags.direct.is_empty()
        && declared.contains(&tags.proxy.as_str())
        && declared.contains(&tags.direct.as_str())
}

fn dns_server_for(outbound: &str, tags: &DnsLeakTags) -> String {
    if outbound == DIRECT {
        tags.direct.clone()
    } else {
        format!("{outbound}_dns")
    }
}

/// Copy the matchable fields of one route rule; `None` when nothing matches on DNS.
pub fn rule_to_dns(rule: &Map<String, Value>, tags: &DnsLeakTags) -> Option<Value> {
    let mut out: Map<String, Value> = rule
        .iter()
        .filter(|(k, _)| DNS_MATCH_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if out.is_empty() {
        return None;
    }
    if let Some(outbound) = rule.get("outbound").and_then(Value::as_str) {
        out.insert("server".into(), Value::String(dns_server_for(outbound, tags)));
    }
    Some(Value::Object(out))
}

fn logical_to_dns(rule: &Map<String, Value>, outbound: &str, tags: &DnsLeakTags) -> Option<Value> {
    let children: Vec<Value> = rule
        .get("rules")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .filter_map(|child| rule_to_dns(child, tags))
        .collect();
    if children.is_empty() {
        return None;
    }
    let mut out = Map::new();
    out.insert("type".into(), Value::String("logical".into()));
    out.insert("mode".into(), rule.get("mode").cloned().unwrap_or(Value::Null));
    out.insert("rules".into(), Value::Array(children));
    out.insert("server".into(), Value::String(dns_server_for(outbound, tags)));
    Some(Value::Object(out))
}

fn push_unique(list: &mut Vec<Value>, item: Value) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Derive per-outbound DNS servers and DNS rules from `route.rules`.
///
/// Rules without an `outbound` (action-style rules) are ignored. The result
/// only depends on the input document, so repeated runs are identical.
pub fn apply_leak_rules(doc: &mut ConfigDocument, tags: &DnsLeakTags) {
    let route_rules: Vec<Map<String, Value>> = doc
        .get("route")
        .and_then(|r| r.get("rules"))
        .and_then(Value::as_array)
        .map(|rules| rules.iter().filter_map(Value::as_object).cloned().collect())
        .unwrap_or_default();
    let Some(dns) = doc.get_mut("dns").and_then(Value::as_object_mut) else {
        return;
    };
    let existing_servers: Vec<Value> = dns
        .get("servers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let Some(proxy_server) = existing_servers
        .iter()
        .find(|s| s.get("tag").and_then(Value::as_str) == Some(tags.proxy.as_str()))
        .cloned()
    else {
        return;
    };

    let mut new_servers: Vec<Value> = Vec::new();
    let mut new_rules: Vec<Value> = Vec::new();
    for rule in &route_rules {
        let Some(outbound) = rule.get("outbound").and_then(Value::as_str) else {
            continue;
        };
        if SKIPPED_TARGETS.contains(&outbound) {
            continue;
        }
        if outbound != DIRECT {
            let mut server = proxy_server.clone();
            if let Some(obj) = server.as_object_mut() {
                obj.insert("tag".into(), Value::String(format!("{outbound}_dns")));
                obj.insert("detour".into(), Value::String(outbound.to_string()));
            }
            push_unique(&mut new_servers, server);
        }
        let mapped = if rule.get("type").and_then(Value::as_str) == Some("logical") {
            logical_to_dns(rule, outbound, tags)
        } else {
            rule_to_dns(rule, tags)
        };
        if let Some(mapped) = mapped {
            new_rules.push(mapped);
        }
    }

    let mut rules: Vec<Value> = Vec::new();
    let old_rules = dns
        .get("rules")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for r in old_rules.into_iter().chain(new_rules) {
        push_unique(&mut rules, r);
    }

    let mut servers = existing_servers;
    for s in new_servers {
        let tag = s.get("tag").cloned();
        if !servers.iter().any(|e| e.get("tag").cloned() == tag) {
            servers.push(s);
        }
    }
    debug!(rules = rules.len(), servers = servers.len(), "dns leak rules derived");
    dns.insert("rules".into(), Value::Array(rules));
    dns.insert("servers".into(), Value::Array(servers));
}
