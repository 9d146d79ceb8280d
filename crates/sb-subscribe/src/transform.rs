//! Per-subscription post-processing and group accumulation.
//! 订阅后处理：前缀、emoji 重命名、关键字排除、子分组与全局去重。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::acquire::Acquirer;
use crate::filter;
use crate::model::{Groups, Node, SUBGROUP_SUFFIX};
use crate::providers::{ProvidersConfig, Subscription};

/// Resolved group key for a subscription: `tag` or `tag-<subgroup>-subgroup`.
pub fn group_key(sub: &Subscription) -> String {
    let label = sub.subgroup.trim();
    if label.is_empty() {
        sub.tag.clone()
    } else {
        format!("{}-{label}{SUBGROUP_SUFFIX}", sub.tag)
    }
}

/// Run every enabled subscription through acquisition and post-processing.
pub fn process_subscribes(config: &ProvidersConfig, acquirer: &Acquirer<'_>) -> Groups {
    let mut groups = Groups::new();
    for sub in &config.subscribes {
        if !sub.enabled {
            debug!(tag = %sub.tag, "subscription disabled");
            continue;
        }
        let host = config.service_host.trim();
        if !host.is_empty() && sub.url.contains(host) {
            warn!(tag = %sub.tag, "subscription points back at this service, skipped");
            continue;
        }
        let report = acquirer.acquire(sub);
        if report.nodes.is_empty() {
            info!(tag = %sub.tag, "no nodes found under subscription, skipped");
            continue;
        }
        let nodes = post_process(report.nodes, sub);
        let key = group_key(sub);
        info!(tag = %sub.tag, group = %key, nodes = nodes.len(), "subscription processed");
        groups.extend(&key, nodes);
    }
    dedup_tags(&mut groups);
    groups
}

/// Prefix, rename, exclude, then subscription-level filters.
pub fn post_process(mut nodes: Vec<Node>, sub: &Subscription) -> Vec<Node> {
    if !sub.prefix.is_empty() {
        for node in &mut nodes {
            rewrite(node, |name| format!("{}{name}", sub.prefix));
        }
    }
    if sub.emoji {
        for node in &mut nodes {
            rewrite(node, with_flag);
        }
    }
    let exclusions = sub.exclusions();
    if !exclusions.is_empty() {
        nodes.retain(|n| !exclusions.iter().any(|ex| n.tag.contains(ex)));
    }
    if sub.filter.is_empty() {
        nodes
    } else {
        filter::apply(&nodes, &sub.filter, &sub.tag)
    }
}

/// Apply `f` to the tag and, when set, the detour.
fn rewrite(node: &mut Node, f: impl Fn(&str) -> String) {
    node.tag = f(&node.tag);
    if let Some(detour) = node.detour.as_mut().filter(|d| !d.is_empty()) {
        let renamed = f(detour);
        *detour = renamed;
    }
}

struct Region {
    flag: &'static str,
    codes: &'static str,
    words: &'static str,
}

// Order matters: earlier entries win.
const REGIONS: &[Region] = &[
    Region { flag: "🇭🇰", codes: "HK|HKG", words: "香港|港|hong ?kong" },
    Region { flag: "🇹🇼", codes: "TW|TWN", words: "台湾|臺灣|台北|taiwan|taipei" },
    Region { flag: "🇯🇵", codes: "JP|JPN", words: "日本|东京|大阪|japan|tokyo|osaka" },
    Region { flag: "🇰🇷", codes: "KR|KOR", words: "韩国|韓國|首尔|korea|seoul" },
    Region { flag: "🇸🇬", codes: "SG|SGP", words: "新加坡|狮城|singapore" },
    Region { flag: "🇷🇺", codes: "RU|RUS", words: "俄罗斯|莫斯科|russia|moscow" },
    Region { flag: "🇺🇸", codes: "US|USA", words: "美国|美國|洛杉矶|硅谷|united states|america|los angeles|san jose|seattle" },
    Region { flag: "🇬🇧", codes: "UK|GB|GBR", words: "英国|伦敦|united kingdom|britain|london" },
    Region { flag: "🇩🇪", codes: "DE|DEU", words: "德国|法兰克福|germany|frankfurt" },
    Region { flag: "🇫🇷", codes: "FR|FRA", words: "法国|巴黎|france|paris" },
    Region { flag: "🇳🇱", codes: "NL|NLD", words: "荷兰|netherlands|amsterdam" },
    Region { flag: "🇨🇦", codes: "CA|CAN", words: "加拿大|canada|toronto" },
    Region { flag: "🇦🇺", codes: "AU|AUS", words: "澳大利亚|澳洲|悉尼|australia|sydney" },
    Region { flag: "🇮🇳", codes: "IN|IND", words: "印度|india|mumbai" },
    Region { flag: "🇹🇷", codes: "TR|TUR", words: "土耳其|turkey|istanbul" },
    Region { flag: "🇨🇳", codes: "CN|CHN", words: "中国|回国|china" },
];

fn region_table() -> &'static [(&'static str, Regex)] {
    static TABLE: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        REGIONS
            .iter()
            .filter_map(|r| {
                let pattern = format!(
                    "(?:^|[^A-Za-z])(?:{})(?:[^A-Za-z]|$)|(?i:{})",
                    r.codes, r.words
                );
                Regex::new(&pattern).ok().map(|re| (r.flag, re))
            })
            .collect()
    })
}

fn has_flag(name: &str) -> bool {
    name.chars().any(|c| ('\u{1F1E6}'..='\u{1F1FF}').contains(&c))
}

/// Prefix a regional flag chosen by keyword, unless the name already has one.
pub fn with_flag(name: &str) -> String {
    if has_flag(name) {
        return name.to_string();
    }
    match region_table().iter().find(|(_, re)| re.is_match(name)) {
        Some((flag, _)) => format!("{flag} {name}"),
        None => name.to_string(),
    }
}

/// Suffix repeated tags with `_<n>` (smallest free n). The first occurrence
/// keeps its name. A renamed node's companion, which immediately precedes
/// it and detours through it, follows the rename.
pub fn dedup_tags(groups: &mut Groups) {
    let mut taken: HashSet<String> = groups
        .iter()
        .flat_map(|(_, nodes)| nodes.iter().map(|n| n.tag.clone()))
        .collect();
    let mut used: HashSet<String> = HashSet::new();
    for (_, nodes) in groups.iter_mut() {
        for i in 0..nodes.len() {
            if used.insert(nodes[i].tag.clone()) {
                continue;
            }
            let old = nodes[i].tag.clone();
            let fresh = (1..)
                .map(|n| format!("{old}_{n}"))
                .find(|t| !taken.contains(t))
                .unwrap_or_default();
            debug!(from = %old, to = %fresh, "duplicate tag renamed");
            taken.insert(fresh.clone());
            used.insert(fresh.clone());
            if i > 0 && nodes[i - 1].detour.as_deref() == Some(old.as_str()) {
                nodes[i - 1].detour = Some(fresh.clone());
            }
            nodes[i].tag = fresh;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Registry;
    use crate::http::fake::FakeClient;
    use crate::providers::FetchOptions;

    fn node(tag: &str) -> Node {
        Node::new("trojan", tag, "h.example", 443)
    }

    fn tags(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.tag.as_str()).collect()
    }

    #[test]
    fn flags_by_keyword() {
        assert_eq!(with_flag("HK-01"), "🇭🇰 HK-01");
        assert_eq!(with_flag("香港 IPLC"), "🇭🇰 香港 IPLC");
        assert_eq!(with_flag("Tokyo 2"), "🇯🇵 Tokyo 2");
        assert_eq!(with_flag("RUSSIA"), "🇷🇺 RUSSIA");
        assert_eq!(with_flag("🇺🇸 US-1"), "🇺🇸 US-1");
        assert_eq!(with_flag("BUSINESS"), "BUSINESS");
        assert_eq!(with_flag("plain"), "plain");
    }

    #[test]
    fn prefix_and_rename_keep_detour_in_step() {
        let mut ss = node("HK");
        ss.detour = Some("HK_shadowtls".into());
        let mut sub = Subscription::new("x", "air");
        sub.prefix = "[air] ".into();
        sub.emoji = true;
        let out = post_process(vec![ss, node("HK_shadowtls")], &sub);
        assert_eq!(out[0].tag, "🇭🇰 [air] HK");
        assert_eq!(out[0].detour.as_deref(), Some(out[1].tag.as_str()));
    }

    #[test]
    fn exclusion_and_filters() {
        let mut sub = Subscription::new("x", "air");
        sub.ex_node_name = "expire|,traffic".into();
        sub.filter = serde_json::from_value(serde_json::json!([
            {"action": "exclude", "keywords": ["JP"], "for": ["air"]},
            {"action": "exclude", "keywords": ["US"], "for": ["other"]}
        ]))
        .unwrap();
        let nodes = vec![node("HK"), node("expire 2030"), node("traffic 10G"), node("JP"), node("US")];
        assert_eq!(tags(&post_process(nodes, &sub)), ["HK", "US"]);
    }

    #[test]
    fn dedup_is_global_and_skips_taken_suffixes() {
        let mut g = Groups::new();
        g.extend("a", vec![node("n"), node("n"), node("n_1")]);
        g.extend("b", vec![node("n"), node("m")]);
        dedup_tags(&mut g);
        assert_eq!(tags(g.get("a").unwrap()), ["n", "n_2", "n_1"]);
        assert_eq!(tags(g.get("b").unwrap()), ["n_3", "m"]);
    }

    #[test]
    fn dedup_moves_companion_detour() {
        let mut ss = node("x");
        ss.detour = Some("x_shadowtls".into());
        let mut g = Groups::new();
        g.extend("a", vec![node("x_shadowtls")]);
        g.extend("b", vec![ss, node("x_shadowtls")]);
        dedup_tags(&mut g);
        let b = g.get("b").unwrap();
        assert_eq!(b[1].tag, "x_shadowtls_1");
        assert_eq!(b[0].detour.as_deref(), Some("x_shadowtls_1"));
    }

    #[test]
    fn processes_subscriptions_in_order() {
        let cfg = crate::providers::ProvidersConfig::from_json(
            r#"{"subscribes": [
                {"url": "trojan://p@a.example:443#HK-1", "tag": "air", "subgroup": "hk"},
                {"url": "trojan://p@b.example:443#HK-1", "tag": "air"},
                {"url": "trojan://p@c.example:443#off", "tag": "air", "enabled": false},
                {"url": "https://sing-box-subscribe-doraemon.vercel.app/config/x", "tag": "loop"},
                {"url": "https://down.example/", "tag": "down"},
                {"url": "trojan://p@d.example:443#HK-1", "tag": "air", "subgroup": "hk"}
            ]}"#,
        )
        .unwrap();
        let reg = Registry::new();
        let client = FakeClient::default();
        let fetch = FetchOptions { retries: 1, retry_delay_ms: 0, timeout_secs: 1 };
        let groups = process_subscribes(&cfg, &Acquirer::new(&reg, &client, fetch));
        assert_eq!(groups.keys().collect::<Vec<_>>(), ["air-hk-subgroup", "air"]);
        assert_eq!(tags(groups.get("air-hk-subgroup").unwrap()), ["HK-1", "HK-1_1"]);
        assert_eq!(tags(groups.get("air").unwrap()), ["HK-1_2"]);
        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url, "https://down.example/");
    }
}
