//! Sequential include/exclude filters over a node list.
//! 节点过滤：按 server 正则、协议类型或名称关键字，规则依次收窄结果。

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::model::Node;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum FilterAction {
    #[default]
    Include,
    Exclude,
}

impl From<String> for FilterAction {
    fn from(s: String) -> Self {
        if s.trim().eq_ignore_ascii_case("exclude") {
            Self::Exclude
        } else {
            Self::Include
        }
    }
}

/// One filter rule. Only the first selector present is evaluated, in the
/// order `server_regex`, `type`, `keywords`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FilterRule {
    #[serde(default)]
    pub action: FilterAction,
    /// Group names this rule applies to; absent or empty means every group.
    #[serde(rename = "for", default, deserialize_with = "crate::de::opt_string_or_list::deserialize")]
    pub scope: Option<Vec<String>>,
    #[serde(default)]
    pub server_regex: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "crate::de::opt_string_or_list::deserialize")]
    pub types: Option<Vec<String>>,
    #[serde(default, deserialize_with = "crate::de::opt_string_or_list::deserialize")]
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug)]
enum Selector {
    Server(Regex),
    Types(Vec<String>),
    Keywords(Regex),
    /// Blank selector or unusable pattern: keep everything.
    Pass,
}

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|e| warn!(pattern, error = %e, "invalid filter pattern, rule ignored"))
        .ok()
}

impl FilterRule {
    fn applies_to(&self, group: &str) -> bool {
        match &self.scope {
            Some(groups) if !groups.is_empty() => groups.iter().any(|g| g == group),
            _ => true,
        }
    }

    fn selector(&self) -> Selector {
        if let Some(pattern) = &self.server_regex {
            return compile(pattern).map_or(Selector::Pass, Selector::Server);
        }
        if let Some(types) = &self.types {
            let set: Vec<String> = types
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            return if set.is_empty() {
                Selector::Pass
            } else {
                Selector::Types(set)
            };
        }
        let joined = self.keywords.as_deref().unwrap_or_default().join("|");
        if joined.trim().is_empty() {
            return Selector::Pass;
        }
        compile(&joined).map_or(Selector::Pass, Selector::Keywords)
    }
}

impl Selector {
    fn matches(&self, node: &Node) -> bool {
        match self {
            Selector::Server(re) => re.is_match(&node.server),
            Selector::Types(set) => set.iter().any(|t| node.kind.eq_ignore_ascii_case(t)),
            Selector::Keywords(re) => re.is_match(&node.tag),
            Selector::Pass => true,
        }
    }
}

/// Apply `rules` to `nodes` for `group`. Each rule sees the previous rule's output.
pub fn apply(nodes: &[Node], rules: &[FilterRule], group: &str) -> Vec<Node> {
    let mut current: Vec<Node> = nodes.to_vec();
    for rule in rules.iter().filter(|r| r.applies_to(group)) {
        let selector = rule.selector();
        if matches!(selector, Selector::Pass) {
            continue;
        }
        let exclude = rule.action == FilterAction::Exclude;
        current.retain(|n| selector.matches(n) ^ exclude);
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nodes() -> Vec<Node> {
        vec![
            Node::new("trojan", "HK-01", "1.2.3.4", 443),
            Node::new("vless", "HK-02 Netflix", "hk.example", 443),
            Node::new("hysteria2", "JP-01", "5.6.7.8", 443),
            Node::new("vless", "US-01", "us.example", 443),
        ]
    }

    fn rules(v: serde_json::Value) -> Vec<FilterRule> {
        serde_json::from_value(v).unwrap()
    }

    fn tags(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.tag.as_str()).collect()
    }

    #[test]
    fn exclude_then_include_intersects() {
        let r = rules(json!([
            {"action": "exclude", "keywords": ["Netflix"]},
            {"action": "include", "keywords": ["HK", "JP"]}
        ]));
        assert_eq!(tags(&apply(&nodes(), &r, "g")), ["HK-01", "JP-01"]);
    }

    #[test]
    fn server_regex_beats_other_selectors() {
        let r = rules(json!([
            {"action": "include", "server_regex": r"^\d+\.\d+\.\d+\.\d+$", "keywords": ["US"]}
        ]));
        assert_eq!(tags(&apply(&nodes(), &r, "g")), ["HK-01", "JP-01"]);
    }

    #[test]
    fn type_set_is_case_insensitive() {
        let r = rules(json!([{"action": "exclude", "type": ["VLESS", " "]}]));
        assert_eq!(tags(&apply(&nodes(), &r, "g")), ["HK-01", "JP-01"]);
    }

    #[test]
    fn blank_selectors_are_noops() {
        let r = rules(json!([
            {"action": "include", "keywords": []},
            {"action": "include", "keywords": [" "]},
            {"action": "include", "type": []},
            {"action": "exclude", "server_regex": "(?!x)"}
        ]));
        assert_eq!(apply(&nodes(), &r, "g").len(), 4);
    }

    #[test]
    fn scope_limits_rule() {
        let r = rules(json!([{"action": "include", "keywords": ["JP"], "for": ["Asia"]}]));
        assert_eq!(apply(&nodes(), &r, "Europe").len(), 4);
        assert_eq!(tags(&apply(&nodes(), &r, "Asia")), ["JP-01"]);
    }

    #[test]
    fn unknown_action_means_include() {
        let r = rules(json!([{"action": "keep", "keywords": ["US"]}, {"keywords": ["0"]}]));
        assert_eq!(tags(&apply(&nodes(), &r, "g")), ["US-01"]);
    }
}
