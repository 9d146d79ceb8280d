//! Providers document: which subscriptions to pull and how to assemble them.
//! 订阅配置文档（providers.json）。

use std::time::Duration;

use serde::Deserialize;

use crate::de;
use crate::filter::FilterRule;
use crate::http::RetryPolicy;
use crate::model::SubsError;

/// Host of the public aggregation service; subscriptions pointing back at it
/// are skipped to avoid fetching our own output.
pub const DEFAULT_SERVICE_HOST: &str = "sing-box-subscribe-doraemon.vercel.app";

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub subscribes: Vec<Subscription>,
    /// Local path, http(s) URL, or empty.
    #[serde(default)]
    pub config_template: Option<String>,
    #[serde(rename = "Only-nodes", default, deserialize_with = "de::flexible_bool::deserialize")]
    pub only_nodes: bool,
    #[serde(default, deserialize_with = "de::comma_list::deserialize")]
    pub exclude_protocol: Vec<String>,
    #[serde(default)]
    pub auto_set_outbounds_dns: Option<DnsLeakTags>,
    #[serde(default, deserialize_with = "de::flexible_bool::deserialize")]
    pub auto_backup: bool,
    #[serde(default = "default_save_path")]
    pub save_config_path: String,
    #[serde(default)]
    pub fetch: FetchOptions,
    #[serde(default = "default_service_host")]
    pub service_host: String,
}

fn default_save_path() -> String {
    "config.json".into()
}

fn default_service_host() -> String {
    DEFAULT_SERVICE_HOST.into()
}

fn yes() -> bool {
    true
}

impl ProvidersConfig {
    pub fn from_json(s: &str) -> Result<Self, SubsError> {
        serde_json::from_str(s).map_err(|e| SubsError::Config(format!("providers: {e}")))
    }

    /// Template reference, if one is configured.
    pub fn template_ref(&self) -> Option<&str> {
        self.config_template
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            subscribes: Vec::new(),
            config_template: None,
            only_nodes: false,
            exclude_protocol: Vec::new(),
            auto_set_outbounds_dns: None,
            auto_backup: false,
            save_config_path: default_save_path(),
            fetch: FetchOptions::default(),
            service_host: default_service_host(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub url: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default = "yes", deserialize_with = "de::flexible_bool::deserialize")]
    pub enabled: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default, deserialize_with = "de::flexible_bool::deserialize")]
    pub emoji: bool,
    /// Substrings separated by `,` or `|`.
    #[serde(rename = "ex-node-name", default)]
    pub ex_node_name: String,
    #[serde(default)]
    pub subgroup: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub filter: Vec<FilterRule>,
}

impl Subscription {
    pub fn new(url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tag: tag.into(),
            enabled: true,
            prefix: String::new(),
            emoji: false,
            ex_node_name: String::new(),
            subgroup: String::new(),
            user_agent: String::new(),
            credentials: None,
            filter: Vec::new(),
        }
    }

    /// Non-empty exclusion substrings.
    pub fn exclusions(&self) -> Vec<&str> {
        self.ex_node_name
            .split([',', '|'])
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Paired DNS-server tags used for leak prevention.
///
/// A missing or empty tag leaves the DNS step disabled.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DnsLeakTags {
    #[serde(default)]
    pub proxy: String,
    #[serde(default)]
    pub direct: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FetchOptions {
    #[serde(default = "FetchOptions::default_retries")]
    pub retries: u32,
    #[serde(default = "FetchOptions::default_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "FetchOptions::default_timeout")]
    pub timeout_secs: u64,
}

impl FetchOptions {
    fn default_retries() -> u32 {
        10
    }
    fn default_delay() -> u64 {
        1000
    }
    fn default_timeout() -> u64 {
        30
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retries: Self::default_retries(),
            retry_delay_ms: Self::default_delay(),
            timeout_secs: Self::default_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_providers_document() {
        let cfg = ProvidersConfig::from_json(
            r#"{
              "subscribes": [
                {"url": "https://a.example/sub", "tag": "air", "emoji": 1,
                 "ex-node-name": "expire|traffic,", "subgroup": "hk",
                 "User-Agent": "clashmeta",
                 "filter": [{"action": "include", "keywords": ["HK"]}]},
                {"url": "vless://x@h:1", "tag": "one", "enabled": false}
              ],
              "config_template": "",
              "Only-nodes": false,
              "exclude_protocol": "ssr, hy2",
              "auto_set_outbounds_dns": {"proxy": "remote", "direct": "local"},
              "auto_backup": true
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.subscribes.len(), 2);
        let air = &cfg.subscribes[0];
        assert!(air.enabled && air.emoji);
        assert_eq!(air.exclusions(), ["expire", "traffic"]);
        assert_eq!(air.filter.len(), 1);
        assert!(!cfg.subscribes[1].enabled);
        assert_eq!(cfg.exclude_protocol, ["ssr", "hy2"]);
        assert!(cfg.template_ref().is_none());
        assert_eq!(cfg.save_config_path, "config.json");
        assert_eq!(cfg.fetch.retries, 10);
        assert_eq!(cfg.service_host, DEFAULT_SERVICE_HOST);
        assert_eq!(
            cfg.auto_set_outbounds_dns,
            Some(DnsLeakTags { proxy: "remote".into(), direct: "local".into() })
        );
    }

    #[test]
    fn partial_dns_tags_disable_leak_step() {
        use crate::dns::servers_declared;
        use crate::document::ConfigDocument;

        let doc = ConfigDocument::from_value(serde_json::json!({
            "dns": {"servers": [{"tag": "remote"}, {"tag": "local"}]}
        }))
        .unwrap();
        for (tags, expected) in [
            ("{}", DnsLeakTags::default()),
            (
                r#"{"proxy": "remote"}"#,
                DnsLeakTags { proxy: "remote".into(), direct: String::new() },
            ),
        ] {
            let cfg = ProvidersConfig::from_json(&format!(
                r#"{{"subscribes": [{{"url": "vless://a@b:1", "tag": "t"}}],
                    "auto_set_outbounds_dns": {tags}}}"#
            ))
            .unwrap();
            let parsed = cfg.auto_set_outbounds_dns.unwrap();
            assert_eq!(parsed, expected);
            assert!(!servers_declared(&doc, &parsed));
        }
    }

    #[test]
    fn bad_document_is_config_error() {
        assert!(matches!(
            ProvidersConfig::from_json("{\"subscribes\": 3}"),
            Err(SubsError::Config(_))
        ));
    }
}
