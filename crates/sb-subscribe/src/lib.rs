//! Subscription aggregation and sing-box configuration assembly.
//!
//! 订阅聚合：拉取机场订阅，解析为统一节点，再合并进 sing-box 配置模板。
//!
//! Pipeline: [`codec`] → [`acquire`] → [`transform`] → [`assemble`]
//! (which calls into [`filter`] and [`dns`]). [`generate`] runs all of it
//! for one [`ProvidersConfig`]; nothing is shared between invocations.

pub mod acquire;
pub mod assemble;
pub mod codec;
pub(crate) mod de;
pub mod dns;
pub mod document;
pub mod filter;
pub mod http;
pub mod model;
pub mod parse_clash;
pub mod parse_singbox;
pub mod providers;
pub mod template;
pub mod transform;

use serde::Serialize;
use tracing::info;

pub use codec::Registry;
pub use document::ConfigDocument;
pub use http::{HttpClient, HttpRequest, HttpResponse};
pub use model::{Groups, Node, Result, SubsError};
pub use providers::{ProvidersConfig, Subscription};

/// Result of one run: bare nodes, or a full document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Output {
    Nodes(Vec<Node>),
    Document(ConfigDocument),
}

impl Output {
    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SubsError::Parse(e.to_string()))
    }
}

/// Fetch every subscription and produce the configured output.
///
/// Fails only on configuration errors: no subscriptions, a full document
/// requested without a template, or a template that cannot be loaded.
/// Individual subscriptions that fail are skipped.
pub fn generate(config: &ProvidersConfig, client: &dyn HttpClient) -> Result<Output> {
    if config.subscribes.is_empty() {
        return Err(SubsError::Config("no subscriptions configured".into()));
    }
    let template = if config.only_nodes {
        None
    } else {
        let reference = config.template_ref().ok_or_else(|| {
            SubsError::Config(
                "config_template is empty and Only-nodes is false; set a template or request nodes only"
                    .into(),
            )
        })?;
        Some(template::load(reference, client, &config.fetch)?)
    };

    let registry = Registry::with_exclusions(&config.exclude_protocol);
    let acquirer = acquire::Acquirer::new(&registry, client, config.fetch);
    let groups = transform::process_subscribes(config, &acquirer);
    info!(groups = groups.len(), nodes = groups.node_count(), "subscriptions resolved");

    match template {
        None => Ok(Output::Nodes(groups.flatten())),
        Some(doc) => assemble::assemble(doc, &groups, config.auto_set_outbounds_dns.as_ref())
            .map(Output::Document),
    }
}
