//! Configuration templates: loading and the outbound entries the assembler edits.
//! 配置模板：远程或本地加载，以及模板中的出站条目。

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::document::ConfigDocument;
use crate::filter::FilterRule;
use crate::http::{fetch_with_retry, HttpClient, HttpRequest};
use crate::model::{Result, SubsError};
use crate::providers::FetchOptions;

/// A template outbound. Member lists may hold literal tags or `{group}` tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateOutbound {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::de::opt_string_or_list::deserialize"
    )]
    pub outbounds: Option<Vec<String>>,
    /// Consumed during expansion, never written out.
    #[serde(default, skip_serializing)]
    pub filter: Vec<FilterRule>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl TemplateOutbound {
    pub fn selector(tag: &str, members: Vec<String>) -> Self {
        Self {
            tag: tag.to_string(),
            kind: "selector".into(),
            outbounds: Some(members),
            ..Self::default()
        }
    }
}

/// Parse template text: JSON first, YAML as a fallback.
pub fn parse(text: &str) -> Result<ConfigDocument> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(json_err) => serde_yaml::from_str(text).map_err(|yaml_err| {
            SubsError::Config(format!("template is neither JSON ({json_err}) nor YAML ({yaml_err})"))
        })?,
    };
    ConfigDocument::from_value(value)
}

fn is_remote(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Load a template from an http(s) URL or a local path.
pub fn load(reference: &str, client: &dyn HttpClient, fetch: &FetchOptions) -> Result<ConfigDocument> {
    let reference = reference.trim();
    let text = if is_remote(reference) {
        let req = HttpRequest::get(reference, fetch.timeout_secs);
        fetch_with_retry(client, &req, fetch.retry_policy())
            .map_err(|e| SubsError::Config(format!("template {reference}: {e}")))?
            .text()
    } else {
        std::fs::read_to_string(Path::new(reference))
            .map_err(|e| SubsError::Config(format!("template {reference}: {e}")))?
    };
    let doc = parse(&text)?;
    info!(template = %reference, "template loaded");
    debug!(sections = ?doc.keys().collect::<Vec<_>>(), "template sections");
    Ok(doc)
}

/// Take the template's `outbounds` as typed entries, leaving a null in the
/// section's slot so it keeps its position.
pub fn take_outbounds(doc: &mut ConfigDocument) -> Result<Vec<TemplateOutbound>> {
    match doc.get_mut("outbounds").map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v)
            .map_err(|e| SubsError::Config(format!("template outbounds: {e}"))),
    }
}
