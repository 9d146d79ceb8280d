//! Merge resolved groups into a template.
//!
//! Steps, in order:
//! 1. subgroup promotion (a selector per subgroup, spliced into `Proxy`);
//! 2. `{group}` / `{all}` placeholder expansion with per-outbound filters;
//! 3. empty member lists fall back to the template's direct outbound;
//! 4. node records are appended to `outbounds`;
//! 5. optional DNS leak rules;
//! 6. wireguard entries move to `endpoints`, right after `outbounds`.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::dns;
use crate::document::ConfigDocument;
use crate::filter::{self, FilterRule};
use crate::model::{is_subgroup_key, subgroup_label, Groups, Result, SubsError};
use crate::providers::DnsLeakTags;
use crate::template::{take_outbounds, TemplateOutbound};

/// Tag of the template outbound that aggregates every group.
pub const AGGREGATOR_TAG: &str = "Proxy";
/// Placeholder expanding to every group.
pub const ALL_TOKEN: &str = "{all}";
/// Fallback when the template declares no direct outbound.
const DEFAULT_DIRECT_TAG: &str = "direct";
const ENDPOINT_TYPES: &[&str] = &["wireguard"];

/// `{key}`
pub fn placeholder(key: &str) -> String {
    format!("{{{key}}}")
}

/// Group key inside a `{key}` token.
pub fn placeholder_key(token: &str) -> Option<&str> {
    token.strip_prefix('{')?.strip_suffix('}')
}

fn aggregator_members(outbounds: &mut [TemplateOutbound]) -> Option<&mut Vec<String>> {
    outbounds
        .iter_mut()
        .find(|o| o.tag == AGGREGATOR_TAG)?
        .outbounds
        .as_mut()
        .filter(|m| !m.is_empty())
}

/// Step 1. Each subgroup gets a selector inserted before the template's last
/// two entries and its short name spliced into the aggregator; plain groups
/// are appended to the aggregator as placeholders.
pub fn promote_groups(outbounds: &mut Vec<TemplateOutbound>, groups: &Groups) {
    let mut cursor = 0usize;
    for key in groups.keys() {
        if !is_subgroup_key(key) {
            if let Some(members) = aggregator_members(outbounds) {
                let token = placeholder(key);
                if !members.contains(&token) {
                    members.push(token);
                }
            }
            continue;
        }
        cursor += 1;
        let short = subgroup_label(key);
        if let Some(members) = aggregator_members(outbounds) {
            match members.iter().position(|m| m == ALL_TOKEN) {
                Some(slot) => {
                    members[slot] = short.to_string();
                    cursor += 1;
                }
                None => members.insert(cursor.min(members.len()), short.to_string()),
            }
        }
        let at = outbounds.len().saturating_sub(2);
        outbounds.insert(at, TemplateOutbound::selector(short, vec![placeholder(key)]));
        debug!(group = %key, selector = %short, "subgroup promoted");
    }
}

/// Expand one member list. Literal tokens pass through; output keeps the
/// first occurrence of every tag.
pub fn expand_members(members: &[String], rules: &[FilterRule], groups: &Groups) -> Vec<String> {
    let has_all = members.iter().any(|m| m == ALL_TOKEN);
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<String> = Vec::new();
    let mut push = |tag: String| {
        if seen.insert(tag.clone()) {
            out.push(tag);
        }
    };
    for token in members {
        let Some(key) = placeholder_key(token) else {
            push(token.clone());
            continue;
        };
        if has_all && token != ALL_TOKEN {
            continue;
        }
        match groups.get(key).filter(|nodes| !nodes.is_empty()) {
            Some(nodes) => filter::apply(nodes, rules, key)
                .into_iter()
                .for_each(|n| push(n.tag)),
            None if token == ALL_TOKEN => {
                for (group, nodes) in groups.iter() {
                    filter::apply(nodes, rules, group)
                        .into_iter()
                        .for_each(|n| push(n.tag));
                }
            }
            None => debug!(token = %token, "placeholder names no group"),
        }
    }
    out
}

/// Steps 2 and 3 over every outbound with a non-empty member list.
pub fn expand_placeholders(outbounds: &mut [TemplateOutbound], groups: &Groups, direct_tag: &str) {
    for ob in outbounds.iter_mut() {
        let Some(members) = ob.outbounds.as_ref().filter(|m| !m.is_empty()) else {
            continue;
        };
        let mut expanded = expand_members(members, &ob.filter, groups);
        if expanded.is_empty() {
            warn!(
                outbound = %ob.tag,
                fallback = %direct_tag,
                "outbound has no members after expansion, sing-box would refuse it"
            );
            expanded.push(direct_tag.to_string());
        }
        ob.outbounds = Some(expanded);
        ob.filter.clear();
    }
}

/// Move endpoint-type outbounds into `endpoints`, placed right after `outbounds`.
pub fn split_endpoints(doc: &mut ConfigDocument) {
    let Some(Value::Array(outbounds)) = doc.get_mut("outbounds") else {
        return;
    };
    let is_endpoint =
        |v: &Value| ENDPOINT_TYPES.contains(&v.get("type").and_then(Value::as_str).unwrap_or(""));
    let (moved, kept): (Vec<Value>, Vec<Value>) =
        std::mem::take(outbounds).into_iter().partition(is_endpoint);
    *outbounds = kept;
    if moved.is_empty() {
        return;
    }
    let mut endpoints = match doc.remove("endpoints") {
        Some(Value::Array(existing)) => existing,
        _ => Vec::new(),
    };
    debug!(moved = moved.len(), "endpoint outbounds split");
    endpoints.extend(moved);
    doc.insert_after("outbounds", "endpoints", Value::Array(endpoints));
}

/// Build the final document from a template and the resolved groups.
pub fn assemble(
    mut doc: ConfigDocument,
    groups: &Groups,
    leak_tags: Option<&DnsLeakTags>,
) -> Result<ConfigDocument> {
    let mut outbounds = take_outbounds(&mut doc)?;
    let direct_tag = outbounds
        .iter()
        .find(|o| o.kind == "direct")
        .map(|o| o.tag.clone())
        .unwrap_or_else(|| DEFAULT_DIRECT_TAG.to_string());

    promote_groups(&mut outbounds, groups);
    expand_placeholders(&mut outbounds, groups, &direct_tag);

    let mut list: Vec<Value> = outbounds
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<Value>, _>>()
        .map_err(|e| SubsError::Config(format!("template outbound: {e}")))?;
    list.extend(groups.iter().flat_map(|(_, nodes)| nodes.iter().map(|n| n.to_value())));
    doc.set("outbounds", Value::Array(list));

    if let Some(tags) = leak_tags {
        if dns::servers_declared(&doc, tags) {
            dns::apply_leak_rules(&mut doc, tags);
        } else {
            debug!("dns leak tags not declared in template, skipped");
        }
    }
    split_endpoints(&mut doc);
    doc.canonicalize();
    Ok(doc)
}
