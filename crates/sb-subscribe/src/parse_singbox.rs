//! sing-box `outbounds` documents: entries are already canonical, only the
//! meta outbounds (selectors, direct, block, dns) are dropped.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::model::{Node, SubsError};

/// Outbound types that describe routing, not a reachable endpoint.
pub const META_TYPES: &[&str] = &["selector", "urltest", "direct", "block", "dns"];

#[derive(Deserialize)]
struct SBoxDoc {
    #[serde(default)]
    outbounds: Vec<Value>,
}

/// Parse an outbound-list document. Plain JSON is tried first; on failure
/// `//` line comments are stripped and the parse retried.
pub fn parse_outbounds(json: &str) -> Result<Vec<Node>, SubsError> {
    let doc: SBoxDoc = match serde_json::from_str(json) {
        Ok(doc) => doc,
        Err(first) => serde_json::from_str(&strip_line_comments(json))
            .map_err(|e| SubsError::Parse(format!("{first}; without comments: {e}")))?,
    };
    Ok(doc.outbounds.into_iter().filter_map(to_node).collect())
}

fn to_node(mut v: Value) -> Option<Node> {
    let obj = v.as_object_mut()?;
    let kind = obj.get("type").and_then(Value::as_str)?.to_string();
    if META_TYPES.contains(&kind.as_str()) {
        return None;
    }
    if obj.get("tag").and_then(Value::as_str).map_or(true, str::is_empty) {
        let server = obj.get("server").and_then(Value::as_str).unwrap_or_default();
        let port = obj.get("server_port").and_then(Value::as_u64).unwrap_or_default();
        let tag = format!("{kind}-{server}:{port}");
        obj.insert("tag".into(), Value::String(tag));
    }
    match serde_json::from_value::<Node>(v) {
        Ok(n) => Some(n),
        Err(e) => {
            debug!(kind = %kind, error = %e, "skip outbound entry");
            None
        }
    }
}

/// Remove `//` comments that start outside string literals.
pub fn strip_line_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for line in src.lines() {
        let mut in_str = false;
        let mut escaped = false;
        let mut cut = line.len();
        let bytes = line.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            if in_str {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_str = false,
                    _ => {}
                }
            } else if b == b'"' {
                in_str = true;
            } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
                cut = i;
                break;
            }
        }
        out.push_str(&line[..cut]);
        out.push('\n');
    }
    out
}
