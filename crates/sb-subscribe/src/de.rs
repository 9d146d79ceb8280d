//! Serde helpers for fields that subscription and template authors write
//! either as a single string or as a list.

use serde::{Deserialize, Deserializer};

/// Accepts `"a"`, `["a", "b"]` or `null`. A comma inside a single string is not split.
pub mod string_or_list {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
            Nothing(()),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(s) => vec![s],
            Raw::Many(v) => v,
            Raw::Nothing(()) => Vec::new(),
        })
    }
}

/// Same as [`string_or_list`] but keeps "absent" distinguishable from "empty".
pub mod opt_string_or_list {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::One(s)) => Some(vec![s]),
            Some(Raw::Many(v)) => Some(v),
            None => None,
        })
    }
}

/// Booleans written as `true`, `1`, `"1"` or `"true"`.
pub mod flexible_bool {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Int(i64),
            Text(String),
            Nothing(()),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => b,
            Raw::Int(i) => i != 0,
            Raw::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
            Raw::Nothing(()) => false,
        })
    }
}

/// `"a, b,c"` or `["a", "b"]`, blanks dropped.
pub mod comma_list {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let items = super::string_or_list::deserialize(deserializer)?;
        Ok(items
            .iter()
            .flat_map(|s| s.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, with = "super::string_or_list")]
        alpn: Vec<String>,
        #[serde(default, with = "super::opt_string_or_list")]
        scope: Option<Vec<String>>,
        #[serde(default, with = "super::flexible_bool")]
        emoji: bool,
        #[serde(default, with = "super::comma_list")]
        exclude: Vec<String>,
    }

    #[test]
    fn accepts_both_shapes() {
        let p: Probe = serde_json::from_str(r#"{"alpn":"h3","scope":["a","b"]}"#).unwrap();
        assert_eq!(p.alpn, vec!["h3"]);
        assert_eq!(p.scope, Some(vec!["a".to_string(), "b".to_string()]));

        let p: Probe = serde_json::from_str(r#"{"alpn":["h2","http/1.1"]}"#).unwrap();
        assert_eq!(p.alpn.len(), 2);
        assert!(p.scope.is_none());
    }

    #[test]
    fn loose_bools_and_comma_lists() {
        let p: Probe = serde_json::from_str(r#"{"emoji":1,"exclude":"hy2, tuic,,"}"#).unwrap();
        assert!(p.emoji);
        assert_eq!(p.exclude, vec!["hy2", "tuic"]);

        let p: Probe = serde_json::from_str(r#"{"emoji":"false","exclude":["ss"]}"#).unwrap();
        assert!(!p.emoji);
        assert_eq!(p.exclude, vec!["ss"]);
    }
}
