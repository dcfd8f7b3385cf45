//! Typed accessors over a [`ConfigMap`].
//!
//! Numbers and booleans are accepted both as native values and as strings,
//! since interpolated values are always strings.

use {
    serde_json::Value,
    switchyard_common::{Error, Result},
};

use crate::tree::ConfigMap;

pub trait SettingsExt {
    /// A non-empty string value.
    fn str_value(&self, key: &str) -> Option<&str>;

    /// A mandatory non-empty string value; `owner` names the entity in the error.
    fn require_str(&self, key: &str, owner: &str) -> Result<String>;

    fn u64_or(&self, key: &str, default: u64, owner: &str) -> Result<u64>;

    fn bool_or(&self, key: &str, default: bool, owner: &str) -> Result<bool>;
}

impl SettingsExt for ConfigMap {
    fn str_value(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    fn require_str(&self, key: &str, owner: &str) -> Result<String> {
        self.str_value(key).map(str::to_string).ok_or_else(|| {
            Error::config(format!("missing configuration parameter [{key}] for {owner}"))
        })
    }

    fn u64_or(&self, key: &str, default: u64, owner: &str) -> Result<u64> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::String(s)) if s.is_empty() => Ok(default),
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| invalid(key, owner, n)),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid(key, owner, s)),
            Some(other) => Err(invalid(key, owner, other)),
        }
    }

    fn bool_or(&self, key: &str, default: bool, owner: &str) -> Result<bool> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.trim() {
                "" => Ok(default),
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(invalid(key, owner, s)),
            },
            Some(other) => Err(invalid(key, owner, other)),
        }
    }
}

fn invalid(key: &str, owner: &str, value: impl std::fmt::Display) -> Error {
    Error::config(format!(
        "invalid value [{value}] for parameter [{key}] of {owner}"
    ))
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn map(v: Value) -> ConfigMap {
        match v {
            Value::Object(m) => m,
            _ => ConfigMap::new(),
        }
    }

    #[test]
    fn require_str_reports_key_and_owner() {
        let m = map(json!({"url": ""}));
        let err = m.require_str("url", "connector [ws]").err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("configuration error: missing configuration parameter [url] for connector [ws]")
        );
    }

    #[test]
    fn numbers_from_strings_or_numbers() {
        let m = map(json!({"a": "5000", "b": 12, "c": "", "d": "x"}));
        assert_eq!(m.u64_or("a", 1, "t").ok(), Some(5000));
        assert_eq!(m.u64_or("b", 1, "t").ok(), Some(12));
        assert_eq!(m.u64_or("c", 7, "t").ok(), Some(7));
        assert_eq!(m.u64_or("missing", 9, "t").ok(), Some(9));
        assert!(m.u64_or("d", 1, "t").is_err());
    }

    #[test]
    fn booleans_from_strings_or_bools() {
        let m = map(json!({"a": "true", "b": false, "c": "maybe"}));
        assert_eq!(m.bool_or("a", false, "t").ok(), Some(true));
        assert_eq!(m.bool_or("b", true, "t").ok(), Some(false));
        assert_eq!(m.bool_or("z", true, "t").ok(), Some(true));
        assert!(m.bool_or("c", true, "t").is_err());
    }
}
