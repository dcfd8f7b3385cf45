use std::collections::HashMap;

use {
    serde_json::{Map, Value, json},
    switchyard_common::{Error, Result},
    tracing::debug,
};

use crate::interpolate::interpolate;

/// Variables available to `${name}` placeholders.
pub type Vars = HashMap<String, String>;

/// The settings of a single connector, sender or receiver.
pub type ConfigMap = Map<String, Value>;

/// Optional top-level key wrapping the sections.
const ROOT_KEY: &str = "switchyard";

/// The three addressable sections of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Connectors,
    Senders,
    Receivers,
}

impl Section {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Connectors => "connectors",
            Self::Senders => "senders",
            Self::Receivers => "receivers",
        }
    }
}

/// An immutable, interpolated configuration tree.
///
/// Replaced wholesale on reload; never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct SwitchyardConfig {
    tree: Value,
}

impl SwitchyardConfig {
    /// Build a configuration from `tree`, resolving placeholders against `vars`.
    pub fn new(tree: Value, vars: &Vars) -> Self {
        debug!(vars = vars.len(), "building switchyard configuration");
        Self {
            tree: interpolate(&tree, vars),
        }
    }

    /// The interpolated tree as supplied (including any `switchyard` wrapper).
    pub fn as_value(&self) -> &Value {
        &self.tree
    }

    fn root(&self) -> &Value {
        match self.tree.get(ROOT_KEY) {
            Some(inner) if inner.is_object() => inner,
            _ => &self.tree,
        }
    }

    fn lookup(&self, section: Section, name: &str) -> Result<ConfigMap> {
        let path = format!("{}.{name}", section.key());
        match self.root().get(section.key()).and_then(|s| s.get(name)) {
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(Error::config(format!("[{path}] must be a table/object"))),
            None => Err(Error::config_not_found(path)),
        }
    }

    /// Settings of connector `name` (`connectors.<name>`).
    pub fn config_for_connector(&self, name: &str) -> Result<ConfigMap> {
        self.lookup(Section::Connectors, name)
    }

    /// Settings of sender `name` (`senders.<name>`).
    pub fn config_for_sender(&self, name: &str) -> Result<ConfigMap> {
        self.lookup(Section::Senders, name)
    }

    /// Settings of receiver `name` (`receivers.<name>`).
    pub fn config_for_receiver(&self, name: &str) -> Result<ConfigMap> {
        self.lookup(Section::Receivers, name)
    }

    /// Names declared in `section`, sorted.
    pub fn names(&self, section: Section) -> Vec<String> {
        let mut names: Vec<String> = self
            .root()
            .get(section.key())
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Everything a live connector named `name` depends on: its own settings
    /// plus every sender and receiver bound to it.
    ///
    /// Two configurations yielding equal bindings can share the connector.
    pub fn connector_binding(&self, name: &str) -> Value {
        let bound = |section: Section| -> Value {
            let entries = self
                .root()
                .get(section.key())
                .and_then(Value::as_object)
                .map(|m| {
                    m.iter()
                        .filter(|(_, v)| v.get("connector").and_then(Value::as_str) == Some(name))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<Map<String, Value>>()
                })
                .unwrap_or_default();
            Value::Object(entries)
        };
        json!({
            "connector": self.root().get(Section::Connectors.key()).and_then(|c| c.get(name)),
            "senders": bound(Section::Senders),
            "receivers": bound(Section::Receivers),
        })
    }
}
