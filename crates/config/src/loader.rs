use std::path::Path;

use {
    serde_json::Value,
    switchyard_common::{Context, Error, Result},
    tracing::debug,
};

use crate::tree::{SwitchyardConfig, Vars};

/// Load a configuration file (any supported format) and resolve its
/// placeholders against `vars`.
pub fn load_config_file(path: &Path, vars: &Vars) -> Result<SwitchyardConfig> {
    let tree = load_tree(path)?;
    debug!(path = %path.display(), "loaded configuration file");
    Ok(SwitchyardConfig::new(tree, vars))
}

/// Read and parse a TOML, YAML or JSON file into a raw tree.
pub fn load_tree(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_value(&raw, path)
}

/// Load a flat variable map. Scalar values are stringified; nested values
/// are rejected.
pub fn load_vars_file(path: &Path) -> Result<Vars> {
    let tree = load_tree(path)?;
    let Value::Object(map) = tree else {
        return Err(Error::config(format!(
            "variables file {} must contain a table/object",
            path.display()
        )));
    };
    map.into_iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                _ => {
                    return Err(Error::config(format!(
                        "variable [{k}] in {} must be a scalar",
                        path.display()
                    )));
                },
            };
            Ok((k, s))
        })
        .collect()
}

fn parse_value(raw: &str, path: &Path) -> Result<Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let parsed = match ext {
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str::<serde_yaml::Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "json" => serde_json::from_str(raw).map_err(|e| e.to_string()),
        _ => {
            return Err(Error::config(format!(
                "unsupported config format: .{ext}"
            )));
        },
    };
    parsed.map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))
}
