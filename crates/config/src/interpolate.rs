use serde_json::Value;

use crate::tree::Vars;

/// Replace `${name}` placeholders in `input` with values from `vars`.
///
/// Unresolvable variables are left as-is.
pub fn substitute_vars(input: &str, vars: &Vars) -> String {
    substitute_with(input, |name| vars.get(name).cloned())
}

/// Recursively substitute `${name}` placeholders in every string leaf of
/// `value`. Object keys are never rewritten.
pub fn interpolate(value: &Value, vars: &Vars) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_vars(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if closed && !var_name.is_empty() {
                match lookup(&var_name) {
                    Some(val) => result.push_str(&val),
                    None => {
                        result.push_str("${");
                        result.push_str(&var_name);
                        result.push('}');
                    },
                }
            } else {
                // Malformed, emit literal.
                result.push_str("${");
                result.push_str(&var_name);
                if closed {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}
