//! Layer merging
//!
//! Objects merge key by key, everything else (arrays included) is
//! replaced by the later layer.

use serde_json::{Map, Value};

use super::loader::ConfigError;

/// Merge `layer` into `base` in place.
pub fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => overlay(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// Turn `a.b.c=value` into `{"a": {"b": {"c": value}}}`.
///
/// The value is read as JSON when it parses, otherwise as a plain string,
/// so `bundling.retention_days=7` yields a number and
/// `api.origin_country=FR` a string.
pub fn parse_override(assignment: &str) -> Result<Value, ConfigError> {
    let (path, raw) = assignment.split_once('=').ok_or_else(|| {
        ConfigError::ParseError(format!("override {:?} is not of the form key=value", assignment))
    })?;
    let path = path.trim();
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(ConfigError::ParseError(format!(
            "override {:?} has an empty key",
            assignment
        )));
    }

    let raw = raw.trim();
    let mut value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    for key in path.rsplit('.') {
        let mut object = Map::new();
        object.insert(key.to_string(), value);
        value = Value::Object(object);
    }
    Ok(value)
}
