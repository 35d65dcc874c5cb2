//! Props validation at the sandbox boundary.
//!
//! Props are a closed algebraic value: string | number | boolean | null |
//! sequence | mapping. `serde_json::Value` already enforces that set, so the
//! remaining rejection surface is structural: keys that would pollute
//! `Object.prototype` inside the evaluation context, and pathological nesting
//! depth. Anything rejected here fails before any module execution occurs.

use crate::error::RenderError;
use serde_json::Value;

/// Maximum recursion depth for nested objects/arrays
const MAX_DEPTH: usize = 32;

/// Keys that could be used for prototype pollution
const DANGEROUS_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Validate a props value before it crosses into the sandbox.
///
/// # Errors
/// Returns [`RenderError::UnsupportedProperty`] if:
/// - the top-level value is not a mapping
/// - a dangerous key (`__proto__`, `constructor`, `prototype`) appears at any depth
/// - nesting depth exceeds `MAX_DEPTH` (32)
pub(crate) fn validate(props: &Value) -> Result<(), RenderError> {
    if !props.is_object() {
        return Err(RenderError::UnsupportedProperty {
            path: "(root)".to_string(),
            detail: "props must be a mapping from string keys to values".to_string(),
        });
    }
    validate_recursive(props, "(root)", 0)
}

fn validate_recursive(value: &Value, path: &str, depth: usize) -> Result<(), RenderError> {
    if depth > MAX_DEPTH {
        return Err(RenderError::UnsupportedProperty {
            path: path.to_string(),
            detail: format!("nesting exceeds {MAX_DEPTH} levels"),
        });
    }

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                if DANGEROUS_KEYS.contains(&key.as_str()) {
                    return Err(RenderError::UnsupportedProperty {
                        path: format!("{path}.{key}"),
                        detail: format!("`{key}` keys are forbidden in props"),
                    });
                }
                validate_recursive(val, &format!("{path}.{key}"), depth + 1)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                validate_recursive(item, &format!("{path}[{index}]"), depth + 1)?;
            }
            Ok(())
        }
        // Scalars are always serializable
        _ => Ok(()),
    }
}
