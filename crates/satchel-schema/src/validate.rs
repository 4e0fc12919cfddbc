//! Rule-driven manifest validation.
//!
//! Every field is checked even after a failure so one pass reports every
//! problem. The manifest is never modified.

use crate::diagnostic::{Diagnostics, Verdict};
use crate::manifest::Manifest;
use crate::rule::{Schema, SchemaRule};
use serde_json::{Map, Value};

/// Check `manifest` against a required and an optional schema.
///
/// Every required key must be present and pass its rule. Optional keys are
/// checked only when present. Keys unknown to both schemas are ignored.
pub fn validate_manifest(manifest: &Manifest, required: &Schema, optional: &Schema) -> Verdict {
    let mut diags = Diagnostics::new();
    check_required(manifest.as_map(), required, "", &mut diags);
    for (key, value) in manifest.iter() {
        if let Some(rule) = optional.get(key) {
            check_rule(value, rule, key, &mut diags);
        }
    }
    Verdict::from_diagnostics(diags)
}

fn check_required(object: &Map<String, Value>, schema: &Schema, path: &str, diags: &mut Diagnostics) {
    for (key, rule) in schema.iter() {
        let field_path = join(path, key);
        match object.get(key) {
            Some(value) => check_rule(value, rule, &field_path, diags),
            None => diags.error(field_path, "required property missing"),
        }
    }
}

fn check_rule(value: &Value, rule: &SchemaRule, path: &str, diags: &mut Diagnostics) {
    match rule {
        SchemaRule::Pattern(re) => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
                _ => {
                    diags.error(path, "invalid data type, expected a string or an integer");
                    return;
                }
            };
            if !re.is_match(&text) {
                diags.error(path, format!("invalid value '{}'", clip(&text)));
            }
        }
        SchemaRule::Boolean => {
            if !value.is_boolean() {
                diags.error(path, "invalid data type, expected a boolean");
            }
        }
        SchemaRule::Options(allowed) => {
            let elements: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                scalar => vec![scalar],
            };
            for element in elements {
                if !allowed.contains(element) {
                    diags.error(path, format!("illegal option {element}"));
                }
            }
        }
        SchemaRule::Nested(schema) => match value {
            Value::Object(object) => check_required(object, schema, path, diags),
            Value::Array(items) if items.iter().all(Value::is_object) => {
                for (index, item) in items.iter().enumerate() {
                    if let Value::Object(object) = item {
                        check_required(object, schema, &format!("{path}[{index}]"), diags);
                    }
                }
            }
            _ => diags.error(path, "invalid data type, expected an object or a list of objects"),
        },
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

fn clip(text: &str) -> String {
    const MAX: usize = 64;
    if text.chars().count() <= MAX {
        text.to_owned()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}…")
    }
}
