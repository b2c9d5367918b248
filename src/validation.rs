//! Checks a config against its [`Schema`] before anything reaches the API.
//!
//! Every problem becomes a [`Diagnostic`] whose `attribute` is the dotted
//! path of the offending value, e.g. `partitions_config.disk_partitions.2.size`.
//!
//! ```
//! use selectel_provider::schema::{Attribute, Schema};
//! use selectel_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute(
//!         "backup_mode",
//!         Attribute::optional_string().with_allowed_values(["full", "frequency"]),
//!     );
//!
//! assert!(validate(&schema, &json!({"name": "daily"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "daily", "backup_mode": "weekly"}));
//! assert_eq!(diagnostics[0].attribute.as_deref(), Some("backup_mode"));
//! ```

use serde_json::{Map, Value};

use crate::schema::{Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema};

/// Check a config or state against `schema`; no diagnostics means valid.
///
/// - required attributes must be present and not null
/// - computed-only attributes are ignored
/// - values must match the attribute type; int64 also takes integral floats
/// - strings with allowed values must match one of them, ignoring case
/// - nested blocks are checked recursively against their `max_items`
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut checker = Checker::default();
    checker.block(&schema.block, value, "");
    checker.diagnostics
}

/// [`validate`] as a `Result`.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    match validate(schema, value) {
        diagnostics if diagnostics.is_empty() => Ok(()),
        diagnostics => Err(diagnostics),
    }
}

pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Collects diagnostics while walking a value.
#[derive(Default)]
struct Checker {
    diagnostics: Vec<Diagnostic>,
}

impl Checker {
    fn report(&mut self, path: &str, summary: String, detail: String) {
        let diagnostic = Diagnostic::error(summary).with_detail(detail);
        self.diagnostics.push(if path.is_empty() {
            diagnostic
        } else {
            diagnostic.with_attribute(path)
        });
    }

    fn block(&mut self, block: &Block, value: &Value, path: &str) {
        let fields = match value {
            Value::Null => return,
            Value::Object(fields) => fields,
            other => {
                self.report(path, "Expected object".to_string(), got(other));
                return;
            },
        };

        for (name, attr) in &block.attributes {
            self.attribute(attr, fields.get(name), &child(path, name));
        }
        for (name, nested) in &block.blocks {
            self.nested(nested, fields.get(name), &child(path, name));
        }
    }

    fn attribute(&mut self, attr: &Attribute, value: Option<&Value>, path: &str) {
        if attr.flags.is_computed_only() {
            return;
        }
        let Some(value) = value.filter(|v| !v.is_null()) else {
            if attr.flags.required {
                self.report(
                    path,
                    format!("Missing required attribute '{}'", path),
                    "The attribute must be set".to_string(),
                );
            }
            return;
        };

        let before = self.diagnostics.len();
        self.value(&attr.attr_type, value, path);
        if self.diagnostics.len() == before {
            self.allowed(attr, value, path);
        }
    }

    fn allowed(&mut self, attr: &Attribute, value: &Value, path: &str) {
        let Some(s) = value.as_str() else {
            return;
        };
        if attr.allowed_values.is_empty()
            || attr.allowed_values.iter().any(|a| a.eq_ignore_ascii_case(s))
        {
            return;
        }
        self.report(
            path,
            format!("Invalid value for attribute '{}'", path),
            format!(
                "Expected one of [{}], got \"{}\"",
                attr.allowed_values.join(", "),
                s
            ),
        );
    }

    fn value(&mut self, ty: &AttributeType, value: &Value, path: &str) {
        let matches = match ty {
            AttributeType::String => value.is_string(),
            AttributeType::Int64 => is_int64(value),
            AttributeType::Float64 => value.is_number(),
            AttributeType::Bool => value.is_boolean(),
            AttributeType::List(element) => match value.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        self.value(element, item, &child(path, &i.to_string()));
                    }
                    true
                },
                None => false,
            },
            AttributeType::Object(fields) => match value.as_object() {
                Some(object) => {
                    self.object(fields, object, path);
                    true
                },
                None => false,
            },
        };
        if !matches {
            self.report(
                path,
                format!("Invalid type for attribute '{}'", path),
                format!("Expected {}, {}", type_name(ty), got(value)),
            );
        }
    }

    fn object(
        &mut self,
        fields: &std::collections::HashMap<String, AttributeType>,
        object: &Map<String, Value>,
        path: &str,
    ) {
        for (name, ty) in fields {
            if let Some(value) = object.get(name).filter(|v| !v.is_null()) {
                self.value(ty, value, &child(path, name));
            }
        }
    }

    fn nested(&mut self, nested: &NestedBlock, value: Option<&Value>, path: &str) {
        let items: Vec<(String, &Value)> = match value {
            None | Some(Value::Null) => Vec::new(),
            Some(v @ Value::Object(_)) => vec![(path.to_string(), v)],
            // A single block also arrives as a one-element list.
            Some(Value::Array(list)) if list.len() == 1 && nested.max_items == 1 => {
                vec![(path.to_string(), &list[0])]
            },
            Some(Value::Array(list)) => list
                .iter()
                .enumerate()
                .map(|(i, item)| (child(path, &i.to_string()), item))
                .collect(),
            Some(other) => {
                self.report(path, format!("Expected block '{}'", path), got(other));
                return;
            },
        };

        if nested.max_items > 0 && items.len() > nested.max_items as usize {
            self.report(
                path,
                format!(
                    "Block '{}' allows at most {} item(s), got {}",
                    path,
                    nested.max_items,
                    items.len()
                ),
                "Remove the extra blocks".to_string(),
            );
        }
        for (item_path, item) in items {
            self.block(&nested.block, item, &item_path);
        }
    }
}

fn child(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn got(value: &Value) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("got {}", kind)
}

fn type_name(ty: &AttributeType) -> &'static str {
    match ty {
        AttributeType::String => "string",
        AttributeType::Int64 => "int64",
        AttributeType::Float64 => "float64",
        AttributeType::Bool => "bool",
        AttributeType::List(_) => "list",
        AttributeType::Object(_) => "object",
    }
}

/// Integers, or floats without a fractional part that fit in an i64.
fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) if n.is_i64() => true,
        Value::Number(n) => n
            .as_f64()
            .is_some_and(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64),
        _ => false,
    }
}
