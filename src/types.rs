//! Plan, import and metadata types exchanged with the host.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::Schema;

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<Value>,
    /// The value after the change (None if deleting).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with no changes.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// Create a plan result with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Compute the plan of `proposed` against `prior` for a resource schema.
    ///
    /// - unset attributes get their schema default
    /// - computed-only attributes keep their prior value
    /// - attributes with a suppressed diff keep their prior value
    /// - a change to a force-new attribute requires replacement
    /// - a null `proposed` state plans a deletion
    pub fn diff(schema: &Schema, prior: Option<&Value>, proposed: Value) -> Self {
        let Some(prior) = prior.filter(|p| !p.is_null()) else {
            let planned = apply_defaults(schema, proposed);
            let changes = top_level_names(schema)
                .filter_map(|name| {
                    planned
                        .get(name)
                        .filter(|v| !v.is_null())
                        .map(|v| AttributeChange::added(name, v.clone()))
                })
                .collect();
            return Self::with_changes(planned, changes, false);
        };

        if proposed.is_null() {
            let changes = top_level_names(schema)
                .filter_map(|name| {
                    prior
                        .get(name)
                        .filter(|v| !v.is_null())
                        .map(|v| AttributeChange::removed(name, v.clone()))
                })
                .collect();
            return Self::with_changes(Value::Null, changes, false);
        }

        let mut planned = apply_defaults(schema, proposed);
        let mut changes = Vec::new();
        let mut requires_replace = false;

        for (name, attr) in &schema.block.attributes {
            let before = prior.get(name).cloned().unwrap_or(Value::Null);
            let computed_only = attr.flags.is_computed_only();
            let after_unset = planned.get(name).map(Value::is_null).unwrap_or(true);

            if computed_only || attr.suppress_diff || (attr.flags.computed && after_unset) {
                set_field(&mut planned, name, before);
                continue;
            }

            let after = planned.get(name).cloned().unwrap_or(Value::Null);
            if before != after {
                requires_replace |= attr.force_new;
                changes.push(AttributeChange::new(
                    name.clone(),
                    Some(before).filter(|v| !v.is_null()),
                    Some(after).filter(|v| !v.is_null()),
                ));
            }
        }

        for name in schema.block.blocks.keys() {
            let before = prior.get(name).cloned().unwrap_or(Value::Null);
            let after = planned.get(name).cloned().unwrap_or(Value::Null);
            if !same_block(&before, &after) {
                changes.push(AttributeChange::new(
                    name.clone(),
                    Some(before).filter(|v| !v.is_null()),
                    Some(after).filter(|v| !v.is_null()),
                ));
            }
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));
        Self::with_changes(planned, changes, requires_replace)
    }
}

/// Fill unset top-level attributes with their schema defaults.
pub fn apply_defaults(schema: &Schema, mut state: Value) -> Value {
    if !state.is_object() {
        return state;
    }
    for (name, attr) in &schema.block.attributes {
        let Some(default) = &attr.default else {
            continue;
        };
        let unset = state.get(name).map(Value::is_null).unwrap_or(true);
        if unset {
            set_field(&mut state, name, default.clone());
        }
    }
    state
}

fn top_level_names(schema: &Schema) -> impl Iterator<Item = &String> {
    let mut names: Vec<&String> = schema
        .block
        .attributes
        .keys()
        .chain(schema.block.blocks.keys())
        .collect();
    names.sort();
    names.into_iter()
}

fn set_field(state: &mut Value, name: &str, value: Value) {
    if let Value::Object(map) = state {
        map.insert(name.to_string(), value);
    }
}

/// Blocks may arrive as an object or as a one-element list.
fn same_block(a: &Value, b: &Value) -> bool {
    fn unwrap_single(v: &Value) -> &Value {
        match v {
            Value::Array(items) if items.len() == 1 => &items[0],
            Value::Array(items) if items.is_empty() => &Value::Null,
            other => other,
        }
    }
    unwrap_single(a) == unwrap_single(b)
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Provider metadata: the names of everything the provider serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// List of data source type names.
    pub data_sources: Vec<String>,
}
