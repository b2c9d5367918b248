//! Declarative schemas of the provider block, resources and data sources.
//!
//! A [`Schema`] is what the host shows to users and what [`crate::validation`]
//! and [`crate::types::PlanResult::diff`] work from: which attributes exist,
//! who sets them, and how a change to each one is planned.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the per-resource timeouts block.
pub const TIMEOUTS_BLOCK: &str = "timeouts";

/// Value type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Int64,
    Float64,
    Bool,
    List(Box<AttributeType>),
    /// Fixed set of named fields, used for computed lists of records.
    Object(HashMap<String, AttributeType>),
}

impl AttributeType {
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }

    /// An object type from `(field, type)` pairs.
    pub fn object<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, AttributeType)>,
        S: Into<String>,
    {
        Self::Object(fields.into_iter().map(|(n, t)| (n.into(), t)).collect())
    }
}

/// Who sets an attribute.
///
/// `optional` together with `computed` means the user may set it and the
/// provider fills it in otherwise (e.g. a generated host name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttributeFlags {
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    /// Hidden from plan output and logs.
    pub sensitive: bool,
}

impl AttributeFlags {
    const NONE: Self = Self {
        required: false,
        optional: false,
        computed: false,
        sensitive: false,
    };
    const REQUIRED: Self = Self {
        required: true,
        ..Self::NONE
    };
    const OPTIONAL: Self = Self {
        optional: true,
        ..Self::NONE
    };
    const COMPUTED: Self = Self {
        computed: true,
        ..Self::NONE
    };
    const OPTIONAL_COMPUTED: Self = Self {
        optional: true,
        computed: true,
        ..Self::NONE
    };

    /// Set by the provider only.
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

/// One attribute of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    #[serde(flatten)]
    pub flags: AttributeFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A change replaces the remote object.
    #[serde(default)]
    pub force_new: bool,
    /// Planned when the attribute is not configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Accepted string values, compared case-insensitively.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    /// The prior value is always planned; edits never show up as changes.
    #[serde(default)]
    pub suppress_diff: bool,
}

impl Attribute {
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
            default: None,
            allowed_values: Vec::new(),
            suppress_diff: false,
        }
    }

    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::REQUIRED)
    }

    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::OPTIONAL)
    }

    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::COMPUTED)
    }

    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::OPTIONAL_COMPUTED)
    }

    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::REQUIRED)
    }

    pub fn optional_float64() -> Self {
        Self::new(AttributeType::Float64, AttributeFlags::OPTIONAL)
    }

    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::OPTIONAL)
    }

    pub fn required_string_list() -> Self {
        Self::new(
            AttributeType::list(AttributeType::String),
            AttributeFlags::REQUIRED,
        )
    }

    /// Read-only list filled by the provider, e.g. data source results.
    pub fn computed_list(element_type: AttributeType) -> Self {
        Self::new(AttributeType::list(element_type), AttributeFlags::COMPUTED)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_suppressed_diff(mut self) -> Self {
        self.suppress_diff = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }
}

/// How many instances of a nested block a config may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockNestingMode {
    /// At most one instance.
    #[default]
    Single,
    /// An ordered list of instances.
    List,
}

/// Attributes and nested blocks, e.g. `partitions_config` or `filter`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Attribute>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub blocks: HashMap<String, NestedBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A block nested in another one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    #[serde(flatten)]
    pub block: Block,
    #[serde(default)]
    pub nesting_mode: BlockNestingMode,
    /// Upper bound on instances; 0 means unbounded.
    #[serde(default)]
    pub max_items: u32,
}

impl NestedBlock {
    pub fn single(block: Block) -> Self {
        Self {
            block,
            nesting_mode: BlockNestingMode::Single,
            max_items: 1,
        }
    }

    pub fn list(block: Block) -> Self {
        Self {
            block,
            nesting_mode: BlockNestingMode::List,
            max_items: 0,
        }
    }

    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }
}

/// Schema of a resource, a data source or the provider block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Bumped when the state layout changes.
    #[serde(default)]
    pub version: u64,
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    pub fn v0() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block.blocks.insert(name.into(), block);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.block.description = Some(description.into());
        self
    }

    /// Add a `timeouts` block with one duration string per operation.
    pub fn with_timeouts(self, operations: &[&str]) -> Self {
        let block = operations.iter().fold(
            Block::new().with_description("Operation deadlines such as \"20m\" or \"1h30m\""),
            |block, op| block.with_attribute(*op, Attribute::optional_string()),
        );
        self.with_block(TIMEOUTS_BLOCK, NestedBlock::single(block))
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.block.attributes.get(name)
    }
}

/// Everything the provider serves, keyed by type name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderSchema {
    #[serde(default)]
    pub provider: Schema,
    #[serde(default)]
    pub resources: HashMap<String, Schema>,
    #[serde(default)]
    pub data_sources: HashMap<String, Schema>,
}

impl ProviderSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }

    pub fn with_data_source(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.data_sources.insert(name.into(), schema);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// A problem reported to the host, optionally pointing at an attribute path
/// such as `partitions_config.disk_partitions.0.mount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    fn with_severity(severity: DiagnosticSeverity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    pub fn error(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Error, summary)
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Warning, summary)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}
