//! Read-only data sources.
//!
//! A data source takes a `project_id` and an optional `filter` block and
//! fills a computed list with the matching objects.

pub mod cloudbackup_checkpoint;
pub mod servers_configuration;
pub mod servers_location;
pub mod servers_os;

use std::sync::Arc;

use serde_json::Value;

use crate::error::ProviderError;
use crate::resources::OperationContext;
use crate::schema::{Block, NestedBlock, Schema};

pub use cloudbackup_checkpoint::CloudBackupCheckpointV2;
pub use servers_configuration::ServersConfigurationV1;
pub use servers_location::ServersLocationV1;
pub use servers_os::ServersOsV1;

/// Name of the filter block shared by all data sources.
pub const FILTER: &str = "filter";

/// A data source type served by the provider.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    /// Resolve the config into the data source state.
    async fn read(&self, ctx: &OperationContext, config: Value) -> Result<Value, ProviderError>;
}

/// All data sources of the provider.
pub fn all() -> Vec<Arc<dyn DataSource>> {
    vec![
        Arc::new(CloudBackupCheckpointV2),
        Arc::new(ServersConfigurationV1),
        Arc::new(ServersLocationV1),
        Arc::new(ServersOsV1),
    ]
}

/// A `filter` block with the given attributes.
pub(crate) fn filter_block(block: Block) -> NestedBlock {
    NestedBlock::list(block).with_max_items(1)
}

/// The `filter` block of a config, `Value::Null` when absent.
///
/// The host sends the block either as an object or as a one-element list.
pub(crate) fn filter(config: &Value) -> &Value {
    const NONE: &Value = &Value::Null;
    match config.get(FILTER) {
        Some(Value::Array(items)) => items.first().unwrap_or(NONE),
        Some(v @ Value::Object(_)) => v,
        _ => NONE,
    }
}

/// Whether `value` passes a string filter; an empty filter matches all.
pub(crate) fn matches(filter: &str, value: &str) -> bool {
    filter.is_empty() || filter == value
}
