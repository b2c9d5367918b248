//! `selectel_servers_configuration_v1`: server and server chip offerings.

use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{filter, filter_block, DataSource, FILTER};
use crate::error::{ProviderError, ResultExt};
use crate::resources::{get_bool, get_str, require_str, set, OperationContext};
use crate::schema::{Attribute, AttributeType, Block, Schema};

pub const TYPE_NAME: &str = "selectel_servers_configuration_v1";

#[derive(Debug, Clone, Copy, Default)]
pub struct ServersConfigurationV1;

#[async_trait::async_trait]
impl DataSource for ServersConfigurationV1 {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Server configurations available to order")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("project_id", Attribute::required_string())
            .with_attribute(
                "configurations",
                Attribute::computed_list(AttributeType::object([
                    ("id", AttributeType::String),
                    ("name", AttributeType::String),
                ])),
            )
            .with_block(
                FILTER,
                filter_block(
                    Block::new()
                        .with_attribute("name", Attribute::optional_string())
                        .with_attribute(
                            "is_server_chip",
                            Attribute::optional_bool().with_default(json!(false)),
                        ),
                ),
            )
    }

    #[instrument(skip_all, fields(data_source = TYPE_NAME))]
    async fn read(&self, ctx: &OperationContext, config: Value) -> Result<Value, ProviderError> {
        let project_id = require_str(&config, "project_id")?.to_string();
        let filter = filter(&config);
        let name = get_str(filter, "name");
        let is_server_chip = get_bool(filter, "is_server_chip");

        let servers = ctx
            .config
            .servers_client()
            .servers(is_server_chip)
            .await
            .with_context(|| "failed to get configurations")?;

        let selected: Vec<_> = if name.is_empty() {
            servers.iter().collect()
        } else {
            servers.find_one_by_name(name).into_iter().collect()
        };
        let configurations: Vec<Value> = selected
            .into_iter()
            .map(|s| json!({"id": s.id, "name": s.name}))
            .collect();
        debug!(count = configurations.len(), "Configurations found");

        let mut state = config.clone();
        set(&mut state, "id", project_id);
        set(&mut state, "configurations", configurations);
        Ok(state)
    }
}
