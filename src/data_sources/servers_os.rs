//! `selectel_servers_os_v1`: installable operating systems.

use serde_json::{json, Value};
use tracing::instrument;

use super::{filter, filter_block, matches, DataSource, FILTER};
use crate::api::servers::OperatingSystemsQuery;
use crate::error::{ProviderError, ResultExt};
use crate::resources::{get_str, require_str, set, OperationContext};
use crate::schema::{Attribute, AttributeType, Block, Schema};

pub const TYPE_NAME: &str = "selectel_servers_os_v1";

#[derive(Debug, Clone, Copy, Default)]
pub struct ServersOsV1;

#[async_trait::async_trait]
impl DataSource for ServersOsV1 {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Operating systems available for a location and configuration")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("project_id", Attribute::required_string())
            .with_attribute("location_id", Attribute::optional_string())
            .with_attribute("configuration_id", Attribute::optional_string())
            .with_attribute(
                "os",
                Attribute::computed_list(AttributeType::object([
                    ("id", AttributeType::String),
                    ("name", AttributeType::String),
                    ("version", AttributeType::String),
                    ("arch", AttributeType::String),
                ])),
            )
            .with_block(
                FILTER,
                filter_block(
                    Block::new()
                        .with_attribute("name", Attribute::optional_string())
                        .with_attribute("version", Attribute::optional_string()),
                ),
            )
    }

    #[instrument(skip_all, fields(data_source = TYPE_NAME))]
    async fn read(&self, ctx: &OperationContext, config: Value) -> Result<Value, ProviderError> {
        let project_id = require_str(&config, "project_id")?.to_string();
        let filter = filter(&config);
        let (name, version) = (get_str(filter, "name"), get_str(filter, "version"));

        let query = OperatingSystemsQuery {
            location_id: get_str(&config, "location_id").to_string(),
            service_id: get_str(&config, "configuration_id").to_string(),
        };
        let list = ctx
            .config
            .servers_client()
            .operating_systems(&query)
            .await
            .with_context(|| "failed to get operating systems")?;

        let selected: Vec<_> = if !name.is_empty() && !version.is_empty() {
            list.find_one_by_name_and_version(name, version)
                .into_iter()
                .collect()
        } else {
            list.iter()
                .filter(|os| matches(name, &os.name) && matches(version, &os.version_value))
                .collect()
        };
        let os: Vec<Value> = selected
            .into_iter()
            .map(|os| {
                json!({
                    "id": os.id,
                    "name": os.name,
                    "version": os.version_value,
                    "arch": os.arch,
                })
            })
            .collect();

        let mut state = config.clone();
        set(&mut state, "id", project_id);
        set(&mut state, "os", os);
        Ok(state)
    }
}
