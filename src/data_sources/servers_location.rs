//! `selectel_servers_location_v1`: data center locations.

use serde_json::{json, Value};
use tracing::instrument;

use super::{filter, filter_block, matches, DataSource, FILTER};
use crate::error::{ProviderError, ResultExt};
use crate::resources::{get_str, require_str, set, OperationContext};
use crate::schema::{Attribute, AttributeType, Block, Schema};

pub const TYPE_NAME: &str = "selectel_servers_location_v1";

#[derive(Debug, Clone, Copy, Default)]
pub struct ServersLocationV1;

#[async_trait::async_trait]
impl DataSource for ServersLocationV1 {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("project_id", Attribute::required_string())
            .with_attribute(
                "locations",
                Attribute::computed_list(AttributeType::object([
                    ("id", AttributeType::String),
                    ("name", AttributeType::String),
                    ("description", AttributeType::String),
                ])),
            )
            .with_block(
                FILTER,
                filter_block(Block::new().with_attribute("name", Attribute::optional_string())),
            )
    }

    #[instrument(skip_all, fields(data_source = TYPE_NAME))]
    async fn read(&self, ctx: &OperationContext, config: Value) -> Result<Value, ProviderError> {
        let project_id = require_str(&config, "project_id")?.to_string();
        let name = get_str(filter(&config), "name");

        let locations = ctx
            .config
            .servers_client()
            .locations()
            .await
            .with_context(|| "failed to get locations")?;

        let locations: Vec<Value> = locations
            .iter()
            .filter(|l| matches(name, &l.name))
            .map(|l| json!({"id": l.id, "name": l.name, "description": l.description}))
            .collect();

        let mut state = config.clone();
        set(&mut state, "id", project_id);
        set(&mut state, "locations", locations);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::context;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_read_without_filter_returns_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/location"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {"uuid": "loc-1", "name": "MSK-2", "description": "Moscow"},
                    {"uuid": "loc-2", "name": "SPB-3"}
                ]
            })))
            .mount(&server)
            .await;

        let state = ServersLocationV1
            .read(&context(&server), json!({"project_id": "proj"}))
            .await
            .unwrap();

        let locations = state["locations"].as_array().unwrap();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[1]["description"], "");

        let state = ServersLocationV1
            .read(
                &context(&server),
                json!({"project_id": "proj", "filter": [{"name": "MSK-2"}]}),
            )
            .await
            .unwrap();
        assert_eq!(
            state["locations"],
            json!([{"id": "loc-1", "name": "MSK-2", "description": "Moscow"}])
        );
    }

    #[tokio::test]
    async fn test_read_requires_project() {
        let server = MockServer::start().await;
        let err = ServersLocationV1
            .read(&context(&server), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }
}
