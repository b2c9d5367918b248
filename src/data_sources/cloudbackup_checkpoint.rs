//! `selectel_cloudbackup_checkpoint_v2`: backups made by scheduled plans.

use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{filter, filter_block, DataSource, FILTER};
use crate::api::scheduledbackup::{Checkpoint, CheckpointsQuery};
use crate::error::{ProviderError, ResultExt};
use crate::resources::{get_str, require_str, set, OperationContext};
use crate::schema::{Attribute, AttributeType, Block, Schema};

pub const TYPE_NAME: &str = "selectel_cloudbackup_checkpoint_v2";

#[derive(Debug, Clone, Copy, Default)]
pub struct CloudBackupCheckpointV2;

fn item_type() -> AttributeType {
    AttributeType::object([
        ("id", AttributeType::String),
        ("backup_id", AttributeType::String),
        ("chain_id", AttributeType::String),
        ("checkpoint_id", AttributeType::String),
        ("created_at", AttributeType::String),
        ("backup_created_at", AttributeType::String),
        ("is_incremental", AttributeType::Bool),
        ("status", AttributeType::String),
        (
            "resource",
            AttributeType::object([
                ("id", AttributeType::String),
                ("name", AttributeType::String),
                ("type", AttributeType::String),
            ]),
        ),
    ])
}

fn flatten(checkpoint: &Checkpoint) -> Value {
    let items: Vec<Value> = checkpoint
        .checkpoint_items
        .iter()
        .map(|item| {
            json!({
                "id": item.id,
                "backup_id": item.backup_id,
                "chain_id": item.chain_id,
                "checkpoint_id": item.checkpoint_id,
                "created_at": item.created_at,
                "backup_created_at": item.backup_created_at,
                "is_incremental": item.is_incremental,
                "status": item.status,
                "resource": {
                    "id": item.resource.id,
                    "name": item.resource.name,
                    "type": item.resource.resource_type,
                },
            })
        })
        .collect();

    json!({
        "id": checkpoint.id,
        "plan_id": checkpoint.plan_id,
        "created_at": checkpoint.created_at,
        "status": checkpoint.status,
        "checkpoint_items": items,
    })
}

#[async_trait::async_trait]
impl DataSource for CloudBackupCheckpointV2 {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Checkpoints of scheduled backup plans")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("project_id", Attribute::required_string())
            .with_attribute(
                "checkpoints",
                Attribute::computed_list(AttributeType::object([
                    ("id", AttributeType::String),
                    ("plan_id", AttributeType::String),
                    ("created_at", AttributeType::String),
                    ("status", AttributeType::String),
                    ("checkpoint_items", AttributeType::list(item_type())),
                ])),
            )
            .with_block(
                FILTER,
                filter_block(
                    Block::new()
                        .with_attribute("plan_name", Attribute::optional_string())
                        .with_attribute("volume_name", Attribute::optional_string()),
                ),
            )
    }

    #[instrument(skip_all, fields(data_source = TYPE_NAME))]
    async fn read(&self, ctx: &OperationContext, config: Value) -> Result<Value, ProviderError> {
        let project_id = require_str(&config, "project_id")?.to_string();
        let filter = filter(&config);
        let query = CheckpointsQuery {
            plan_name: get_str(filter, "plan_name").to_string(),
            volume_name: get_str(filter, "volume_name").to_string(),
        };

        let checkpoints = ctx
            .config
            .backup_client()
            .checkpoints(&project_id, &query)
            .await
            .with_context(|| "failed to get checkpoints")?;
        debug!(count = checkpoints.len(), "Checkpoints found");

        let mut state = config.clone();
        set(&mut state, "id", project_id);
        set(
            &mut state,
            "checkpoints",
            checkpoints.iter().map(flatten).collect::<Vec<_>>(),
        );
        Ok(state)
    }
}
