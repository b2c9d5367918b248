//! `selectel_cloudbackup_plan_v2`: a scheduled backup plan for volumes.

use serde_json::{json, Value};
use tracing::{info, instrument};

use super::{get_i64, get_str, import_project, require_str, set, OperationContext, Resource};
use crate::api::scheduledbackup::{
    Plan, PlanResource, PLAN_STATUS_STARTED, PLAN_STATUS_SUSPENDED,
};
use crate::api::ServiceClient;
use crate::config::Timeouts;
use crate::error::{ProviderError, ResultExt};
use crate::schema::{Attribute, Schema};
use crate::waiter::{wait_for_state, Refresh, WaitSpec};

pub const TYPE_NAME: &str = "selectel_cloudbackup_plan_v2";

const DEFAULT_BACKUP_MODE: &str = "full";
const DEFAULT_SCHEDULE_TYPE: &str = "crontab";
const DEFAULT_SCHEDULE_PATTERN: &str = "0 0 * * *";

/// Handler of [`TYPE_NAME`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudBackupPlanV2;

impl CloudBackupPlanV2 {
    fn plan_from_state(state: &Value) -> Result<Plan, ProviderError> {
        let or_default = |key: &str, default: &str| match get_str(state, key) {
            "" => default.to_string(),
            value => value.to_string(),
        };

        let resources = state
            .get("resources")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(PlanResource::volume)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Plan {
            name: require_str(state, "name")?.to_string(),
            description: get_str(state, "description").to_string(),
            backup_mode: or_default("backup_mode", DEFAULT_BACKUP_MODE),
            max_backups: get_i64(state, "max_backups")
                .ok_or_else(|| ProviderError::Validation("max_backups must be set".to_string()))?,
            schedule_type: or_default("schedule_type", DEFAULT_SCHEDULE_TYPE),
            schedule_pattern: or_default("schedule_pattern", DEFAULT_SCHEDULE_PATTERN),
            resources,
            ..Default::default()
        })
    }

    /// Merge the API view of a plan into a state.
    fn state_from_plan(mut state: Value, plan: &Plan) -> Value {
        set(&mut state, "id", plan.id.as_str());
        set(&mut state, "name", plan.name.as_str());
        set(&mut state, "description", plan.description.as_str());
        set(&mut state, "backup_mode", plan.backup_mode.as_str());
        set(&mut state, "max_backups", plan.max_backups);
        set(&mut state, "schedule_type", plan.schedule_type.as_str());
        set(&mut state, "schedule_pattern", plan.schedule_pattern.as_str());
        set(&mut state, "status", plan.status.as_str());
        if !plan.resources.is_empty() {
            let ids: Vec<&str> = plan.resources.iter().map(|r| r.id.as_str()).collect();
            set(&mut state, "resources", json!(ids));
        }
        state
    }

    /// Wait for a created or updated plan to start.
    async fn wait_started(
        ctx: &OperationContext,
        client: &ServiceClient,
        project_id: &str,
        plan_id: &str,
        timeout: std::time::Duration,
    ) -> Result<(), ProviderError> {
        let spec = WaitSpec::new([PLAN_STATUS_SUSPENDED], [PLAN_STATUS_STARTED], timeout)?
            .with_poll_interval(ctx.config.poll_interval);

        wait_for_state(&ctx.cancel, &spec, || fetch_status(client, project_id, plan_id))
            .await
            .with_context(|| {
                format!(
                    "error waiting for the plan {} to become '{}'",
                    plan_id, PLAN_STATUS_STARTED
                )
            })?;
        Ok(())
    }
}

async fn fetch_status(
    client: &ServiceClient,
    project_id: &str,
    plan_id: &str,
) -> Result<Refresh, ProviderError> {
    match client.plan(project_id, plan_id).await {
        Ok(plan) => Ok(Refresh::Status(plan.status)),
        Err(err) if err.is_not_found() => Ok(Refresh::Gone),
        Err(err) => Err(err),
    }
}

#[async_trait::async_trait]
impl Resource for CloudBackupPlanV2 {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A scheduled backup plan for volumes")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "project_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Project identifier in UUID format"),
            )
            .with_attribute(
                "name",
                Attribute::required_string().with_description("Human-readable name of the plan"),
            )
            .with_attribute(
                "backup_mode",
                Attribute::optional_string()
                    .with_default(json!(DEFAULT_BACKUP_MODE))
                    .with_allowed_values(["full", "frequency"]),
            )
            .with_attribute("description", Attribute::optional_string())
            .with_attribute(
                "max_backups",
                Attribute::required_int64().with_description(
                    "Maximum number of backups to keep in a full plan or full backups in a frequency plan",
                ),
            )
            .with_attribute(
                "schedule_type",
                Attribute::optional_string()
                    .with_default(json!(DEFAULT_SCHEDULE_TYPE))
                    .with_allowed_values(["crontab", "calendar"]),
            )
            .with_attribute(
                "schedule_pattern",
                Attribute::optional_string().with_default(json!(DEFAULT_SCHEDULE_PATTERN)),
            )
            .with_attribute(
                "resources",
                Attribute::required_string_list()
                    .with_suppressed_diff()
                    .with_description("Volumes included in the plan"),
            )
            .with_attribute("status", Attribute::computed_string())
            .with_timeouts(&["create", "update", "delete"])
    }

    #[instrument(skip_all, fields(resource = TYPE_NAME))]
    async fn create(&self, ctx: &OperationContext, planned: Value) -> Result<Value, ProviderError> {
        let project_id = require_str(&planned, "project_id")?;
        let client = ctx.config.backup_client();
        let timeouts = Timeouts::from_state(&planned, Timeouts::default())?;

        let plan = Self::plan_from_state(&planned)?;
        let created = client
            .plan_create(project_id, &plan)
            .await
            .with_context(|| format!("failed to create plan {}", plan.name))?;
        if created.id.is_empty() {
            return Err(ProviderError::InvalidRequest(format!(
                "the API returned no id for the created plan {}",
                plan.name
            )));
        }
        info!(plan_id = %created.id, "Backup plan created");

        Self::wait_started(ctx, &client, project_id, &created.id, timeouts.create).await?;

        let mut state = planned.clone();
        set(&mut state, "id", created.id.as_str());
        let state = self.read(ctx, state).await?;
        if state.is_null() {
            return Err(ProviderError::NotFound(format!("can't find created plan {}", created.id)));
        }
        Ok(state)
    }

    #[instrument(skip_all, fields(resource = TYPE_NAME))]
    async fn read(&self, ctx: &OperationContext, state: Value) -> Result<Value, ProviderError> {
        let project_id = require_str(&state, "project_id")?;
        let plan_id = require_str(&state, "id")?;

        match ctx.config.backup_client().plan(project_id, plan_id).await {
            Ok(plan) => Ok(Self::state_from_plan(state.clone(), &plan)),
            Err(err) if err.is_not_found() => {
                info!(plan_id, "Backup plan not found, removing from state");
                Ok(Value::Null)
            },
            Err(err) => Err(err.context(format!("failed to read plan {}", plan_id))),
        }
    }

    #[instrument(skip_all, fields(resource = TYPE_NAME))]
    async fn update(
        &self,
        ctx: &OperationContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let project_id = require_str(&prior, "project_id")?;
        let plan_id = require_str(&prior, "id")?;
        let client = ctx.config.backup_client();
        let timeouts = Timeouts::from_state(&planned, Timeouts::default())?;

        let plan = Self::plan_from_state(&planned)?;
        client
            .plan_update(project_id, plan_id, &plan)
            .await
            .with_context(|| format!("failed to update plan {}", plan_id))?;

        Self::wait_started(ctx, &client, project_id, plan_id, timeouts.update).await?;

        let mut state = planned.clone();
        set(&mut state, "id", plan_id);
        let state = self.read(ctx, state).await?;
        if state.is_null() {
            return Err(ProviderError::NotFound(format!("can't find updated plan {}", plan_id)));
        }
        Ok(state)
    }

    #[instrument(skip_all, fields(resource = TYPE_NAME))]
    async fn delete(&self, ctx: &OperationContext, state: Value) -> Result<(), ProviderError> {
        let project_id = require_str(&state, "project_id")?;
        let plan_id = require_str(&state, "id")?;
        let client = ctx.config.backup_client();
        let timeouts = Timeouts::from_state(&state, Timeouts::default())?;

        match client.plan_delete(project_id, plan_id).await {
            Ok(()) => {},
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.context(format!("failed to delete plan {}", plan_id))),
        }

        let spec = WaitSpec::deletion([PLAN_STATUS_STARTED, PLAN_STATUS_SUSPENDED], timeouts.delete)
            .with_poll_interval(ctx.config.poll_interval);
        wait_for_state(&ctx.cancel, &spec, || fetch_status(&client, project_id, plan_id))
            .await
            .with_context(|| format!("error waiting for the plan {} to be deleted", plan_id))?;

        info!(plan_id, "Backup plan deleted");
        Ok(())
    }

    #[instrument(skip_all, fields(resource = TYPE_NAME))]
    async fn import(&self, ctx: &OperationContext, id: &str) -> Result<Value, ProviderError> {
        let project_id = import_project(&ctx.config)?;
        let state = self
            .read(ctx, json!({"id": id, "project_id": project_id}))
            .await?;
        if state.is_null() {
            return Err(ProviderError::NotFound(format!("plan {} not found", id)));
        }
        Ok(state)
    }
}
