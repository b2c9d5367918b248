//! Scheduled backup API: plans and checkpoints.

use serde::{Deserialize, Serialize};

use super::{encode_query, ServiceClient};
use crate::error::ProviderError;

/// Plan status while backups run on schedule.
pub const PLAN_STATUS_STARTED: &str = "started";
/// Plan status while the plan is paused or still being set up.
pub const PLAN_STATUS_SUSPENDED: &str = "suspended";

/// Resource type of a block storage volume.
pub const RESOURCE_TYPE_VOLUME: &str = "OS::Cinder::Volume";

/// A backup plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub backup_mode: String,
    pub max_backups: i64,
    pub schedule_type: String,
    pub schedule_pattern: String,
    #[serde(default)]
    pub resources: Vec<PlanResource>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_at: String,
}

/// A resource included in a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResource {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
}

impl PlanResource {
    /// A volume reference by id.
    pub fn volume(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            resource_type: RESOURCE_TYPE_VOLUME.to_string(),
        }
    }
}

/// Filters of the plans listing.
#[derive(Debug, Clone, Default)]
pub struct PlansQuery {
    pub name: String,
    pub volume_name: String,
}

/// A point in time at which a plan produced backups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub plan_id: String,
    pub created_at: String,
    pub status: String,
    #[serde(default)]
    pub checkpoint_items: Vec<CheckpointItem>,
}

/// A single backup of a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointItem {
    pub id: String,
    pub backup_id: String,
    pub chain_id: String,
    pub checkpoint_id: String,
    pub created_at: String,
    pub backup_created_at: String,
    pub is_incremental: bool,
    pub status: String,
    pub resource: CheckpointResource,
}

/// The resource a checkpoint item backs up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointResource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
}

/// Filters of the checkpoints listing.
#[derive(Debug, Clone, Default)]
pub struct CheckpointsQuery {
    pub plan_name: String,
    pub volume_name: String,
}

impl ServiceClient {
    /// List the plans of a project.
    pub async fn plans(
        &self,
        project_id: &str,
        query: &PlansQuery,
    ) -> Result<Vec<Plan>, ProviderError> {
        let params = encode_query(&[
            ("name", query.name.as_str()),
            ("volume_name", query.volume_name.as_str()),
        ]);
        self.get_result(&self.url(&format!("{}/plans{}", project_id, params)))
            .await
    }

    /// Get one plan.
    pub async fn plan(&self, project_id: &str, plan_id: &str) -> Result<Plan, ProviderError> {
        self.get(&self.url(&format!("{}/plans/{}", project_id, plan_id)))
            .await
    }

    /// Create a plan.
    pub async fn plan_create(&self, project_id: &str, plan: &Plan) -> Result<Plan, ProviderError> {
        self.post(&self.url(&format!("{}/plans", project_id)), plan)
            .await
    }

    /// Update a plan.
    pub async fn plan_update(
        &self,
        project_id: &str,
        plan_id: &str,
        plan: &Plan,
    ) -> Result<Plan, ProviderError> {
        self.patch(&self.url(&format!("{}/plans/{}", project_id, plan_id)), plan)
            .await
    }

    /// Delete a plan.
    pub async fn plan_delete(&self, project_id: &str, plan_id: &str) -> Result<(), ProviderError> {
        self.delete(&self.url(&format!("{}/plans/{}", project_id, plan_id)))
            .await
    }

    /// List the checkpoints of a project.
    pub async fn checkpoints(
        &self,
        project_id: &str,
        query: &CheckpointsQuery,
    ) -> Result<Vec<Checkpoint>, ProviderError> {
        let params = encode_query(&[
            ("plan_name", query.plan_name.as_str()),
            ("volume_name", query.volume_name.as_str()),
        ]);
        self.get_result(&self.url(&format!("{}/checkpoints{}", project_id, params)))
            .await
    }
}
