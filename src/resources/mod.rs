//! Managed resources.
//!
//! Each resource type implements [`Resource`]; the provider looks handlers up
//! by type name and passes every call an [`OperationContext`].

pub mod cloudbackup_plan;
pub mod partitions;
pub mod servers_server;

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ProviderError;
use crate::schema::Schema;

pub use cloudbackup_plan::CloudBackupPlanV2;
pub use servers_server::ServersServerV1;

/// What one operation runs with: the configuration and a cancellation
/// token that fires when the provider is stopped.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub config: Arc<Config>,
    pub cancel: CancellationToken,
}

/// A resource type served by the provider.
#[async_trait::async_trait]
pub trait Resource: Send + Sync {
    /// The type name, e.g. `selectel_servers_server_v1`.
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    /// Create the remote object and return the new state.
    async fn create(&self, ctx: &OperationContext, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh the state; `Value::Null` when the object is gone.
    async fn read(&self, ctx: &OperationContext, state: Value) -> Result<Value, ProviderError>;

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    async fn delete(&self, ctx: &OperationContext, state: Value) -> Result<(), ProviderError>;

    /// Build the state of an existing object from its id.
    async fn import(&self, ctx: &OperationContext, id: &str) -> Result<Value, ProviderError>;
}

/// All resources of the provider.
pub fn all() -> Vec<Arc<dyn Resource>> {
    vec![Arc::new(CloudBackupPlanV2), Arc::new(ServersServerV1)]
}

/// String attribute, empty when unset.
pub(crate) fn get_str<'a>(state: &'a Value, key: &str) -> &'a str {
    state.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Required string attribute.
pub(crate) fn require_str<'a>(state: &'a Value, key: &str) -> Result<&'a str, ProviderError> {
    match get_str(state, key) {
        "" => Err(ProviderError::Validation(format!("{} must be set", key))),
        value => Ok(value),
    }
}

pub(crate) fn get_i64(state: &Value, key: &str) -> Option<i64> {
    state.get(key).and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
    })
}

pub(crate) fn get_bool(state: &Value, key: &str) -> bool {
    state.get(key).and_then(Value::as_bool).unwrap_or_default()
}

/// Set a top-level attribute, turning a null state into an object.
pub(crate) fn set(state: &mut Value, key: &str, value: impl Into<Value>) {
    if !state.is_object() {
        *state = Value::Object(Map::new());
    }
    if let Value::Object(map) = state {
        map.insert(key.to_string(), value.into());
    }
}

/// Whether `key` differs between two states; empty and unset are equal.
pub(crate) fn changed(prior: &Value, planned: &Value, key: &str) -> bool {
    let normalize = |v: Option<&Value>| match v {
        None | Some(Value::Null) => Value::Null,
        Some(Value::String(s)) if s.is_empty() => Value::Null,
        Some(Value::Array(items)) if items.is_empty() => Value::Null,
        Some(other) => other.clone(),
    };
    normalize(prior.get(key)) != normalize(planned.get(key))
}

/// The project used for imports.
pub(crate) fn import_project(config: &Config) -> Result<String, ProviderError> {
    config
        .project_id
        .clone()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            ProviderError::Configuration(
                "project_id must be set for the resource import".to_string(),
            )
        })
}
