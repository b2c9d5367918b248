//! The Selectel provider: dispatches host operations to resource and data
//! source handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::data_sources::{self, DataSource};
use crate::error::ProviderError;
use crate::resources::{self, OperationContext, Resource};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation::validate;

/// Provider serving Selectel dedicated servers and scheduled backups.
///
/// The configuration is set by [`ProviderService::configure`] and shared by
/// all later operations. [`ProviderService::stop`] cancels every in-flight
/// wait and refuses new operations.
pub struct SelectelProvider {
    config: RwLock<Option<Arc<Config>>>,
    shutdown: CancellationToken,
    resources: HashMap<&'static str, Arc<dyn Resource>>,
    data_sources: HashMap<&'static str, Arc<dyn DataSource>>,
}

impl SelectelProvider {
    pub fn new() -> Self {
        Self {
            config: RwLock::new(None),
            shutdown: CancellationToken::new(),
            resources: resources::all()
                .into_iter()
                .map(|r| (r.type_name(), r))
                .collect(),
            data_sources: data_sources::all()
                .into_iter()
                .map(|d| (d.type_name(), d))
                .collect(),
        }
    }

    /// A provider that is already configured.
    pub fn with_config(config: Config) -> Self {
        Self {
            config: RwLock::new(Some(Arc::new(config))),
            ..Self::new()
        }
    }

    fn resource(&self, resource_type: &str) -> Result<Arc<dyn Resource>, ProviderError> {
        self.resources
            .get(resource_type)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn data_source(&self, data_source_type: &str) -> Result<Arc<dyn DataSource>, ProviderError> {
        self.data_sources
            .get(data_source_type)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))
    }

    /// Context of one operation, cancelled when the provider stops.
    async fn context(&self) -> Result<OperationContext, ProviderError> {
        if self.shutdown.is_cancelled() {
            return Err(ProviderError::Cancelled("provider is stopped".to_string()));
        }
        let config = self.config.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("provider is not configured".to_string())
        })?;
        Ok(OperationContext {
            config,
            cancel: self.shutdown.child_token(),
        })
    }
}

impl Default for SelectelProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SelectelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut resources: Vec<_> = self.resources.keys().collect();
        resources.sort();
        let mut data_sources: Vec<_> = self.data_sources.keys().collect();
        data_sources.sort();
        f.debug_struct("SelectelProvider")
            .field("resources", &resources)
            .field("data_sources", &data_sources)
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Log how an operation ended and pass its result through.
fn log_outcome<T>(
    operation: &str,
    type_name: &str,
    result: Result<T, ProviderError>,
) -> Result<T, ProviderError> {
    match &result {
        Ok(_) => info!(type_name, "{} completed successfully", operation),
        Err(e) => error!(type_name, error = %e, "{} failed", operation),
    }
    result
}

#[async_trait::async_trait]
impl ProviderService for SelectelProvider {
    fn schema(&self) -> ProviderSchema {
        let schema = ProviderSchema::new().with_provider_config(Config::schema());
        let schema = self
            .resources
            .iter()
            .fold(schema, |s, (name, r)| s.with_resource(*name, r.schema()));
        self.data_sources
            .iter()
            .fold(schema, |s, (name, d)| s.with_data_source(*name, d.schema()))
    }

    #[instrument(skip_all, name = "provider.validate_provider_config")]
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&Config::schema(), &config))
    }

    #[instrument(skip_all, name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        debug!("Configure called");
        let diagnostics = validate(&Config::schema(), &config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            warn!(diagnostics = diagnostics.len(), "Configure completed with errors");
            return Ok(diagnostics);
        }

        let config = Config::from_value(&config).inspect_err(|e| {
            error!(error = %e, "Configure failed");
        })?;
        info!(
            servers_endpoint = %config.servers_endpoint,
            backup_endpoint = %config.backup_endpoint,
            project_id = config.project_id.as_deref().unwrap_or_default(),
            "Provider configured"
        );
        *self.config.write().await = Some(Arc::new(config));
        Ok(diagnostics)
    }

    #[instrument(skip_all, name = "provider.stop")]
    async fn stop(&self) -> Result<(), ProviderError> {
        info!("Stop called");
        self.shutdown.cancel();
        Ok(())
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = validate(&self.resource(resource_type)?.schema(), &config);
        if !diagnostics.is_empty() {
            warn!(diagnostics = diagnostics.len(), "Resource config has problems");
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, state), name = "provider.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let current = self.resource(resource_type)?.schema().version;
        if u64::try_from(version).map_or(true, |v| v > current) {
            return Err(ProviderError::InvalidRequest(format!(
                "state version {} of {} is newer than the schema version {}",
                version, resource_type, current
            )));
        }
        Ok(state)
    }

    #[instrument(skip(self, prior_state, proposed_state, _config), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = self.resource(resource_type)?.schema();
        let result = PlanResult::diff(&schema, prior_state.as_ref(), proposed_state);
        info!(
            changes = result.changes.len(),
            requires_replace = result.requires_replace,
            "Plan completed"
        );
        Ok(result)
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let handler = self.resource(resource_type)?;
        let ctx = self.context().await?;
        log_outcome("Create", resource_type, handler.create(&ctx, planned_state).await)
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let handler = self.resource(resource_type)?;
        let ctx = self.context().await?;
        let result = handler.read(&ctx, current_state).await;
        if let Ok(Value::Null) = &result {
            info!("Resource no longer exists");
        }
        result.inspect_err(|e| error!(error = %e, "Read failed"))
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let handler = self.resource(resource_type)?;
        let ctx = self.context().await?;
        log_outcome(
            "Update",
            resource_type,
            handler.update(&ctx, prior_state, planned_state).await,
        )
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let handler = self.resource(resource_type)?;
        let ctx = self.context().await?;
        log_outcome("Delete", resource_type, handler.delete(&ctx, current_state).await)
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let handler = self.resource(resource_type)?;
        let ctx = self.context().await?;
        let state = log_outcome("Import", resource_type, handler.import(&ctx, id).await)?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    #[instrument(skip(self, config), name = "provider.validate_data_source_config")]
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&self.data_source(data_source_type)?.schema(), &config))
    }

    #[instrument(skip(self, config), name = "provider.read_data_source")]
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let handler = self.data_source(data_source_type)?;
        let ctx = self.context().await?;
        log_outcome("ReadDataSource", data_source_type, handler.read(&ctx, config).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_config(server: &MockServer) -> Value {
        json!({
            "auth_token": "test-token",
            "servers_endpoint": server.uri(),
            "backup_endpoint": server.uri(),
        })
    }

    #[test]
    fn test_schema_lists_everything() {
        let provider = SelectelProvider::new();
        let schema = provider.schema();

        assert!(schema.provider.attribute("auth_token").is_some());
        assert!(schema.resources.contains_key("selectel_servers_server_v1"));
        assert!(schema.resources.contains_key("selectel_cloudbackup_plan_v2"));
        assert_eq!(schema.data_sources.len(), 4);

        let mut metadata = provider.metadata();
        metadata.resources.sort();
        assert_eq!(
            metadata.resources,
            vec!["selectel_cloudbackup_plan_v2", "selectel_servers_server_v1"]
        );
    }

    #[tokio::test]
    async fn test_operations_require_configure() {
        let provider = SelectelProvider::new();
        let err = provider
            .read("selectel_cloudbackup_plan_v2", json!({"id": "plan-1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_unknown_types_are_rejected() {
        let provider = SelectelProvider::new();
        let err = provider
            .create("selectel_vpc_project_v2", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = provider
            .read_data_source("selectel_vpc_project_v2", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_configure_reports_invalid_block() {
        let provider = SelectelProvider::new();
        let diagnostics = provider
            .configure(json!({"auth_token": 42}))
            .await
            .unwrap();
        assert!(diagnostics.iter().any(Diagnostic::is_error));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("auth_token"));

        let err = provider
            .read("selectel_cloudbackup_plan_v2", json!({"id": "plan-1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_plan_marks_project_change_as_replace() {
        let provider = SelectelProvider::new();
        let prior = json!({
            "id": "plan-1", "project_id": "a", "name": "daily", "max_backups": 3,
            "resources": ["vol-1"], "status": "started"
        });
        let mut proposed = prior.clone();
        proposed["project_id"] = json!("b");
        proposed["status"] = Value::Null;

        let result = provider
            .plan("selectel_cloudbackup_plan_v2", Some(prior), proposed, json!({}))
            .await
            .unwrap();
        assert!(result.requires_replace);
        assert_eq!(result.planned_state["status"], "started");
    }

    #[tokio::test]
    async fn test_upgrade_rejects_newer_state() {
        let provider = SelectelProvider::new();
        let state = json!({"id": "plan-1"});
        assert_eq!(
            provider
                .upgrade_resource_state("selectel_cloudbackup_plan_v2", 0, state.clone())
                .await
                .unwrap(),
            state
        );
        assert!(provider
            .upgrade_resource_state("selectel_cloudbackup_plan_v2", 5, state)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_read_data_source_after_configure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/location"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [{"uuid": "loc-1", "name": "MSK-2"}]
            })))
            .mount(&server)
            .await;

        let provider = SelectelProvider::new();
        let diagnostics = provider.configure(provider_config(&server)).await.unwrap();
        assert!(diagnostics.is_empty());

        let state = provider
            .read_data_source("selectel_servers_location_v1", json!({"project_id": "proj"}))
            .await
            .unwrap();
        assert_eq!(state["locations"][0]["id"], "loc-1");
    }

    #[tokio::test]
    async fn test_import_wraps_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proj/plans/plan-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "plan-1", "name": "daily", "backup_mode": "full", "max_backups": 3,
                "schedule_type": "crontab", "schedule_pattern": "0 0 * * *",
                "resources": [{"id": "vol-1", "type": "OS::Cinder::Volume"}],
                "status": "started"
            })))
            .mount(&server)
            .await;

        let mut config = provider_config(&server);
        config["project_id"] = json!("proj");
        let provider = SelectelProvider::new();
        provider.configure(config).await.unwrap();

        let imported = provider
            .import_resource("selectel_cloudbackup_plan_v2", "plan-1")
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, "selectel_cloudbackup_plan_v2");
        assert_eq!(imported[0].state["resources"], json!(["vol-1"]));
    }

    #[tokio::test]
    async fn test_stop_refuses_new_operations() {
        let server = MockServer::start().await;
        let provider = SelectelProvider::new();
        provider.configure(provider_config(&server)).await.unwrap();
        provider.stop().await.unwrap();

        let err = provider
            .delete("selectel_servers_server_v1", json!({"id": "res-1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_stop_aborts_running_wait() {
        let server = MockServer::start().await;
        let plan = json!({
            "id": "plan-1", "name": "daily", "backup_mode": "full", "max_backups": 3,
            "schedule_type": "crontab", "schedule_pattern": "0 0 * * *",
            "resources": [{"id": "vol-1", "type": "OS::Cinder::Volume"}],
            "status": "suspended"
        });
        Mock::given(method("POST"))
            .and(path("/proj/plans"))
            .respond_with(ResponseTemplate::new(201).set_body_json(plan.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proj/plans/plan-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(plan))
            .mount(&server)
            .await;

        let provider = Arc::new(SelectelProvider::new());
        provider.configure(provider_config(&server)).await.unwrap();

        let running = Arc::clone(&provider);
        let create = tokio::spawn(async move {
            running
                .create(
                    "selectel_cloudbackup_plan_v2",
                    json!({
                        "project_id": "proj", "name": "daily", "backup_mode": "full",
                        "max_backups": 3, "schedule_type": "crontab",
                        "schedule_pattern": "0 0 * * *", "resources": ["vol-1"]
                    }),
                )
                .await
        });

        // The first status fetch puts the wait to sleep for a full poll interval.
        while !server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .any(|r| r.method.as_str() == "GET")
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        provider.stop().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), create)
            .await
            .expect("stop did not end the wait")
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }
}
