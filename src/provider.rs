//! The AEP provider.
//!
//! [`AepProvider`] serves one resource type and one collection data source
//! per resource kind found in the interface description. Host state is
//! converted into [`Resource`]s, sent through [`Operations`], and converted
//! back.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{HttpExecutor, RequestExecutor};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::openapi::OpenApi;
use crate::operations::Operations;
use crate::plan::{plan_resource, PlanResult};
use crate::resource_schema::{ResourceRegistry, ResourceSchema, RESULTS_ATTRIBUTE};
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::{ImportedResource, ProviderService};
use crate::validation::validate;
use crate::value::Resource;

/// A provider for one AEP-style API.
pub struct AepProvider<E: RequestExecutor = HttpExecutor> {
    document: OpenApi,
    registry: ResourceRegistry,
    provider_prefix: String,
    config: RwLock<ProviderConfig>,
    executor: E,
}

impl AepProvider<HttpExecutor> {
    /// Load the interface description named by `config` and build a provider
    /// that talks HTTP.
    pub async fn from_config(config: ProviderConfig) -> Result<Self, ProviderError> {
        let document = OpenApi::load(&config.openapi_path).await?;
        Self::new(document, config, HttpExecutor::new()?)
    }

    /// Like [`AepProvider::from_config`], reading the configuration from the
    /// environment.
    pub async fn from_env() -> Result<Self, ProviderError> {
        Self::from_config(ProviderConfig::from_env()?).await
    }
}

impl<E: RequestExecutor> AepProvider<E> {
    /// Build a provider from a parsed document.
    pub fn new(document: OpenApi, config: ProviderConfig, executor: E) -> Result<Self, ProviderError> {
        let registry = ResourceRegistry::from_document(&document, &config.path_prefix)?;
        if registry.is_empty() {
            warn!("Interface description declares no usable resources");
        }
        info!(resources = registry.len(), prefix = %config.provider_prefix, "Provider initialized");

        Ok(Self {
            document,
            registry,
            provider_prefix: config.provider_prefix.clone(),
            config: RwLock::new(config),
            executor,
        })
    }

    /// The derived resource schemas.
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// The request executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// The base URL requests are currently made against.
    pub async fn base_url(&self) -> Result<String, ProviderError> {
        self.config.read().await.base_url(&self.document)
    }

    fn resource_schema(&self, resource_type: &str) -> Result<&Arc<ResourceSchema>, ProviderError> {
        self.registry
            .resource_type(&self.provider_prefix, resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn collection_schema(&self, data_source_type: &str) -> Result<&Arc<ResourceSchema>, ProviderError> {
        self.registry
            .collection_type(&self.provider_prefix, data_source_type)
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))
    }

    async fn create_resource(
        &self,
        resource_type: &str,
        planned_state: &serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let schema = self.resource_schema(resource_type)?;
        let planned = Resource::from_state(schema.clone(), planned_state)?;
        let base_url = self.base_url().await?;
        let created = Operations::new(&self.executor, &base_url)
            .create(&planned)
            .await?;
        Ok(created.to_state())
    }

    async fn read_resource(
        &self,
        resource_type: &str,
        current_state: &serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let schema = self.resource_schema(resource_type)?;
        let current = Resource::from_state(schema.clone(), current_state)?;
        let base_url = self.base_url().await?;
        let refreshed = Operations::new(&self.executor, &base_url)
            .read(&current)
            .await?;
        Ok(refreshed
            .map(|resource| resource.to_state())
            .unwrap_or(serde_json::Value::Null))
    }

    async fn update_resource(
        &self,
        resource_type: &str,
        prior_state: &serde_json::Value,
        planned_state: &serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let schema = self.resource_schema(resource_type)?;
        let prior = Resource::from_state(schema.clone(), prior_state)?;
        let planned = Resource::from_state(schema.clone(), planned_state)?;
        let base_url = self.base_url().await?;
        let updated = Operations::new(&self.executor, &base_url)
            .update(&prior, &planned)
            .await?;
        Ok(updated.to_state())
    }

    async fn delete_resource(
        &self,
        resource_type: &str,
        current_state: &serde_json::Value,
    ) -> Result<(), ProviderError> {
        let schema = self.resource_schema(resource_type)?;
        let current = Resource::from_state(schema.clone(), current_state)?;
        let base_url = self.base_url().await?;
        Operations::new(&self.executor, &base_url)
            .delete(&current)
            .await
    }

    async fn list_collection(
        &self,
        data_source_type: &str,
        config: &serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let schema = self.collection_schema(data_source_type)?;
        if let Some(diagnostic) = validate(&schema.collection_schema(), config)
            .into_iter()
            .find(|d| d.severity == DiagnosticSeverity::Error)
        {
            return Err(ProviderError::Validation(diagnostic.summary));
        }

        let mut scope = BTreeMap::new();
        let mut state = serde_json::Map::new();
        for parameter in schema.parameters() {
            if let Some(value) = config.get(&parameter.internal_name).and_then(|v| v.as_str()) {
                scope.insert(parameter.internal_name.clone(), value.to_string());
                state.insert(
                    parameter.internal_name.clone(),
                    serde_json::Value::String(value.to_string()),
                );
            }
        }

        let base_url = self.base_url().await?;
        let resources = Operations::new(&self.executor, &base_url)
            .list(schema, &scope)
            .await?;
        state.insert(
            RESULTS_ATTRIBUTE.to_string(),
            serde_json::Value::Array(resources.iter().map(Resource::to_state).collect()),
        );
        Ok(serde_json::Value::Object(state))
    }
}

#[async_trait::async_trait]
impl<E: RequestExecutor> ProviderService for AepProvider<E> {
    fn schema(&self) -> ProviderSchema {
        self.registry
            .provider_schema(&self.provider_prefix)
            .with_provider_config(ProviderConfig::schema())
    }

    #[instrument(skip(self, config), name = "provider.configure")]
    async fn configure(&self, config: serde_json::Value) -> Result<Vec<Diagnostic>, ProviderError> {
        debug!("Configure called");
        let diagnostics = validate(&ProviderConfig::schema(), &config);
        if !diagnostics.is_empty() {
            warn!(diagnostics = diagnostics.len(), "Configure completed with errors");
            return Ok(diagnostics);
        }

        let mut settings = self.config.write().await;
        let mut updated = settings.clone();
        updated.apply(&config)?;
        match updated.base_url(&self.document) {
            Ok(base_url) => {
                *settings = updated;
                info!(%base_url, "Configure completed successfully");
                Ok(vec![])
            },
            Err(err) => {
                warn!(error = %err, "Configure completed with errors");
                Ok(vec![Diagnostic::from(err).with_attribute("server_url")])
            },
        }
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = self.resource_schema(resource_type)?;
        let diagnostics = validate(&schema.host_schema(), &config);
        debug!(diagnostics = diagnostics.len(), "ValidateResourceConfig completed");
        Ok(diagnostics)
    }

    #[instrument(skip(self, prior_state, proposed_state), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<serde_json::Value>,
        proposed_state: serde_json::Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = self.resource_schema(resource_type)?;
        match plan_resource(schema, prior_state.as_ref(), &proposed_state) {
            Ok(result) => {
                info!(
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "Plan completed"
                );
                Ok(result)
            },
            Err(err) => {
                error!(error = %err, "Plan failed");
                Err(err)
            },
        }
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(
        &self,
        resource_type: &str,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        info!("Create called");
        self.create_resource(resource_type, &planned_state)
            .await
            .inspect_err(|err| error!(error = %err, "Create failed"))
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        debug!("Read called");
        self.read_resource(resource_type, &current_state)
            .await
            .inspect_err(|err| error!(error = %err, "Read failed"))
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: serde_json::Value,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        info!("Update called");
        self.update_resource(resource_type, &prior_state, &planned_state)
            .await
            .inspect_err(|err| error!(error = %err, "Update failed"))
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<(), ProviderError> {
        info!("Delete called");
        self.delete_resource(resource_type, &current_state)
            .await
            .inspect_err(|err| error!(error = %err, "Delete failed"))
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let schema = self.resource_schema(resource_type)?;
        let base_url = self.base_url().await?;
        let imported = Operations::new(&self.executor, &base_url)
            .import(schema, id)
            .await
            .inspect_err(|err| error!(error = %err, "Import failed"))?;
        info!("Import completed successfully");
        Ok(vec![ImportedResource::new(resource_type, imported.to_state())])
    }

    #[instrument(skip(self, config), name = "provider.read_data_source")]
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        debug!("ReadDataSource called");
        self.list_collection(data_source_type, &config)
            .await
            .inspect_err(|err| error!(error = %err, "ReadDataSource failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        assert_has_errors, assert_no_errors, assert_plan_creates, assert_plan_replaces,
        InMemoryApi, ProviderTester,
    };
    use serde_json::json;

    const BASE: &str = "http://api.test";

    fn provider() -> AepProvider<InMemoryApi> {
        let document =
            OpenApi::from_json(include_str!("../tests/fixtures/bookstore.json")).unwrap();
        let config = ProviderConfig::new("bookstore.json").with_server_url(BASE);
        AepProvider::new(document, config, InMemoryApi::new(BASE)).unwrap()
    }

    fn book_config(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "publisher": "/publishers/1",
            "price": 12.5,
            "published": true,
            "edition": 1,
            "isbn": ["978-0"],
            "author": [{"first_name": "Frank", "last_name": "Herbert"}],
            "metadata": "{\"genre\":\"sf\"}"
        })
    }

    #[test]
    fn test_schema_and_metadata() {
        let tester = ProviderTester::new(provider());
        let schema = tester.schema();
        assert!(schema.provider.block.attributes.contains_key("server_url"));
        assert_eq!(
            tester.resource_types(),
            vec!["aep_book".to_string(), "aep_publisher".to_string()]
        );
        assert_eq!(
            tester.data_source_types(),
            vec!["aep_books".to_string(), "aep_publishers".to_string()]
        );
    }

    #[tokio::test]
    async fn test_configure_overrides_server_url() {
        let tester = ProviderTester::new(provider());
        tester
            .configure(json!({"server_url": "http://other.test"}))
            .await
            .unwrap();
        assert_eq!(tester.provider().base_url().await.unwrap(), "http://other.test");
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_url() {
        let provider = provider();
        let diagnostics = provider
            .configure(json!({"server_url": "::not a url::"}))
            .await
            .unwrap();
        assert_has_errors(&diagnostics);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("server_url"));
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let provider = provider();
        let diagnostics = provider
            .validate_resource_config("aep_book", book_config("dune"))
            .await
            .unwrap();
        assert_no_errors(&diagnostics);

        let diagnostics = provider
            .validate_resource_config("aep_book", json!({"publisher": "1"}))
            .await
            .unwrap();
        assert_has_errors(&diagnostics);

        assert!(matches!(
            provider.validate_resource_config("aep_shelf", json!({})).await,
            Err(ProviderError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn test_publisher_lifecycle() {
        let tester = ProviderTester::new(provider());

        let plan = tester
            .plan_create("aep_publisher", json!({"description": "pub-description"}))
            .await
            .unwrap();
        assert_plan_creates(&plan);

        let state = tester
            .lifecycle_crud(
                "aep_publisher",
                json!({"description": "pub-description"}),
                json!({"description": "updated"}),
            )
            .await
            .unwrap();
        assert_eq!(state["id"], "1");
        assert_eq!(state["description"], "updated");
        assert_eq!(state["path"], "/publishers/1");

        let gone = tester.read("aep_publisher", state).await.unwrap();
        assert_eq!(gone, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_book_create_and_list() {
        let tester = ProviderTester::new(provider());
        let created = tester.create("aep_book", book_config("dune")).await.unwrap();
        assert_eq!(created["id"], "dune");
        assert_eq!(created["author"][0]["last_name"], "Herbert");
        assert_eq!(created["metadata"], "{\"genre\":\"sf\"}");

        tester.create("aep_book", book_config("emma")).await.unwrap();

        let listed = tester
            .read_data_source("aep_books", json!({"publisher": "/publishers/1"}))
            .await
            .unwrap();
        assert_eq!(listed["publisher"], "/publishers/1");
        assert_eq!(listed["results"].as_array().unwrap().len(), 2);
        assert_eq!(listed["results"][1]["id"], "emma");
        assert_eq!(listed["results"][1]["publisher"], "/publishers/1");

        let err = tester.read_data_source("aep_books", json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_parent_change_requires_replace() {
        let tester = ProviderTester::new(provider());
        let created = tester.create("aep_book", book_config("dune")).await.unwrap();

        let mut proposed = book_config("dune");
        proposed["publisher"] = json!("/publishers/2");
        let plan = tester.plan_update("aep_book", created, proposed).await.unwrap();
        assert_plan_replaces(&plan);
    }

    #[tokio::test]
    async fn test_import() {
        let tester = ProviderTester::new(provider());
        tester.create("aep_book", book_config("dune")).await.unwrap();

        let imported = tester
            .import_resource("aep_book", "/publishers/1/books/dune")
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, "aep_book");
        assert_eq!(imported[0].state["publisher"], "/publishers/1");
        assert_eq!(imported[0].state["price"], json!(12.5));
    }

    #[tokio::test]
    async fn test_unknown_types() {
        let tester = ProviderTester::new(provider());
        assert!(matches!(
            tester.create("aep_shelf", json!({})).await,
            Err(ProviderError::UnknownResource(_))
        ));
        assert!(matches!(
            tester.read_data_source("aep_shelves", json!({})).await,
            Err(ProviderError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let tester = ProviderTester::new(provider());
        tester.create("aep_book", book_config("dune")).await.unwrap();
        let err = tester.create("aep_book", book_config("dune")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Remote(_)));
        assert!(err.message().contains("already exists"));
    }
}
