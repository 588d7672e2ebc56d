//! Testing utilities.
//!
//! [`ProviderTester`] drives a [`ProviderService`] the way a host would, and
//! [`InMemoryApi`] is a [`RequestExecutor`] that behaves like a small AEP
//! server so providers can be exercised without a network.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_aep::config::ProviderConfig;
//! use hemmer_provider_aep::openapi::OpenApi;
//! use hemmer_provider_aep::testing::{InMemoryApi, ProviderTester};
//! use hemmer_provider_aep::AepProvider;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let document = OpenApi::from_json(r#"{
//!     "servers": [{"url": "http://api.test"}],
//!     "components": {"schemas": {"shelf": {
//!         "type": "object",
//!         "x-aep-resource": {"singular": "shelf", "plural": "shelves", "patterns": ["shelves/{shelf}"]},
//!         "properties": {"theme": {"type": "string"}, "path": {"type": "string", "readOnly": true}}
//!     }}}
//! }"#).unwrap();
//! let provider = AepProvider::new(
//!     document,
//!     ProviderConfig::new("inline"),
//!     InMemoryApi::new("http://api.test"),
//! )
//! .unwrap();
//!
//! let tester = ProviderTester::new(provider);
//! let state = tester.create("aep_shelf", json!({"theme": "poetry"})).await.unwrap();
//! assert_eq!(state["id"], "1");
//! assert_eq!(state["path"], "/shelves/1");
//! # });
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};
use url::Url;

use crate::client::{Method, RequestExecutor};
use crate::error::ProviderError;
use crate::plan::PlanResult;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::{ImportedResource, ProviderService};

/// A test harness for provider implementations.
///
/// Wraps a [`ProviderService`] and offers the host's call sequences as
/// single methods.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the sorted resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the sorted data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Configure the provider.
    ///
    /// Returns `Err` with the diagnostics if any of them is an error.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider.plan(resource_type, None, proposed_state).await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), proposed_state)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource by its path.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Read data from a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run plan → create → read and return the state after the read.
    pub async fn lifecycle_create(&self, resource_type: &str, config: Value) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read(resource_type, created_state).await
    }

    /// Run plan → update → read and return the state after the read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read(resource_type, updated_state).await
    }

    /// Run plan → delete.
    pub async fn lifecycle_delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// Run create → update → delete.
    ///
    /// Returns the state after the update (before delete).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created_state = self.lifecycle_create(resource_type, initial_config).await?;
        let updated_state = self
            .lifecycle_update(resource_type, created_state, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated_state.clone())
            .await?;
        Ok(updated_state)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// In-memory API
// =========================================================================

/// A request seen by [`InMemoryApi`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: Method,
    /// Full request URL including the query string.
    pub url: String,
    /// JSON body, if one was sent.
    pub body: Option<Map<String, Value>>,
}

#[derive(Default)]
struct ApiState {
    resources: BTreeMap<String, Map<String, Value>>,
    requests: Vec<RecordedRequest>,
    next_id: u64,
    next_path: Option<String>,
}

/// An in-process AEP server.
///
/// Resources are kept by canonical path. Collection POSTs assign the `id`
/// query parameter or a counter starting at 1, GETs on a collection return
/// `{"results": [...]}` in path order, and PATCH merges top-level keys.
pub struct InMemoryApi {
    base_url: String,
    page_size: Option<usize>,
    state: Mutex<ApiState>,
}

impl InMemoryApi {
    /// Serve resources under `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: None,
            state: Mutex::new(ApiState::default()),
        }
    }

    /// Split collection listings into pages of `page_size` elements.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Make the next create answer with `path` instead of the path it would
    /// have assigned.
    pub fn override_next_path(&self, path: impl Into<String>) {
        self.lock().next_path = Some(path.into());
    }

    /// Seed a resource at `path`.
    pub fn insert(&self, path: impl Into<String>, body: Value) {
        let path = path.into();
        let mut fields = match body {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        fields.insert("path".to_string(), Value::String(path.clone()));
        self.lock().resources.insert(path, fields);
    }

    /// The stored representation at `path`.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.lock().resources.get(path).cloned().map(Value::Object)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ApiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resource_path(&self, url: &Url) -> Result<String, ProviderError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Configuration(format!("invalid base URL: {}", e)))?;
        let path = url
            .path()
            .strip_prefix(base.path().trim_end_matches('/'))
            .ok_or_else(|| ProviderError::NotFound(url.to_string()))?;
        Ok(format!("/{}", path.trim_matches('/')))
    }
}

fn segment_count(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

#[async_trait::async_trait]
impl RequestExecutor for InMemoryApi {
    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Map<String, Value>>,
    ) -> Result<Value, ProviderError> {
        let parsed = Url::parse(url)
            .map_err(|e| ProviderError::Path(format!("invalid URL '{}': {}", url, e)))?;
        let path = self.resource_path(&parsed)?;
        let is_collection = segment_count(&path) % 2 == 1;

        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.cloned(),
        });

        match (method, is_collection) {
            (Method::Post, true) => {
                let id = match query_value(&parsed, "id") {
                    Some(id) => id,
                    None => {
                        state.next_id += 1;
                        state.next_id.to_string()
                    },
                };
                let assigned = format!("{}/{}", path, id);
                let resource_path = state.next_path.take().unwrap_or(assigned);
                if state.resources.contains_key(&resource_path) {
                    return Err(ProviderError::Remote(format!(
                        "resource {} already exists",
                        resource_path
                    )));
                }
                let mut fields = body.cloned().unwrap_or_default();
                fields.insert("path".to_string(), Value::String(resource_path.clone()));
                state.resources.insert(resource_path, fields.clone());
                Ok(Value::Object(fields))
            },
            (Method::Get, true) => {
                let prefix = format!("{}/", path);
                let children: Vec<Value> = state
                    .resources
                    .iter()
                    .filter(|(key, _)| {
                        key.strip_prefix(&prefix)
                            .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
                    })
                    .map(|(_, fields)| Value::Object(fields.clone()))
                    .collect();

                let offset = query_value(&parsed, "page_token")
                    .and_then(|token| token.parse::<usize>().ok())
                    .unwrap_or(0);
                let page_size = self.page_size.unwrap_or(children.len().max(1));
                let end = (offset + page_size).min(children.len());
                let page = children.get(offset..end).unwrap_or_default().to_vec();

                let mut response = Map::new();
                response.insert("results".to_string(), Value::Array(page));
                if end < children.len() {
                    response.insert("next_page_token".to_string(), Value::String(end.to_string()));
                }
                Ok(Value::Object(response))
            },
            (Method::Get, false) => state
                .resources
                .get(&path)
                .cloned()
                .map(Value::Object)
                .ok_or_else(|| ProviderError::NotFound(url.to_string())),
            (Method::Patch, false) => {
                let fields = state
                    .resources
                    .get_mut(&path)
                    .ok_or_else(|| ProviderError::NotFound(url.to_string()))?;
                if let Some(body) = body {
                    for (key, value) in body {
                        fields.insert(key.clone(), value.clone());
                    }
                }
                Ok(Value::Object(fields.clone()))
            },
            (Method::Delete, false) => state
                .resources
                .remove(&path)
                .map(|_| Value::Null)
                .ok_or_else(|| ProviderError::NotFound(url.to_string())),
            (method, _) => Err(ProviderError::Remote(format!(
                "method {} not allowed on {}",
                method, path
            ))),
        }
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes the attribute `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
        .collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain at least one error.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error),
        "Expected at least one error, but got none"
    );
}

/// Assert that diagnostics contain an error whose summary contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error && d.summary.contains(substring)),
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}
