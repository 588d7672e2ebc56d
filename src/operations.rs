//! Create, read, update, delete and list against the remote API.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as Json;
use tracing::{debug, info, instrument};
use url::Url;

use crate::client::{Method, RequestExecutor};
use crate::convert::{from_wire_json, parameters, request_body};
use crate::error::ProviderError;
use crate::path::{join_url, last_segment, reconcile_identifier};
use crate::resource_schema::{ResourceSchema, IDENTITY_ATTRIBUTE, PATH_FIELD};
use crate::value::{Resource, Value};

const RESULTS_FIELD: &str = "results";
const NEXT_PAGE_TOKEN_FIELD: &str = "next_page_token";
const PAGE_TOKEN_PARAM: &str = "page_token";

/// Resource operations bound to an executor and a base URL.
pub struct Operations<'a> {
    executor: &'a dyn RequestExecutor,
    base_url: &'a str,
}

impl<'a> Operations<'a> {
    /// Create operations against `base_url`.
    pub fn new(executor: &'a dyn RequestExecutor, base_url: &'a str) -> Self {
        Self { executor, base_url }
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        let joined = join_url(self.base_url, path);
        Url::parse(&joined)
            .map_err(|e| ProviderError::Path(format!("invalid resource URL '{}': {}", joined, e)))
    }

    /// Create a resource and return its canonical state.
    ///
    /// The server's create response is followed by a read of the returned
    /// path so the state reflects the full representation.
    #[instrument(skip_all, fields(resource = %planned.schema.metadata.singular))]
    pub async fn create(&self, planned: &Resource) -> Result<Resource, ProviderError> {
        let metadata = &planned.schema.metadata;
        let collection = metadata.pattern.build(&parameters(planned)?, None)?;
        let body = request_body(planned)?;

        let mut url = self.url(&collection)?;
        if metadata.supports_user_settable_create {
            if let Some(id) = planned.identifier() {
                url.query_pairs_mut().append_pair(IDENTITY_ATTRIBUTE, id);
            }
        }

        let created = self
            .executor
            .execute(Method::Post, url.as_str(), Some(&body))
            .await?;
        let path = response_path(&created)?;
        info!(%path, "Created resource");

        let current = self
            .executor
            .execute(Method::Get, self.url(path)?.as_str(), None)
            .await?;
        state_from_response(&current, planned)
    }

    /// Read a resource. A resource that no longer exists yields `None`.
    #[instrument(skip_all, fields(resource = %current.schema.metadata.singular))]
    pub async fn read(&self, current: &Resource) -> Result<Option<Resource>, ProviderError> {
        let path = instance_path(current)?;
        match self
            .executor
            .execute(Method::Get, self.url(&path)?.as_str(), None)
            .await
        {
            Ok(json) => state_from_response(&json, current).map(Some),
            Err(ProviderError::NotFound(_)) => {
                info!(%path, "Resource no longer exists");
                Ok(None)
            },
            Err(err) => Err(err),
        }
    }

    /// Update a resource in place and return its refreshed state.
    #[instrument(skip_all, fields(resource = %planned.schema.metadata.singular))]
    pub async fn update(&self, prior: &Resource, planned: &Resource) -> Result<Resource, ProviderError> {
        let path = instance_path(prior)?;
        let body = request_body(planned)?;

        let mut basis = planned.clone();
        for attribute in prior.schema.attributes.iter() {
            if attribute.parameter || attribute.internal_name == IDENTITY_ATTRIBUTE {
                if let Some(value) = prior.values.get(&attribute.internal_name) {
                    basis
                        .values
                        .entry(attribute.internal_name.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }

        self.executor
            .execute(Method::Patch, self.url(&path)?.as_str(), Some(&body))
            .await?;
        info!(%path, "Updated resource");

        let current = self
            .executor
            .execute(Method::Get, self.url(&path)?.as_str(), None)
            .await?;
        state_from_response(&current, &basis)
    }

    /// Delete a resource. Deleting one that is already gone succeeds.
    #[instrument(skip_all, fields(resource = %current.schema.metadata.singular))]
    pub async fn delete(&self, current: &Resource) -> Result<(), ProviderError> {
        let path = instance_path(current)?;
        match self
            .executor
            .execute(Method::Delete, self.url(&path)?.as_str(), None)
            .await
        {
            Ok(_) => {
                info!(%path, "Deleted resource");
                Ok(())
            },
            Err(ProviderError::NotFound(_)) => {
                debug!(%path, "Resource already deleted");
                Ok(())
            },
            Err(err) => Err(err),
        }
    }

    /// List every resource in a collection.
    ///
    /// `scope` holds the parent parameters; they are attached to each element
    /// because element bodies do not carry them. Pages are followed until the
    /// server stops returning a page token.
    #[instrument(skip_all, fields(resource = %schema.metadata.singular))]
    pub async fn list(
        &self,
        schema: &Arc<ResourceSchema>,
        scope: &BTreeMap<String, String>,
    ) -> Result<Vec<Resource>, ProviderError> {
        let collection = schema.metadata.pattern.build(scope, None)?;
        let mut resources = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(&collection)?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair(PAGE_TOKEN_PARAM, token);
            }
            let page = self.executor.execute(Method::Get, url.as_str(), None).await?;

            for element in list_elements(&page)? {
                let path = response_path(element)?;
                let mut resource = from_wire_json(element, schema, None)?;
                for parameter in schema.parameters() {
                    if let Some(value) = scope.get(&parameter.internal_name) {
                        resource
                            .values
                            .insert(parameter.internal_name.clone(), Value::String(value.clone()));
                    }
                }
                resource.values.insert(
                    IDENTITY_ATTRIBUTE.to_string(),
                    Value::String(last_segment(path).to_string()),
                );
                resources.push(resource);
            }

            page_token = page
                .get(NEXT_PAGE_TOKEN_FIELD)
                .and_then(Json::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        debug!(count = resources.len(), "Listed resources");
        Ok(resources)
    }

    /// Import a resource by its canonical path.
    #[instrument(skip(self, schema), fields(resource = %schema.metadata.singular))]
    pub async fn import(&self, schema: &Arc<ResourceSchema>, path: &str) -> Result<Resource, ProviderError> {
        let (scope, identifier) = schema.metadata.pattern.match_path(path).ok_or_else(|| {
            ProviderError::Path(format!(
                "path '{}' does not match pattern '{}'",
                path, schema.metadata.pattern
            ))
        })?;

        let mut resource = Resource::new(schema.clone());
        for (name, value) in scope {
            resource.values.insert(name, Value::String(value));
        }
        resource
            .values
            .insert(IDENTITY_ATTRIBUTE.to_string(), Value::String(identifier));

        self.read(&resource)
            .await?
            .ok_or_else(|| ProviderError::NotFound(path.to_string()))
    }
}

/// Instance path of a resource whose parameters and identifier are known.
pub fn instance_path(resource: &Resource) -> Result<String, ProviderError> {
    let identifier = resource.identifier().ok_or_else(|| {
        ProviderError::Path(format!(
            "{} has no identifier in state",
            resource.schema.metadata.singular
        ))
    })?;
    resource
        .schema
        .metadata
        .pattern
        .build(&parameters(resource)?, Some(last_segment(identifier)))
}

/// Convert a response into state, reconciling the identifier against `prior`.
pub fn state_from_response(json: &Json, prior: &Resource) -> Result<Resource, ProviderError> {
    let path = response_path(json)?;
    let identifier = reconcile_identifier(prior.identifier(), path)?;
    let mut resource = from_wire_json(json, &prior.schema, Some(prior))?;
    resource
        .values
        .insert(IDENTITY_ATTRIBUTE.to_string(), Value::String(identifier));
    Ok(resource)
}

fn response_path(json: &Json) -> Result<&str, ProviderError> {
    json.get(PATH_FIELD)
        .and_then(Json::as_str)
        .filter(|path| !path.is_empty())
        .ok_or_else(|| ProviderError::Path("response has no path field".to_string()))
}

fn list_elements(page: &Json) -> Result<&[Json], ProviderError> {
    match page {
        Json::Array(items) => Ok(items),
        Json::Object(fields) => match fields.get(RESULTS_FIELD) {
            Some(Json::Array(items)) => Ok(items),
            None | Some(Json::Null) => Ok(&[]),
            Some(_) => Err(ProviderError::Conversion(
                "list response 'results' must be an array".to_string(),
            )),
        },
        Json::Null => Ok(&[]),
        _ => Err(ProviderError::Conversion(
            "list response must be an array or an object".to_string(),
        )),
    }
}
