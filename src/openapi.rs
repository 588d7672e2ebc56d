//! Interface description documents.
//!
//! Only the parts of an OpenAPI 3 document the provider needs are modelled:
//! servers, collection POST parameters, and component schemas annotated with
//! the `x-aep-resource` extension.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::error::ProviderError;
use crate::path::PathPattern;

const COMPONENT_SCHEMA_PREFIX: &str = "#/components/schemas/";

/// A schema node: an object, array or scalar, or a reference to one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SchemaNode {
    /// The declared type (`object`, `array`, `string`, `number`, `integer`, `boolean`).
    #[serde(rename = "type", default)]
    pub schema_type: Option<String>,
    /// A `$ref` to another schema in the same document.
    #[serde(rename = "$ref", default)]
    pub reference: Option<String>,
    /// Object properties keyed by wire name.
    #[serde(default)]
    pub properties: BTreeMap<String, SchemaNode>,
    /// Names of required properties.
    #[serde(default)]
    pub required: Vec<String>,
    /// Element schema for arrays.
    #[serde(default)]
    pub items: Option<Box<SchemaNode>>,
    /// Whether the server owns this value.
    #[serde(rename = "readOnly", default)]
    pub read_only: bool,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Resource annotation, present on resource schemas only.
    #[serde(rename = "x-aep-resource", default)]
    pub resource: Option<ResourceAnnotation>,
}

impl SchemaNode {
    /// Create a node of the given type.
    pub fn typed(schema_type: &str) -> Self {
        Self {
            schema_type: Some(schema_type.to_string()),
            ..Default::default()
        }
    }

    /// Create a reference node.
    pub fn reference(target: &str) -> Self {
        Self {
            reference: Some(target.to_string()),
            ..Default::default()
        }
    }

    /// Add a property.
    pub fn with_property(mut self, name: impl Into<String>, node: SchemaNode) -> Self {
        self.properties.insert(name.into(), node);
        self
    }

    /// Mark a property as required.
    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Set the element schema.
    pub fn with_items(mut self, items: SchemaNode) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    /// Mark the node read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Whether `name` is listed as required on this node.
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

/// The `x-aep-resource` extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResourceAnnotation {
    /// Singular resource name, e.g. `book`.
    pub singular: String,
    /// Plural resource name, e.g. `books`.
    pub plural: String,
    /// Resource path patterns; the first one is canonical. Parents are taken
    /// from its placeholders; a `parents` list in the annotation is ignored.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// A server entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Server {
    /// Base URL of the API.
    pub url: String,
}

/// An operation parameter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Parameter location (`query`, `path`, `header`).
    #[serde(rename = "in", default)]
    pub location: String,
}

/// An operation; only its parameters matter here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Operation {
    /// Declared parameters.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

/// Operations on one path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PathItem {
    /// The POST operation, if any.
    #[serde(default)]
    pub post: Option<Operation>,
}

/// Component definitions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Components {
    /// Named schemas.
    #[serde(default)]
    pub schemas: BTreeMap<String, SchemaNode>,
}

/// An OpenAPI document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OpenApi {
    /// Servers declared by the document.
    #[serde(default)]
    pub servers: Vec<Server>,
    /// Paths keyed by template, e.g. `/publishers/{publisher}/books`.
    #[serde(default)]
    pub paths: BTreeMap<String, PathItem>,
    /// Components.
    #[serde(default)]
    pub components: Components,
}

/// A resource kind discovered in a document.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDefinition {
    /// Singular name.
    pub singular: String,
    /// Plural name.
    pub plural: String,
    /// Canonical path pattern.
    pub pattern: PathPattern,
    /// The resource's body schema.
    pub schema: SchemaNode,
    /// Whether the collection POST accepts a caller-supplied `id`.
    pub supports_user_settable_create: bool,
}

impl OpenApi {
    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ProviderError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a JSON document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Configuration(format!(
                "unable to read interface description {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&text)
    }

    /// Load a document from a local path or an `http(s)` URL.
    #[instrument(name = "openapi.load")]
    pub async fn load(location: &str) -> Result<Self, ProviderError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            info!(location, "Fetching interface description");
            let response = reqwest::get(location).await?.error_for_status()?;
            let text = response.text().await?;
            Self::from_json(&text)
        } else {
            info!(location, "Reading interface description");
            Self::from_file(location)
        }
    }

    /// The first declared server URL.
    pub fn server_url(&self) -> Option<&str> {
        self.servers.first().map(|server| server.url.as_str())
    }

    /// Resolve a reference node to the schema it points at.
    ///
    /// Non-reference nodes are returned unchanged. Chains of references are
    /// followed.
    pub fn dereference<'a>(&'a self, node: &'a SchemaNode) -> Result<&'a SchemaNode, ProviderError> {
        let mut current = node;
        let mut hops = 0;
        while let Some(reference) = &current.reference {
            let name = reference
                .strip_prefix(COMPONENT_SCHEMA_PREFIX)
                .ok_or_else(|| ProviderError::Schema(format!("unsupported reference {}", reference)))?;
            current = self
                .components
                .schemas
                .get(name)
                .ok_or_else(|| ProviderError::Schema(format!("ref not found for {}", reference)))?;
            hops += 1;
            if hops > self.components.schemas.len() {
                return Err(ProviderError::Schema(format!(
                    "reference cycle through {}",
                    reference
                )));
            }
        }
        Ok(current)
    }

    /// Discover every annotated resource in the document.
    ///
    /// `path_prefix` is the prefix the document's paths carry in front of the
    /// resource patterns.
    pub fn resources(&self, path_prefix: &str) -> Result<Vec<ResourceDefinition>, ProviderError> {
        let mut definitions = Vec::new();
        for (name, node) in &self.components.schemas {
            let Some(annotation) = &node.resource else {
                continue;
            };
            let pattern_text = annotation.patterns.first().ok_or_else(|| {
                ProviderError::Schema(format!("resource {} declares no path pattern", name))
            })?;
            let pattern = PathPattern::parse(pattern_text)?;

            let collection = format!(
                "{}{}",
                path_prefix.trim_end_matches('/'),
                strip_final_segment(&pattern.to_string())
            );
            let supports_user_settable_create = self
                .paths
                .get(&collection)
                .and_then(|item| item.post.as_ref())
                .map(|post| {
                    post.parameters
                        .iter()
                        .any(|p| p.name == "id" && p.location == "query")
                })
                .unwrap_or(false);

            debug!(
                resource = %annotation.singular,
                pattern = %pattern,
                supports_user_settable_create,
                "Discovered resource"
            );
            definitions.push(ResourceDefinition {
                singular: annotation.singular.clone(),
                plural: annotation.plural.clone(),
                pattern,
                schema: node.clone(),
                supports_user_settable_create,
            });
        }
        Ok(definitions)
    }
}

fn strip_final_segment(path: &str) -> &str {
    path.rsplit_once('/').map(|(head, _)| head).unwrap_or(path)
}
