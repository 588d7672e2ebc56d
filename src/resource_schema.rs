//! Resource schemas derived from an interface description.
//!
//! A [`ResourceSchema`] is built once per resource kind and is immutable
//! afterwards. Attributes are keyed by their internal (state-facing) name,
//! with a reverse index from wire name built at derivation time.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::error::ProviderError;
use crate::openapi::{OpenApi, ResourceDefinition, SchemaNode};
use crate::path::{parameter_name, PathPattern, Segment};
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, NestedBlock, ProviderSchema, Schema,
};

/// Internal name of the resource identity attribute.
pub const IDENTITY_ATTRIBUTE: &str = "id";

/// Wire name of the canonical path field returned by the server.
pub const PATH_FIELD: &str = "path";

/// Wire name of the concurrency-control token, which is never represented.
pub const ETAG_FIELD: &str = "etag";

/// Reference to the well-known dynamically typed value schema.
pub const OPAQUE_VALUE_REF: &str = "#/components/schemas/GoogleProtobufValue";

/// Name of the list attribute on collection data sources.
pub const RESULTS_ATTRIBUTE: &str = "results";

/// The kind of value an attribute holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Text.
    String,
    /// Arbitrary-precision decimal.
    Number,
    /// True or false.
    Boolean,
    /// Whole number.
    Integer,
    /// Object with nested attributes.
    Object,
    /// Ordered list of scalars or objects.
    Array,
}

impl AttributeKind {
    fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "integer" => Some(Self::Integer),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            _ => None,
        }
    }

    /// Whether the kind is a scalar.
    pub fn is_scalar(self) -> bool {
        !matches!(self, Self::Object | Self::Array)
    }

    fn host_type(self) -> Option<AttributeType> {
        match self {
            Self::String => Some(AttributeType::String),
            Self::Number => Some(AttributeType::Number),
            Self::Boolean => Some(AttributeType::Bool),
            Self::Integer => Some(AttributeType::Int64),
            Self::Object | Self::Array => None,
        }
    }
}

/// Schema node for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAttribute {
    /// State-facing name.
    pub internal_name: String,
    /// Key used on the wire.
    pub wire_name: String,
    /// Value kind.
    pub kind: AttributeKind,
    /// Element kind for arrays of scalars.
    pub element_kind: Option<AttributeKind>,
    /// Exactly one of required, optional or computed.
    pub flags: AttributeFlags,
    /// Sourced from the URL path rather than the body.
    pub parameter: bool,
    /// Changing the value replaces the resource.
    pub force_new: bool,
    /// Holds an arbitrary JSON payload encoded as text.
    pub opaque: bool,
    /// Description carried over from the interface description.
    pub description: Option<String>,
    /// Nested attributes for objects and arrays of objects.
    pub nested: Option<AttributeMap>,
}

impl ResourceAttribute {
    fn new(internal_name: String, wire_name: String, kind: AttributeKind) -> Self {
        Self {
            internal_name,
            wire_name,
            kind,
            element_kind: None,
            flags: AttributeFlags::optional(),
            parameter: false,
            force_new: false,
            opaque: false,
            description: None,
            nested: None,
        }
    }

    /// Whether this is an array of objects.
    pub fn is_object_array(&self) -> bool {
        self.kind == AttributeKind::Array && self.nested.is_some()
    }
}

/// Attributes keyed by internal name, with a reverse index by wire name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    attributes: BTreeMap<String, ResourceAttribute>,
    by_wire_name: BTreeMap<String, String>,
}

impl AttributeMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attribute. Two attributes with the same internal name are a
    /// schema error.
    pub fn insert(&mut self, attribute: ResourceAttribute) -> Result<(), ProviderError> {
        if self.attributes.contains_key(&attribute.internal_name) {
            return Err(ProviderError::Schema(format!(
                "duplicate attribute name '{}'",
                attribute.internal_name
            )));
        }
        if !attribute.parameter {
            self.by_wire_name
                .entry(attribute.wire_name.clone())
                .or_insert_with(|| attribute.internal_name.clone());
        }
        self.attributes
            .insert(attribute.internal_name.clone(), attribute);
        Ok(())
    }

    /// Look up an attribute by internal name.
    pub fn get(&self, internal_name: &str) -> Option<&ResourceAttribute> {
        self.attributes.get(internal_name)
    }

    /// Look up a body attribute by wire name.
    pub fn by_wire_name(&self, wire_name: &str) -> Option<&ResourceAttribute> {
        self.by_wire_name
            .get(wire_name)
            .and_then(|name| self.attributes.get(name))
    }

    /// Whether an attribute with this internal name exists.
    pub fn contains(&self, internal_name: &str) -> bool {
        self.attributes.contains_key(internal_name)
    }

    /// Attributes in internal-name order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceAttribute> {
        self.attributes.values()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Per-kind metadata needed to address resources.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceMetadata {
    /// Singular name, used for the resource type.
    pub singular: String,
    /// Plural name, used for the collection data source.
    pub plural: String,
    /// Canonical path pattern.
    pub pattern: PathPattern,
    /// Whether create accepts a caller-supplied identifier.
    pub supports_user_settable_create: bool,
}

/// The schema for one resource kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSchema {
    /// Attributes keyed by internal name.
    pub attributes: AttributeMap,
    /// Addressing metadata.
    pub metadata: ResourceMetadata,
    /// Description of the resource kind.
    pub description: Option<String>,
}

impl ResourceSchema {
    /// Attributes converted to and from response bodies.
    ///
    /// Parameters come from the URL and the identity comes from the canonical
    /// path, so neither is read from a body.
    pub fn body_attributes(&self) -> impl Iterator<Item = &ResourceAttribute> {
        self.attributes
            .iter()
            .filter(|attr| !attr.parameter && attr.internal_name != IDENTITY_ATTRIBUTE)
    }

    /// Parent parameter attributes, in path order.
    pub fn parameters(&self) -> impl Iterator<Item = &ResourceAttribute> {
        self.metadata
            .pattern
            .parent_parameters()
            .into_iter()
            .filter_map(|name| self.attributes.get(&name))
    }

    /// Render the resource as a host schema.
    pub fn host_schema(&self) -> Schema {
        let mut schema = Schema::v0();
        schema.block = render_block(&self.attributes, false);
        if let Some(description) = &self.description {
            schema = schema.with_description(description.clone());
        }
        schema
    }

    /// Render the collection data source: parent parameters plus a computed
    /// `results` list holding every attribute.
    pub fn collection_schema(&self) -> Schema {
        let mut schema = Schema::v0().with_block(
            RESULTS_ATTRIBUTE,
            NestedBlock::list(
                render_block(&self.attributes, true),
                AttributeFlags::computed(),
            ),
        );
        for parameter in self.parameters() {
            schema = schema.with_attribute(
                parameter.internal_name.clone(),
                Attribute::required_string().with_description_opt(parameter.description.as_deref()),
            );
        }
        schema
    }
}

fn render_block(attributes: &AttributeMap, all_computed: bool) -> Block {
    let mut block = Block::new();
    for attr in attributes.iter() {
        let flags = if all_computed {
            AttributeFlags::computed()
        } else {
            attr.flags
        };

        match (&attr.nested, attr.kind) {
            (Some(nested), AttributeKind::Object) => {
                let inner = render_block(nested, all_computed);
                block = block.with_block(attr.internal_name.clone(), NestedBlock::single(inner, flags));
            },
            (Some(nested), _) => {
                let inner = render_block(nested, all_computed);
                block = block.with_block(attr.internal_name.clone(), NestedBlock::list(inner, flags));
            },
            (None, kind) => {
                let attr_type = match kind.host_type() {
                    Some(scalar) => scalar,
                    None => AttributeType::list(
                        attr.element_kind
                            .and_then(AttributeKind::host_type)
                            .unwrap_or(AttributeType::String),
                    ),
                };
                let mut rendered = Attribute::new(attr_type, flags)
                    .with_description_opt(attr.description.as_deref());
                if attr.force_new && !all_computed {
                    rendered = rendered.with_force_new();
                }
                block = block.with_attribute(attr.internal_name.clone(), rendered);
            },
        }
    }
    block
}

/// Convert a wire name to a state-facing identifier.
pub fn to_snake_case(name: &str) -> String {
    static FIRST_CAP: OnceLock<Regex> = OnceLock::new();
    static ALL_CAP: OnceLock<Regex> = OnceLock::new();

    let first_cap =
        FIRST_CAP.get_or_init(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("Valid regex pattern"));
    let all_cap =
        ALL_CAP.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("Valid regex pattern"));

    let snake = first_cap.replace_all(name, "${1}_${2}");
    let snake = all_cap.replace_all(&snake, "${1}_${2}");
    snake
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Derive the schema for one resource kind.
#[instrument(skip_all, fields(resource = %definition.singular))]
pub fn derive(
    definition: &ResourceDefinition,
    document: &OpenApi,
) -> Result<ResourceSchema, ProviderError> {
    let root = document.dereference(&definition.schema)?;
    let mut attributes = derive_properties(root, document)?;

    for segment in &definition.pattern.segments()[..definition.pattern.segments().len() - 1] {
        let Segment::Placeholder(placeholder) = segment else {
            continue;
        };
        let mut attribute = ResourceAttribute::new(
            parameter_name(placeholder),
            placeholder.clone(),
            AttributeKind::String,
        );
        attribute.flags = AttributeFlags::required();
        attribute.parameter = true;
        attribute.force_new = true;
        attributes.insert(attribute)?;
    }

    if !attributes.contains(IDENTITY_ATTRIBUTE) {
        let mut identity = ResourceAttribute::new(
            IDENTITY_ATTRIBUTE.to_string(),
            IDENTITY_ATTRIBUTE.to_string(),
            AttributeKind::String,
        );
        if definition.supports_user_settable_create {
            identity.flags = AttributeFlags::optional();
            identity.force_new = true;
        } else {
            identity.flags = AttributeFlags::computed();
            identity.parameter = true;
        }
        attributes.insert(identity)?;
    }

    debug!(attributes = attributes.len(), "Derived resource schema");
    Ok(ResourceSchema {
        attributes,
        metadata: ResourceMetadata {
            singular: definition.singular.clone(),
            plural: definition.plural.clone(),
            pattern: definition.pattern.clone(),
            supports_user_settable_create: definition.supports_user_settable_create,
        },
        description: root.description.clone(),
    })
}

fn derive_properties(node: &SchemaNode, document: &OpenApi) -> Result<AttributeMap, ProviderError> {
    let mut attributes = AttributeMap::new();
    for (wire_name, property) in &node.properties {
        if wire_name == ETAG_FIELD {
            continue;
        }
        let mut attribute = derive_attribute(wire_name, property, document)?;
        attribute.flags = if wire_name == PATH_FIELD || property.read_only {
            AttributeFlags::computed()
        } else if node.is_required(wire_name) {
            AttributeFlags::required()
        } else {
            AttributeFlags::optional()
        };
        attributes.insert(attribute)?;
    }
    Ok(attributes)
}

fn derive_attribute(
    wire_name: &str,
    property: &SchemaNode,
    document: &OpenApi,
) -> Result<ResourceAttribute, ProviderError> {
    let internal_name = to_snake_case(wire_name);
    if property.reference.as_deref() == Some(OPAQUE_VALUE_REF) {
        let mut attribute =
            ResourceAttribute::new(internal_name, wire_name.to_string(), AttributeKind::String);
        attribute.opaque = true;
        attribute.description = property.description.clone();
        return Ok(attribute);
    }

    let resolved = document.dereference(property)?;
    let kind = resolve_kind(wire_name, resolved)?;
    let mut attribute = ResourceAttribute::new(internal_name, wire_name.to_string(), kind);
    attribute.description = property
        .description
        .clone()
        .or_else(|| resolved.description.clone());

    match kind {
        AttributeKind::Object => {
            attribute.nested = Some(derive_properties(resolved, document)?);
        },
        AttributeKind::Array => {
            let items = resolved.items.as_deref().ok_or_else(|| {
                ProviderError::Schema(format!("array property '{}' has no items", wire_name))
            })?;
            if items.reference.as_deref() == Some(OPAQUE_VALUE_REF) {
                attribute.element_kind = Some(AttributeKind::String);
                attribute.opaque = true;
                return Ok(attribute);
            }
            let items = document.dereference(items)?;
            match resolve_kind(wire_name, items)? {
                AttributeKind::Object => {
                    attribute.nested = Some(derive_properties(items, document)?);
                },
                AttributeKind::Array => {
                    return Err(ProviderError::Schema(format!(
                        "nested arrays are not supported for property '{}'",
                        wire_name
                    )));
                },
                scalar => attribute.element_kind = Some(scalar),
            }
        },
        _ => {},
    }
    Ok(attribute)
}

fn resolve_kind(wire_name: &str, node: &SchemaNode) -> Result<AttributeKind, ProviderError> {
    match node.schema_type.as_deref() {
        Some(type_name) => AttributeKind::from_type_name(type_name).ok_or_else(|| {
            ProviderError::Schema(format!(
                "unsupported type '{}' for property '{}'",
                type_name, wire_name
            ))
        }),
        None if !node.properties.is_empty() => Ok(AttributeKind::Object),
        None => Err(ProviderError::Schema(format!(
            "property '{}' has no type",
            wire_name
        ))),
    }
}

/// Every derived resource schema, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, Arc<ResourceSchema>>,
}

impl ResourceRegistry {
    /// Derive schemas for every resource in a document.
    ///
    /// A resource kind whose schema cannot be derived is left out and logged.
    pub fn from_document(document: &OpenApi, path_prefix: &str) -> Result<Self, ProviderError> {
        let mut resources = BTreeMap::new();
        for definition in document.resources(path_prefix)? {
            match derive(&definition, document) {
                Ok(schema) => {
                    resources.insert(definition.singular.clone(), Arc::new(schema));
                },
                Err(err) => {
                    warn!(resource = %definition.singular, error = %err, "Skipping resource");
                },
            }
        }
        Ok(Self { resources })
    }

    /// Look up a resource kind by singular name.
    pub fn get(&self, singular: &str) -> Option<&Arc<ResourceSchema>> {
        self.resources.get(singular)
    }

    /// All resource schemas, keyed by singular name.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<ResourceSchema>)> {
        self.resources.iter()
    }

    /// Number of resource kinds.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether no resource kinds were derived.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resolve a host resource type name, e.g. `aep_book`.
    pub fn resource_type(&self, prefix: &str, type_name: &str) -> Option<&Arc<ResourceSchema>> {
        let singular = type_name.strip_prefix(prefix)?.strip_prefix('_')?;
        self.resources.get(singular)
    }

    /// Resolve a host data source type name, e.g. `aep_books`.
    pub fn collection_type(&self, prefix: &str, type_name: &str) -> Option<&Arc<ResourceSchema>> {
        let plural = type_name.strip_prefix(prefix)?.strip_prefix('_')?;
        self.resources
            .values()
            .find(|schema| schema.metadata.plural == plural)
    }

    /// Render every resource and collection data source for the host.
    pub fn provider_schema(&self, prefix: &str) -> ProviderSchema {
        self.resources
            .values()
            .fold(ProviderSchema::new(), |provider_schema, schema| {
                provider_schema
                    .with_resource(
                        format!("{}_{}", prefix, schema.metadata.singular),
                        schema.host_schema(),
                    )
                    .with_data_source(
                        format!("{}_{}", prefix, schema.metadata.plural),
                        schema.collection_schema(),
                    )
            })
    }
}
