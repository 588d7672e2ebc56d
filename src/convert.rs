//! Conversion between [`Resource`] state and wire JSON.
//!
//! Every conversion site matches attribute kind against value variant
//! exhaustively; a mismatch is a [`ProviderError::Conversion`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Map;
use tracing::trace;

use crate::error::ProviderError;
use crate::resource_schema::{
    AttributeKind, AttributeMap, ResourceAttribute, ResourceSchema, IDENTITY_ATTRIBUTE,
};
use crate::value::{
    element_kind, is_integral, json_kind, kind_label, mismatch, missing_nested, numbers_equal,
    Resource, Value,
};

/// Convert every known value to wire JSON keyed by wire name.
pub fn to_wire_json(resource: &Resource) -> Result<Map<String, serde_json::Value>, ProviderError> {
    wire_object(&resource.schema.attributes, &resource.values, |_| true)
}

/// The request body: body attributes the caller may set.
///
/// Parameters, computed attributes and the identity are left out.
pub fn request_body(resource: &Resource) -> Result<Map<String, serde_json::Value>, ProviderError> {
    wire_object(&resource.schema.attributes, &resource.values, |attribute| {
        !attribute.parameter
            && !attribute.flags.computed
            && attribute.internal_name != IDENTITY_ATTRIBUTE
    })
}

/// Parent parameter values keyed by normalized placeholder name.
///
/// Parameters without a value are left out; building the path reports them.
pub fn parameters(resource: &Resource) -> Result<BTreeMap<String, String>, ProviderError> {
    let mut parameters = BTreeMap::new();
    for attribute in resource.schema.parameters() {
        match resource.values.get(&attribute.internal_name) {
            Some(Value::String(value)) => {
                parameters.insert(attribute.internal_name.clone(), value.clone());
            },
            Some(other) => return Err(mismatch(attribute, "string", other.kind_name())),
            None => {},
        }
    }
    Ok(parameters)
}

/// Convert a wire response into a resource.
///
/// Every body attribute must be present in `json`; `null` leaves it unset.
/// Parameters and the identity are carried over from `prior`, since bodies
/// never hold them. Where a converted value is equivalent to the prior one,
/// the prior representation is kept.
pub fn from_wire_json(
    json: &serde_json::Value,
    schema: &Arc<ResourceSchema>,
    prior: Option<&Resource>,
) -> Result<Resource, ProviderError> {
    let body = json.as_object().ok_or_else(|| {
        ProviderError::Conversion(format!("response body must be an object, got {}", json_kind(json)))
    })?;

    let mut resource = Resource::new(schema.clone());
    for attribute in schema.body_attributes() {
        let wire = body.get(&attribute.wire_name).ok_or_else(|| {
            ProviderError::Conversion(format!(
                "response is missing field '{}'",
                attribute.wire_name
            ))
        })?;
        let prior_value = prior.and_then(|p| p.values.get(&attribute.internal_name));
        if let Some(value) = value_from_wire(attribute, wire, prior_value)? {
            resource.values.insert(attribute.internal_name.clone(), value);
        }
    }

    if let Some(prior) = prior {
        for attribute in schema.attributes.iter() {
            if attribute.parameter || attribute.internal_name == IDENTITY_ATTRIBUTE {
                if let Some(value) = prior.values.get(&attribute.internal_name) {
                    resource
                        .values
                        .insert(attribute.internal_name.clone(), value.clone());
                }
            }
        }
    }
    Ok(resource)
}

fn wire_object(
    attributes: &AttributeMap,
    values: &BTreeMap<String, Value>,
    include: impl Fn(&ResourceAttribute) -> bool,
) -> Result<Map<String, serde_json::Value>, ProviderError> {
    let mut object = Map::new();
    for (name, value) in values {
        let attribute = attributes.get(name).ok_or_else(|| {
            ProviderError::Conversion(format!("attribute '{}' is not in the schema", name))
        })?;
        if include(attribute) {
            object.insert(attribute.wire_name.clone(), value_to_wire(attribute, value)?);
        }
    }
    Ok(object)
}

fn value_to_wire(attribute: &ResourceAttribute, value: &Value) -> Result<serde_json::Value, ProviderError> {
    match attribute.kind {
        AttributeKind::Object => match value {
            Value::Object(fields) | Value::Map(fields) => {
                let nested = attribute.nested.as_ref().ok_or_else(|| missing_nested(attribute))?;
                Ok(serde_json::Value::Object(wire_object(nested, fields, |_| true)?))
            },
            other => Err(mismatch(attribute, "object", other.kind_name())),
        },
        AttributeKind::Array => match value {
            Value::List(items) | Value::Set(items) => {
                let mut array = Vec::with_capacity(items.len());
                for item in items {
                    array.push(element_to_wire(attribute, item)?);
                }
                Ok(serde_json::Value::Array(array))
            },
            other => Err(mismatch(attribute, "list", other.kind_name())),
        },
        kind => scalar_to_wire(attribute, kind, value),
    }
}

fn element_to_wire(attribute: &ResourceAttribute, item: &Value) -> Result<serde_json::Value, ProviderError> {
    match (&attribute.nested, item) {
        (Some(nested), Value::Object(fields) | Value::Map(fields)) => {
            Ok(serde_json::Value::Object(wire_object(nested, fields, |_| true)?))
        },
        (Some(_), other) => Err(mismatch(attribute, "object", other.kind_name())),
        (None, item) => scalar_to_wire(attribute, element_kind(attribute)?, item),
    }
}

fn scalar_to_wire(
    attribute: &ResourceAttribute,
    kind: AttributeKind,
    value: &Value,
) -> Result<serde_json::Value, ProviderError> {
    match (kind, value) {
        (AttributeKind::String, Value::String(text)) if attribute.opaque => Ok(opaque_to_wire(text)),
        (AttributeKind::String, Value::String(text)) => Ok(serde_json::Value::String(text.clone())),
        (AttributeKind::Number, Value::Number(n)) => Ok(serde_json::Value::Number(n.clone())),
        (AttributeKind::Integer, Value::Number(n)) if is_integral(n) => {
            Ok(serde_json::Value::Number(n.clone()))
        },
        (AttributeKind::Boolean, Value::Boolean(b)) => Ok(serde_json::Value::Bool(*b)),
        (kind, other) => Err(mismatch(attribute, kind_label(kind), other.kind_name())),
    }
}

fn value_from_wire(
    attribute: &ResourceAttribute,
    wire: &serde_json::Value,
    prior: Option<&Value>,
) -> Result<Option<Value>, ProviderError> {
    if wire.is_null() {
        return Ok(None);
    }

    let value = match attribute.kind {
        AttributeKind::Object => match wire {
            serde_json::Value::Object(fields) => {
                let nested = attribute.nested.as_ref().ok_or_else(|| missing_nested(attribute))?;
                let prior_fields = match prior {
                    Some(Value::Object(fields) | Value::Map(fields)) => Some(fields),
                    _ => None,
                };
                Value::Object(object_from_wire(nested, fields, prior_fields)?)
            },
            other => return Err(mismatch(attribute, "object", json_kind(other))),
        },
        AttributeKind::Array => match wire {
            serde_json::Value::Array(items) => {
                let (prior_items, as_set) = match prior {
                    Some(Value::List(items)) => (Some(items), false),
                    Some(Value::Set(items)) => (Some(items), true),
                    _ => (None, false),
                };
                let mut list = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let prior_item = prior_items.and_then(|p| p.get(index));
                    list.push(element_from_wire(attribute, item, index, prior_item)?);
                }
                if as_set {
                    Value::Set(list)
                } else {
                    Value::List(list)
                }
            },
            other => return Err(mismatch(attribute, "list", json_kind(other))),
        },
        kind => return scalar_from_wire(attribute, kind, wire, prior).map(Some),
    };
    Ok(Some(value))
}

fn element_from_wire(
    attribute: &ResourceAttribute,
    item: &serde_json::Value,
    index: usize,
    prior: Option<&Value>,
) -> Result<Value, ProviderError> {
    match (&attribute.nested, item) {
        (_, serde_json::Value::Null) => Err(ProviderError::Conversion(format!(
            "attribute '{}' has a null element at index {}",
            attribute.internal_name, index
        ))),
        (Some(nested), serde_json::Value::Object(fields)) => {
            let prior_fields = match prior {
                Some(Value::Object(fields) | Value::Map(fields)) => Some(fields),
                _ => None,
            };
            Ok(Value::Object(object_from_wire(nested, fields, prior_fields)?))
        },
        (Some(_), other) => Err(mismatch(attribute, "object", json_kind(other))),
        (None, item) => scalar_from_wire(attribute, element_kind(attribute)?, item, prior),
    }
}

fn object_from_wire(
    attributes: &AttributeMap,
    fields: &Map<String, serde_json::Value>,
    prior: Option<&BTreeMap<String, Value>>,
) -> Result<BTreeMap<String, Value>, ProviderError> {
    let mut object = BTreeMap::new();
    for (wire_name, wire) in fields {
        let Some(attribute) = attributes.by_wire_name(wire_name) else {
            trace!(field = %wire_name, "Ignoring field not in the schema");
            continue;
        };
        let prior_value = prior.and_then(|p| p.get(&attribute.internal_name));
        if let Some(value) = value_from_wire(attribute, wire, prior_value)? {
            object.insert(attribute.internal_name.clone(), value);
        }
    }
    Ok(object)
}

fn scalar_from_wire(
    attribute: &ResourceAttribute,
    kind: AttributeKind,
    wire: &serde_json::Value,
    prior: Option<&Value>,
) -> Result<Value, ProviderError> {
    match (kind, wire) {
        (AttributeKind::String, wire) if attribute.opaque => {
            if let Some(Value::String(text)) = prior {
                if opaque_to_wire(text) == *wire {
                    return Ok(Value::String(text.clone()));
                }
            }
            opaque_from_wire(wire)
        },
        (AttributeKind::String, serde_json::Value::String(text)) => Ok(Value::String(text.clone())),
        (AttributeKind::Boolean, serde_json::Value::Bool(b)) => Ok(Value::Boolean(*b)),
        (AttributeKind::Number, serde_json::Value::Number(n)) => Ok(preserve_number(n, prior)),
        (AttributeKind::Integer, serde_json::Value::Number(n)) if is_integral(n) => {
            Ok(preserve_number(n, prior))
        },
        (kind, other) => Err(mismatch(attribute, kind_label(kind), json_kind(other))),
    }
}

/// Opaque text goes out as the JSON it holds, or as a JSON string when it
/// holds no JSON.
fn opaque_to_wire(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// Inverse of [`opaque_to_wire`].
fn opaque_from_wire(wire: &serde_json::Value) -> Result<Value, ProviderError> {
    if let serde_json::Value::String(text) = wire {
        if serde_json::from_str::<serde_json::Value>(text).is_err() {
            return Ok(Value::String(text.clone()));
        }
    }
    Ok(Value::String(serde_json::to_string(wire)?))
}

fn preserve_number(n: &serde_json::Number, prior: Option<&Value>) -> Value {
    match prior {
        Some(Value::Number(p)) if numbers_equal(p, n) => Value::Number(p.clone()),
        _ => Value::Number(n.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::OpenApi;
    use crate::resource_schema::ResourceRegistry;
    use serde_json::{json, Number};

    fn registry() -> ResourceRegistry {
        let document =
            OpenApi::from_json(include_str!("../tests/fixtures/bookstore.json")).unwrap();
        ResourceRegistry::from_document(&document, "").unwrap()
    }

    fn number(text: &str) -> Number {
        serde_json::from_str(text).unwrap()
    }

    fn author(first: &str, last: &str) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("first_name".to_string(), Value::from(first));
        fields.insert("last_name".to_string(), Value::from(last));
        Value::Object(fields)
    }

    fn full_book(schema: Arc<ResourceSchema>) -> Resource {
        Resource::new(schema)
            .with_value("id", "b1")
            .with_value("publisher", "/publishers/1")
            .with_value("path", "/publishers/1/books/b1")
            .with_value("price", number("12.50"))
            .with_value("published", true)
            .with_value("edition", number("3"))
            .with_value("isbn", Value::List(vec!["978-1".into(), "978-2".into()]))
            .with_value("author", Value::List(vec![author("Ann", "Leckie")]))
            .with_value("metadata", "{\"shelf\":\"sf\",\"rank\":1}")
    }

    #[test]
    fn test_to_wire_uses_wire_names() {
        let registry = registry();
        let book = full_book(registry.get("book").unwrap().clone());
        let wire = to_wire_json(&book).unwrap();

        assert_eq!(wire["author"], json!([{"firstName": "Ann", "lastName": "Leckie"}]));
        assert_eq!(wire["price"].to_string(), "12.50");
        assert_eq!(wire["metadata"], json!({"shelf": "sf", "rank": 1}));
        assert_eq!(wire["publisher"], json!("/publishers/1"));
    }

    #[test]
    fn test_request_body_excludes_parameters_and_computed() {
        let registry = registry();
        let book = full_book(registry.get("book").unwrap().clone());
        let body = request_body(&book).unwrap();

        assert!(!body.contains_key("publisher"));
        assert!(!body.contains_key("path"));
        assert!(!body.contains_key("id"));
        assert_eq!(body.len(), 6);
    }

    #[test]
    fn test_unknown_value_is_error() {
        let registry = registry();
        let book = Resource::new(registry.get("book").unwrap().clone()).with_value("shelf", "a");
        let err = to_wire_json(&book).unwrap_err();
        assert!(err.to_string().contains("not in the schema"));
    }

    #[test]
    fn test_kind_mismatch_is_error() {
        let registry = registry();
        let schema = registry.get("book").unwrap().clone();

        let book = Resource::new(schema.clone()).with_value("price", "cheap");
        assert!(matches!(to_wire_json(&book), Err(ProviderError::Conversion(_))));

        let book = Resource::new(schema.clone()).with_value("edition", number("1.5"));
        assert!(to_wire_json(&book).is_err());

        let book = Resource::new(schema).with_value("author", Value::List(vec!["Ann".into()]));
        assert!(to_wire_json(&book).is_err());
    }

    #[test]
    fn test_parameters() {
        let registry = registry();
        let book = full_book(registry.get("book").unwrap().clone());
        let parameters = parameters(&book).unwrap();
        assert_eq!(parameters.len(), 1);
        assert_eq!(parameters["publisher"], "/publishers/1");
    }

    #[test]
    fn test_round_trip() {
        let registry = registry();
        let book = full_book(registry.get("book").unwrap().clone());
        let wire = serde_json::Value::Object(to_wire_json(&book).unwrap());
        let back = from_wire_json(&wire, &book.schema, Some(&book)).unwrap();
        assert_eq!(back, book);
    }

    #[test]
    fn test_from_wire_preserves_prior_numbers() {
        let registry = registry();
        let schema = registry.get("book").unwrap().clone();
        let prior = full_book(schema.clone());

        let mut wire = to_wire_json(&prior).unwrap();
        wire.insert("price".to_string(), json!(12.5));
        let back = from_wire_json(&serde_json::Value::Object(wire.clone()), &schema, Some(&prior)).unwrap();
        assert_eq!(back.get("price").unwrap(), &Value::Number(number("12.50")));

        let fresh = from_wire_json(&serde_json::Value::Object(wire), &schema, None).unwrap();
        assert_eq!(fresh.get("price").unwrap(), &Value::Number(number("12.5")));
        assert!(fresh.get("publisher").is_none());
    }

    #[test]
    fn test_from_wire_keeps_set_representation() {
        let registry = registry();
        let schema = registry.get("book").unwrap().clone();
        let prior = full_book(schema.clone())
            .with_value("isbn", Value::Set(vec!["978-1".into(), "978-2".into()]));

        let mut wire = to_wire_json(&prior).unwrap();
        wire.insert("isbn".to_string(), json!(["978-2", "978-1"]));
        let back = from_wire_json(&serde_json::Value::Object(wire), &schema, Some(&prior)).unwrap();
        assert_eq!(back.get("isbn"), prior.get("isbn"));
    }

    #[test]
    fn test_from_wire_missing_field_is_error() {
        let registry = registry();
        let schema = registry.get("publisher").unwrap().clone();
        let err = from_wire_json(&json!({"description": "d"}), &schema, None).unwrap_err();
        assert!(err.to_string().contains("missing field 'path'"));
    }

    #[test]
    fn test_from_wire_null_leaves_unset() {
        let registry = registry();
        let schema = registry.get("publisher").unwrap().clone();
        let resource = from_wire_json(
            &json!({"description": null, "path": "/publishers/1", "etag": "abc"}),
            &schema,
            None,
        )
        .unwrap();
        assert!(resource.get("description").is_none());
        assert_eq!(resource.get_str("path"), Some("/publishers/1"));
    }

    #[test]
    fn test_from_wire_type_mismatch() {
        let registry = registry();
        let schema = registry.get("publisher").unwrap().clone();
        let err = from_wire_json(&json!({"description": 5, "path": "/publishers/1"}), &schema, None)
            .unwrap_err();
        assert!(err.to_string().contains("expects string, got number"));

        assert!(from_wire_json(&json!([]), &schema, None).is_err());
    }

    #[test]
    fn test_opaque_values() {
        let registry = registry();
        let schema = registry.get("book").unwrap().clone();
        let prior = full_book(schema.clone()).with_value("metadata", "{ \"rank\": 1 }");

        let mut wire = to_wire_json(&prior).unwrap();
        assert_eq!(wire["metadata"], json!({"rank": 1}));

        let back = from_wire_json(&serde_json::Value::Object(wire.clone()), &schema, Some(&prior)).unwrap();
        assert_eq!(back.get_str("metadata"), Some("{ \"rank\": 1 }"));

        wire.insert("metadata".to_string(), json!([true]));
        let back = from_wire_json(&serde_json::Value::Object(wire), &schema, None).unwrap();
        assert_eq!(back.get_str("metadata"), Some("[true]"));

        let plain = Resource::new(schema).with_value("metadata", "not json");
        assert_eq!(to_wire_json(&plain).unwrap()["metadata"], json!("not json"));
    }

    #[test]
    fn test_opaque_plain_text_round_trip() {
        let registry = registry();
        let schema = registry.get("book").unwrap().clone();
        let book = full_book(schema.clone()).with_value("metadata", "hello");

        let wire = to_wire_json(&book).unwrap();
        assert_eq!(wire["metadata"], json!("hello"));
        let back = from_wire_json(&serde_json::Value::Object(wire.clone()), &schema, Some(&book)).unwrap();
        assert_eq!(back, book);

        let fresh = from_wire_json(&serde_json::Value::Object(wire.clone()), &schema, None).unwrap();
        assert_eq!(fresh.get_str("metadata"), Some("hello"));

        // A string holding JSON text stays distinguishable from the JSON itself.
        let mut quoted = wire;
        quoted.insert("metadata".to_string(), json!("5"));
        let fresh = from_wire_json(&serde_json::Value::Object(quoted.clone()), &schema, None).unwrap();
        assert_eq!(fresh.get_str("metadata"), Some("\"5\""));
        assert_eq!(to_wire_json(&fresh).unwrap()["metadata"], json!("5"));
    }

    #[test]
    fn test_from_wire_null_list_element_is_error() {
        let registry = registry();
        let schema = registry.get("book").unwrap().clone();
        let prior = full_book(schema.clone());

        let mut wire = to_wire_json(&prior).unwrap();
        wire.insert("isbn".to_string(), json!(["a", null, "c"]));
        let err = from_wire_json(&serde_json::Value::Object(wire), &schema, Some(&prior)).unwrap_err();
        assert!(matches!(err, ProviderError::Conversion(_)));
        assert!(err.to_string().contains("null element at index 1"));
    }

    mod object_tests {
        use super::*;

        fn shelf_schema() -> Arc<ResourceSchema> {
            let document =
                OpenApi::from_json(include_str!("../tests/fixtures/library.json")).unwrap();
            let registry = ResourceRegistry::from_document(&document, "").unwrap();
            registry.get("shelf").unwrap().clone()
        }

        fn location(shelf_number: &str, width: &str) -> Value {
            let mut fields = BTreeMap::new();
            fields.insert("shelf_number".to_string(), Value::Number(number(shelf_number)));
            fields.insert("room_name".to_string(), Value::from("reading room"));
            fields.insert("width_meters".to_string(), Value::Number(number(width)));
            Value::Object(fields)
        }

        #[test]
        fn test_object_uses_wire_names() {
            let shelf = Resource::new(shelf_schema())
                .with_value("label", "sf")
                .with_value("location", location("10", "1.50"));

            let wire = request_body(&shelf).unwrap();
            let expected: serde_json::Value = serde_json::from_str(
                r#"{"label": "sf",
                    "location": {"shelfNumber": 10, "roomName": "reading room", "widthMeters": 1.50}}"#,
            )
            .unwrap();
            assert_eq!(serde_json::Value::Object(wire), expected);
        }

        #[test]
        fn test_object_preserves_prior_numbers() {
            let schema = shelf_schema();
            let prior = Resource::new(schema.clone())
                .with_value("id", "s1")
                .with_value("label", "sf")
                .with_value("location", location("10", "1.50"));

            let wire: serde_json::Value = serde_json::from_str(
                r#"{"label": "sf", "path": "shelves/s1",
                    "location": {"shelfNumber": 1e1, "roomName": "reading room", "widthMeters": 1.5, "floor": 2}}"#,
            )
            .unwrap();
            let back = from_wire_json(&wire, &schema, Some(&prior)).unwrap();
            assert_eq!(back.get("location"), prior.get("location"));
            assert_eq!(back.get_str("id"), Some("s1"));

            let fresh = from_wire_json(&wire, &schema, None).unwrap();
            let Some(Value::Object(fields)) = fresh.get("location") else {
                panic!("location should be an object");
            };
            assert_eq!(fields["width_meters"], Value::Number(number("1.5")));
            assert!(!fields.contains_key("floor"));
        }

        #[test]
        fn test_object_type_mismatch() {
            let schema = shelf_schema();

            let err = from_wire_json(
                &json!({"label": "sf", "path": "shelves/s1", "location": "hall"}),
                &schema,
                None,
            )
            .unwrap_err();
            assert!(matches!(err, ProviderError::Conversion(_)));
            assert!(err.to_string().contains("expects object, got string"));

            let shelf = Resource::new(schema).with_value("location", "hall");
            assert!(matches!(to_wire_json(&shelf), Err(ProviderError::Conversion(_))));
        }
    }
}
