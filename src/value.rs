//! The value model.
//!
//! [`Value`] holds any attribute's data; an attribute that is unknown or unset
//! simply has no entry in [`Resource::values`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Number;

use crate::error::ProviderError;
use crate::resource_schema::{
    AttributeKind, AttributeMap, ResourceAttribute, ResourceSchema, IDENTITY_ATTRIBUTE,
};

/// A tagged attribute value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Text.
    String(String),
    /// Arbitrary-precision decimal, kept as its exact text.
    Number(Number),
    /// True or false.
    Boolean(bool),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Unordered sequence; duplicates are not removed.
    Set(Vec<Value>),
    /// String-keyed dictionary without a schema.
    Map(BTreeMap<String, Value>),
    /// String-keyed fields validated against nested attributes.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Object(_) => "object",
        }
    }

    /// The text of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether two values are equal, comparing numbers by decimal value.
    pub fn semantically_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => numbers_equal(a, b),
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.semantically_equal(y))
            },
            (Self::Set(a), Self::Set(b)) => unordered_equal(a, b, Value::semantically_equal),
            (Self::Map(a), Self::Map(b)) | (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.semantically_equal(w)))
            },
            _ => self == other,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => unordered_equal(a, b, |x, y| x == y),
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Self::Number(n)
    }
}

fn unordered_equal(a: &[Value], b: &[Value], eq: impl Fn(&Value, &Value) -> bool) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut matched = vec![false; b.len()];
    a.iter().all(|x| {
        let found = b
            .iter()
            .enumerate()
            .find(|(i, y)| !matched[*i] && eq(x, y))
            .map(|(i, _)| i);
        match found {
            Some(i) => {
                matched[i] = true;
                true
            },
            None => false,
        }
    })
}

/// Whether two numbers denote the same decimal value.
pub fn numbers_equal(a: &Number, b: &Number) -> bool {
    canonical_decimal(&a.to_string()) == canonical_decimal(&b.to_string())
}

/// Whether a number has no fractional part.
pub fn is_integral(n: &Number) -> bool {
    let canonical = canonical_decimal(&n.to_string());
    match canonical.split_once('e') {
        // Exponent too large to normalize: whole unless negative or zero-valued.
        Some((mantissa, exponent)) => {
            !exponent.starts_with('-') || mantissa.chars().all(|c| matches!(c, '0' | '.' | '-'))
        },
        None => !canonical.contains('.'),
    }
}

/// Normalize JSON number text to plain decimal notation.
///
/// `1.50`, `15e-1` and `0.15E1` all become `1.5`. Text that is not a JSON
/// number, or whose exponent is unreasonably large, is returned lowercased.
pub fn canonical_decimal(text: &str) -> String {
    const MAX_EXPONENT: i64 = 4096;

    let lowered = text.trim().to_ascii_lowercase();
    let (negative, unsigned) = match lowered.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, lowered.as_str()),
    };
    let (mantissa, exponent) = match unsigned.split_once('e') {
        Some((m, e)) => match e.parse::<i64>() {
            Ok(e) if e.abs() <= MAX_EXPONENT => (m, e),
            _ => return lowered,
        },
        None => (unsigned, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if (int_part.is_empty() && frac_part.is_empty())
        || !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit())
    {
        return lowered;
    }

    let digits: String = format!("{}{}", int_part, frac_part);
    let mut point = int_part.len() as i64 + exponent;
    let trimmed = digits.trim_start_matches('0');
    point -= (digits.len() - trimmed.len()) as i64;
    let trimmed = trimmed.trim_end_matches('0');
    if trimmed.is_empty() {
        return "0".to_string();
    }

    let len = trimmed.len() as i64;
    let body = if point <= 0 {
        format!("0.{}{}", "0".repeat((-point) as usize), trimmed)
    } else if point >= len {
        format!("{}{}", trimmed, "0".repeat((point - len) as usize))
    } else {
        let (head, tail) = trimmed.split_at(point as usize);
        format!("{}.{}", head, tail)
    };
    if negative {
        format!("-{}", body)
    } else {
        body
    }
}

/// One resource instance, keyed by internal attribute name.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Values that are known. Missing keys are unknown or unset.
    pub values: BTreeMap<String, Value>,
    /// The schema the values conform to.
    pub schema: Arc<ResourceSchema>,
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && *self.schema == *other.schema
    }
}

impl Resource {
    /// Create an empty resource.
    pub fn new(schema: Arc<ResourceSchema>) -> Self {
        Self {
            values: BTreeMap::new(),
            schema,
        }
    }

    /// Set a value, builder style.
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Get a value by internal name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Get a string value by internal name.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// The resource identifier, if known.
    pub fn identifier(&self) -> Option<&str> {
        self.get_str(IDENTITY_ATTRIBUTE)
    }

    /// Build a resource from host state keyed by internal name.
    ///
    /// `null` entries are unknown. Keys the schema does not know are rejected.
    pub fn from_state(
        schema: Arc<ResourceSchema>,
        state: &serde_json::Value,
    ) -> Result<Self, ProviderError> {
        let values = match state {
            serde_json::Value::Null => BTreeMap::new(),
            serde_json::Value::Object(map) => object_from_state(&schema.attributes, map)?,
            other => {
                return Err(ProviderError::Conversion(format!(
                    "resource state must be an object, got {}",
                    json_kind(other)
                )))
            },
        };
        Ok(Self { values, schema })
    }

    /// Render host state. Every attribute is present; unset ones are `null`.
    pub fn to_state(&self) -> serde_json::Value {
        serde_json::Value::Object(object_to_state(&self.schema.attributes, &self.values))
    }
}

fn object_from_state(
    attributes: &AttributeMap,
    map: &serde_json::Map<String, serde_json::Value>,
) -> Result<BTreeMap<String, Value>, ProviderError> {
    let mut values = BTreeMap::new();
    for (name, json) in map {
        let attribute = attributes.get(name).ok_or_else(|| {
            ProviderError::Conversion(format!("unknown attribute '{}' in state", name))
        })?;
        if json.is_null() {
            continue;
        }
        values.insert(name.clone(), value_from_state(attribute, json)?);
    }
    Ok(values)
}

fn value_from_state(
    attribute: &ResourceAttribute,
    json: &serde_json::Value,
) -> Result<Value, ProviderError> {
    match (attribute.kind, json) {
        (AttributeKind::Object, serde_json::Value::Object(map)) => {
            let nested = attribute.nested.as_ref().ok_or_else(|| missing_nested(attribute))?;
            Ok(Value::Object(object_from_state(nested, map)?))
        },
        (AttributeKind::Array, serde_json::Value::Array(items)) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                let element = match &attribute.nested {
                    Some(nested) => match item {
                        serde_json::Value::Object(map) => Value::Object(object_from_state(nested, map)?),
                        other => return Err(mismatch(attribute, "object", json_kind(other))),
                    },
                    None => scalar_from_state(attribute, element_kind(attribute)?, item)?,
                };
                list.push(element);
            }
            Ok(Value::List(list))
        },
        (AttributeKind::Object, other) => Err(mismatch(attribute, "object", json_kind(other))),
        (AttributeKind::Array, other) => Err(mismatch(attribute, "list", json_kind(other))),
        (kind, json) => scalar_from_state(attribute, kind, json),
    }
}

fn scalar_from_state(
    attribute: &ResourceAttribute,
    kind: AttributeKind,
    json: &serde_json::Value,
) -> Result<Value, ProviderError> {
    match (kind, json) {
        (AttributeKind::String, serde_json::Value::String(s)) => Ok(Value::String(s.clone())),
        (AttributeKind::Boolean, serde_json::Value::Bool(b)) => Ok(Value::Boolean(*b)),
        (AttributeKind::Number, serde_json::Value::Number(n)) => Ok(Value::Number(n.clone())),
        (AttributeKind::Integer, serde_json::Value::Number(n)) if is_integral(n) => {
            Ok(Value::Number(n.clone()))
        },
        (kind, other) => Err(mismatch(attribute, kind_label(kind), json_kind(other))),
    }
}

fn object_to_state(
    attributes: &AttributeMap,
    values: &BTreeMap<String, Value>,
) -> serde_json::Map<String, serde_json::Value> {
    attributes
        .iter()
        .map(|attribute| {
            let json = values
                .get(&attribute.internal_name)
                .map(|value| value_to_state(attribute, value))
                .unwrap_or(serde_json::Value::Null);
            (attribute.internal_name.clone(), json)
        })
        .collect()
}

fn value_to_state(attribute: &ResourceAttribute, value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::List(items) | Value::Set(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| match (&attribute.nested, item) {
                    (Some(nested), Value::Object(fields) | Value::Map(fields)) => {
                        serde_json::Value::Object(object_to_state(nested, fields))
                    },
                    _ => value_to_state(attribute, item),
                })
                .collect(),
        ),
        Value::Object(fields) | Value::Map(fields) => match &attribute.nested {
            Some(nested) => serde_json::Value::Object(object_to_state(nested, fields)),
            None => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), value_to_state(attribute, v)))
                    .collect(),
            ),
        },
    }
}

pub(crate) fn element_kind(attribute: &ResourceAttribute) -> Result<AttributeKind, ProviderError> {
    attribute.element_kind.ok_or_else(|| {
        ProviderError::Conversion(format!(
            "attribute '{}' has no element kind",
            attribute.internal_name
        ))
    })
}

pub(crate) fn missing_nested(attribute: &ResourceAttribute) -> ProviderError {
    ProviderError::Conversion(format!(
        "attribute '{}' has no nested attributes",
        attribute.internal_name
    ))
}

pub(crate) fn mismatch(attribute: &ResourceAttribute, expected: &str, got: &str) -> ProviderError {
    ProviderError::Conversion(format!(
        "attribute '{}' expects {}, got {}",
        attribute.internal_name, expected, got
    ))
}

pub(crate) fn kind_label(kind: AttributeKind) -> &'static str {
    match kind {
        AttributeKind::String => "string",
        AttributeKind::Number => "number",
        AttributeKind::Boolean => "boolean",
        AttributeKind::Integer => "integer",
        AttributeKind::Object => "object",
        AttributeKind::Array => "list",
    }
}

pub(crate) fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
