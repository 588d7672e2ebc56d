//! Planning changes to a resource.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::resource_schema::{ResourceSchema, IDENTITY_ATTRIBUTE};
use crate::value::Resource;

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Internal name of the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<serde_json::Value>,
    /// The value after the change (None if deleting).
    pub after: Option<serde_json::Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(
        path: impl Into<String>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(
        path: impl Into<String>,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: serde_json::Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with no changes.
    pub fn no_change(state: serde_json::Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// Create a plan result with changes.
    pub fn with_changes(
        planned_state: serde_json::Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }
}

/// Plan the transition from `prior` to `proposed` state.
///
/// Server-owned attributes left unknown in the proposal keep their prior
/// value. Changing an attribute that forces replacement sets
/// `requires_replace`.
pub fn plan_resource(
    schema: &Arc<ResourceSchema>,
    prior: Option<&serde_json::Value>,
    proposed: &serde_json::Value,
) -> Result<PlanResult, ProviderError> {
    let prior = match prior {
        Some(state) if !state.is_null() => Some(Resource::from_state(schema.clone(), state)?),
        _ => None,
    };

    if proposed.is_null() {
        let Some(prior) = prior else {
            return Ok(PlanResult::no_change(serde_json::Value::Null));
        };
        let state = prior.to_state();
        let changes = prior
            .values
            .keys()
            .map(|name| AttributeChange::removed(name.clone(), state[name].clone()))
            .collect();
        return Ok(PlanResult::with_changes(serde_json::Value::Null, changes, false));
    }

    let mut planned = Resource::from_state(schema.clone(), proposed)?;
    let Some(prior) = prior else {
        let state = planned.to_state();
        let changes = planned
            .values
            .keys()
            .map(|name| AttributeChange::added(name.clone(), state[name].clone()))
            .collect();
        return Ok(PlanResult::with_changes(state, changes, false));
    };

    for attribute in schema.attributes.iter() {
        let server_owned =
            attribute.flags.computed || attribute.internal_name == IDENTITY_ATTRIBUTE;
        if server_owned && !planned.values.contains_key(&attribute.internal_name) {
            if let Some(value) = prior.values.get(&attribute.internal_name) {
                planned
                    .values
                    .insert(attribute.internal_name.clone(), value.clone());
            }
        }
    }

    let before = prior.to_state();
    let after = planned.to_state();
    let mut changes = Vec::new();
    let mut requires_replace = false;
    for attribute in schema.attributes.iter() {
        let name = &attribute.internal_name;
        let change = match (prior.values.get(name), planned.values.get(name)) {
            (Some(old), Some(new)) if old.semantically_equal(new) => None,
            (None, None) => None,
            (Some(_), Some(_)) => Some(AttributeChange::modified(
                name.clone(),
                before[name].clone(),
                after[name].clone(),
            )),
            (Some(_), None) => Some(AttributeChange::removed(name.clone(), before[name].clone())),
            (None, Some(_)) => Some(AttributeChange::added(name.clone(), after[name].clone())),
        };
        if let Some(change) = change {
            requires_replace |= attribute.force_new;
            changes.push(change);
        }
    }

    Ok(PlanResult::with_changes(after, changes, requires_replace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::OpenApi;
    use crate::resource_schema::ResourceRegistry;
    use serde_json::json;

    fn registry() -> ResourceRegistry {
        let document =
            OpenApi::from_json(include_str!("../tests/fixtures/bookstore.json")).unwrap();
        ResourceRegistry::from_document(&document, "").unwrap()
    }

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("description", json!("test"));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(json!("test")));

        let removed = AttributeChange::removed("description", json!("old"));
        assert_eq!(removed.before, Some(json!("old")));
        assert!(removed.after.is_none());

        let modified = AttributeChange::modified("edition", json!(1), json!(2));
        assert_eq!(modified.before, Some(json!(1)));
        assert_eq!(modified.after, Some(json!(2)));
    }

    #[test]
    fn test_plan_create() {
        let registry = registry();
        let schema = registry.get("publisher").unwrap();
        let plan = plan_resource(schema, None, &json!({"description": "d"})).unwrap();

        assert_eq!(plan.changes, vec![AttributeChange::added("description", json!("d"))]);
        assert_eq!(plan.planned_state["id"], serde_json::Value::Null);
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_plan_keeps_server_owned_values() {
        let registry = registry();
        let schema = registry.get("publisher").unwrap();
        let prior = json!({"id": "1", "path": "/publishers/1", "description": "d"});

        let plan = plan_resource(schema, Some(&prior), &json!({"description": "d"})).unwrap();
        assert!(plan.changes.is_empty());
        assert_eq!(plan.planned_state, prior);

        let plan = plan_resource(schema, Some(&prior), &json!({"description": "e"})).unwrap();
        assert_eq!(
            plan.changes,
            vec![AttributeChange::modified("description", json!("d"), json!("e"))]
        );
        assert_eq!(plan.planned_state["path"], "/publishers/1");
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_plan_parent_change_requires_replace() {
        let registry = registry();
        let schema = registry.get("book").unwrap();
        let prior = json!({"id": "b", "publisher": "1", "price": 1});
        let proposed = json!({"publisher": "2", "price": 1.0});

        let plan = plan_resource(schema, Some(&prior), &proposed).unwrap();
        assert!(plan.requires_replace);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, "publisher");
        assert_eq!(plan.planned_state["id"], "b");
    }

    #[test]
    fn test_plan_destroy() {
        let registry = registry();
        let schema = registry.get("publisher").unwrap();
        let prior = json!({"id": "1", "description": "d"});

        let plan = plan_resource(schema, Some(&prior), &serde_json::Value::Null).unwrap();
        assert_eq!(plan.planned_state, serde_json::Value::Null);
        assert_eq!(plan.changes.len(), 2);

        let plan = plan_resource(schema, None, &serde_json::Value::Null).unwrap();
        assert!(plan.changes.is_empty());
    }

    #[test]
    fn test_plan_rejects_unknown_attributes() {
        let registry = registry();
        let schema = registry.get("publisher").unwrap();
        assert!(plan_resource(schema, None, &json!({"shelf": "x"})).is_err());
    }
}
