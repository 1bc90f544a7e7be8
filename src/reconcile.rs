//! The desired/actual reconciliation contract shared by every resource kind.
//!
//! A [`Reconciler`] knows how to create, read, update and delete one kind of
//! remote object using typed state. [`Managed`] wraps a reconciler and turns
//! it into a [`ResourceHandler`], the JSON-facing surface the provider
//! dispatches to. The wrapper owns every rule that is the same for all kinds:
//!
//! - schema defaults are applied and computed attributes stripped from
//!   desired state, which is then validated before any remote call
//! - create and update always conclude with a read of the remote object
//! - a changed ForceNew attribute is never forwarded to an update
//! - sensitive attributes are never refreshed from the remote side
//! - a read that finds nothing clears the record instead of failing

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};
use crate::types::{AttributeChange, PlanResult};
use crate::validation::ensure_valid;

/// The key under which a record's identifier is stored in state.
pub const ID_KEY: &str = "id";

/// Identifier plus last-known typed field values of a reconciled object.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<S> {
    /// Remote identifier, assigned at creation and never changed.
    pub id: String,
    /// Last-known field values.
    pub state: S,
}

impl<S> Record<S> {
    /// Create a record.
    pub fn new(id: impl Into<String>, state: S) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }
}

impl<S: Serialize> Record<S> {
    /// Serialize to a state object carrying the identifier under `"id"`.
    pub fn to_value(&self) -> Result<Value, ProviderError> {
        match serde_json::to_value(&self.state)? {
            Value::Object(mut map) => {
                map.insert(ID_KEY.to_string(), Value::String(self.id.clone()));
                Ok(Value::Object(map))
            },
            other => Err(ProviderError::InvalidRequest(format!(
                "resource state must serialize to an object, got {}",
                other
            ))),
        }
    }
}

impl<S: DeserializeOwned> Record<S> {
    /// Parse a state object previously produced by [`Record::to_value`].
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        let id = value
            .get(ID_KEY)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::InvalidRequest("state has no resource id".to_string()))?
            .to_string();
        let state = serde_json::from_value(value.clone())?;
        Ok(Self { id, state })
    }
}

/// Outcome of looking up a remote object that may have vanished.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome<T> {
    /// The object exists.
    Found(T),
    /// The object no longer exists; the record should be forgotten.
    Gone,
}

/// The configurable attributes that changed between two states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    attributes: BTreeSet<String>,
}

impl ChangeSet {
    /// Whether the named attribute changed.
    pub fn contains(&self, attribute: &str) -> bool {
        self.attributes.contains(attribute)
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Changed attribute names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            attributes: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// CRUD operations of one resource kind against the remote API.
///
/// Implementations only translate between typed state and client calls.
/// Validation, read-after-write and the ForceNew and sensitivity rules are
/// applied by [`Managed`].
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Typed desired state of this resource kind.
    type State: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Resource type name, e.g. `tfe_variable`.
    const TYPE_NAME: &'static str;

    /// Schema of the recognized fields.
    fn schema(&self) -> Schema;

    /// Checks beyond the schema that must pass before any remote call.
    fn validate(&self, desired: &Self::State) -> Result<(), ProviderError> {
        let _ = desired;
        Ok(())
    }

    /// Create the remote object. The returned record carries the assigned
    /// identifier and whatever computed values the create response revealed.
    async fn create(&self, desired: &Self::State) -> Result<Record<Self::State>, ProviderError>;

    /// Refresh the record from the remote object.
    async fn read(
        &self,
        record: &Record<Self::State>,
    ) -> Result<ReadOutcome<Self::State>, ProviderError>;

    /// Send the changed, in-place updatable attributes. Never called with an
    /// empty change set.
    async fn update(
        &self,
        record: &Record<Self::State>,
        desired: &Self::State,
        changes: &ChangeSet,
    ) -> Result<(), ProviderError> {
        let _ = (desired, changes);
        Err(ProviderError::Unimplemented(format!(
            "{} {} cannot be updated in place",
            Self::TYPE_NAME,
            record.id
        )))
    }

    /// Delete the remote object. Absence counts as success.
    async fn delete(&self, record: &Record<Self::State>) -> Result<(), ProviderError>;

    /// Build a record for an existing remote object.
    async fn import(&self, id: &str) -> Result<ReadOutcome<Record<Self::State>>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            Self::TYPE_NAME
        )))
    }
}

/// JSON-facing operations of one resource kind, as dispatched by the provider.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Resource type name.
    fn type_name(&self) -> &'static str;

    /// Schema of the resource.
    fn schema(&self) -> &Schema;

    /// Diagnostics for a configuration; empty when it is valid.
    fn validate(&self, config: &Value) -> Vec<Diagnostic>;

    /// Compute the planned state and changes.
    fn plan(&self, prior: Option<&Value>, proposed: Value) -> Result<PlanResult, ProviderError>;

    /// Create from planned state; returns the new state.
    async fn create(&self, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh state; `None` means the object no longer exists.
    async fn read(&self, current: Value) -> Result<Option<Value>, ProviderError>;

    /// Update in place; returns the new state.
    async fn update(&self, prior: Value, planned: Value) -> Result<Value, ProviderError>;

    /// Delete the object behind the state.
    async fn delete(&self, current: Value) -> Result<(), ProviderError>;

    /// Import an existing object by identifier.
    async fn import(&self, id: &str) -> Result<Value, ProviderError>;
}

/// Adapter applying the shared reconciliation rules to a [`Reconciler`].
pub struct Managed<R> {
    reconciler: R,
    schema: Schema,
}

impl<R: Reconciler> Managed<R> {
    /// Wrap a reconciler.
    pub fn new(reconciler: R) -> Self {
        let schema = reconciler.schema();
        Self { reconciler, schema }
    }

    /// Normalize and validate desired state, then convert it to typed form.
    fn desired(&self, value: Value) -> Result<(Value, R::State), ProviderError> {
        let value = apply_defaults(&self.schema, strip_computed(&self.schema, value));
        ensure_valid(&self.schema, &value)?;
        let state = serde_json::from_value(value.clone())?;
        self.reconciler.validate(&state)?;
        Ok((value, state))
    }

    /// Serialize a refreshed record, keeping sensitive values from `known`.
    fn finish(&self, record: Record<R::State>, known: &Value) -> Result<Value, ProviderError> {
        let mut value = record.to_value()?;
        preserve_sensitive(&self.schema, known, &mut value);
        Ok(value)
    }

    async fn read_back(
        &self,
        record: Record<R::State>,
        known: &Value,
        after: &str,
    ) -> Result<Value, ProviderError> {
        match self.reconciler.read(&record).await? {
            ReadOutcome::Found(state) => self.finish(Record::new(record.id, state), known),
            ReadOutcome::Gone => Err(ProviderError::NotFound(format!(
                "{} {} no longer exists after {}",
                R::TYPE_NAME,
                record.id,
                after
            ))),
        }
    }
}

#[async_trait]
impl<R: Reconciler> ResourceHandler for Managed<R> {
    fn type_name(&self) -> &'static str {
        R::TYPE_NAME
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let mut diagnostics = crate::validation::validate(&self.schema, config);
        if diagnostics.is_empty() {
            if let Err(err) = self.desired(config.clone()) {
                diagnostics.push(Diagnostic::error(err.to_string()));
            }
        }
        diagnostics
    }

    fn plan(&self, prior: Option<&Value>, proposed: Value) -> Result<PlanResult, ProviderError> {
        if !proposed.is_null() {
            self.desired(proposed.clone())?;
        }
        plan(&self.schema, prior, proposed)
    }

    async fn create(&self, planned: Value) -> Result<Value, ProviderError> {
        let (known, desired) = self.desired(planned)?;
        let record = self.reconciler.create(&desired).await?;
        debug!(resource_type = R::TYPE_NAME, id = %record.id, "Created remote object");
        self.read_back(record, &known, "create").await
    }

    async fn read(&self, current: Value) -> Result<Option<Value>, ProviderError> {
        let record: Record<R::State> = Record::from_value(&current)?;
        match self.reconciler.read(&record).await? {
            ReadOutcome::Found(state) => {
                Ok(Some(self.finish(Record::new(record.id, state), &current)?))
            },
            ReadOutcome::Gone => {
                info!(
                    resource_type = R::TYPE_NAME,
                    id = %record.id,
                    "Remote object no longer exists, removing from state"
                );
                Ok(None)
            },
        }
    }

    async fn update(&self, prior: Value, planned: Value) -> Result<Value, ProviderError> {
        let record: Record<R::State> = Record::from_value(&prior)?;
        let (known, desired) = self.desired(planned)?;

        let changes = diff(&self.schema, &prior, &known);
        let replaced = replacement_paths(&self.schema, &changes);
        if !replaced.is_empty() {
            return Err(ProviderError::FailedPrecondition(format!(
                "{} {}: changing {} requires replacement",
                R::TYPE_NAME,
                record.id,
                replaced.join(", ")
            )));
        }

        let changes: ChangeSet = changes.into_iter().map(|c| c.path).collect();
        if changes.is_empty() {
            debug!(resource_type = R::TYPE_NAME, id = %record.id, "No attribute changed, refreshing only");
        } else {
            debug!(
                resource_type = R::TYPE_NAME,
                id = %record.id,
                changed = ?changes.iter().collect::<Vec<_>>(),
                "Updating remote object"
            );
            self.reconciler.update(&record, &desired, &changes).await?;
        }

        // Read back against the desired values plus the computed ones on record.
        let mut expected = known.clone();
        carry_computed(&self.schema, &prior, &mut expected);
        let expected: R::State = serde_json::from_value(expected)?;
        self.read_back(Record::new(record.id, expected), &known, "update")
            .await
    }

    async fn delete(&self, current: Value) -> Result<(), ProviderError> {
        let record: Record<R::State> = Record::from_value(&current)?;
        self.reconciler.delete(&record).await
    }

    async fn import(&self, id: &str) -> Result<Value, ProviderError> {
        match self.reconciler.import(id).await? {
            ReadOutcome::Found(record) => self.finish(record, &Value::Null),
            ReadOutcome::Gone => Err(ProviderError::NotFound(format!(
                "{} {} does not exist",
                R::TYPE_NAME,
                id
            ))),
        }
    }
}

/// Fill absent or null attributes that have a schema default.
pub fn apply_defaults(schema: &Schema, mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        for (name, attr) in schema.sorted_attributes() {
            if let Some(default) = &attr.default {
                if map.get(name).map_or(true, Value::is_null) {
                    map.insert(name.to_string(), default.clone());
                }
            }
        }
    }
    value
}

/// Drop the identifier and computed-only attributes; callers never supply them.
pub fn strip_computed(schema: &Schema, mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.remove(ID_KEY);
        map.retain(|name, _| {
            schema
                .attribute(name)
                .map_or(true, |attr| attr.flags.is_configurable())
        });
    }
    value
}

/// Changes to configurable attributes between two states, in attribute order.
pub fn diff(schema: &Schema, prior: &Value, proposed: &Value) -> Vec<AttributeChange> {
    let mut changes = Vec::new();
    for (name, attr) in schema.sorted_attributes() {
        if !attr.flags.is_configurable() {
            continue;
        }
        let before = prior.get(name).filter(|v| !v.is_null());
        let after = proposed.get(name).filter(|v| !v.is_null());
        match (before, after) {
            (None, None) => {},
            (Some(b), Some(a)) if b == a => {},
            (None, Some(a)) => changes.push(AttributeChange::added(name, a.clone())),
            (Some(b), None) => changes.push(AttributeChange::removed(name, b.clone())),
            (Some(b), Some(a)) => {
                changes.push(AttributeChange::modified(name, b.clone(), a.clone()))
            },
        }
    }
    changes
}

/// Paths among `changes` whose attributes force replacement.
pub fn replacement_paths<'a>(schema: &Schema, changes: &'a [AttributeChange]) -> Vec<&'a str> {
    changes
        .iter()
        .filter(|c| schema.attribute(&c.path).is_some_and(|attr| attr.force_new))
        .map(|c| c.path.as_str())
        .collect()
}

/// Plan a create (`prior` is `None`), an update, or a destroy (`proposed`
/// is null).
pub fn plan(
    schema: &Schema,
    prior: Option<&Value>,
    proposed: Value,
) -> Result<PlanResult, ProviderError> {
    if proposed.is_null() {
        return Ok(match prior {
            Some(prior) => {
                PlanResult::with_changes(Value::Null, diff(schema, prior, &Value::Null), false)
            },
            None => PlanResult::no_change(Value::Null),
        });
    }

    let proposed = apply_defaults(schema, strip_computed(schema, proposed));
    ensure_valid(schema, &proposed)?;

    let Some(prior) = prior else {
        let changes = diff(schema, &Value::Object(Map::new()), &proposed);
        return Ok(PlanResult::with_changes(proposed, changes, false));
    };

    let changes = diff(schema, prior, &proposed);
    if changes.is_empty() {
        return Ok(PlanResult::no_change(prior.clone()));
    }

    let requires_replace = !replacement_paths(schema, &changes).is_empty();
    let mut planned = proposed;
    if !requires_replace {
        carry_computed(schema, prior, &mut planned);
    }

    Ok(PlanResult::with_changes(planned, changes, requires_replace))
}

/// Copy the identifier and computed attributes of `from` into `into`; an
/// in-place update keeps them.
pub fn carry_computed(schema: &Schema, from: &Value, into: &mut Value) {
    if let (Value::Object(into), Value::Object(from)) = (into, from) {
        for (name, value) in from {
            let computed = name == ID_KEY
                || schema
                    .attribute(name)
                    .is_some_and(|attr| !attr.flags.is_configurable());
            if computed {
                into.insert(name.clone(), value.clone());
            }
        }
    }
}

/// Overwrite every sensitive attribute of `target` with its value in `known`
/// (or null), so remote plaintext never reaches state.
pub fn preserve_sensitive(schema: &Schema, known: &Value, target: &mut Value) {
    let Value::Object(map) = target else {
        return;
    };
    for (name, attr) in schema.sorted_attributes() {
        if attr.flags.sensitive {
            let value = known.get(name).cloned().unwrap_or(Value::Null);
            map.insert(name.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde::Deserialize;
    use serde_json::json;

    fn variable_schema() -> Schema {
        Schema::v0()
            .with_attribute("key", Attribute::required_string())
            .with_attribute("value", Attribute::required_string().sensitive())
            .with_attribute(
                "category",
                Attribute::required_string()
                    .with_force_new()
                    .with_allowed_values(["env", "terraform"]),
            )
            .with_attribute(
                "hcl",
                Attribute::optional_bool().with_default(json!(false)),
            )
            .with_attribute("callback_url", Attribute::computed_string())
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        key: String,
        hcl: bool,
    }

    #[test]
    fn test_record_round_trip() {
        let record = Record::new(
            "var-1",
            Sample {
                key: "region".to_string(),
                hcl: false,
            },
        );
        let value = record.to_value().unwrap();
        assert_eq!(value, json!({"id": "var-1", "key": "region", "hcl": false}));

        let back: Record<Sample> = Record::from_value(&value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_requires_id() {
        let err = Record::<Sample>::from_value(&json!({"key": "region", "hcl": false})).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));

        let err =
            Record::<Sample>::from_value(&json!({"id": "", "key": "region", "hcl": false}))
                .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn test_apply_defaults() {
        let schema = variable_schema();
        let value = apply_defaults(&schema, json!({"key": "k"}));
        assert_eq!(value["hcl"], json!(false));

        let value = apply_defaults(&schema, json!({"key": "k", "hcl": null}));
        assert_eq!(value["hcl"], json!(false));

        let value = apply_defaults(&schema, json!({"key": "k", "hcl": true}));
        assert_eq!(value["hcl"], json!(true));
    }

    #[test]
    fn test_strip_computed() {
        let schema = variable_schema();
        let value = strip_computed(
            &schema,
            json!({"id": "var-1", "key": "k", "callback_url": "https://x", "extra": 1}),
        );
        assert_eq!(value, json!({"key": "k", "extra": 1}));
    }

    #[test]
    fn test_diff_ignores_computed_and_orders_by_name() {
        let schema = variable_schema();
        let changes = diff(
            &schema,
            &json!({"key": "a", "value": "1", "hcl": false, "callback_url": "x"}),
            &json!({"key": "b", "value": "1", "hcl": true, "callback_url": "y"}),
        );
        let paths: Vec<_> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["hcl", "key"]);
        assert_eq!(changes[1], AttributeChange::modified("key", json!("a"), json!("b")));
    }

    #[test]
    fn test_diff_treats_null_as_absent() {
        let schema = variable_schema();
        assert!(diff(&schema, &json!({"hcl": null}), &json!({})).is_empty());

        let changes = diff(&schema, &json!({}), &json!({"key": "k"}));
        assert_eq!(changes, vec![AttributeChange::added("key", json!("k"))]);
    }

    #[test]
    fn test_plan_create() {
        let schema = variable_schema();
        let plan = plan(
            &schema,
            None,
            json!({"key": "k", "value": "v", "category": "env"}),
        )
        .unwrap();
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["hcl"], json!(false));
        assert_eq!(plan.changes.len(), 4);
    }

    #[test]
    fn test_plan_rejects_invalid_state() {
        let schema = variable_schema();
        let err = plan(
            &schema,
            None,
            json!({"key": "k", "value": "v", "category": "secret"}),
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[test]
    fn test_plan_update_in_place_keeps_computed() {
        let schema = variable_schema();
        let prior = json!({
            "id": "var-1", "key": "k", "value": "v", "category": "env",
            "hcl": false, "callback_url": "https://cb"
        });
        let plan = plan(
            &schema,
            Some(&prior),
            json!({"key": "k2", "value": "v", "category": "env"}),
        )
        .unwrap();
        assert!(!plan.requires_replace);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.planned_state["id"], "var-1");
        assert_eq!(plan.planned_state["callback_url"], "https://cb");
        assert_eq!(plan.planned_state["key"], "k2");
    }

    #[test]
    fn test_plan_force_new_requires_replace() {
        let schema = variable_schema();
        let prior = json!({"id": "var-1", "key": "k", "value": "v", "category": "env", "hcl": false});
        let plan = plan(
            &schema,
            Some(&prior),
            json!({"key": "k", "value": "v", "category": "terraform"}),
        )
        .unwrap();
        assert!(plan.requires_replace);
        assert!(plan.planned_state.get("id").is_none());
    }

    #[test]
    fn test_plan_no_change_returns_prior() {
        let schema = variable_schema();
        let prior = json!({"id": "var-1", "key": "k", "value": "v", "category": "env", "hcl": false});
        let plan = plan(
            &schema,
            Some(&prior),
            json!({"key": "k", "value": "v", "category": "env"}),
        )
        .unwrap();
        assert!(plan.changes.is_empty());
        assert_eq!(plan.planned_state, prior);
    }

    #[test]
    fn test_plan_destroy() {
        let schema = variable_schema();
        let prior = json!({"id": "var-1", "key": "k", "value": "v", "category": "env", "hcl": false});
        let plan = plan(&schema, Some(&prior), Value::Null).unwrap();
        assert!(plan.planned_state.is_null());
        assert!(!plan.requires_replace);
        assert_eq!(plan.changes.len(), 4);
        assert!(plan.changes.iter().all(|c| c.after.is_none()));
    }

    #[test]
    fn test_carry_computed() {
        let schema = variable_schema();
        let mut into = json!({"key": "k2"});
        carry_computed(
            &schema,
            &json!({"id": "var-1", "key": "k", "callback_url": "https://cb"}),
            &mut into,
        );
        assert_eq!(into, json!({"id": "var-1", "key": "k2", "callback_url": "https://cb"}));
    }

    #[test]
    fn test_preserve_sensitive() {
        let schema = variable_schema();
        let mut refreshed = json!({"id": "var-1", "key": "k", "value": "from-remote"});
        preserve_sensitive(&schema, &json!({"value": "from-config"}), &mut refreshed);
        assert_eq!(refreshed["value"], "from-config");

        let mut imported = json!({"id": "var-1", "key": "k", "value": "from-remote"});
        preserve_sensitive(&schema, &Value::Null, &mut imported);
        assert!(imported["value"].is_null());
    }

    #[test]
    fn test_change_set() {
        let changes: ChangeSet = ["value", "key"].into_iter().collect();
        assert!(changes.contains("key"));
        assert!(!changes.contains("hcl"));
        assert_eq!(changes.iter().collect::<Vec<_>>(), vec!["key", "value"]);
        assert!(ChangeSet::default().is_empty());
    }
}
