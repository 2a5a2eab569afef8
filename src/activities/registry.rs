//! Activity registry - per-type property contracts.
//!
//! Each activity type declares which `typeProperties` keys it requires,
//! which it accepts, what JSON shape each key must have, and which keys it
//! forbids. The registry is read-mostly: a process-wide snapshot can be
//! replaced atomically with [`ActivityRegistry::install`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use serde_json::Value;
use tracing::debug;

use super::kind::ActivityKind;
use crate::error::{Error, Result};
use crate::pipeline::types::Activity;

/// JSON shape a property value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyShape {
    Text,
    Integer,
    Boolean,
    Object,
    Array,
    /// A nested list of activities
    Activities,
    /// An `{"value": "...", "type": "Expression"}` object
    Expression,
    Any,
}

impl PropertyShape {
    pub fn describe(&self) -> &'static str {
        match self {
            PropertyShape::Text => "string",
            PropertyShape::Integer => "integer",
            PropertyShape::Boolean => "boolean",
            PropertyShape::Object => "object",
            PropertyShape::Array => "array",
            PropertyShape::Activities => "activity list",
            PropertyShape::Expression => "expression object",
            PropertyShape::Any => "any value",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            PropertyShape::Text => value.is_string(),
            PropertyShape::Integer => value.is_i64() || value.is_u64(),
            PropertyShape::Boolean => value.is_boolean(),
            PropertyShape::Object => value.is_object(),
            PropertyShape::Array | PropertyShape::Activities => value.is_array(),
            PropertyShape::Expression => is_expression_object(value),
            PropertyShape::Any => true,
        }
    }
}

/// Contract for one `typeProperties` key.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub key: &'static str,
    pub shape: PropertyShape,
    pub required: bool,
    /// Also accepts a dynamic expression in place of a literal
    pub dynamic: bool,
}

impl PropertySpec {
    pub fn required(key: &'static str, shape: PropertyShape) -> Self {
        Self {
            key,
            shape,
            required: true,
            dynamic: false,
        }
    }

    pub fn optional(key: &'static str, shape: PropertyShape) -> Self {
        Self {
            key,
            shape,
            required: false,
            dynamic: false,
        }
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }
}

/// Property contract of an activity type.
#[derive(Debug, Clone)]
pub struct ActivitySpec {
    pub kind: ActivityKind,
    pub description: &'static str,
    pub properties: Vec<PropertySpec>,
    pub forbidden: Vec<&'static str>,
}

impl ActivitySpec {
    pub fn new(kind: ActivityKind, description: &'static str) -> Self {
        Self {
            kind,
            description,
            properties: Vec::new(),
            forbidden: Vec::new(),
        }
    }

    pub fn with(mut self, property: PropertySpec) -> Self {
        self.properties.push(property);
        self
    }

    pub fn forbid(mut self, key: &'static str) -> Self {
        self.forbidden.push(key);
        self
    }

    pub fn required_keys(&self) -> Vec<&'static str> {
        self.properties
            .iter()
            .filter(|p| p.required)
            .map(|p| p.key)
            .collect()
    }
}

/// Registry of activity contracts.
#[derive(Debug, Clone)]
pub struct ActivityRegistry {
    specs: HashMap<ActivityKind, ActivitySpec>,
}

static GLOBAL: OnceLock<RwLock<Arc<ActivityRegistry>>> = OnceLock::new();

impl ActivityRegistry {
    /// Create a new registry with every built-in activity type.
    pub fn new() -> Self {
        use PropertyShape::*;
        use PropertySpec as P;

        let mut registry = Self::empty();

        registry.register(
            ActivitySpec::new(ActivityKind::Copy, "Copy data from a source connector to a sink connector")
                .with(P::required("source", Object))
                .with(P::required("sink", Object))
                .with(P::optional("translator", Object))
                .with(P::optional("enableStaging", Boolean).dynamic())
                .forbid("activities"),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::TridentNotebook, "Run a notebook in the workspace")
                .with(P::required("notebookId", Text).dynamic())
                .with(P::required("workspaceId", Text).dynamic())
                .with(P::optional("parameters", Object)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::Teams, "Post a message to a Teams channel or chat")
                .with(P::required("inputs", Object)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::RefreshDataflow, "Refresh a dataflow")
                .with(P::required("workspaceId", Text).dynamic())
                .with(P::optional("dataflowId", Text).dynamic())
                .with(P::optional("notifyOption", Text))
                .with(P::optional("dataflowType", Text)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::GetMetadata, "Read metadata of a dataset")
                .with(P::optional("datasetSettings", Object))
                .with(P::optional("fieldList", Array))
                .with(P::optional("storeSettings", Object)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::Lookup, "Read rows from a source connector")
                .with(P::optional("source", Object))
                .with(P::optional("datasetSettings", Object))
                .with(P::optional("firstRowOnly", Boolean).dynamic()),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::Script, "Run SQL scripts against a database connection")
                .with(P::required("scripts", Array))
                .with(P::optional("scriptBlockExecutionTimeout", Text)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::SqlServerStoredProcedure, "Invoke a stored procedure")
                .with(P::required("storedProcedureName", Text).dynamic())
                .with(P::optional("storedProcedureParameters", Object)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::SetVariable, "Assign a pipeline variable")
                .with(P::required("variableName", Text))
                .with(P::optional("value", Any))
                .with(P::optional("setSystemVariable", Boolean)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::AppendVariable, "Append to an array variable")
                .with(P::required("variableName", Text))
                .with(P::required("value", Any)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::IfCondition, "Branch on a boolean expression")
                .with(P::required("expression", Expression))
                .with(P::optional("ifTrueActivities", Activities))
                .with(P::optional("ifFalseActivities", Activities)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::ForEach, "Run nested activities for every item")
                .with(P::required("items", Expression))
                .with(P::required("activities", Activities))
                .with(P::optional("isSequential", Boolean))
                .with(P::optional("batchCount", Integer)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::Switch, "Run the case matching an expression")
                .with(P::required("on", Expression))
                .with(P::optional("cases", Array))
                .with(P::optional("defaultActivities", Activities)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::Filter, "Filter an array with a condition")
                .with(P::required("items", Expression))
                .with(P::required("condition", Expression)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::Wait, "Pause for a number of seconds")
                .with(P::required("waitTimeInSeconds", Integer).dynamic()),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::Until, "Repeat nested activities until a condition holds")
                .with(P::required("expression", Expression))
                .with(P::required("activities", Activities))
                .with(P::optional("timeout", Text)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::Fail, "Fail the run with a custom error")
                .with(P::required("message", Text).dynamic())
                .with(P::required("errorCode", Text).dynamic()),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::InvokePipeline, "Invoke another pipeline")
                .with(P::optional("operationType", Text))
                .with(P::optional("pipelineId", Text).dynamic())
                .with(P::optional("workspaceId", Text).dynamic())
                .with(P::optional("waitOnCompletion", Boolean))
                .with(P::optional("parameters", Object))
                .forbid("pipeline"),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::ExecutePipeline, "Execute a pipeline by reference")
                .with(P::required("pipeline", Object))
                .with(P::optional("waitOnCompletion", Boolean))
                .with(P::optional("parameters", Object))
                .forbid("pipelineId"),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::WebActivity, "Call a REST endpoint")
                .with(P::required("method", Text))
                .with(P::optional("relativeUrl", Text).dynamic())
                .with(P::optional("headers", Object))
                .with(P::optional("body", Any)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::WebHook, "Call an endpoint and wait for its callback")
                .with(P::required("method", Text))
                .with(P::optional("timeout", Text))
                .with(P::optional("relativeUrl", Text).dynamic())
                .with(P::optional("headers", Object))
                .with(P::optional("body", Any)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::DatabricksNotebook, "Run a Databricks notebook")
                .with(P::optional("notebookPath", Text).dynamic())
                .with(P::optional("baseParameters", Object))
                .with(P::optional("clusterOption", Text))
                .with(P::optional("newClusterNumOfWorker", Text))
                .with(P::optional("newClusterInitScripts", Array)),
        );
        registry.register(
            ActivitySpec::new(ActivityKind::FabricSparkJobDefinition, "Run a Spark job definition")
                .with(P::required("workspaceId", Text).dynamic())
                .with(P::optional("sparkJobDefinitionId", Text).dynamic()),
        );

        registry
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            specs: HashMap::new(),
        }
    }

    /// Register an activity contract, replacing any previous one.
    pub fn register(&mut self, spec: ActivitySpec) {
        self.specs.insert(spec.kind, spec);
    }

    pub fn get(&self, kind: ActivityKind) -> Option<&ActivitySpec> {
        self.specs.get(&kind)
    }

    /// Check if a type literal is registered.
    pub fn has(&self, activity_type: &str) -> bool {
        ActivityKind::from_type_name(activity_type).is_some_and(|k| self.specs.contains_key(&k))
    }

    /// List registered type literals in a stable order.
    pub fn list(&self) -> Vec<&'static str> {
        let mut kinds: Vec<ActivityKind> = self.specs.keys().copied().collect();
        kinds.sort();
        kinds.into_iter().map(|k| k.as_str()).collect()
    }

    /// Get descriptions of all registered activity types.
    pub fn descriptions(&self) -> Vec<(&'static str, &'static str)> {
        let mut out: Vec<_> = self
            .specs
            .values()
            .map(|s| (s.kind.as_str(), s.description))
            .collect();
        out.sort();
        out
    }

    /// Shared process-wide registry.
    pub fn global() -> Arc<ActivityRegistry> {
        let cell = GLOBAL.get_or_init(|| RwLock::new(Arc::new(ActivityRegistry::new())));
        match cell.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Atomically replace the process-wide registry.
    ///
    /// Callers already holding a snapshot keep using it.
    pub fn install(registry: ActivityRegistry) -> Arc<ActivityRegistry> {
        let cell = GLOBAL.get_or_init(|| RwLock::new(Arc::new(ActivityRegistry::new())));
        let next = Arc::new(registry);
        let mut guard = match cell.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }

    /// Validate one activity against its contract, recursing into nested
    /// activity lists of containers. Returns the resolved kind.
    pub fn validate(&self, activity: &Activity) -> Result<ActivityKind> {
        let kind = activity
            .kind()
            .filter(|k| self.specs.contains_key(k))
            .ok_or_else(|| Error::UnknownActivityType {
                activity: activity.name.clone(),
                activity_type: activity.activity_type.clone(),
            })?;
        let spec = &self.specs[&kind];

        let props = activity.type_properties.as_object().ok_or_else(|| {
            Error::PropertyTypeMismatch {
                activity: activity.name.clone(),
                key: "typeProperties".to_string(),
                expected: "object".to_string(),
                found: json_type_name(&activity.type_properties).to_string(),
            }
        })?;

        for property in &spec.properties {
            let value = match props.get(property.key) {
                Some(v) if !v.is_null() => v,
                _ if property.required => {
                    return Err(Error::MissingRequiredProperty {
                        activity: activity.name.clone(),
                        key: property.key.to_string(),
                    })
                }
                _ => continue,
            };

            let dynamic_ok = property.dynamic && is_dynamic(value);
            if !dynamic_ok && !property.shape.matches(value) {
                return Err(Error::PropertyTypeMismatch {
                    activity: activity.name.clone(),
                    key: property.key.to_string(),
                    expected: property.shape.describe().to_string(),
                    found: json_type_name(value).to_string(),
                });
            }
        }

        for key in &spec.forbidden {
            if let Some(value) = props.get(*key) {
                return Err(Error::PropertyTypeMismatch {
                    activity: activity.name.clone(),
                    key: key.to_string(),
                    expected: format!("no '{}' on {} activities", key, kind),
                    found: json_type_name(value).to_string(),
                });
            }
        }

        if kind == ActivityKind::Switch {
            validate_switch_cases(activity, props.get("cases"))?;
        }

        for scope in activity.nested_scopes()? {
            self.validate_all(&scope.activities)?;
        }

        debug!(activity = %activity.name, activity_type = %kind, "Activity contract satisfied");
        Ok(kind)
    }

    /// Validate every activity in a list.
    pub fn validate_all(&self, activities: &[Activity]) -> Result<()> {
        for activity in activities {
            self.validate(activity)?;
        }
        Ok(())
    }
}

impl Default for ActivityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_switch_cases(activity: &Activity, cases: Option<&Value>) -> Result<()> {
    let Some(cases) = cases.and_then(|c| c.as_array()) else {
        return Ok(());
    };
    for (i, case) in cases.iter().enumerate() {
        let key = format!("cases[{}].activities", i);
        match case.get("activities") {
            Some(v) if v.is_array() => {}
            Some(v) => {
                return Err(Error::PropertyTypeMismatch {
                    activity: activity.name.clone(),
                    key,
                    expected: PropertyShape::Activities.describe().to_string(),
                    found: json_type_name(v).to_string(),
                })
            }
            None => {
                return Err(Error::MissingRequiredProperty {
                    activity: activity.name.clone(),
                    key,
                })
            }
        }
    }
    Ok(())
}

/// `{"value": "...", "type": "Expression"}`
pub fn is_expression_object(value: &Value) -> bool {
    value.get("type").and_then(|t| t.as_str()) == Some("Expression")
        && value.get("value").is_some_and(|v| v.is_string())
}

/// Expression object or an `@`-prefixed string.
pub fn is_dynamic(value: &Value) -> bool {
    is_expression_object(value)
        || value
            .as_str()
            .is_some_and(|s| s.starts_with('@') && !s.starts_with("@@"))
}

/// Get a human-readable name for a JSON value's type.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) if is_expression_object(value) => "expression object",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn activity(value: Value) -> Activity {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_registry_default_activities() {
        let registry = ActivityRegistry::new();
        for kind in ActivityKind::ALL {
            assert!(registry.has(kind.as_str()), "missing {}", kind);
        }
        assert!(!registry.has("Nonexistent"));
        assert_eq!(registry.list().len(), ActivityKind::ALL.len());
    }

    #[test]
    fn test_unknown_type() {
        let registry = ActivityRegistry::new();
        let err = registry
            .validate(&activity(json!({"name": "A", "type": "Teleport"})))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownActivityType { .. }));
    }

    #[test]
    fn test_empty_registry_rejects_everything() {
        let registry = ActivityRegistry::empty();
        let err = registry
            .validate(&activity(json!({"name": "A", "type": "Wait", "typeProperties": {"waitTimeInSeconds": 1}})))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownActivityType { .. }));
    }

    #[test]
    fn test_missing_required_property() {
        let registry = ActivityRegistry::new();
        let err = registry
            .validate(&activity(json!({
                "name": "CopyIt",
                "type": "Copy",
                "typeProperties": {"source": {}}
            })))
            .unwrap_err();
        match err {
            Error::MissingRequiredProperty { activity, key } => {
                assert_eq!(activity, "CopyIt");
                assert_eq!(key, "sink");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_type_mismatch() {
        let registry = ActivityRegistry::new();
        let err = registry
            .validate(&activity(json!({
                "name": "Pause",
                "type": "Wait",
                "typeProperties": {"waitTimeInSeconds": "ten"}
            })))
            .unwrap_err();
        match err {
            Error::PropertyTypeMismatch { key, expected, found, .. } => {
                assert_eq!(key, "waitTimeInSeconds");
                assert_eq!(expected, "integer");
                assert_eq!(found, "string");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_dynamic_value_accepted() {
        let registry = ActivityRegistry::new();
        let kind = registry
            .validate(&activity(json!({
                "name": "Pause",
                "type": "Wait",
                "typeProperties": {"waitTimeInSeconds": "@pipeline().parameters.delay"}
            })))
            .unwrap();
        assert_eq!(kind, ActivityKind::Wait);
    }

    #[test]
    fn test_expression_shape_is_strict() {
        let registry = ActivityRegistry::new();
        let err = registry
            .validate(&activity(json!({
                "name": "Loop",
                "type": "ForEach",
                "typeProperties": {"items": "@pipeline().parameters.x", "activities": []}
            })))
            .unwrap_err();
        assert!(matches!(err, Error::PropertyTypeMismatch { .. }));
    }

    #[test]
    fn test_forbidden_key() {
        let registry = ActivityRegistry::new();
        let err = registry
            .validate(&activity(json!({
                "name": "Run",
                "type": "InvokePipeline",
                "typeProperties": {"pipeline": {"referenceName": "x"}}
            })))
            .unwrap_err();
        assert!(matches!(err, Error::PropertyTypeMismatch { ref key, .. } if key == "pipeline"));
    }

    #[test]
    fn test_nested_activities_are_validated() {
        let registry = ActivityRegistry::new();
        let err = registry
            .validate(&activity(json!({
                "name": "Check",
                "type": "IfCondition",
                "typeProperties": {
                    "expression": {"value": "@equals(1, 1)", "type": "Expression"},
                    "ifTrueActivities": [{"name": "Inner", "type": "Bogus"}]
                }
            })))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownActivityType { ref activity, .. } if activity == "Inner"));
    }

    #[test]
    fn test_switch_case_requires_activities() {
        let registry = ActivityRegistry::new();
        let err = registry
            .validate(&activity(json!({
                "name": "Route",
                "type": "Switch",
                "typeProperties": {
                    "on": {"value": "@pipeline().parameters.mode", "type": "Expression"},
                    "cases": [{"value": "full"}]
                }
            })))
            .unwrap_err();
        assert!(matches!(err, Error::MissingRequiredProperty { ref key, .. } if key == "cases[0].activities"));
    }
}
