//! Pipeline type definitions.
//!
//! These mirror the authoring format: camelCase keys, a flat activity list,
//! and free-form `typeProperties` whose shape is checked by the activity
//! registry rather than by serde.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::timespan::Timespan;
use crate::activities::ActivityKind;
use crate::error::{Error, Result};

/// A complete pipeline definition.
///
/// # Example YAML
///
/// ```yaml
/// name: nightly-orders
/// parameters:
///   - name: region
///     type: string
///     default: emea
/// activities:
///   - name: CopyOrders
///     type: Copy
///     typeProperties:
///       source: { connector: MySql, connection: conn-1, table: sales.orders }
///       sink: { connector: Lakehouse, workspaceId: ws-1, artifactId: lh-1, table: orders }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    /// Pipeline name, unique within its workspace
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared parameters, either as a list or as a `{name: {type, defaultValue}}` map
    #[serde(default, deserialize_with = "deserialize_parameters")]
    pub parameters: Vec<Parameter>,

    /// Declared variables, same accepted shapes as parameters
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: Vec<Variable>,

    /// Activities in declaration order
    pub activities: Vec<Activity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,

    /// Maximum concurrent runs of the pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
}

/// Parameter and variable value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    #[serde(rename = "string", alias = "String")]
    String,
    #[serde(rename = "int", alias = "integer", alias = "Int", alias = "Integer")]
    Int,
    #[serde(rename = "bool", alias = "boolean", alias = "Bool", alias = "Boolean")]
    Bool,
    #[serde(rename = "array", alias = "Array")]
    Array,
    #[serde(rename = "object", alias = "Object")]
    Object,
    #[serde(
        rename = "securestring",
        alias = "secure-string",
        alias = "secureString",
        alias = "SecureString"
    )]
    SecureString,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Int => "int",
            ValueType::Bool => "bool",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::SecureString => "securestring",
        }
    }

    /// Whether a literal value conforms to this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueType::String | ValueType::SecureString => value.is_string(),
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Bool => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed pipeline parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,

    #[serde(rename = "type")]
    pub value_type: ValueType,

    #[serde(default, alias = "defaultValue", skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A typed pipeline variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,

    #[serde(rename = "type")]
    pub value_type: ValueType,

    #[serde(default, alias = "defaultValue", skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Map-form entry: `{type, defaultValue}` keyed by name.
#[derive(Deserialize)]
struct TypedEntry {
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(default, alias = "defaultValue")]
    default: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NamedOrKeyed<T> {
    List(Vec<T>),
    Map(indexmap::IndexMap<String, TypedEntry>),
}

fn deserialize_parameters<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<Parameter>, D::Error> {
    Ok(match NamedOrKeyed::<Parameter>::deserialize(d)? {
        NamedOrKeyed::List(list) => list,
        NamedOrKeyed::Map(map) => map
            .into_iter()
            .map(|(name, e)| Parameter {
                name,
                value_type: e.value_type,
                default: e.default,
            })
            .collect(),
    })
}

fn deserialize_variables<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<Variable>, D::Error> {
    Ok(match NamedOrKeyed::<Variable>::deserialize(d)? {
        NamedOrKeyed::List(list) => list,
        NamedOrKeyed::Map(map) => map
            .into_iter()
            .map(|(name, e)| Variable {
                name,
                value_type: e.value_type,
                default: e.default,
            })
            .collect(),
    })
}

/// A single unit of work in a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Name, unique across the whole pipeline including nested scopes
    pub name: String,

    /// Activity type literal (e.g. "Copy", "ForEach")
    #[serde(rename = "type")]
    pub activity_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ActivityState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_inactive_mark_as: Option<InactiveOutcome>,

    #[serde(default)]
    pub depends_on: Vec<Dependency>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,

    /// Type-specific payload
    #[serde(default = "empty_object", deserialize_with = "null_as_empty_object")]
    pub type_properties: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_references: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_properties: Vec<Value>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn null_as_empty_object<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Value, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(if value.is_null() { empty_object() } else { value })
}

/// Whether an activity runs or is skipped with a fixed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityState {
    Active,
    Inactive,
}

/// Outcome reported for an inactive activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InactiveOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of a predecessor that satisfies a dependency edge.
///
/// Declaration order is the canonical output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DependencyCondition {
    Succeeded,
    Failed,
    Completed,
    Skipped,
}

/// A dependency edge: this activity runs after `activity` ends in one of
/// `dependency_conditions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "DependencyRepr")]
pub struct Dependency {
    pub activity: String,
    pub dependency_conditions: Vec<DependencyCondition>,
}

impl Dependency {
    pub fn succeeded(activity: impl Into<String>) -> Self {
        Self {
            activity: activity.into(),
            dependency_conditions: vec![DependencyCondition::Succeeded],
        }
    }
}

/// A bare name is shorthand for a `Succeeded` dependency.
#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyRepr {
    Name(String),
    #[serde(rename_all = "camelCase")]
    Full {
        activity: String,
        #[serde(alias = "conditions")]
        dependency_conditions: Vec<DependencyCondition>,
    },
}

impl From<DependencyRepr> for Dependency {
    fn from(repr: DependencyRepr) -> Self {
        match repr {
            DependencyRepr::Name(activity) => Dependency::succeeded(activity),
            DependencyRepr::Full {
                activity,
                dependency_conditions,
            } => Dependency {
                activity,
                dependency_conditions,
            },
        }
    }
}

/// Execution policy as authored; absent fields take defaults at assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Timespan>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_interval_in_seconds: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_output: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_input: Option<bool>,
}

/// Fully resolved policy as emitted in canonical documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDefaults {
    #[serde(default = "default_timeout")]
    pub timeout: Timespan,

    #[serde(default)]
    pub retry: u32,

    #[serde(default = "default_retry_interval", alias = "retry_interval_seconds")]
    pub retry_interval_in_seconds: u32,

    #[serde(default, alias = "secure_output")]
    pub secure_output: bool,

    #[serde(default, alias = "secure_input")]
    pub secure_input: bool,
}

fn default_timeout() -> Timespan {
    Timespan::from_secs(12 * 3_600)
}

fn default_retry_interval() -> u32 {
    30
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retry: 0,
            retry_interval_in_seconds: default_retry_interval(),
            secure_output: false,
            secure_input: false,
        }
    }
}

impl Policy {
    /// Fill absent fields from `defaults`.
    pub fn resolve(&self, defaults: &PolicyDefaults) -> PolicyDefaults {
        PolicyDefaults {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            retry: self.retry.unwrap_or(defaults.retry),
            retry_interval_in_seconds: self
                .retry_interval_in_seconds
                .unwrap_or(defaults.retry_interval_in_seconds),
            secure_output: self.secure_output.unwrap_or(defaults.secure_output),
            secure_input: self.secure_input.unwrap_or(defaults.secure_input),
        }
    }
}

/// One nested activity list of a container activity.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedScope {
    /// Location of the list relative to `typeProperties`
    pub pointer: String,
    pub activities: Vec<Activity>,
}

impl Activity {
    pub fn kind(&self) -> Option<ActivityKind> {
        ActivityKind::from_type_name(&self.activity_type)
    }

    pub fn is_container(&self) -> bool {
        self.kind().is_some_and(|k| k.is_container())
    }

    /// Decode the nested activity lists of a container activity.
    pub fn nested_scopes(&self) -> Result<Vec<NestedScope>> {
        let Some(kind) = self.kind() else {
            return Ok(Vec::new());
        };

        kind.nested_pointers(&self.type_properties)
            .into_iter()
            .map(|pointer| {
                let raw = self
                    .type_properties
                    .pointer(&pointer)
                    .cloned()
                    .unwrap_or(Value::Null);
                let activities: Vec<Activity> = serde_json::from_value(raw).map_err(|e| {
                    Error::Parse(format!(
                        "Activity '{}' has invalid nested activities at '{}': {}",
                        self.name,
                        pointer.trim_start_matches('/'),
                        e
                    ))
                })?;
                Ok(NestedScope { pointer, activities })
            })
            .collect()
    }

    /// Write nested activity lists back into `typeProperties`.
    pub fn replace_nested(&mut self, scopes: &[NestedScope]) -> Result<()> {
        for scope in scopes {
            let encoded = serde_json::to_value(&scope.activities)?;
            let slot = self.type_properties.pointer_mut(&scope.pointer).ok_or_else(|| {
                Error::Parse(format!(
                    "Activity '{}' has no nested list at '{}'",
                    self.name, scope.pointer
                ))
            })?;
            *slot = encoded;
        }
        Ok(())
    }

    /// Predecessor names in authored order, without duplicates.
    pub fn dependency_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for dep in &self.depends_on {
            if !names.contains(&dep.activity.as_str()) {
                names.push(dep.activity.as_str());
            }
        }
        names
    }
}

impl PipelineDefinition {
    /// Find a top-level activity by name.
    pub fn get_activity(&self, name: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Names of every activity, nested scopes included, in depth-first
    /// declaration order.
    pub fn all_activity_names(&self) -> Result<Vec<String>> {
        fn collect(activities: &[Activity], out: &mut Vec<String>) -> Result<()> {
            for activity in activities {
                out.push(activity.name.clone());
                for scope in activity.nested_scopes()? {
                    collect(&scope.activities, out)?;
                }
            }
            Ok(())
        }

        let mut names = Vec::new();
        collect(&self.activities, &mut names)?;
        Ok(names)
    }

    /// Distinct activity type literals used anywhere in the pipeline.
    pub fn activity_types(&self) -> Result<Vec<String>> {
        fn collect(activities: &[Activity], out: &mut Vec<String>) -> Result<()> {
            for activity in activities {
                if !out.contains(&activity.activity_type) {
                    out.push(activity.activity_type.clone());
                }
                for scope in activity.nested_scopes()? {
                    collect(&scope.activities, out)?;
                }
            }
            Ok(())
        }

        let mut types = Vec::new();
        collect(&self.activities, &mut types)?;
        Ok(types)
    }
}
