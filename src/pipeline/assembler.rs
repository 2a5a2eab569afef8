//! Document assembler - builds the canonical document the service accepts.
//!
//! Assembly is a pure function of its input: the definition is never
//! mutated, activities come out in topological order (ties broken by
//! declaration order), parameters and variables keep declaration order,
//! and free-form payload keys are emitted sorted so equal definitions
//! produce byte-identical output.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::dag::DependencyGraph;
use super::types::{
    Activity, ActivityState, Dependency, InactiveOutcome, PipelineDefinition, PolicyDefaults,
    ValueType,
};
use crate::error::{Error, Result};

/// File name of the pipeline content part in an item definition.
pub const CONTENT_PART_PATH: &str = "pipeline-content.json";

/// Canonical pipeline document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub name: String,
    pub properties: DocumentProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub activities: Vec<CanonicalActivity>,

    pub parameters: IndexMap<String, TypedValue>,

    pub variables: IndexMap<String, TypedValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
}

/// Parameter or variable declaration, keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub value_type: ValueType,

    #[serde(rename = "defaultValue", default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// Activity with defaults applied and dependencies merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalActivity {
    pub name: String,

    #[serde(rename = "type")]
    pub activity_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ActivityState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_inactive_mark_as: Option<InactiveOutcome>,

    pub depends_on: Vec<Dependency>,

    pub policy: PolicyDefaults,

    pub type_properties: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_references: Option<Value>,

    #[serde(default)]
    pub user_properties: Vec<Value>,
}

/// One part of an item definition payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionPart {
    pub path: String,
    pub payload: String,
    pub payload_type: String,
}

/// Body of the content part: `{"properties": ...}`.
#[derive(Serialize)]
struct PartContent<'a> {
    properties: &'a DocumentProperties,
}

impl CanonicalDocument {
    /// Compact JSON. Serialized straight from the struct so parameters and
    /// variables stay in declaration order.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Document as a `Value`. Every object in it is key-sorted, including
    /// `parameters` and `variables`; use `to_json` for wire output.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Base64 definition parts carrying the `properties` payload.
    pub fn definition_parts(&self) -> Result<Vec<DefinitionPart>> {
        let content = PartContent {
            properties: &self.properties,
        };
        let payload = BASE64.encode(serde_json::to_string(&content)?);
        Ok(vec![DefinitionPart {
            path: CONTENT_PART_PATH.to_string(),
            payload,
            payload_type: "InlineBase64".to_string(),
        }])
    }

    /// Decode the `properties` payload of a definition part.
    pub fn decode_part(part: &DefinitionPart) -> Result<Value> {
        let bytes = BASE64
            .decode(part.payload.as_bytes())
            .map_err(|e| Error::Parse(format!("Invalid base64 payload in '{}': {}", part.path, e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Builds canonical documents with a fixed default policy.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    defaults: PolicyDefaults,
}

impl Assembler {
    pub fn new(defaults: PolicyDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &PolicyDefaults {
        &self.defaults
    }

    /// Assemble a definition into its canonical document.
    ///
    /// The definition is expected to have passed validation; a cyclic or
    /// dangling graph is still rejected here.
    pub fn assemble(&self, definition: &PipelineDefinition) -> Result<CanonicalDocument> {
        let activities = self.assemble_scope(&definition.activities)?;

        let parameters = definition
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    TypedValue {
                        value_type: p.value_type,
                        default_value: p.default.clone().filter(|d| !d.is_null()),
                    },
                )
            })
            .collect();
        let variables = definition
            .variables
            .iter()
            .map(|v| {
                (
                    v.name.clone(),
                    TypedValue {
                        value_type: v.value_type,
                        default_value: v.default.clone().filter(|d| !d.is_null()),
                    },
                )
            })
            .collect();

        debug!(pipeline = %definition.name, activities = activities.len(), "Assembled pipeline document");

        Ok(CanonicalDocument {
            name: definition.name.clone(),
            properties: DocumentProperties {
                description: definition.description.clone(),
                activities,
                parameters,
                variables,
                annotations: definition.annotations.clone(),
                concurrency: definition.concurrency,
            },
        })
    }

    fn assemble_scope(&self, activities: &[Activity]) -> Result<Vec<CanonicalActivity>> {
        let graph = DependencyGraph::build(activities)?;

        graph
            .topological_order()
            .into_iter()
            .filter_map(|name| activities.iter().find(|a| a.name == name))
            .map(|activity| self.assemble_activity(activity, &graph))
            .collect()
    }

    fn assemble_activity(&self, activity: &Activity, graph: &DependencyGraph) -> Result<CanonicalActivity> {
        let mut type_properties = activity.type_properties.clone();

        for scope in activity.nested_scopes()? {
            let nested = self.assemble_scope(&scope.activities)?;
            if let Some(slot) = type_properties.pointer_mut(&scope.pointer) {
                *slot = serde_json::to_value(nested)?;
            }
        }

        let policy = activity
            .policy
            .as_ref()
            .map(|p| p.resolve(&self.defaults))
            .unwrap_or_else(|| self.defaults.clone());

        let on_inactive_mark_as = match (activity.state, activity.on_inactive_mark_as) {
            (Some(ActivityState::Inactive), None) => Some(InactiveOutcome::Succeeded),
            (_, outcome) => outcome,
        };

        Ok(CanonicalActivity {
            name: activity.name.clone(),
            activity_type: activity.activity_type.clone(),
            description: activity.description.clone(),
            state: activity.state,
            on_inactive_mark_as,
            depends_on: graph.dependencies_of(&activity.name),
            policy,
            type_properties,
            external_references: activity.external_references.clone(),
            user_properties: activity.user_properties.clone(),
        })
    }
}

/// Assemble with the built-in default policy.
pub fn assemble(definition: &PipelineDefinition) -> Result<CanonicalDocument> {
    Assembler::default().assemble(definition)
}
