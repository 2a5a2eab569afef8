//! Pipeline JSON Schema.
//!
//! A structural pre-check applied to raw input before it is decoded into
//! typed definitions: unknown top-level or activity keys, wrong JSON types
//! and malformed dependency entries are caught here with a path to the
//! offending element. Per-type `typeProperties` contracts are left to the
//! activity registry.

use jsonschema::Validator;
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// JSON Schema for authored pipeline definitions.
pub fn pipeline_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["name", "activities"],
        "properties": {
            "name": { "type": "string", "minLength": 1 },
            "description": { "type": "string" },
            "parameters": { "$ref": "#/$defs/declarations" },
            "variables": { "$ref": "#/$defs/declarations" },
            "activities": {
                "type": "array",
                "items": { "$ref": "#/$defs/activity" }
            },
            "annotations": {
                "type": "array",
                "items": { "type": "string" }
            },
            "concurrency": { "type": "integer", "minimum": 1 }
        },
        "additionalProperties": false,
        "$defs": {
            "valueType": {
                "type": "string",
                "enum": [
                    "string", "String",
                    "int", "integer", "Int", "Integer",
                    "bool", "boolean", "Bool", "Boolean",
                    "array", "Array",
                    "object", "Object",
                    "securestring", "secure-string", "secureString", "SecureString"
                ]
            },
            "declarations": {
                "oneOf": [
                    {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["name", "type"],
                            "properties": {
                                "name": { "type": "string" },
                                "type": { "$ref": "#/$defs/valueType" },
                                "default": true,
                                "defaultValue": true
                            },
                            "additionalProperties": false
                        }
                    },
                    {
                        "type": "object",
                        "additionalProperties": {
                            "type": "object",
                            "required": ["type"],
                            "properties": {
                                "type": { "$ref": "#/$defs/valueType" },
                                "default": true,
                                "defaultValue": true
                            },
                            "additionalProperties": false
                        }
                    }
                ]
            },
            "condition": {
                "type": "string",
                "enum": ["Succeeded", "Failed", "Completed", "Skipped"]
            },
            "dependency": {
                "oneOf": [
                    { "type": "string", "minLength": 1 },
                    {
                        "type": "object",
                        "required": ["activity"],
                        "properties": {
                            "activity": { "type": "string", "minLength": 1 },
                            "dependencyConditions": {
                                "type": "array",
                                "items": { "$ref": "#/$defs/condition" }
                            },
                            "conditions": {
                                "type": "array",
                                "items": { "$ref": "#/$defs/condition" }
                            }
                        },
                        "additionalProperties": false
                    }
                ]
            },
            "policy": {
                "type": "object",
                "properties": {
                    "timeout": { "type": "string" },
                    "retry": { "type": "integer", "minimum": 0 },
                    "retryIntervalInSeconds": { "type": "integer", "minimum": 0 },
                    "secureInput": { "type": "boolean" },
                    "secureOutput": { "type": "boolean" }
                },
                "additionalProperties": false
            },
            "activity": {
                "type": "object",
                "required": ["name", "type"],
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "type": { "type": "string", "minLength": 1 },
                    "description": { "type": "string" },
                    "state": { "type": "string", "enum": ["Active", "Inactive"] },
                    "onInactiveMarkAs": {
                        "type": "string",
                        "enum": ["Succeeded", "Failed", "Skipped"]
                    },
                    "dependsOn": {
                        "type": "array",
                        "items": { "$ref": "#/$defs/dependency" }
                    },
                    "policy": { "$ref": "#/$defs/policy" },
                    "typeProperties": { "type": ["object", "null"] },
                    "externalReferences": { "type": "object" },
                    "userProperties": { "type": "array" }
                },
                "additionalProperties": false
            }
        }
    })
}

/// Validator for pipeline definitions.
pub struct PipelineSchemaValidator {
    validator: Validator,
}

impl PipelineSchemaValidator {
    /// Create a new pipeline schema validator.
    pub fn new() -> Result<Self> {
        let schema = pipeline_schema();
        let validator = Validator::new(&schema)
            .map_err(|e| Error::Parse(format!("Invalid pipeline schema: {}", e)))?;
        Ok(Self { validator })
    }

    /// Validate a raw pipeline definition.
    pub fn validate(&self, pipeline: &Value) -> Result<()> {
        if let Err(error) = self.validator.validate(pipeline) {
            let msg = error.to_string();
            if let Some(field) = required_property(&msg) {
                return Err(Error::Parse(format!("Missing required field: {}", field)));
            }
            return Err(Error::Parse(format!(
                "Pipeline does not match schema at '{}': {}",
                error.instance_path, msg
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self, pipeline: &Value) -> bool {
        self.validator.is_valid(pipeline)
    }
}

/// Pull `x` out of `"x" is a required property`.
fn required_property(msg: &str) -> Option<&str> {
    msg.strip_suffix(" is a required property")?
        .strip_prefix('"')?
        .strip_suffix('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_minimal_pipeline() {
        let pipeline = json!({
            "name": "p",
            "activities": [{"name": "W", "type": "Wait"}]
        });
        let validator = PipelineSchemaValidator::new().unwrap();
        assert!(validator.validate(&pipeline).is_ok());
    }

    #[test]
    fn test_valid_full_pipeline() {
        let pipeline = json!({
            "name": "full",
            "description": "Everything",
            "parameters": {"region": {"type": "String", "defaultValue": "emea"}},
            "variables": [{"name": "n", "type": "int", "default": 0}],
            "annotations": ["nightly"],
            "concurrency": 1,
            "activities": [
                {"name": "A", "type": "Wait", "typeProperties": {"waitTimeInSeconds": 1},
                 "policy": {"timeout": "0.01:00:00", "retry": 2}},
                {"name": "B", "type": "Wait", "state": "Inactive", "onInactiveMarkAs": "Succeeded",
                 "dependsOn": ["A", {"activity": "A", "dependencyConditions": ["Failed"]}]}
            ]
        });
        let validator = PipelineSchemaValidator::new().unwrap();
        assert!(validator.validate(&pipeline).is_ok());
    }

    #[test]
    fn test_unknown_activity_key() {
        let pipeline = json!({
            "name": "p",
            "activities": [{"name": "W", "type": "Wait", "depends_on": ["X"]}]
        });
        let validator = PipelineSchemaValidator::new().unwrap();
        let err = validator.validate(&pipeline).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_bad_condition_literal() {
        let pipeline = json!({
            "name": "p",
            "activities": [
                {"name": "A", "type": "Wait"},
                {"name": "B", "type": "Wait", "dependsOn": [{"activity": "A", "dependencyConditions": ["Maybe"]}]}
            ]
        });
        let validator = PipelineSchemaValidator::new().unwrap();
        assert!(!validator.is_valid(&pipeline));
    }

    #[test]
    fn test_missing_activity_type() {
        let pipeline = json!({
            "name": "p",
            "activities": [{"name": "W"}]
        });
        let validator = PipelineSchemaValidator::new().unwrap();
        match validator.validate(&pipeline).unwrap_err() {
            Error::Parse(msg) => assert_eq!(msg, "Missing required field: type"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_negative_retry_rejected() {
        let pipeline = json!({
            "name": "p",
            "activities": [{"name": "A", "type": "Wait", "policy": {"retry": -1}}]
        });
        let validator = PipelineSchemaValidator::new().unwrap();
        assert!(!validator.is_valid(&pipeline));
    }
}
