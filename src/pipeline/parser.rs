//! Pipeline definition parser.
//!
//! Accepts YAML or JSON (JSON is valid YAML). A document already in the
//! canonical `{name, properties: {...}}` shape is unwrapped first, so an
//! assembled document can be fed back in.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::trace;

use super::schema::PipelineSchemaValidator;
use super::types::PipelineDefinition;
use crate::error::{Error, Result};

/// Parse a pipeline from a YAML or JSON string.
pub fn parse_pipeline(text: &str) -> Result<PipelineDefinition> {
    let raw = parse_raw(text)?;
    parse_pipeline_value(raw)
}

/// Parse a pipeline from an already-decoded JSON value.
pub fn parse_pipeline_value(raw: Value) -> Result<PipelineDefinition> {
    let raw = unwrap_canonical(raw);
    PipelineSchemaValidator::new()?.validate(&raw)?;

    let pipeline: PipelineDefinition = serde_json::from_value(raw).map_err(|e| {
        let msg = e.to_string();
        if let Some(field) = extract_missing_field(&msg) {
            Error::Parse(format!("Missing required field: {}", field))
        } else {
            Error::Parse(format!("Invalid pipeline definition: {}", msg))
        }
    })?;

    trace!(pipeline = %pipeline.name, activities = pipeline.activities.len(), "Parsed pipeline");
    Ok(pipeline)
}

/// Parse a pipeline from a file path.
pub fn parse_pipeline_file(path: &Path) -> Result<PipelineDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_pipeline(&content)
}

/// Decode YAML or JSON text into a JSON value.
pub fn parse_raw(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Err(Error::Parse("Empty pipeline definition".to_string()));
    }
    serde_yaml::from_str(text).map_err(|e| Error::Parse(format!("Invalid YAML: {}", e)))
}

/// Lift `properties.*` up to the top level for canonical documents.
fn unwrap_canonical(raw: Value) -> Value {
    let Value::Object(mut top) = raw else {
        return raw;
    };
    if top.contains_key("activities") {
        return Value::Object(top);
    }
    let Some(Value::Object(properties)) = top.remove("properties") else {
        return Value::Object(top);
    };

    let mut lifted = Map::new();
    if let Some(name) = top.remove("name") {
        lifted.insert("name".into(), name);
    }
    for (key, value) in properties {
        lifted.insert(key, value);
    }
    Value::Object(lifted)
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}
