//! Structural validation of a pipeline definition.
//!
//! Runs before any activity-, connector- or graph-level check.

use std::collections::HashSet;

use serde_json::Value;

use super::types::{Activity, PipelineDefinition, ValueType};
use crate::activities::registry::json_type_name;
use crate::error::{Error, Result};

/// Characters the service rejects in resource names.
pub const FORBIDDEN_NAME_CHARS: &[char] = &['.', '+', '?', '/', '<', '>', '*', '%', '&', ':', '\\'];

const MAX_PIPELINE_NAME_LEN: usize = 260;
const MAX_ACTIVITY_NAME_LEN: usize = 55;

/// Validate a pipeline definition.
///
/// Checks for:
/// - Valid pipeline, activity, parameter and variable names
/// - Unique parameter and variable names
/// - Activity names unique across the whole pipeline, nested scopes included
/// - Default values that conform to their declared type
pub fn validate_definition(definition: &PipelineDefinition) -> Result<()> {
    check_name(&definition.name, MAX_PIPELINE_NAME_LEN)?;

    let mut parameter_names = HashSet::new();
    for parameter in &definition.parameters {
        check_name(&parameter.name, MAX_PIPELINE_NAME_LEN)?;
        if !parameter_names.insert(parameter.name.as_str()) {
            return Err(Error::DuplicateName {
                namespace: "parameter".into(),
                name: parameter.name.clone(),
            });
        }
        check_default(&parameter.name, parameter.value_type, parameter.default.as_ref())?;
    }

    let mut variable_names = HashSet::new();
    for variable in &definition.variables {
        check_name(&variable.name, MAX_PIPELINE_NAME_LEN)?;
        if !variable_names.insert(variable.name.as_str()) {
            return Err(Error::DuplicateName {
                namespace: "variable".into(),
                name: variable.name.clone(),
            });
        }
        check_default(&variable.name, variable.value_type, variable.default.as_ref())?;
    }

    let mut activity_names = HashSet::new();
    check_activities(&definition.activities, &mut activity_names)?;

    Ok(())
}

fn check_activities(activities: &[Activity], seen: &mut HashSet<String>) -> Result<()> {
    for activity in activities {
        check_name(&activity.name, MAX_ACTIVITY_NAME_LEN)?;
        if !seen.insert(activity.name.clone()) {
            return Err(Error::DuplicateName {
                namespace: "activity".into(),
                name: activity.name.clone(),
            });
        }
        if activity.activity_type.trim().is_empty() {
            return Err(Error::UnknownActivityType {
                activity: activity.name.clone(),
                activity_type: activity.activity_type.clone(),
            });
        }
        for scope in activity.nested_scopes()? {
            check_activities(&scope.activities, seen)?;
        }
    }
    Ok(())
}

/// Check a resource name against the service's naming rules.
pub fn check_name(name: &str, max_len: usize) -> Result<()> {
    let invalid = |reason: String| Error::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.trim().is_empty() {
        return Err(invalid("name must not be empty".into()));
    }
    if name.trim() != name {
        return Err(invalid("name must not start or end with whitespace".into()));
    }
    if name.chars().count() > max_len {
        return Err(invalid(format!("name must be at most {} characters", max_len)));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(invalid(format!("character '{}' is not allowed", c)));
    }
    Ok(())
}

fn check_default(name: &str, declared: ValueType, default: Option<&Value>) -> Result<()> {
    match default {
        None | Some(Value::Null) => Ok(()),
        Some(value) if declared.accepts(value) => Ok(()),
        Some(value) => Err(Error::InvalidDefaultValue {
            name: name.to_string(),
            declared: declared.to_string(),
            found: json_type_name(value).to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parse_pipeline;

    #[test]
    fn test_validate_invalid_name() {
        let yaml = r#"
name: bad/name
activities:
  - name: W
    type: Wait
"#;
        let def = parse_pipeline(yaml).unwrap();
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
        assert!(err.to_string().contains("'/'"));
    }

    #[test]
    fn test_validate_duplicate_activity_names_across_scopes() {
        let yaml = r#"
name: dupes
activities:
  - name: Step
    type: Wait
  - name: Loop
    type: ForEach
    typeProperties:
      items: { value: "@createArray(1)", type: Expression }
      activities:
        - name: Step
          type: Wait
"#;
        let def = parse_pipeline(yaml).unwrap();
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { ref namespace, ref name } if namespace == "activity" && name == "Step"));
    }

    #[test]
    fn test_validate_duplicate_parameter() {
        let yaml = r#"
name: p
parameters:
  - { name: region, type: string }
  - { name: region, type: int }
activities:
  - { name: W, type: Wait }
"#;
        let def = parse_pipeline(yaml).unwrap();
        assert!(matches!(
            validate_definition(&def).unwrap_err(),
            Error::DuplicateName { .. }
        ));
    }

    #[test]
    fn test_validate_default_type() {
        let yaml = r#"
name: p
parameters:
  - { name: retries, type: int, default: "three" }
activities:
  - { name: W, type: Wait }
"#;
        let def = parse_pipeline(yaml).unwrap();
        match validate_definition(&def).unwrap_err() {
            Error::InvalidDefaultValue { name, declared, found } => {
                assert_eq!(name, "retries");
                assert_eq!(declared, "int");
                assert_eq!(found, "string");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_validate_valid_pipeline() {
        let yaml = r#"
name: nightly-load
parameters:
  - { name: region, type: string, default: emea }
  - { name: tables, type: array, default: [a, b] }
variables:
  - { name: count, type: int, default: 0 }
activities:
  - name: W
    type: Wait
    typeProperties: { waitTimeInSeconds: 5 }
"#;
        let def = parse_pipeline(yaml).unwrap();
        assert!(validate_definition(&def).is_ok());
    }

    #[test]
    fn test_check_name_length() {
        assert!(check_name(&"a".repeat(55), MAX_ACTIVITY_NAME_LEN).is_ok());
        assert!(check_name(&"a".repeat(56), MAX_ACTIVITY_NAME_LEN).is_err());
        assert!(check_name(" padded", 10).is_err());
    }
}
