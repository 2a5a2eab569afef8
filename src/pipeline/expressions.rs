//! Expression reference validation.
//!
//! Dynamic values are strings starting with `@` (`@@` escapes a literal
//! `@`) or containing `@{...}` interpolations. Every reference they make to
//! `pipeline().parameters.X`, `variables('X')` or `activity('X')` must
//! resolve, and an activity may only read the output of activities that
//! are guaranteed to have finished before it starts.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde_json::Value;
use tracing::debug;

use super::dag::DependencyGraph;
use super::types::{Activity, PipelineDefinition};
use crate::activities::ActivityKind;
use crate::error::{Error, Result, SymbolKind};

/// A symbol referenced from an expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub kind: SymbolKind,
    pub name: String,
}

fn parameter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\bpipeline\(\)\s*\.\s*parameters\s*(?:\.\s*([A-Za-z_][A-Za-z0-9_]*)|\[\s*'([^']*)'\s*\])",
        )
        .expect("valid regex")
    })
}

fn variable_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bvariables\(\s*'([^']*)'\s*\)").expect("valid regex"))
}

fn activity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bactivity\(\s*'([^']*)'\s*\)").expect("valid regex"))
}

/// Whether a string is evaluated as an expression.
pub fn is_expression(text: &str) -> bool {
    (text.starts_with('@') && !text.starts_with("@@")) || text.contains("@{")
}

/// Expression bodies inside a string: the whole string for `@...`, or each
/// `@{...}` interpolation otherwise.
fn expression_bodies(text: &str) -> Vec<&str> {
    if text.starts_with("@@") {
        return Vec::new();
    }
    if let Some(body) = text.strip_prefix('@') {
        if !body.starts_with('{') {
            return vec![body];
        }
    }

    let mut bodies = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'@' && bytes[i + 1] == b'{' {
            let start = i + 2;
            let mut depth = 1;
            let mut in_quote = false;
            let mut j = start;
            while j < bytes.len() && depth > 0 {
                match bytes[j] {
                    b'\'' => in_quote = !in_quote,
                    b'{' if !in_quote => depth += 1,
                    b'}' if !in_quote => depth -= 1,
                    _ => {}
                }
                j += 1;
            }
            let end = if depth == 0 { j - 1 } else { j };
            bodies.push(&text[start..end]);
            i = j;
        } else {
            i += 1;
        }
    }
    bodies
}

/// Extract every symbol reference from one string.
pub fn extract_references(text: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    for body in expression_bodies(text) {
        for caps in parameter_regex().captures_iter(body) {
            if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                refs.push(Reference {
                    kind: SymbolKind::Parameter,
                    name: name.as_str().to_string(),
                });
            }
        }
        for caps in variable_regex().captures_iter(body) {
            refs.push(Reference {
                kind: SymbolKind::Variable,
                name: caps[1].to_string(),
            });
        }
        for caps in activity_regex().captures_iter(body) {
            refs.push(Reference {
                kind: SymbolKind::Activity,
                name: caps[1].to_string(),
            });
        }
    }
    refs
}

/// Collect references from every string in a JSON value.
fn collect_references(value: &Value, out: &mut Vec<Reference>) {
    match value {
        Value::String(s) => out.extend(extract_references(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, out)),
        _ => {}
    }
}

/// References made by one activity, excluding its nested activity lists.
pub fn activity_references(activity: &Activity) -> Vec<Reference> {
    let mut props = activity.type_properties.clone();
    if let Some(kind) = activity.kind() {
        for pointer in kind.nested_pointers(&activity.type_properties) {
            if let Some(slot) = props.pointer_mut(&pointer) {
                *slot = Value::Null;
            }
        }
    }

    let mut refs = Vec::new();
    collect_references(&props, &mut refs);
    if let Some(policy) = &activity.policy {
        if let Ok(value) = serde_json::to_value(policy) {
            collect_references(&value, &mut refs);
        }
    }

    // Variable assignments name their target without an expression.
    if matches!(
        activity.kind(),
        Some(ActivityKind::SetVariable) | Some(ActivityKind::AppendVariable)
    ) {
        let is_system = activity
            .type_properties
            .get("setSystemVariable")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if let Some(name) = activity
            .type_properties
            .get("variableName")
            .and_then(|v| v.as_str())
        {
            if !is_system {
                refs.push(Reference {
                    kind: SymbolKind::Variable,
                    name: name.to_string(),
                });
            }
        }
    }

    let mut seen = HashSet::new();
    refs.retain(|r| seen.insert(r.clone()));
    refs
}

/// Validate every expression reference in a pipeline.
pub fn validate(definition: &PipelineDefinition) -> Result<()> {
    let parameters: HashSet<&str> = definition.parameters.iter().map(|p| p.name.as_str()).collect();
    let variables: HashSet<&str> = definition.variables.iter().map(|v| v.name.as_str()).collect();
    let activities: HashSet<String> = definition.all_activity_names()?.into_iter().collect();

    let symbols = Symbols {
        parameters,
        variables,
        activities,
    };
    check_scope(&definition.activities, &HashSet::new(), &symbols)?;
    debug!(pipeline = %definition.name, "Expression references resolved");
    Ok(())
}

struct Symbols<'a> {
    parameters: HashSet<&'a str>,
    variables: HashSet<&'a str>,
    activities: HashSet<String>,
}

/// `inherited` holds activities guaranteed to finish before the enclosing
/// container starts.
fn check_scope(activities: &[Activity], inherited: &HashSet<String>, symbols: &Symbols<'_>) -> Result<()> {
    let graph = DependencyGraph::build(activities)?;

    for activity in activities {
        let references = activity_references(activity);
        let scopes = activity.nested_scopes()?;

        // Ancestor sets are only needed for activity references and nested
        // scopes; skipping them keeps long flat chains linear.
        let reads_activities = references.iter().any(|r| r.kind == SymbolKind::Activity);
        if !reads_activities && scopes.is_empty() {
            for reference in &references {
                check_reference(activity, reference, inherited, symbols)?;
            }
            continue;
        }

        let mut allowed: HashSet<String> = graph
            .ancestors(&activity.name)
            .into_iter()
            .map(str::to_string)
            .collect();
        allowed.extend(inherited.iter().cloned());

        // An Until condition is evaluated after each pass over its body.
        let mut own = allowed.clone();
        if matches!(activity.kind(), Some(ActivityKind::Until)) {
            for scope in &scopes {
                own.extend(scope.activities.iter().map(|a| a.name.clone()));
            }
        }
        for reference in &references {
            check_reference(activity, reference, &own, symbols)?;
        }

        for scope in &scopes {
            check_scope(&scope.activities, &allowed, symbols)?;
        }
    }
    Ok(())
}

fn check_reference(
    activity: &Activity,
    reference: &Reference,
    allowed: &HashSet<String>,
    symbols: &Symbols<'_>,
) -> Result<()> {
    let dangling = || Error::DanglingReference {
        activity: activity.name.clone(),
        kind: reference.kind,
        symbol: reference.name.clone(),
    };

    match reference.kind {
        SymbolKind::Parameter if !symbols.parameters.contains(reference.name.as_str()) => Err(dangling()),
        SymbolKind::Variable if !symbols.variables.contains(reference.name.as_str()) => Err(dangling()),
        SymbolKind::Activity => {
            if !symbols.activities.contains(&reference.name) {
                Err(dangling())
            } else if !allowed.contains(&reference.name) {
                Err(Error::UnorderedReference {
                    activity: activity.name.clone(),
                    referenced: reference.name.clone(),
                })
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}
