//! Metadata-driven expander.
//!
//! Turns a configuration table (one row per source object) plus an
//! activity template into concrete activities. Each active row becomes one
//! activity; the set is either chained sequentially or wrapped in a single
//! parallel ForEach.
//!
//! # Example YAML
//!
//! ```yaml
//! name: nightly-ingest
//! rows:
//!   - { sourceId: dbo.orders, destinationId: orders, loadType: full, batchNumber: 1 }
//!   - { sourceId: dbo.items, destinationId: items, loadType: incremental, batchNumber: 1,
//!       watermarkColumn: updated_at, watermarkValue: "2024-01-01" }
//! template:
//!   isSequential: true
//!   activity:
//!     type: Copy
//!     typeProperties:
//!       source: { connector: SqlServer, connection: conn-1, query: "{{ query }}" }
//!       sink: { connector: Lakehouse, workspaceId: ws-1, artifactId: lh-1, table: "{{ destination }}" }
//! ```

use std::collections::HashSet;
use std::sync::OnceLock;

use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::{ExpanderConfig, MAX_BATCH_COUNT};
use crate::error::{Error, Result};
use crate::pipeline::parser::parse_raw;
use crate::pipeline::types::{Activity, Dependency, PipelineDefinition};

/// Placeholders a template may use.
pub const PLACEHOLDERS: &[&str] = &[
    "source",
    "destination",
    "query",
    "loadType",
    "batch",
    "watermarkColumn",
    "watermarkValue",
];

/// Placeholder names follow the row's wire keys; snake_case spellings are
/// accepted too.
fn canonical_placeholder(name: &str) -> &str {
    match name {
        "load_type" => "loadType",
        "watermark_column" => "watermarkColumn",
        "watermark_value" => "watermarkValue",
        other => other,
    }
}

/// How a row is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    #[default]
    Full,
    Incremental,
}

impl LoadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadType::Full => "full",
            LoadType::Incremental => "incremental",
        }
    }
}

/// One row of the configuration table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRow {
    #[serde(alias = "source")]
    pub source_id: String,

    #[serde(alias = "destination")]
    pub destination_id: String,

    #[serde(default)]
    pub load_type: LoadType,

    #[serde(default, alias = "batch")]
    pub batch_number: u32,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_column: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_value: Option<String>,
}

fn default_active() -> bool {
    true
}

impl MetadataRow {
    pub fn full(source_id: impl Into<String>, destination_id: impl Into<String>, batch_number: u32) -> Self {
        Self {
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            load_type: LoadType::Full,
            batch_number,
            active: true,
            watermark_column: None,
            watermark_value: None,
        }
    }

    /// Source query for this row's load type.
    ///
    /// Incremental rows filter on the watermark column; a missing watermark
    /// value means the first load and selects everything.
    pub fn query(&self) -> Result<String> {
        let base = format!("SELECT * FROM {}", self.source_id);
        match self.load_type {
            LoadType::Full => Ok(base),
            LoadType::Incremental => {
                let column = self
                    .watermark_column
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| Error::InvalidMetadataRow {
                        source_id: self.source_id.clone(),
                        reason: "incremental load requires a watermark column".into(),
                    })?;
                Ok(match &self.watermark_value {
                    Some(value) => format!("{} WHERE {} > '{}'", base, column, value.replace('\'', "''")),
                    None => base,
                })
            }
        }
    }

    fn check(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidMetadataRow {
            source_id: self.source_id.clone(),
            reason: reason.to_string(),
        };
        if self.source_id.trim().is_empty() {
            return Err(invalid("source identifier must not be empty"));
        }
        if self.destination_id.trim().is_empty() {
            return Err(invalid("destination identifier must not be empty"));
        }
        self.query().map(|_| ())
    }

    fn placeholder(&self, name: &str, query: &str) -> Option<Value> {
        Some(match canonical_placeholder(name) {
            "source" => Value::String(self.source_id.clone()),
            "destination" => Value::String(self.destination_id.clone()),
            "query" => Value::String(query.to_string()),
            "loadType" => Value::String(self.load_type.as_str().to_string()),
            "batch" => json!(self.batch_number),
            "watermarkColumn" => self
                .watermark_column
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            "watermarkValue" => self
                .watermark_value
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            _ => return None,
        })
    }
}

/// Template configuration for one expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionTemplate {
    /// Chain activities one after another instead of running them in a ForEach
    #[serde(default)]
    pub is_sequential: bool,

    /// Parallel batch ceiling; falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_count: Option<u32>,

    /// Prefix of generated activity names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,

    /// Name of the ForEach wrapper in parallel mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// Activity template with `{{ placeholder }}` strings
    pub activity: Value,
}

/// A complete expansion request: rows, template and target pipeline name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionRequest {
    /// Pipeline name; may be supplied by the caller instead
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub rows: Vec<MetadataRow>,

    pub template: ExpansionTemplate,
}

/// Parse an expansion request from YAML or JSON.
pub fn parse_metadata(text: &str) -> Result<ExpansionRequest> {
    let raw = parse_raw(text)?;
    serde_json::from_value(raw).map_err(|e| Error::Parse(format!("Invalid metadata definition: {}", e)))
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("valid regex"))
}

fn whole_placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\{\{\s*([^{}]*?)\s*\}\}\s*$").expect("valid regex"))
}

/// Generates activities from metadata rows.
#[derive(Debug, Clone)]
pub struct Expander {
    default_batch_count: u32,
    default_name_prefix: String,
}

impl Default for Expander {
    fn default() -> Self {
        Self::new(&ExpanderConfig::default())
    }
}

impl Expander {
    pub fn new(config: &ExpanderConfig) -> Self {
        Self {
            default_batch_count: config.batch_count,
            default_name_prefix: config.name_prefix.clone(),
        }
    }

    /// Expand rows into activities.
    ///
    /// Sequential mode returns one activity per active row, each depending
    /// on the previous one with `Succeeded`. Parallel mode returns a single
    /// ForEach holding the generated activities.
    pub fn expand(&self, rows: &[MetadataRow], template: &ExpansionTemplate) -> Result<Vec<Activity>> {
        let body = template_body(template)?;
        check_placeholders(&Value::Object(body.clone()))?;

        let batch_count = template.batch_count.unwrap_or(self.default_batch_count);
        if !(1..=MAX_BATCH_COUNT).contains(&batch_count) {
            return Err(Error::InvalidTemplate(format!(
                "batchCount must be between 1 and {}, got {}",
                MAX_BATCH_COUNT, batch_count
            )));
        }

        let prefix = template
            .name_prefix
            .clone()
            .unwrap_or_else(|| self.default_name_prefix.clone());
        if prefix.trim().is_empty() {
            return Err(Error::InvalidTemplate("namePrefix must not be empty".into()));
        }

        let mut active: Vec<&MetadataRow> = rows.iter().filter(|r| r.active).collect();
        debug!(total = rows.len(), active = active.len(), "Filtered metadata rows");
        if active.is_empty() {
            return Err(Error::EmptyMetadataSet);
        }
        for row in &active {
            row.check()?;
        }
        active.sort_by(|a, b| {
            a.batch_number
                .cmp(&b.batch_number)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });

        let mut used = HashSet::new();
        let mut generated = Vec::with_capacity(active.len());
        let mut previous: Option<String> = None;

        for row in &active {
            let name = unique_name(&prefix, &row.source_id, &mut used);
            let query = row.query()?;

            let mut rendered = render_object(&body, row, &query)?;
            rendered.insert("name".into(), Value::String(name.clone()));
            rendered.entry("type").or_insert_with(|| json!("Copy"));

            let depends_on = match (&previous, template.is_sequential) {
                (Some(prev), true) => vec![Dependency::succeeded(prev.clone())],
                _ => Vec::new(),
            };
            rendered.insert("dependsOn".into(), serde_json::to_value(&depends_on)?);

            let activity: Activity = serde_json::from_value(Value::Object(rendered))
                .map_err(|e| Error::InvalidTemplate(format!("generated activity '{}' is invalid: {}", name, e)))?;
            previous = Some(name);
            generated.push(activity);
        }

        if template.is_sequential {
            info!(activities = generated.len(), "Expanded metadata rows sequentially");
            return Ok(generated);
        }

        let container = wrap_parallel(template, &prefix, batch_count, &active, generated)?;
        info!(container = %container.name, "Expanded metadata rows into parallel loop");
        Ok(vec![container])
    }

    /// Expand a request into a full pipeline definition.
    pub fn expand_pipeline(&self, request: &ExpansionRequest) -> Result<PipelineDefinition> {
        let activities = self.expand(&request.rows, &request.template)?;
        Ok(PipelineDefinition {
            name: request.name.clone(),
            description: request.description.clone(),
            parameters: Vec::new(),
            variables: Vec::new(),
            activities,
            annotations: Vec::new(),
            concurrency: None,
        })
    }
}

/// Expand with the built-in expander settings.
pub fn expand(rows: &[MetadataRow], template: &ExpansionTemplate) -> Result<Vec<Activity>> {
    Expander::default().expand(rows, template)
}

fn template_body(template: &ExpansionTemplate) -> Result<Map<String, Value>> {
    let Value::Object(body) = &template.activity else {
        return Err(Error::InvalidTemplate("activity template must be an object".into()));
    };
    if body.contains_key("dependsOn") {
        return Err(Error::InvalidTemplate(
            "activity template must not declare dependsOn".into(),
        ));
    }
    Ok(body.clone())
}

/// Reject unknown placeholders before any row is rendered.
fn check_placeholders(value: &Value) -> Result<()> {
    match value {
        Value::String(s) => {
            for caps in placeholder_regex().captures_iter(s) {
                let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                if !PLACEHOLDERS.contains(&canonical_placeholder(name)) {
                    return Err(Error::InvalidTemplate(format!(
                        "unknown placeholder '{{{{ {} }}}}'",
                        name
                    )));
                }
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(check_placeholders),
        Value::Object(map) => map.values().try_for_each(check_placeholders),
        _ => Ok(()),
    }
}

fn render_object(body: &Map<String, Value>, row: &MetadataRow, query: &str) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (key, value) in body {
        out.insert(key.clone(), render_value(value, row, query)?);
    }
    Ok(out)
}

fn render_value(value: &Value, row: &MetadataRow, query: &str) -> Result<Value> {
    match value {
        Value::String(s) => render_string(s, row, query),
        Value::Array(items) => items
            .iter()
            .map(|v| render_value(v, row, query))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => render_object(map, row, query).map(Value::Object),
        _ => Ok(value.clone()),
    }
}

/// A string that is exactly one placeholder keeps the value's JSON type.
fn render_string(template: &str, row: &MetadataRow, query: &str) -> Result<Value> {
    if let Some(caps) = whole_placeholder_regex().captures(template) {
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        return lookup(row, name, query);
    }

    let mut failed = None;
    let rendered = placeholder_regex().replace_all(template, |caps: &Captures| {
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        match lookup(row, name, query) {
            Ok(Value::String(s)) => s,
            Ok(Value::Null) => String::new(),
            Ok(other) => other.to_string(),
            Err(e) => {
                failed.get_or_insert(e);
                String::new()
            }
        }
    });
    match failed {
        Some(e) => Err(e),
        None => Ok(Value::String(rendered.into_owned())),
    }
}

fn lookup(row: &MetadataRow, name: &str, query: &str) -> Result<Value> {
    row.placeholder(name, query)
        .ok_or_else(|| Error::InvalidTemplate(format!("unknown placeholder '{{{{ {} }}}}'", name)))
}

/// `{prefix}_{source}` with unsafe characters replaced and a numeric
/// suffix on collisions.
fn unique_name(prefix: &str, source_id: &str, used: &mut HashSet<String>) -> String {
    let sanitized: String = source_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let base = format!("{}_{}", prefix, sanitized);
    let base: String = base.chars().take(50).collect();

    let mut candidate = base.clone();
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    candidate
}

fn wrap_parallel(
    template: &ExpansionTemplate,
    prefix: &str,
    ceiling: u32,
    rows: &[&MetadataRow],
    activities: Vec<Activity>,
) -> Result<Activity> {
    let items: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "sourceId": row.source_id,
                "destinationId": row.destination_id,
                "loadType": row.load_type.as_str(),
                "batchNumber": row.batch_number,
            })
        })
        .collect();
    let items_json = serde_json::to_string(&items)?.replace('\'', "''");

    let batch_count = ceiling.min(u32::try_from(activities.len()).unwrap_or(u32::MAX));
    let name = template
        .container_name
        .clone()
        .unwrap_or_else(|| format!("ForEach_{}", prefix));

    let container = json!({
        "name": name,
        "type": "ForEach",
        "typeProperties": {
            "isSequential": false,
            "batchCount": batch_count,
            "items": {
                "value": format!("@json('{}')", items_json),
                "type": "Expression"
            },
            "activities": serde_json::to_value(&activities)?,
        }
    });
    Ok(serde_json::from_value(container)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::DependencyCondition;

    fn template(sequential: bool) -> ExpansionTemplate {
        ExpansionTemplate {
            is_sequential: sequential,
            batch_count: None,
            name_prefix: None,
            container_name: None,
            activity: json!({
                "type": "Copy",
                "typeProperties": {
                    "source": {"connector": "SqlServer", "connection": "conn-1", "query": "{{ query }}"},
                    "sink": {"connector": "Lakehouse", "workspaceId": "ws", "artifactId": "lh", "table": "{{ destination }}"}
                },
                "userProperties": [{"name": "batch", "value": "{{ batch }}"}]
            }),
        }
    }

    fn rows() -> Vec<MetadataRow> {
        vec![
            MetadataRow::full("dbo.orders", "orders", 2),
            MetadataRow {
                active: false,
                ..MetadataRow::full("dbo.legacy", "legacy", 1)
            },
            MetadataRow::full("dbo.customers", "customers", 1),
        ]
    }

    #[test]
    fn test_sequential_chain() {
        let activities = expand(&rows(), &template(true)).unwrap();
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].name, "Copy_dbo_customers");
        assert_eq!(activities[1].name, "Copy_dbo_orders");
        assert!(activities[0].depends_on.is_empty());
        assert_eq!(activities[1].depends_on[0].activity, "Copy_dbo_customers");
        assert_eq!(
            activities[1].depends_on[0].dependency_conditions,
            vec![DependencyCondition::Succeeded]
        );
    }

    #[test]
    fn test_placeholders_are_rendered() {
        let activities = expand(&rows(), &template(true)).unwrap();
        let tp = &activities[0].type_properties;
        assert_eq!(tp["source"]["query"], "SELECT * FROM dbo.customers");
        assert_eq!(tp["sink"]["table"], "customers");
        assert_eq!(activities[0].user_properties[0]["value"], json!(1));
    }

    #[test]
    fn test_every_placeholder_renders() {
        let row = MetadataRow {
            load_type: LoadType::Incremental,
            watermark_column: Some("updated_at".into()),
            watermark_value: Some("2024-01-01".into()),
            ..MetadataRow::full("dbo.items", "items", 3)
        };
        let t = ExpansionTemplate {
            is_sequential: true,
            batch_count: None,
            name_prefix: None,
            container_name: None,
            activity: json!({
                "type": "Wait",
                "typeProperties": {
                    "source": "{{ source }}",
                    "destination": "{{ destination }}",
                    "query": "{{ query }}",
                    "batch": "{{ batch }}",
                    "loadType": "{{ loadType }}",
                    "watermarkColumn": "{{ watermarkColumn }}",
                    "watermarkValue": "{{ watermarkValue }}",
                    "legacy": "{{ load_type }}/{{ watermark_column }}/{{ watermark_value }}"
                }
            }),
        };

        let activities = expand(&[row], &t).unwrap();
        let tp = &activities[0].type_properties;
        assert_eq!(tp["source"], "dbo.items");
        assert_eq!(tp["destination"], "items");
        assert_eq!(tp["query"], "SELECT * FROM dbo.items WHERE updated_at > '2024-01-01'");
        assert_eq!(tp["batch"], json!(3));
        assert_eq!(tp["loadType"], "incremental");
        assert_eq!(tp["watermarkColumn"], "updated_at");
        assert_eq!(tp["watermarkValue"], "2024-01-01");
        assert_eq!(tp["legacy"], "incremental/updated_at/2024-01-01");
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let mut t = template(true);
        t.activity["typeProperties"]["sink"]["table"] = json!("{{ target }}");
        assert!(matches!(expand(&rows(), &t), Err(Error::InvalidTemplate(_))));
    }

    #[test]
    fn test_parallel_wraps_in_foreach() {
        let mut t = template(false);
        t.batch_count = Some(10);
        let activities = expand(&rows(), &t).unwrap();
        assert_eq!(activities.len(), 1);

        let container = &activities[0];
        assert_eq!(container.activity_type, "ForEach");
        assert_eq!(container.type_properties["isSequential"], false);
        assert_eq!(container.type_properties["batchCount"], 2);
        assert_eq!(container.type_properties["items"]["type"], "Expression");
        let inner = container.type_properties["activities"].as_array().unwrap();
        assert_eq!(inner.len(), 2);
        assert!(inner.iter().all(|a| a["dependsOn"] == json!([])));
    }

    #[test]
    fn test_batch_ceiling_bounds() {
        let mut t = template(false);
        t.batch_count = Some(51);
        assert!(matches!(expand(&rows(), &t), Err(Error::InvalidTemplate(_))));
        t.batch_count = Some(0);
        assert!(matches!(expand(&rows(), &t), Err(Error::InvalidTemplate(_))));
    }

    #[test]
    fn test_no_active_rows() {
        let inactive: Vec<MetadataRow> = rows()
            .into_iter()
            .map(|r| MetadataRow { active: false, ..r })
            .collect();
        assert!(matches!(
            expand(&inactive, &template(true)),
            Err(Error::EmptyMetadataSet)
        ));
    }

    #[test]
    fn test_incremental_query() {
        let row = MetadataRow {
            load_type: LoadType::Incremental,
            watermark_column: Some("updated_at".into()),
            watermark_value: Some("2024-01-01 O'Neil".into()),
            ..MetadataRow::full("dbo.orders", "orders", 1)
        };
        assert_eq!(
            row.query().unwrap(),
            "SELECT * FROM dbo.orders WHERE updated_at > '2024-01-01 O''Neil'"
        );

        let first_load = MetadataRow {
            watermark_value: None,
            ..row.clone()
        };
        assert_eq!(first_load.query().unwrap(), "SELECT * FROM dbo.orders");

        let broken = MetadataRow {
            watermark_column: None,
            ..row
        };
        assert!(matches!(broken.query(), Err(Error::InvalidMetadataRow { .. })));
    }

    #[test]
    fn test_unknown_placeholder() {
        let mut t = template(true);
        t.activity["typeProperties"]["sink"]["table"] = json!("{{ target }}");
        match expand(&rows(), &t).unwrap_err() {
            Error::InvalidTemplate(msg) => assert!(msg.contains("target")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_name_collisions_get_suffix() {
        let rows = vec![
            MetadataRow::full("dbo.orders", "a", 1),
            MetadataRow::full("dbo_orders", "b", 1),
        ];
        let activities = expand(&rows, &template(true)).unwrap();
        assert_eq!(activities[0].name, "Copy_dbo_orders");
        assert_eq!(activities[1].name, "Copy_dbo_orders_2");
    }

    #[test]
    fn test_parse_metadata_request() {
        let yaml = r#"
name: nightly-ingest
rows:
  - { sourceId: dbo.orders, destinationId: orders, batchNumber: 1 }
  - { source: dbo.items, destination: items, loadType: incremental, batch: 2, watermarkColumn: updated_at }
template:
  isSequential: true
  namePrefix: Load
  activity:
    type: Copy
    typeProperties:
      source: { connector: SqlServer, connection: c, query: "{{ query }}" }
      sink: { connector: Lakehouse, workspaceId: ws, artifactId: lh, table: "{{ destination }}" }
"#;
        let request = parse_metadata(yaml).unwrap();
        assert_eq!(request.rows.len(), 2);
        assert_eq!(request.rows[1].load_type, LoadType::Incremental);
        assert!(request.rows[1].active);

        let def = Expander::default().expand_pipeline(&request).unwrap();
        assert_eq!(def.name, "nightly-ingest");
        assert_eq!(def.activities[0].name, "Load_dbo_orders");
        assert_eq!(def.activities[1].name, "Load_dbo_items");
    }
}
