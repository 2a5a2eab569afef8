//! Connector normalizer - expands minimal source/sink stubs into complete,
//! service-accepted blocks.
//!
//! A stub names its connector and the few values the author actually
//! cares about:
//!
//! ```yaml
//! source: { connector: MySql, connection: conn-1, table: sales.orders }
//! sink:   { connector: Lakehouse, workspaceId: ws-1, artifactId: lh-1, table: orders }
//! ```
//!
//! Already-canonical blocks are accepted too (the connector is inferred
//! from the `type` literal), and normalizing a normalized block is a no-op.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use super::catalog::{ConnectionBinding, ConnectorCatalog, ConnectorSpec, DatasetShape, FileFormat};
use crate::activities::ActivityKind;
use crate::error::{Error, Result, Role};
use crate::pipeline::types::Activity;

/// Stub keys consumed by the normalizer; everything else on the block
/// passes through untouched.
const STUB_KEYS: &[&str] = &[
    "connector",
    "connection",
    "connectionId",
    "externalReferences",
    "datasetSettings",
    "type",
    "table",
    "tableName",
    "schema",
    "query",
    "format",
    "properties",
    "settings",
    "workspaceId",
    "artifactId",
    "artifactName",
    "lakehouseId",
    "warehouseId",
    "bucket",
    "bucketName",
    "container",
    "fileSystem",
    "folder",
    "folderPath",
    "fileName",
    "relativeUrl",
    "collection",
    "collectionName",
    "entity",
    "entityName",
    "list",
    "listName",
    "object",
    "objectApiName",
    "keyspace",
    "path",
    "openHubDestinationName",
];

/// Optional location keys copied from a stub when present.
const LOCATION_KEYS: &[&str] = &["folderPath", "fileName", "relativeUrl"];

/// Stub aliases for a required key's leaf name.
fn aliases(leaf: &str) -> &'static [&'static str] {
    match leaf {
        "table" => &["table", "tableName"],
        "tableName" => &["tableName", "table"],
        "collectionName" => &["collectionName", "collection"],
        "entityName" => &["entityName", "entity"],
        "listName" => &["listName", "list"],
        "objectApiName" => &["objectApiName", "object"],
        "bucketName" => &["bucketName", "bucket"],
        "folderPath" => &["folderPath", "folder"],
        "keyspace" => &["keyspace"],
        "path" => &["path"],
        "container" => &["container"],
        "fileSystem" => &["fileSystem"],
        "openHubDestinationName" => &["openHubDestinationName"],
        _ => &[],
    }
}

/// Expands stubs using a connector catalog snapshot.
#[derive(Debug, Clone)]
pub struct Normalizer {
    catalog: Arc<ConnectorCatalog>,
    default_workspace: Option<String>,
}

impl Normalizer {
    pub fn new(catalog: Arc<ConnectorCatalog>) -> Self {
        Self {
            catalog,
            default_workspace: None,
        }
    }

    /// Workspace id used for artifact connectors whose stub omits one.
    pub fn with_default_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.default_workspace = Some(workspace_id.into());
        self
    }

    pub fn catalog(&self) -> &ConnectorCatalog {
        &self.catalog
    }

    /// Normalize one source or sink block.
    pub fn normalize(&self, role: Role, raw: &Value) -> Result<Value> {
        let stub = raw.as_object().ok_or_else(|| Error::UnsupportedConnector {
            connector: format!("<{} is not an object>", role),
        })?;
        let spec = self.resolve(role, stub)?;
        if !spec.supports(role) {
            return Err(Error::UnsupportedConnector {
                connector: format!("{} (as {})", spec.name, role),
            });
        }

        let dataset = stub
            .get("datasetSettings")
            .and_then(|d| d.as_object())
            .cloned()
            .unwrap_or_default();
        let format = resolve_format(spec, role, stub, &dataset)?;

        let mut type_properties = dataset
            .get("typeProperties")
            .and_then(|t| t.as_object())
            .cloned()
            .unwrap_or_default();
        if let Some(extra) = stub.get("properties").and_then(|p| p.as_object()) {
            for (k, v) in extra {
                type_properties.insert(k.clone(), v.clone());
            }
        }
        fill_type_properties(spec, stub, &mut type_properties);

        let query = match role {
            Role::Source => resolve_query(spec, stub)?,
            Role::Sink => None,
        };

        let binding = self.resolve_binding(spec, stub, &dataset);

        let mut missing: Vec<String> = Vec::new();
        if query.is_none() {
            for key in &spec.required_keys {
                if !has_value(&type_properties, key) {
                    missing.push(key.clone());
                }
            }
        }
        missing.extend(binding.missing());
        if !missing.is_empty() {
            return Err(Error::IncompleteConnectorConfig {
                connector: spec.name.clone(),
                role,
                missing,
            });
        }

        let mut out = Map::new();
        for (key, value) in stub {
            if !STUB_KEYS.contains(&key.as_str()) {
                out.insert(key.clone(), value.clone());
            }
        }
        if let Some(settings) = stub.get("settings").and_then(|s| s.as_object()) {
            for (k, v) in settings {
                out.insert(k.clone(), v.clone());
            }
        }

        let activity_type = spec
            .activity_type(role, format)
            .ok_or_else(|| Error::UnsupportedConnector {
                connector: format!("{} (as {})", spec.name, role),
            })?;
        out.insert("type".into(), Value::String(activity_type));

        if role == Role::Sink {
            for (k, v) in &spec.sink_defaults {
                out.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        if let (Some(query), Some(query_key)) = (query, &spec.query_key) {
            out.insert(query_key.clone(), query);
        }

        if let DatasetShape::File { store_prefix, .. } = &spec.dataset {
            let suffix = match role {
                Role::Source => "ReadSettings",
                Role::Sink => "WriteSettings",
            };
            let mut store = out
                .get("storeSettings")
                .and_then(|s| s.as_object())
                .cloned()
                .unwrap_or_default();
            store.insert("type".into(), json!(format!("{}{}", store_prefix, suffix)));
            if role == Role::Source {
                store.entry("recursive").or_insert(json!(true));
            }
            out.insert("storeSettings".into(), Value::Object(store));

            match format.format_settings(role) {
                Some(Value::Object(defaults)) => {
                    let mut settings = out
                        .get("formatSettings")
                        .and_then(|s| s.as_object())
                        .cloned()
                        .unwrap_or_default();
                    for (k, v) in defaults {
                        if k == "type" {
                            settings.insert(k, v);
                        } else {
                            settings.entry(k).or_insert(v);
                        }
                    }
                    out.insert("formatSettings".into(), Value::Object(settings));
                }
                _ => {
                    out.remove("formatSettings");
                }
            }
        }

        let mut dataset_out = dataset.clone();
        dataset_out.remove("externalReferences");
        dataset_out.remove("linkedService");
        dataset_out
            .entry("annotations")
            .or_insert_with(|| Value::Array(Vec::new()));
        dataset_out.insert("type".into(), Value::String(spec.dataset_type(format)));
        dataset_out
            .entry("schema")
            .or_insert_with(|| Value::Array(Vec::new()));
        dataset_out.insert("typeProperties".into(), Value::Object(type_properties));
        binding.apply(spec, &mut dataset_out);
        out.insert("datasetSettings".into(), Value::Object(dataset_out));

        debug!(connector = %spec.name, role = %role, "Normalized connector block");
        Ok(Value::Object(out))
    }

    /// Normalize the connector blocks of an activity (Copy source and sink,
    /// Lookup source), recursing into nested activity lists.
    pub fn normalize_activity(&self, activity: &Activity) -> Result<Activity> {
        let mut out = activity.clone();
        match activity.kind() {
            Some(ActivityKind::Copy) => {
                for (key, role) in [("source", Role::Source), ("sink", Role::Sink)] {
                    if let Some(raw) = activity.type_properties.get(key) {
                        let normalized = self.normalize(role, raw).map_err(|e| {
                            trace!(activity = %activity.name, error = %e, "Copy block rejected");
                            e
                        })?;
                        if let Some(props) = out.type_properties.as_object_mut() {
                            props.insert(key.to_string(), normalized);
                        }
                    }
                }
            }
            Some(ActivityKind::Lookup) => {
                if let Some(raw) = activity.type_properties.get("source") {
                    let normalized = self.normalize(Role::Source, raw)?;
                    if let Some(props) = out.type_properties.as_object_mut() {
                        props.insert("source".to_string(), normalized);
                    }
                }
            }
            _ => {}
        }

        let mut scopes = out.nested_scopes()?;
        if !scopes.is_empty() {
            for scope in &mut scopes {
                scope.activities = self.normalize_all(&scope.activities)?;
            }
            out.replace_nested(&scopes)?;
        }
        Ok(out)
    }

    pub fn normalize_all(&self, activities: &[Activity]) -> Result<Vec<Activity>> {
        activities
            .iter()
            .map(|a| self.normalize_activity(a))
            .collect()
    }

    fn resolve(&self, role: Role, stub: &Map<String, Value>) -> Result<&ConnectorSpec> {
        if let Some(name) = stub.get("connector").and_then(|c| c.as_str()) {
            return self
                .catalog
                .get(name)
                .ok_or_else(|| Error::UnsupportedConnector {
                    connector: name.to_string(),
                });
        }

        let literal = stub.get("type").and_then(|t| t.as_str());
        if let Some(spec) = literal.and_then(|t| self.catalog.by_activity_type(role, t)) {
            return Ok(spec);
        }

        let store_prefix = stub
            .get("storeSettings")
            .and_then(|s| s.get("type"))
            .and_then(|t| t.as_str())
            .map(|t| {
                t.trim_end_matches("ReadSettings")
                    .trim_end_matches("WriteSettings")
                    .to_string()
            });
        let service_type = stub
            .get("datasetSettings")
            .and_then(|d| d.pointer("/linkedService/properties/type"))
            .and_then(|t| t.as_str());
        if let Some(prefix) = store_prefix {
            if let Some(spec) = self.catalog.by_store_prefix(&prefix, service_type) {
                return Ok(spec);
            }
        }

        Err(Error::UnsupportedConnector {
            connector: literal.unwrap_or("<unspecified>").to_string(),
        })
    }

    fn resolve_binding(
        &self,
        spec: &ConnectorSpec,
        stub: &Map<String, Value>,
        dataset: &Map<String, Value>,
    ) -> Binding {
        match &spec.binding {
            ConnectionBinding::External => {
                let connection = first_str(stub, &["connection", "connectionId"])
                    .or_else(|| str_at(stub.get("externalReferences"), "/connection"))
                    .or_else(|| str_at(dataset.get("externalReferences"), "/connection"));
                Binding::External(connection)
            }
            ConnectionBinding::LinkedService(_) => {
                let linked = dataset.get("linkedService");
                let workspace_id = first_str(stub, &["workspaceId"])
                    .or_else(|| str_at(linked, "/properties/typeProperties/workspaceId"))
                    .or_else(|| self.default_workspace.clone());
                let artifact_id = first_str(stub, &["artifactId", "lakehouseId", "warehouseId"])
                    .or_else(|| str_at(linked, "/properties/typeProperties/artifactId"));
                let name = first_str(stub, &["artifactName"]).or_else(|| str_at(linked, "/name"));
                Binding::Artifact {
                    name,
                    workspace_id,
                    artifact_id,
                }
            }
        }
    }
}

enum Binding {
    External(Option<String>),
    Artifact {
        name: Option<String>,
        workspace_id: Option<String>,
        artifact_id: Option<String>,
    },
}

impl Binding {
    fn missing(&self) -> Vec<String> {
        match self {
            Binding::External(None) => vec!["externalReferences.connection".to_string()],
            Binding::External(Some(_)) => Vec::new(),
            Binding::Artifact {
                workspace_id,
                artifact_id,
                ..
            } => {
                let mut missing = Vec::new();
                if workspace_id.is_none() {
                    missing.push("linkedService.workspaceId".to_string());
                }
                if artifact_id.is_none() {
                    missing.push("linkedService.artifactId".to_string());
                }
                missing
            }
        }
    }

    fn apply(&self, spec: &ConnectorSpec, dataset: &mut Map<String, Value>) {
        match (self, &spec.binding) {
            (Binding::External(Some(connection)), _) => {
                dataset.insert(
                    "externalReferences".into(),
                    json!({ "connection": connection }),
                );
            }
            (
                Binding::Artifact {
                    name,
                    workspace_id: Some(workspace_id),
                    artifact_id: Some(artifact_id),
                },
                ConnectionBinding::LinkedService(template),
            ) => {
                let name = name.as_deref().unwrap_or(artifact_id);
                dataset.insert(
                    "linkedService".into(),
                    template.render(name, workspace_id, artifact_id),
                );
            }
            _ => {}
        }
    }
}

fn resolve_format(
    spec: &ConnectorSpec,
    role: Role,
    stub: &Map<String, Value>,
    dataset: &Map<String, Value>,
) -> Result<FileFormat> {
    if !spec.is_file_store() {
        return Ok(FileFormat::Binary);
    }
    if let Some(text) = stub.get("format").and_then(|f| f.as_str()) {
        return FileFormat::parse(text).ok_or_else(|| Error::IncompleteConnectorConfig {
            connector: spec.name.clone(),
            role,
            missing: vec![format!("format (unknown '{}')", text)],
        });
    }
    let from_dataset = dataset
        .get("type")
        .and_then(|t| t.as_str())
        .and_then(FileFormat::parse);
    let from_type = stub.get("type").and_then(|t| t.as_str()).and_then(|t| {
        FileFormat::parse(t.trim_end_matches("Source").trim_end_matches("Sink"))
    });
    Ok(from_dataset.or(from_type).unwrap_or(FileFormat::Binary))
}

fn resolve_query(spec: &ConnectorSpec, stub: &Map<String, Value>) -> Result<Option<Value>> {
    let query = stub.get("query").cloned().or_else(|| {
        spec.query_key
            .as_ref()
            .and_then(|k| stub.get(k))
            .cloned()
    });
    match (query, &spec.query_key) {
        (None, _) | (Some(Value::Null), _) => Ok(None),
        (Some(q), Some(_)) => Ok(Some(q)),
        (Some(_), None) => Err(Error::UnsupportedConnector {
            connector: format!("{} (query source)", spec.name),
        }),
    }
}

/// Move stub shorthand into `typeProperties` for every key the connector
/// knows about.
fn fill_type_properties(spec: &ConnectorSpec, stub: &Map<String, Value>, tp: &mut Map<String, Value>) {
    let mut keys: Vec<String> = spec.required_keys.clone();
    if spec.is_file_store() {
        keys.extend(LOCATION_KEYS.iter().map(|k| format!("location.{}", k)));
    }

    for key in &keys {
        if has_value(tp, key) {
            continue;
        }
        let leaf = key.rsplit('.').next().unwrap_or(key);
        let mut candidates: Vec<&str> = aliases(leaf).to_vec();
        if candidates.is_empty() {
            candidates.push(leaf);
        }
        if let Some(value) = candidates.iter().find_map(|k| stub.get(*k)).filter(|v| !v.is_null()) {
            set_path(tp, key, value.clone());
        }
    }

    // "schema.table" shorthand; an explicit schema wins.
    if spec.required_keys.iter().any(|k| k == "table") {
        if let Some(schema) = stub.get("schema").filter(|s| s.is_string()) {
            tp.entry("schema").or_insert_with(|| schema.clone());
        }
        if !tp.contains_key("schema") {
            let split = tp
                .get("table")
                .and_then(|t| t.as_str())
                .and_then(|t| t.split_once('.'))
                .map(|(s, t)| (s.to_string(), t.to_string()));
            if let Some((schema, table)) = split {
                tp.insert("schema".into(), Value::String(schema));
                tp.insert("table".into(), Value::String(table));
            }
        }
    }

    if let DatasetShape::File { location_type, .. } = &spec.dataset {
        let location = tp
            .entry("location")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(obj) = location.as_object_mut() {
            obj.insert("type".into(), Value::String(location_type.clone()));
        }
    }
}

fn has_value(map: &Map<String, Value>, dotted: &str) -> bool {
    let mut current: Option<&Value> = None;
    for (i, part) in dotted.split('.').enumerate() {
        current = if i == 0 {
            map.get(part)
        } else {
            current.and_then(|v| v.get(part))
        };
    }
    match current {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn set_path(map: &mut Map<String, Value>, dotted: &str, value: Value) {
    let mut parts: Vec<&str> = dotted.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };
    let mut current = map;
    for part in parts {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry.as_object_mut() {
            Some(obj) => current = obj,
            None => return,
        }
    }
    current.insert(last.to_string(), value);
}

fn first_str(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn str_at(value: Option<&Value>, pointer: &str) -> Option<String> {
    value
        .and_then(|v| v.pointer(pointer))
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(ConnectorCatalog::new()))
    }

    #[test]
    fn test_mysql_source_stub() {
        let out = normalizer()
            .normalize(
                Role::Source,
                &json!({"connector": "MySql", "connection": "conn-1", "table": "sales.orders"}),
            )
            .unwrap();

        assert_eq!(out["type"], "MySqlSource");
        assert_eq!(out["datasetSettings"]["type"], "MySqlTable");
        assert_eq!(out["datasetSettings"]["typeProperties"]["schema"], "sales");
        assert_eq!(out["datasetSettings"]["typeProperties"]["table"], "orders");
        assert_eq!(
            out["datasetSettings"]["externalReferences"]["connection"],
            "conn-1"
        );
        assert_eq!(out["datasetSettings"]["annotations"], json!([]));
    }

    #[test]
    fn test_lakehouse_sink_stub() {
        let out = normalizer()
            .normalize(
                Role::Sink,
                &json!({"connector": "Lakehouse", "workspaceId": "ws-1", "artifactId": "lh-1", "table": "orders"}),
            )
            .unwrap();

        assert_eq!(out["type"], "LakehouseTableSink");
        assert_eq!(out["tableActionOption"], "Append");
        let linked = &out["datasetSettings"]["linkedService"];
        assert_eq!(linked["name"], "lh-1");
        assert_eq!(linked["properties"]["type"], "Lakehouse");
        assert_eq!(linked["properties"]["typeProperties"]["workspaceId"], "ws-1");
        assert_eq!(linked["properties"]["typeProperties"]["rootFolder"], "Tables");
        assert!(out["datasetSettings"].get("externalReferences").is_none());
    }

    #[test]
    fn test_default_workspace_fills_artifact_binding() {
        let out = normalizer()
            .with_default_workspace("ws-default")
            .normalize(
                Role::Sink,
                &json!({"connector": "DataWarehouse", "artifactId": "dw-1", "table": "dbo.facts"}),
            )
            .unwrap();
        assert_eq!(
            out["datasetSettings"]["linkedService"]["properties"]["typeProperties"]["workspaceId"],
            "ws-default"
        );
        assert_eq!(out["allowCopyCommand"], true);
    }

    #[test]
    fn test_incomplete_config_lists_missing_keys() {
        let err = normalizer()
            .normalize(Role::Source, &json!({"connector": "MySql"}))
            .unwrap_err();
        match err {
            Error::IncompleteConnectorConfig {
                connector,
                role,
                missing,
            } => {
                assert_eq!(connector, "MySql");
                assert_eq!(role, Role::Source);
                assert_eq!(missing, vec!["table", "externalReferences.connection"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_query_waives_table() {
        let out = normalizer()
            .normalize(
                Role::Source,
                &json!({"connector": "Oracle", "connection": "c", "query": "SELECT 1 FROM dual"}),
            )
            .unwrap();
        assert_eq!(out["oracleReaderQuery"], "SELECT 1 FROM dual");
        assert!(out.get("query").is_none());
    }

    #[test]
    fn test_unknown_connector() {
        let err = normalizer()
            .normalize(Role::Source, &json!({"connector": "Snowflake", "connection": "c"}))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedConnector { ref connector } if connector == "Snowflake"));

        let err = normalizer()
            .normalize(Role::Source, &json!({"connection": "c"}))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedConnector { .. }));
    }

    #[test]
    fn test_read_only_connector_as_sink() {
        let err = normalizer()
            .normalize(Role::Sink, &json!({"connector": "OData", "connection": "c", "path": "Orders"}))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedConnector { .. }));
    }

    #[test]
    fn test_file_store_stub() {
        let out = normalizer()
            .normalize(
                Role::Source,
                &json!({"connector": "AmazonS3", "connection": "s3", "bucket": "raw", "folderPath": "in", "format": "csv"}),
            )
            .unwrap();
        assert_eq!(out["type"], "DelimitedTextSource");
        assert_eq!(out["storeSettings"]["type"], "AmazonS3ReadSettings");
        assert_eq!(out["storeSettings"]["recursive"], true);
        assert_eq!(out["formatSettings"]["type"], "DelimitedTextReadSettings");
        let location = &out["datasetSettings"]["typeProperties"]["location"];
        assert_eq!(location["type"], "AmazonS3Location");
        assert_eq!(location["bucketName"], "raw");
        assert_eq!(location["folderPath"], "in");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let n = normalizer();
        for (role, stub) in [
            (Role::Source, json!({"connector": "SqlServer", "connection": "c", "table": "dbo.t", "settings": {"queryTimeout": "02:00:00"}})),
            (Role::Sink, json!({"connector": "Lakehouse", "workspaceId": "w", "artifactId": "a", "table": "t"})),
            (Role::Sink, json!({"connector": "GoogleCloudStorage", "connection": "g", "bucket": "b", "format": "Json"})),
            (Role::Source, json!({"connector": "LakehouseFiles", "workspaceId": "w", "artifactId": "a", "folderPath": "raw"})),
        ] {
            let once = n.normalize(role, &stub).unwrap();
            let twice = n.normalize(role, &once).unwrap();
            assert_eq!(once, twice, "not idempotent for {}", stub);
        }
    }

    #[test]
    fn test_normalize_activity_recurses_into_containers() {
        let activity: Activity = serde_json::from_value(json!({
            "name": "Loop",
            "type": "ForEach",
            "typeProperties": {
                "items": {"value": "@pipeline().parameters.tables", "type": "Expression"},
                "activities": [{
                    "name": "CopyOne",
                    "type": "Copy",
                    "typeProperties": {
                        "source": {"connector": "PostgreSql", "connection": "pg", "table": "public.t"},
                        "sink": {"connector": "Lakehouse", "workspaceId": "w", "artifactId": "a", "table": "t"}
                    }
                }]
            }
        }))
        .unwrap();

        let out = normalizer().normalize_activity(&activity).unwrap();
        assert_eq!(
            out.type_properties["activities"][0]["typeProperties"]["source"]["type"],
            "PostgreSqlSource"
        );
        // input untouched
        assert!(activity.type_properties["activities"][0]["typeProperties"]["source"]
            .get("type")
            .is_none());
    }
}
