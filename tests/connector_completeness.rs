//! Every catalog entry must turn a minimal stub into a block carrying all
//! of its required keys.

use std::sync::Arc;

use pipewright::connectors::{ConnectionBinding, ConnectorCatalog, ConnectorSpec, Normalizer};
use pipewright::error::Role;
use serde_json::{json, Map, Value};

fn minimal_stub(spec: &ConnectorSpec) -> Value {
    let mut stub = Map::new();
    stub.insert("connector".into(), json!(spec.name));
    for key in &spec.required_keys {
        let leaf = key.rsplit('.').next().unwrap_or(key);
        stub.insert(leaf.to_string(), json!(format!("{}-value", leaf)));
    }
    match spec.binding {
        ConnectionBinding::External => {
            stub.insert("connection".into(), json!("conn-1"));
        }
        ConnectionBinding::LinkedService(_) => {
            stub.insert("workspaceId".into(), json!("ws-1"));
            stub.insert("artifactId".into(), json!("artifact-1"));
        }
    }
    Value::Object(stub)
}

fn lookup<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted.split('.').try_fold(value, |v, part| v.get(part))
}

#[test]
fn catalog_has_at_least_55_connectors() {
    assert!(ConnectorCatalog::new().len() >= 55);
}

#[test]
fn every_connector_normalizes_a_minimal_stub() {
    let catalog = Arc::new(ConnectorCatalog::new());
    let normalizer = Normalizer::new(catalog.clone());

    for spec in catalog.list() {
        let role = if spec.supports(Role::Sink) {
            Role::Sink
        } else {
            Role::Source
        };
        let stub = minimal_stub(spec);
        let out = normalizer
            .normalize(role, &stub)
            .unwrap_or_else(|e| panic!("{} ({}) failed: {}", spec.name, role, e));

        let dataset = &out["datasetSettings"];
        assert!(out["type"].is_string(), "{}: missing type", spec.name);
        assert!(dataset["type"].is_string(), "{}: missing dataset type", spec.name);

        for key in &spec.required_keys {
            let value = lookup(&dataset["typeProperties"], key);
            assert!(
                value.is_some_and(|v| !v.is_null()),
                "{}: required key '{}' missing from {}",
                spec.name,
                key,
                out
            );
        }

        match spec.binding {
            ConnectionBinding::External => {
                assert_eq!(dataset["externalReferences"]["connection"], "conn-1", "{}", spec.name);
            }
            ConnectionBinding::LinkedService(_) => {
                let linked = &dataset["linkedService"]["properties"]["typeProperties"];
                assert_eq!(linked["workspaceId"], "ws-1", "{}", spec.name);
                assert_eq!(linked["artifactId"], "artifact-1", "{}", spec.name);
            }
        }
    }
}

#[test]
fn normalized_blocks_are_fixed_points() {
    let catalog = Arc::new(ConnectorCatalog::new());
    let normalizer = Normalizer::new(catalog.clone());

    for spec in catalog.list() {
        let role = if spec.supports(Role::Sink) {
            Role::Sink
        } else {
            Role::Source
        };
        let once = normalizer.normalize(role, &minimal_stub(spec)).unwrap();
        let twice = normalizer
            .normalize(role, &once)
            .unwrap_or_else(|e| panic!("{} re-normalization failed: {}", spec.name, e));
        assert_eq!(once, twice, "{} is not idempotent", spec.name);
    }
}

#[test]
fn unverified_connectors_are_unsupported() {
    let normalizer = Normalizer::new(Arc::new(ConnectorCatalog::new()));
    for name in ["Snowflake", "AzureDataExplorer", "Office365"] {
        let err = normalizer
            .normalize(Role::Source, &json!({"connector": name, "connection": "c", "table": "t"}))
            .unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_CONNECTOR", "{}", name);
    }
}
