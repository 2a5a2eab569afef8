//! Compilation engine.
//!
//! Bundles the activity registry, connector catalog and configuration, and
//! runs the full chain from an authored definition to a canonical document:
//! naming checks, registry validation, connector normalization, expression
//! references (which also builds every scope's dependency graph), then
//! assembly. Any failure aborts the whole compile; nothing is returned
//! partially assembled.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::activities::ActivityRegistry;
use crate::config::Config;
use crate::connectors::{ConnectorCatalog, Normalizer};
use crate::error::Result;
use crate::expander::{ExpansionRequest, ExpansionTemplate, Expander, MetadataRow};
use crate::pipeline::assembler::{Assembler, CanonicalDocument};
use crate::pipeline::dag::DependencyGraph;
use crate::pipeline::types::{Activity, PipelineDefinition};
use crate::pipeline::{expressions, validator};

/// Summary of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub pipeline: String,
    /// Top-level activities
    pub activities: usize,
    /// Activities at every nesting level
    pub total_activities: usize,
    /// Top-level dependency edges
    pub edges: usize,
    pub parameters: usize,
    pub variables: usize,
}

/// Pipeline compiler.
pub struct Engine {
    registry: Arc<ActivityRegistry>,
    normalizer: Normalizer,
    assembler: Assembler,
    expander: Expander,
    config: Config,
}

impl Engine {
    /// Create an engine over the process-wide catalogs.
    pub fn new(config: Config) -> Self {
        Self::with_parts(config, ActivityRegistry::global(), ConnectorCatalog::global())
    }

    /// Create an engine over explicit catalogs.
    pub fn with_parts(config: Config, registry: Arc<ActivityRegistry>, catalog: Arc<ConnectorCatalog>) -> Self {
        let mut normalizer = Normalizer::new(catalog);
        if let Some(workspace) = &config.connectors.default_workspace_id {
            normalizer = normalizer.with_default_workspace(workspace.clone());
        }

        Self {
            registry,
            normalizer,
            assembler: Assembler::new(config.policy.clone()),
            expander: Expander::new(&config.expander),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ActivityRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &ConnectorCatalog {
        self.normalizer.catalog()
    }

    /// Run every validation stage and return the normalized definition.
    ///
    /// The input is left untouched.
    pub fn check(&self, definition: &PipelineDefinition) -> Result<PipelineDefinition> {
        validator::validate_definition(definition)?;
        self.registry.validate_all(&definition.activities)?;

        let normalized = PipelineDefinition {
            activities: self.normalizer.normalize_all(&definition.activities)?,
            ..definition.clone()
        };

        expressions::validate(&normalized)?;
        debug!(pipeline = %definition.name, "Pipeline passed validation");
        Ok(normalized)
    }

    /// Validate a definition and summarize it.
    pub fn validate(&self, definition: &PipelineDefinition) -> Result<ValidationReport> {
        let normalized = self.check(definition)?;
        let graph = DependencyGraph::build(&normalized.activities)?;

        Ok(ValidationReport {
            pipeline: normalized.name.clone(),
            activities: normalized.activities.len(),
            total_activities: normalized.all_activity_names()?.len(),
            edges: graph.edges().len(),
            parameters: normalized.parameters.len(),
            variables: normalized.variables.len(),
        })
    }

    /// Compile a definition into its canonical document.
    pub fn compile(&self, definition: &PipelineDefinition) -> Result<CanonicalDocument> {
        let normalized = self.check(definition)?;
        let document = self.assembler.assemble(&normalized)?;
        info!(
            pipeline = %document.name,
            activities = document.properties.activities.len(),
            "Compiled pipeline"
        );
        Ok(document)
    }

    /// Expand metadata rows into activities with the configured defaults.
    pub fn expand(&self, rows: &[MetadataRow], template: &ExpansionTemplate) -> Result<Vec<Activity>> {
        self.expander.expand(rows, template)
    }

    /// Expand a request and compile the resulting pipeline.
    pub fn compile_expansion(&self, request: &ExpansionRequest) -> Result<CanonicalDocument> {
        let definition = self.expander.expand_pipeline(request)?;
        self.compile(&definition)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::parse_pipeline;

    const COPY: &str = r#"
name: orders
activities:
  - name: CopyOrders
    type: Copy
    typeProperties:
      source: { connector: MySql, connection: conn-1, table: sales.orders }
      sink: { connector: Lakehouse, workspaceId: ws-1, artifactId: lh-1, table: orders }
  - name: Log
    type: SetVariable
    dependsOn: [CopyOrders]
    typeProperties:
      variableName: rows
      value: { value: "@activity('CopyOrders').output.rowsCopied", type: Expression }
variables:
  - { name: rows, type: int }
"#;

    fn engine() -> Engine {
        Engine::with_parts(
            Config::default(),
            Arc::new(ActivityRegistry::new()),
            Arc::new(ConnectorCatalog::new()),
        )
    }

    #[test]
    fn test_compile_copy_pipeline() {
        let def = parse_pipeline(COPY).unwrap();
        let doc = engine().compile(&def).unwrap();
        let json = doc.to_value().unwrap();

        let copy = &json["properties"]["activities"][0];
        assert_eq!(copy["name"], "CopyOrders");
        assert_eq!(copy["typeProperties"]["source"]["type"], "MySqlSource");
        assert_eq!(copy["typeProperties"]["sink"]["type"], "LakehouseTableSink");
        assert_eq!(copy["policy"]["retry"], 0);
        assert_eq!(copy["policy"]["timeout"], "0.12:00:00");
    }

    #[test]
    fn test_compile_does_not_mutate_input() {
        let def = parse_pipeline(COPY).unwrap();
        let before = def.clone();
        engine().compile(&def).unwrap();
        assert_eq!(def, before);
    }

    #[test]
    fn test_validate_report() {
        let report = engine().validate(&parse_pipeline(COPY).unwrap()).unwrap();
        assert_eq!(report.pipeline, "orders");
        assert_eq!(report.activities, 2);
        assert_eq!(report.edges, 1);
        assert_eq!(report.variables, 1);
    }

    #[test]
    fn test_compile_rejects_unknown_type() {
        let yaml = r#"
name: p
activities:
  - { name: X, type: Teleport }
"#;
        let err = engine().compile(&parse_pipeline(yaml).unwrap()).unwrap_err();
        assert!(matches!(err, Error::UnknownActivityType { .. }));
        assert_eq!(err.code(), "UNKNOWN_ACTIVITY_TYPE");
    }

    #[test]
    fn test_compile_rejects_unsupported_connector() {
        let yaml = r#"
name: p
activities:
  - name: C
    type: Copy
    typeProperties:
      source: { connector: Snowflake, connection: c, table: t }
      sink: { connector: Lakehouse, workspaceId: ws, artifactId: lh, table: t }
"#;
        let err = engine().compile(&parse_pipeline(yaml).unwrap()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConnector { ref connector } if connector == "Snowflake"));
    }

    #[test]
    fn test_config_policy_flows_into_document() {
        let mut config = Config::default();
        config.policy.retry = 3;
        let engine = Engine::with_parts(
            config,
            Arc::new(ActivityRegistry::new()),
            Arc::new(ConnectorCatalog::new()),
        );
        let doc = engine.compile(&parse_pipeline(COPY).unwrap()).unwrap();
        assert!(doc.properties.activities.iter().all(|a| a.policy.retry == 3));
    }
}
