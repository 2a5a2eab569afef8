//! Connector catalog.
//!
//! One entry per supported data-store connector: the source/sink type
//! literals, the dataset type, the `typeProperties` keys a complete
//! configuration must carry, and how the dataset binds to its connection.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::Role;

/// Broad family of a connector, used for listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorCategory {
    Database,
    Storage,
    Service,
    Generic,
    Fabric,
}

impl ConnectorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorCategory::Database => "database",
            ConnectorCategory::Storage => "storage",
            ConnectorCategory::Service => "service",
            ConnectorCategory::Generic => "generic",
            ConnectorCategory::Fabric => "fabric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "database" => Some(ConnectorCategory::Database),
            "storage" => Some(ConnectorCategory::Storage),
            "service" => Some(ConnectorCategory::Service),
            "generic" => Some(ConnectorCategory::Generic),
            "fabric" => Some(ConnectorCategory::Fabric),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File formats understood by file-store connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileFormat {
    Binary,
    DelimitedText,
    Json,
    Parquet,
}

impl FileFormat {
    pub const ALL: [FileFormat; 4] = [
        FileFormat::Binary,
        FileFormat::DelimitedText,
        FileFormat::Json,
        FileFormat::Parquet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Binary => "Binary",
            FileFormat::DelimitedText => "DelimitedText",
            FileFormat::Json => "Json",
            FileFormat::Parquet => "Parquet",
        }
    }

    /// Accepts the wire literal or common short names (`csv`, `json`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Some(FileFormat::Binary),
            "delimitedtext" | "csv" | "delimited" => Some(FileFormat::DelimitedText),
            "json" => Some(FileFormat::Json),
            "parquet" => Some(FileFormat::Parquet),
            _ => None,
        }
    }

    /// `formatSettings` block for the given role; binary sinks carry none.
    pub fn format_settings(&self, role: Role) -> Option<Value> {
        match (self, role) {
            (FileFormat::Binary, Role::Sink) => None,
            (FileFormat::Parquet, Role::Source) => None,
            (_, Role::Source) => Some(json!({"type": format!("{}ReadSettings", self.as_str())})),
            (FileFormat::DelimitedText, Role::Sink) => Some(json!({
                "type": "DelimitedTextWriteSettings",
                "fileExtension": ".txt"
            })),
            (FileFormat::Json, Role::Sink) => Some(json!({
                "type": "JsonWriteSettings",
                "filePattern": "setOfObjects"
            })),
            (_, Role::Sink) => Some(json!({"type": format!("{}WriteSettings", self.as_str())})),
        }
    }
}

/// How the dataset of a connector is shaped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetShape {
    /// Row-oriented store with fixed type literals.
    Tabular {
        source_type: String,
        /// `None` when the connector cannot be written to
        sink_type: Option<String>,
        dataset_type: String,
    },
    /// File store: source/sink/dataset types follow the file format.
    File {
        location_type: String,
        /// Prefix of the `storeSettings` type (`<prefix>ReadSettings`)
        store_prefix: String,
        writable: bool,
    },
}

/// Artifact-backed linked service emitted inline in `datasetSettings`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedServiceTemplate {
    pub service_type: String,
    pub root_folder: Option<String>,
}

impl LinkedServiceTemplate {
    pub fn render(&self, name: &str, workspace_id: &str, artifact_id: &str) -> Value {
        let mut type_properties = Map::new();
        type_properties.insert("workspaceId".into(), Value::String(workspace_id.to_string()));
        type_properties.insert("artifactId".into(), Value::String(artifact_id.to_string()));
        if let Some(folder) = &self.root_folder {
            type_properties.insert("rootFolder".into(), Value::String(folder.clone()));
        }
        json!({
            "name": name,
            "properties": {
                "annotations": [],
                "type": self.service_type,
                "typeProperties": type_properties
            }
        })
    }
}

/// How the dataset refers to the connection that holds credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionBinding {
    /// `externalReferences.connection` names a workspace connection id.
    External,
    /// Inline `linkedService` pointing at a workspace artifact.
    LinkedService(LinkedServiceTemplate),
}

/// One supported connector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectorSpec {
    pub name: String,
    pub category: ConnectorCategory,
    pub dataset: DatasetShape,
    /// Dotted paths under `datasetSettings.typeProperties`
    pub required_keys: Vec<String>,
    /// Source key that carries a free-form query, if any
    pub query_key: Option<String>,
    pub binding: ConnectionBinding,
    /// Literal properties always present on the sink block
    pub sink_defaults: Map<String, Value>,
}

impl ConnectorSpec {
    fn tabular(name: &str, category: ConnectorCategory, required: &[&str], query_key: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            category,
            dataset: DatasetShape::Tabular {
                source_type: format!("{}Source", name),
                sink_type: Some(format!("{}Sink", name)),
                dataset_type: format!("{}Table", name),
            },
            required_keys: required.iter().map(|k| k.to_string()).collect(),
            query_key: query_key.map(str::to_string),
            binding: ConnectionBinding::External,
            sink_defaults: Map::new(),
        }
    }

    fn file(name: &str, location_type: &str, store_prefix: &str, required: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            category: ConnectorCategory::Storage,
            dataset: DatasetShape::File {
                location_type: location_type.to_string(),
                store_prefix: store_prefix.to_string(),
                writable: true,
            },
            required_keys: required.iter().map(|k| k.to_string()).collect(),
            query_key: None,
            binding: ConnectionBinding::External,
            sink_defaults: Map::new(),
        }
    }

    fn dataset_type_literal(mut self, literal: &str) -> Self {
        if let DatasetShape::Tabular { dataset_type, .. } = &mut self.dataset {
            *dataset_type = literal.to_string();
        }
        self
    }

    fn type_literals(mut self, source: &str, sink: &str) -> Self {
        if let DatasetShape::Tabular {
            source_type,
            sink_type,
            ..
        } = &mut self.dataset
        {
            *source_type = source.to_string();
            *sink_type = Some(sink.to_string());
        }
        self
    }

    fn read_only(mut self) -> Self {
        match &mut self.dataset {
            DatasetShape::Tabular { sink_type, .. } => *sink_type = None,
            DatasetShape::File { writable, .. } => *writable = false,
        }
        self
    }

    fn linked_service(mut self, service_type: &str, root_folder: Option<&str>) -> Self {
        self.binding = ConnectionBinding::LinkedService(LinkedServiceTemplate {
            service_type: service_type.to_string(),
            root_folder: root_folder.map(str::to_string),
        });
        self
    }

    fn sink_default(mut self, key: &str, value: Value) -> Self {
        self.sink_defaults.insert(key.to_string(), value);
        self
    }

    fn category(mut self, category: ConnectorCategory) -> Self {
        self.category = category;
        self
    }

    pub fn supports(&self, role: Role) -> bool {
        match (&self.dataset, role) {
            (_, Role::Source) => true,
            (DatasetShape::Tabular { sink_type, .. }, Role::Sink) => sink_type.is_some(),
            (DatasetShape::File { writable, .. }, Role::Sink) => *writable,
        }
    }

    /// Source or sink `type` literal. File stores need the format.
    pub fn activity_type(&self, role: Role, format: FileFormat) -> Option<String> {
        match (&self.dataset, role) {
            (DatasetShape::Tabular { source_type, .. }, Role::Source) => Some(source_type.clone()),
            (DatasetShape::Tabular { sink_type, .. }, Role::Sink) => sink_type.clone(),
            (DatasetShape::File { .. }, _) if !self.supports(role) => None,
            (DatasetShape::File { .. }, Role::Source) => Some(format!("{}Source", format.as_str())),
            (DatasetShape::File { .. }, Role::Sink) => Some(format!("{}Sink", format.as_str())),
        }
    }

    pub fn dataset_type(&self, format: FileFormat) -> String {
        match &self.dataset {
            DatasetShape::Tabular { dataset_type, .. } => dataset_type.clone(),
            DatasetShape::File { .. } => format.as_str().to_string(),
        }
    }

    pub fn is_file_store(&self) -> bool {
        matches!(self.dataset, DatasetShape::File { .. })
    }

    /// Whether the dataset must carry an inline linked service. Artifact
    /// connectors have no other way to address their target.
    pub fn requires_linked_service(&self, _role: Role) -> bool {
        matches!(self.binding, ConnectionBinding::LinkedService(_))
    }
}

/// All known connectors, keyed by name.
#[derive(Debug, Clone)]
pub struct ConnectorCatalog {
    connectors: HashMap<String, ConnectorSpec>,
}

static GLOBAL: OnceLock<RwLock<Arc<ConnectorCatalog>>> = OnceLock::new();

impl ConnectorCatalog {
    /// Create the built-in catalog.
    pub fn new() -> Self {
        use ConnectorCategory::*;
        use ConnectorSpec as C;

        let mut catalog = Self::empty();

        // Relational and document databases
        for (name, query_key) in [
            ("SqlServer", "sqlReaderQuery"),
            ("Oracle", "oracleReaderQuery"),
            ("PostgreSql", "query"),
            ("MySql", "query"),
            ("Db2", "query"),
            ("Teradata", "query"),
            ("SapHana", "query"),
            ("AmazonRedshift", "query"),
            ("Vertica", "query"),
            ("AzureSqlDatabase", "sqlReaderQuery"),
            ("AzureSqlDW", "sqlReaderQuery"),
            ("AzurePostgreSql", "query"),
            ("AzureSqlMI", "sqlReaderQuery"),
            ("AzureMySql", "query"),
            ("AmazonRDSSqlServer", "sqlReaderQuery"),
            ("Greenplum", "query"),
            ("MariaDB", "query"),
            ("AzureDatabricks", "query"),
        ] {
            catalog.register(C::tabular(name, Database, &["table"], Some(query_key)));
        }
        catalog.register(C::tabular("Cassandra", Database, &["keyspace", "tableName"], Some("query")));
        for name in ["MongoDbAtlas", "MongoDb", "CosmosDbMongoDb"] {
            catalog.register(C::tabular(name, Database, &["collectionName"], None));
        }
        catalog.register(C::tabular("CosmosDb", Database, &["collectionName"], Some("query")));
        catalog.register(C::tabular("Dataverse", Database, &["entityName"], Some("query")));
        catalog.register(
            C::tabular("GoogleBigQuery", Database, &["table"], Some("query"))
                .dataset_type_literal("GoogleBigQueryObject"),
        );

        // File and table storage
        catalog.register(C::file("FileSystem", "FileServerLocation", "FileServer", &["location.folderPath"]));
        catalog.register(C::file("Hdfs", "HdfsLocation", "Hdfs", &["location.folderPath"]).read_only());
        catalog.register(C::file("Ftp", "FtpServerLocation", "FtpServer", &["location.folderPath"]).read_only());
        catalog.register(C::file("Sftp", "SftpLocation", "Sftp", &["location.folderPath"]));
        catalog.register(C::file(
            "AzureDataLakeStorageGen2",
            "AzureBlobFSLocation",
            "AzureBlobFS",
            &["location.fileSystem"],
        ));
        catalog.register(C::file(
            "AzureBlobStorage",
            "AzureBlobStorageLocation",
            "AzureBlobStorage",
            &["location.container"],
        ));
        catalog.register(C::file(
            "AzureFileStorage",
            "AzureFileStorageLocation",
            "AzureFileStorage",
            &["location.folderPath"],
        ));
        catalog.register(C::file("AmazonS3", "AmazonS3Location", "AmazonS3", &["location.bucketName"]));
        catalog.register(C::file(
            "AmazonS3Compatible",
            "AmazonS3CompatibleLocation",
            "AmazonS3Compatible",
            &["location.bucketName"],
        ));
        catalog.register(C::file(
            "GoogleCloudStorage",
            "GoogleCloudStorageLocation",
            "GoogleCloudStorage",
            &["location.bucketName"],
        ));
        catalog.register(C::file(
            "OracleCloudStorage",
            "OracleCloudStorageLocation",
            "OracleCloudStorage",
            &["location.bucketName"],
        ));
        catalog.register(
            C::tabular("AzureTables", Storage, &["tableName"], Some("azureTableSourceQuery")),
        );

        // SaaS services
        catalog.register(
            C::tabular("SharePointOnlineList", Service, &["listName"], Some("query"))
                .dataset_type_literal("SharePointOnlineListResource"),
        );
        catalog.register(C::tabular("Salesforce", Service, &["objectApiName"], Some("query")));
        catalog.register(
            C::tabular("SalesforceServiceCloud", Service, &["objectApiName"], Some("query")),
        );
        catalog.register(
            C::tabular("OData", Service, &["path"], Some("query"))
                .dataset_type_literal("ODataResource")
                .read_only(),
        );
        catalog.register(C::tabular("Dynamics365", Service, &["entityName"], Some("query")));
        catalog.register(C::tabular("DynamicsAX", Service, &["path"], Some("query")).read_only());
        catalog.register(C::tabular("DynamicsCRM", Service, &["entityName"], Some("query")));
        catalog.register(C::tabular("ServiceNow", Service, &["tableName"], None).read_only());

        // Generic protocols and SAP
        catalog.register(C::tabular("Odbc", Generic, &["tableName"], Some("query")));
        catalog.register(
            C::file("Http", "HttpServerLocation", "Http", &[])
                .read_only()
                .category(Generic),
        );
        catalog.register(
            C::tabular("RestService", Generic, &[], None)
                .type_literals("RestSource", "RestSink")
                .dataset_type_literal("RestResource"),
        );
        for name in ["SapBWOpenHub", "SapBWMessageServer"] {
            catalog.register(
                C::tabular(name, Generic, &["openHubDestinationName"], None).read_only(),
            );
        }
        for name in ["SapTableApplication", "SapTableMessage"] {
            catalog.register(C::tabular(name, Generic, &["tableName"], None).read_only());
        }

        // Workspace artifacts
        catalog.register(
            C::tabular("Lakehouse", Fabric, &["table"], None)
                .type_literals("LakehouseTableSource", "LakehouseTableSink")
                .dataset_type_literal("LakehouseTable")
                .linked_service("Lakehouse", Some("Tables"))
                .sink_default("tableActionOption", json!("Append")),
        );
        catalog.register(
            C::file("LakehouseFiles", "LakehouseLocation", "Lakehouse", &["location.folderPath"])
                .category(Fabric)
                .linked_service("Lakehouse", Some("Files")),
        );
        catalog.register(
            C::tabular("DataWarehouse", Fabric, &["table"], Some("sqlReaderQuery"))
                .dataset_type_literal("DataWarehouseTable")
                .linked_service("DataWarehouse", None)
                .sink_default("allowCopyCommand", json!(true)),
        );

        catalog
    }

    /// Create an empty catalog (for testing).
    pub fn empty() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Register a connector, replacing any previous entry of the same name.
    pub fn register(&mut self, spec: ConnectorSpec) {
        self.connectors.insert(spec.name.clone(), spec);
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, name: &str) -> Option<&ConnectorSpec> {
        self.connectors.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.connectors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Connectors sorted by category, then name.
    pub fn list(&self) -> Vec<&ConnectorSpec> {
        let mut specs: Vec<&ConnectorSpec> = self.connectors.values().collect();
        specs.sort_by(|a, b| (a.category, &a.name).cmp(&(b.category, &b.name)));
        specs
    }

    pub fn by_category(&self, category: ConnectorCategory) -> Vec<&ConnectorSpec> {
        self.list()
            .into_iter()
            .filter(|c| c.category == category)
            .collect()
    }

    /// Reverse lookup from a tabular source/sink `type` literal.
    pub fn by_activity_type(&self, role: Role, literal: &str) -> Option<&ConnectorSpec> {
        self.list().into_iter().find(|spec| match (&spec.dataset, role) {
            (DatasetShape::Tabular { source_type, .. }, Role::Source) => source_type == literal,
            (DatasetShape::Tabular { sink_type, .. }, Role::Sink) => {
                sink_type.as_deref() == Some(literal)
            }
            _ => false,
        })
    }

    /// Reverse lookup from a `storeSettings` prefix and, for artifact
    /// stores, the linked service type.
    pub fn by_store_prefix(&self, prefix: &str, service_type: Option<&str>) -> Option<&ConnectorSpec> {
        self.list().into_iter().find(|spec| match &spec.dataset {
            DatasetShape::File { store_prefix, .. } if store_prefix == prefix => {
                match (&spec.binding, service_type) {
                    (ConnectionBinding::LinkedService(t), Some(s)) => t.service_type == s,
                    (ConnectionBinding::LinkedService(_), None) => true,
                    (ConnectionBinding::External, _) => true,
                }
            }
            _ => false,
        })
    }

    /// Shared process-wide catalog.
    pub fn global() -> Arc<ConnectorCatalog> {
        let cell = GLOBAL.get_or_init(|| RwLock::new(Arc::new(ConnectorCatalog::new())));
        match cell.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Atomically replace the process-wide catalog, returning the previous
    /// snapshot. In-flight callers keep the snapshot they already hold.
    pub fn install(catalog: ConnectorCatalog) -> Arc<ConnectorCatalog> {
        let cell = GLOBAL.get_or_init(|| RwLock::new(Arc::new(ConnectorCatalog::new())));
        let next = Arc::new(catalog);
        let mut guard = match cell.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}

impl Default for ConnectorCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_size() {
        let catalog = ConnectorCatalog::new();
        assert_eq!(catalog.len(), 55);
        assert!(catalog.has("MySql"));
        assert!(catalog.has("Lakehouse"));
        assert!(catalog.has("GoogleBigQuery"));
    }

    #[test]
    fn test_unverified_connectors_absent() {
        let catalog = ConnectorCatalog::new();
        for name in ["Snowflake", "AzureDataExplorer", "Office365"] {
            assert!(!catalog.has(name), "{} should not be listed", name);
        }
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let catalog = ConnectorCatalog::new();
        assert!(catalog.get("mysql").is_none());
        assert!(catalog.get("MySql").is_some());
    }

    #[test]
    fn test_reverse_lookup() {
        let catalog = ConnectorCatalog::new();
        assert_eq!(
            catalog.by_activity_type(Role::Source, "MySqlSource").unwrap().name,
            "MySql"
        );
        assert_eq!(
            catalog
                .by_activity_type(Role::Sink, "LakehouseTableSink")
                .unwrap()
                .name,
            "Lakehouse"
        );
        assert!(catalog.by_activity_type(Role::Sink, "ODataSink").is_none());
        assert_eq!(
            catalog.by_store_prefix("AmazonS3", None).unwrap().name,
            "AmazonS3"
        );
        assert_eq!(
            catalog
                .by_store_prefix("Lakehouse", Some("Lakehouse"))
                .unwrap()
                .name,
            "LakehouseFiles"
        );
    }

    #[test]
    fn test_file_store_types_follow_format() {
        let catalog = ConnectorCatalog::new();
        let s3 = catalog.get("AmazonS3").unwrap();
        assert_eq!(
            s3.activity_type(Role::Source, FileFormat::DelimitedText).as_deref(),
            Some("DelimitedTextSource")
        );
        assert_eq!(s3.dataset_type(FileFormat::Parquet), "Parquet");

        let http = catalog.get("Http").unwrap();
        assert!(!http.supports(Role::Sink));
        assert!(http.activity_type(Role::Sink, FileFormat::Binary).is_none());
    }

    #[test]
    fn test_linked_service_render() {
        let catalog = ConnectorCatalog::new();
        let lakehouse = catalog.get("Lakehouse").unwrap();
        assert!(lakehouse.requires_linked_service(Role::Sink));
        let ConnectionBinding::LinkedService(template) = &lakehouse.binding else {
            panic!("expected linked service binding");
        };
        let rendered = template.render("sales_lh", "ws-1", "lh-1");
        assert_eq!(rendered["properties"]["type"], "Lakehouse");
        assert_eq!(rendered["properties"]["typeProperties"]["rootFolder"], "Tables");
        assert_eq!(rendered["properties"]["typeProperties"]["artifactId"], "lh-1");
    }

    #[test]
    fn test_categories_cover_catalog() {
        let catalog = ConnectorCatalog::new();
        let total: usize = [
            ConnectorCategory::Database,
            ConnectorCategory::Storage,
            ConnectorCategory::Service,
            ConnectorCategory::Generic,
            ConnectorCategory::Fabric,
        ]
        .iter()
        .map(|c| catalog.by_category(*c).len())
        .sum();
        assert_eq!(total, catalog.len());
        assert_eq!(catalog.by_category(ConnectorCategory::Fabric).len(), 3);
    }
}
