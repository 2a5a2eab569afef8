//! pipewright - validating compiler for declarative data pipelines
//!
//! pipewright takes a compact, human- or agent-authored pipeline definition
//! and turns it into the exact canonical document a managed orchestration
//! service accepts. Every structural defect is caught locally, before a
//! document is ever submitted.
//!
//! ## Key Features
//!
//! - **Activity registry**: typed contracts for every supported activity kind
//! - **Connector catalog**: 55 connectors with their exact dataset wire shapes
//! - **Stub normalization**: `{connector: MySql, table: ...}` becomes the full nested block
//! - **Reference checks**: `@activity('X')` must name a predecessor
//! - **Deterministic output**: equal definitions assemble to identical bytes
//! - **Metadata expansion**: one Copy activity per configuration row
//!
//! ## Example
//!
//! ```yaml
//! name: orders-nightly
//!
//! parameters:
//!   - name: region
//!     type: string
//!     default: emea
//!
//! activities:
//!   - name: CopyOrders
//!     type: Copy
//!     typeProperties:
//!       source: { connector: MySql, connection: conn-1, table: sales.orders }
//!       sink: { connector: Lakehouse, workspaceId: ws-1, artifactId: lh-1, table: orders }
//!
//!   - name: Notify
//!     type: Teams
//!     dependsOn: [CopyOrders]
//!     typeProperties:
//!       inputs:
//!         body: "@{activity('CopyOrders').output.rowsCopied} rows copied"
//! ```

pub mod activities;
pub mod config;
pub mod connectors;
pub mod engine;
pub mod error;
pub mod expander;
pub mod pipeline;
pub mod transport;

pub use engine::{Engine, ValidationReport};
pub use error::{Error, Result};
pub use pipeline::{parse_pipeline, parse_pipeline_file, CanonicalDocument, PipelineDefinition};
