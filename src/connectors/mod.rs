//! Connector catalog and stub normalization.

pub mod catalog;
pub mod normalizer;

pub use catalog::{
    ConnectionBinding, ConnectorCatalog, ConnectorCategory, ConnectorSpec, DatasetShape,
    FileFormat, LinkedServiceTemplate,
};
pub use normalizer::Normalizer;
