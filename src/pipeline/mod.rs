//! Pipeline definitions, parsing, validation and assembly.

pub mod assembler;
pub mod dag;
pub mod expressions;
pub mod parser;
pub mod schema;
pub mod timespan;
pub mod types;
pub mod validator;

pub use assembler::{assemble, Assembler, CanonicalActivity, CanonicalDocument, DefinitionPart};
pub use dag::DependencyGraph;
pub use parser::{parse_pipeline, parse_pipeline_file, parse_pipeline_value};
pub use schema::PipelineSchemaValidator;
pub use timespan::Timespan;
pub use types::*;
pub use validator::validate_definition;
