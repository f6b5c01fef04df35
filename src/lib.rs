#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Command-line runner behind the `catafolk` binary.
pub mod app;
/// MD5 checksums for files, items and datasets.
pub mod checksum;
/// Dataset configuration loaded from `dataset.yml`.
pub mod config;
/// Centralized constants for schema files, implicit fields and formats.
pub mod constants;
/// Index state machine, run reports and table persistence.
pub mod index;
/// Built-in transformation operations and their registry.
pub mod operations;
/// Typed field schema.
pub mod schema;
/// Source adapters and format extractors.
pub mod source;
/// Declarative transformer graphs.
pub mod transformer;
/// Input transports used by sources (filesystem today).
pub mod transport;
/// Shared type aliases.
pub mod types;
/// Raw and typed field values.
pub mod value;

mod errors;

pub use config::{DatasetConfig, DynSource, IdPolicySpec, SourceSpec};
pub use errors::{ErrorKind, IndexError};
pub use index::{BuildReport, Index, IndexRow, IndexState, MergedRecord};
pub use operations::{Operation, OperationFailure, OperationRegistry};
pub use schema::{DType, FieldDef, FieldSchema};
pub use source::{
    CollectScope, ComputedSource, ConstantSource, CsvSource, CsvSourceConfig, FileSource,
    FileSourceConfig, IdPolicy, InMemorySource, MergePolicy, SourceAdapter, SourceItem,
    SourceStage,
};
pub use transformer::{MissingInputPolicy, OperationSpec, TransformerGraph};
pub use types::{
    ChecksumHex, DatasetId, FieldName, GroupName, ItemId, OperationName, PathString, RawFieldMap,
    SourceId, TypedRow,
};
pub use value::{RawValue, TypedValue};
