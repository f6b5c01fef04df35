use std::io;

use thiserror::Error;

use crate::types::{FieldName, ItemId, OperationName, SourceId};

/// Error type for schema, source, transformer, and index persistence failures.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("schema parse error: {0}")]
    SchemaParse(String),
    #[error("field '{field}' expects {dtype}, got '{value}'")]
    SchemaType {
        field: FieldName,
        dtype: String,
        value: String,
    },
    #[error("required field '{0}' is missing")]
    MissingRequiredField(FieldName),
    #[error("source '{source_id}' failed to read {}: {reason}", item_label(.item_id))]
    SourceRead {
        source_id: SourceId,
        item_id: Option<ItemId>,
        reason: String,
    },
    #[error("operation '{operation}' at node '{node}' failed: {reason}")]
    Operation {
        node: String,
        operation: OperationName,
        reason: String,
    },
    #[error("node '{node}' reads missing input field '{field}'")]
    MissingInputField { node: String, field: FieldName },
    #[error("source '{source_id}' maps more than one entry to item '{item_id}': {details}")]
    DuplicateItemId {
        source_id: SourceId,
        item_id: ItemId,
        details: String,
    },
    #[error("source '{source_id}' has no id column '{column}'")]
    MissingIdColumn { source_id: SourceId, column: String },
    #[error("transformer graph has a cycle through fields [{}]", .fields.join(", "))]
    CyclicGraph { fields: Vec<FieldName> },
    #[error("unknown operation '{0}'")]
    UnknownOperation(OperationName),
    #[error("index is {state}; cannot {action}")]
    InvalidState {
        state: &'static str,
        action: &'static str,
    },
    #[error("index build failed: {0}")]
    BuildFailed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used by run reports and callers deciding whether
/// a failure is fatal for the whole run or isolated to one item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// Invalid dataset wiring, schema, or graph; fatal before any item is processed.
    Configuration,
    /// A value failed schema coercion or a required field is absent.
    Validation,
    /// A source could not read one item.
    Source,
    /// An operation or missing input failed while transforming one item.
    Transform,
    /// Filesystem or codec failure.
    Io,
}

impl ErrorKind {
    /// Stable lowercase label used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Source => "source",
            ErrorKind::Transform => "transform",
            ErrorKind::Io => "io",
        }
    }
}

impl IndexError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexError::Configuration(_)
            | IndexError::SchemaParse(_)
            | IndexError::CyclicGraph { .. }
            | IndexError::UnknownOperation(_)
            | IndexError::InvalidState { .. }
            | IndexError::MissingIdColumn { .. }
            | IndexError::DuplicateItemId { .. } => ErrorKind::Configuration,
            IndexError::SchemaType { .. }
            | IndexError::MissingRequiredField(_)
            | IndexError::BuildFailed(_) => ErrorKind::Validation,
            IndexError::SourceRead { .. } => ErrorKind::Source,
            IndexError::Operation { .. } | IndexError::MissingInputField { .. } => {
                ErrorKind::Transform
            }
            IndexError::Io(_) | IndexError::Csv(_) | IndexError::Yaml(_) | IndexError::Json(_) => {
                ErrorKind::Io
            }
        }
    }

    /// Field the error is attached to, when it concerns a single field.
    pub fn field(&self) -> Option<&str> {
        match self {
            IndexError::SchemaType { field, .. }
            | IndexError::MissingRequiredField(field)
            | IndexError::MissingInputField { field, .. } => Some(field),
            _ => None,
        }
    }
}

fn item_label(item_id: &Option<ItemId>) -> String {
    match item_id {
        Some(id) => format!("item '{id}'"),
        None => "its input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_read_message_names_the_item() {
        let err = IndexError::SourceRead {
            source_id: "scores".into(),
            item_id: Some("deut0001".into()),
            reason: "permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "source 'scores' failed to read item 'deut0001': permission denied"
        );
        assert_eq!(err.kind(), ErrorKind::Source);
    }

    #[test]
    fn cyclic_graph_lists_fields() {
        let err = IndexError::CyclicGraph {
            fields: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "transformer graph has a cycle through fields [a, b]");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn field_is_exposed_for_field_scoped_errors() {
        let err = IndexError::MissingRequiredField("title".into());
        assert_eq!(err.field(), Some("title"));
        assert!(IndexError::Configuration("x".into()).field().is_none());
    }
}
