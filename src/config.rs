//! Dataset configuration loaded from `dataset.yml`.
//!
//! A dataset directory holds the raw files, optional CSV sidecars, the schema
//! CSV and a `dataset.yml` describing sources and transformations. Relative
//! paths in the file resolve against the dataset directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checksum::ChecksumCache;
use crate::constants::config::{
    DATASET_FILENAME, DEFAULT_FILE_PATTERN, DEFAULT_ID_COLUMN, SCHEMA_FILENAME,
};
use crate::constants::{fields, index};
use crate::errors::IndexError;
use crate::operations::{OperationRegistry, json_to_raw};
use crate::source::{
    ConstantSource, CsvSource, CsvSourceConfig, FileSource, FileSourceConfig, IdPolicy,
    MergePolicy, SourceAdapter,
};
use crate::transformer::{MissingInputPolicy, TransformerGraph};
use crate::transport::fs::relative_path_string;
use crate::types::{DatasetId, FieldName, RawFieldMap, SourceId};
use crate::value::RawValue;

/// Boxed source as registered with an index.
pub type DynSource = Box<dyn SourceAdapter + 'static>;

/// How a file source derives item ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdPolicySpec {
    /// File name without extension.
    #[default]
    Basename,
    /// Root-relative path.
    RelativePath,
    /// Regex over the relative path; first group or whole match.
    Pattern(String),
}

/// Declaration of a file source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileSourceSpec {
    /// Source identifier.
    #[serde(alias = "id")]
    pub name: SourceId,
    /// Directory walked, relative to the dataset root.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Include glob over root-relative paths.
    #[serde(default = "default_file_pattern", alias = "file_pattern")]
    pub pattern: String,
    /// Exclude globs.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Path to id mapping.
    #[serde(default)]
    pub id_policy: IdPolicySpec,
    /// Transformations producing `id` from `cf_path` and `cf_name`;
    /// overrides `id_policy`.
    #[serde(default)]
    pub id_transformations: Value,
    /// Whether format extractors run.
    #[serde(default = "default_true")]
    pub extract_metadata: bool,
    /// Whether symlinks are followed.
    #[serde(default = "default_true")]
    pub follow_links: bool,
    /// Merge behaviour.
    #[serde(default)]
    pub merge: MergePolicy,
    /// Optional field namespace.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Declaration of a CSV sidecar source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CsvSourceSpec {
    /// Source identifier.
    #[serde(alias = "id")]
    pub name: SourceId,
    /// CSV file, relative to the dataset root.
    pub path: PathBuf,
    /// Column holding item ids.
    #[serde(default = "default_id_column", alias = "id_field")]
    pub id_column: String,
    /// Single-character delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Transformations producing `id` from each row.
    #[serde(default)]
    pub id_transformations: Value,
    /// Merge behaviour.
    #[serde(default)]
    pub merge: MergePolicy,
    /// Optional field namespace.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Declaration of a constant source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantSourceSpec {
    /// Source identifier.
    #[serde(alias = "id")]
    pub name: SourceId,
    /// Fields added to every item.
    #[serde(default)]
    pub fields: IndexMap<FieldName, Value>,
    /// Merge behaviour.
    #[serde(default)]
    pub merge: MergePolicy,
}

/// One entry of the `sources` list, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Raw files under the dataset directory.
    File(FileSourceSpec),
    /// A CSV sidecar.
    Csv(CsvSourceSpec),
    /// Fixed fields for every item.
    Constant(ConstantSourceSpec),
}

fn default_file_pattern() -> String {
    DEFAULT_FILE_PATTERN.to_string()
}

fn default_id_column() -> String {
    DEFAULT_ID_COLUMN.to_string()
}

fn default_delimiter() -> char {
    ','
}

fn default_true() -> bool {
    true
}

fn id_graph(
    source_id: &str,
    transformations: &Value,
    registry: &OperationRegistry,
) -> Result<Option<TransformerGraph>, IndexError> {
    if transformations.is_null() {
        return Ok(None);
    }
    let graph = TransformerGraph::load(transformations, registry).map_err(|err| {
        IndexError::Configuration(format!("source '{source_id}' id transformations: {err}"))
    })?;
    if !graph.leafs().contains(&fields::ID) {
        return Err(IndexError::Configuration(format!(
            "source '{source_id}' id transformations must output '{}'",
            fields::ID
        )));
    }
    Ok(Some(graph))
}

impl SourceSpec {
    /// Source identifier.
    pub fn name(&self) -> &str {
        match self {
            SourceSpec::File(spec) => &spec.name,
            SourceSpec::Csv(spec) => &spec.name,
            SourceSpec::Constant(spec) => &spec.name,
        }
    }

    /// Build the adapter, resolving paths against `root`.
    pub fn build(
        &self,
        root: &Path,
        registry: &OperationRegistry,
        checksums: Arc<ChecksumCache>,
    ) -> Result<DynSource, IndexError> {
        match self {
            SourceSpec::File(spec) => {
                let source_root = spec
                    .root
                    .as_ref()
                    .map_or_else(|| root.to_path_buf(), |dir| root.join(dir));
                let id_policy = match id_graph(&spec.name, &spec.id_transformations, registry)? {
                    Some(graph) => graph_id_policy(graph),
                    None => match &spec.id_policy {
                        IdPolicySpec::Basename => IdPolicy::Basename,
                        IdPolicySpec::RelativePath => IdPolicy::RelativePath,
                        IdPolicySpec::Pattern(pattern) => {
                            IdPolicy::Pattern(Regex::new(pattern).map_err(|err| {
                                IndexError::Configuration(format!(
                                    "source '{}' has invalid id pattern: {err}",
                                    spec.name
                                ))
                            })?)
                        }
                    },
                };
                let mut config = FileSourceConfig::new(spec.name.clone(), source_root)
                    .with_pattern(spec.pattern.clone())
                    .with_id_policy(id_policy)
                    .with_extract_metadata(spec.extract_metadata)
                    .with_follow_links(spec.follow_links)
                    .with_merge_policy(spec.merge)
                    .with_checksum_cache(checksums);
                for exclude in &spec.exclude {
                    config = config.with_exclude(exclude.clone());
                }
                if let Some(prefix) = &spec.prefix {
                    config = config.with_prefix(prefix.clone());
                }
                Ok(Box::new(FileSource::new(config)?))
            }
            SourceSpec::Csv(spec) => {
                let delimiter = u8::try_from(spec.delimiter).map_err(|_| {
                    IndexError::Configuration(format!(
                        "source '{}' delimiter must be a single-byte character",
                        spec.name
                    ))
                })?;
                let mut config = CsvSourceConfig::new(spec.name.clone(), root.join(&spec.path))
                    .with_id_column(spec.id_column.clone())
                    .with_delimiter(delimiter)
                    .with_merge_policy(spec.merge);
                if let Some(graph) = id_graph(&spec.name, &spec.id_transformations, registry)? {
                    config = config.with_id_transformer(graph);
                }
                if let Some(prefix) = &spec.prefix {
                    config = config.with_prefix(prefix.clone());
                }
                Ok(Box::new(CsvSource::new(config)))
            }
            SourceSpec::Constant(spec) => {
                let fields: RawFieldMap = spec
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), json_to_raw(value)))
                    .collect();
                Ok(Box::new(
                    ConstantSource::new(spec.name.clone(), fields).with_merge_policy(spec.merge),
                ))
            }
        }
    }
}

/// Id policy running `graph` over a file's `cf_path` and `cf_name`.
fn graph_id_policy(graph: TransformerGraph) -> IdPolicy {
    let graph = Arc::new(graph);
    IdPolicy::Custom(Arc::new(move |root: &Path, path: &Path| {
        let mut record = RawFieldMap::new();
        record.insert(
            fields::PATH.to_string(),
            RawValue::from(relative_path_string(root, path)),
        );
        record.insert(
            fields::NAME.to_string(),
            RawValue::from(
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned()),
            ),
        );
        let transformed = graph.transform(&record).map_err(|err| err.to_string())?;
        Ok(transformed.get(fields::ID).map(RawValue::to_cell))
    }))
}

#[derive(Debug, Deserialize)]
struct DatasetFile {
    #[serde(default, alias = "id")]
    dataset_id: Option<DatasetId>,
    #[serde(default)]
    schema: Option<PathBuf>,
    #[serde(default)]
    sources: Vec<SourceSpec>,
    #[serde(default)]
    transformations: Value,
    #[serde(default)]
    index_filename: Option<String>,
    #[serde(default)]
    missing_inputs: MissingInputPolicy,
}

/// Everything needed to initialize an index for one dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetConfig {
    /// Dataset identifier written to the manifest.
    pub dataset_id: DatasetId,
    /// Dataset directory.
    pub root: PathBuf,
    /// Schema CSV location.
    pub schema_path: PathBuf,
    /// Sources in override-precedence order.
    pub sources: Vec<SourceSpec>,
    /// Declarative transformation list.
    pub transformations: Value,
    /// File name of the saved index inside `root`.
    pub index_filename: String,
    /// How transformation nodes treat absent inputs.
    pub missing_inputs: MissingInputPolicy,
}

impl DatasetConfig {
    /// Config with no sources, the default schema location and index name.
    pub fn new(dataset_id: impl Into<DatasetId>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            dataset_id: dataset_id.into(),
            schema_path: root.join(SCHEMA_FILENAME),
            root,
            sources: Vec::new(),
            transformations: Value::Null,
            index_filename: index::DEFAULT_FILENAME.to_string(),
            missing_inputs: MissingInputPolicy::default(),
        }
    }

    /// Load `dataset.yml` from a dataset directory.
    pub fn from_dir(dir: &Path) -> Result<Self, IndexError> {
        Self::load(&dir.join(DATASET_FILENAME))
    }

    /// Load a dataset file; its directory becomes the dataset root and the
    /// dataset id defaults to that directory's name.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            IndexError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        let root = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::from_yaml_str(&text, &root)
    }

    /// Parse dataset YAML with `root` as the dataset directory.
    pub fn from_yaml_str(text: &str, root: &Path) -> Result<Self, IndexError> {
        let raw: Value = serde_yaml::from_str(text)?;
        let raw = if raw.is_null() {
            Value::Object(Default::default())
        } else {
            raw
        };
        let file: DatasetFile = serde_json::from_value(raw)
            .map_err(|err| IndexError::Configuration(format!("invalid dataset file: {err}")))?;
        let dataset_id = file.dataset_id.unwrap_or_else(|| {
            root.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let mut config = Self::new(dataset_id, root)
            .with_sources(file.sources)
            .with_transformations(file.transformations)
            .with_missing_inputs(file.missing_inputs);
        if let Some(schema) = file.schema {
            config = config.with_schema_path(schema);
        }
        if let Some(index_filename) = file.index_filename {
            config = config.with_index_filename(index_filename);
        }
        Ok(config)
    }

    /// Override the schema path; relative paths resolve against `root`.
    pub fn with_schema_path(mut self, path: impl AsRef<Path>) -> Self {
        self.schema_path = self.resolve(path.as_ref());
        self
    }

    /// Replace the sources.
    pub fn with_sources(mut self, sources: Vec<SourceSpec>) -> Self {
        self.sources = sources;
        self
    }

    /// Append one source.
    pub fn with_source(mut self, source: SourceSpec) -> Self {
        self.sources.push(source);
        self
    }

    /// Replace the transformation list.
    pub fn with_transformations(mut self, transformations: Value) -> Self {
        self.transformations = transformations;
        self
    }

    /// Override the saved index file name.
    pub fn with_index_filename(mut self, index_filename: impl Into<String>) -> Self {
        self.index_filename = index_filename.into();
        self
    }

    /// Override the missing-input policy.
    pub fn with_missing_inputs(mut self, missing_inputs: MissingInputPolicy) -> Self {
        self.missing_inputs = missing_inputs;
        self
    }

    /// `path` if absolute, else joined onto the dataset root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Where the index is saved.
    pub fn index_path(&self) -> PathBuf {
        self.root.join(&self.index_filename)
    }

    /// Build every declared source.
    pub fn build_sources(
        &self,
        registry: &OperationRegistry,
        checksums: Arc<ChecksumCache>,
    ) -> Result<Vec<DynSource>, IndexError> {
        self.sources
            .iter()
            .map(|spec| spec.build(&self.root, registry, Arc::clone(&checksums)))
            .collect()
    }

    /// Build the dataset transformer graph.
    pub fn build_graph(&self, registry: &OperationRegistry) -> Result<TransformerGraph, IndexError> {
        Ok(TransformerGraph::load(&self.transformations, registry)?
            .with_missing_inputs(self.missing_inputs))
    }
}
