use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use regex::Regex;
use tracing::{debug, warn};

use crate::checksum::ChecksumCache;
use crate::constants::config::DEFAULT_FILE_PATTERN;
use crate::constants::fields;
use crate::errors::IndexError;
use crate::source::extract::{MetadataExtractor, default_extractors, format_for_extension};
use crate::source::{
    CollectScope, ItemStream, MergePolicy, SourceAdapter, SourceItem, apply_prefix,
};
use crate::transport::fs::{FileWalker, relative_path_string};
use crate::types::{ChecksumHex, ItemId, RawFieldMap, SourceId};
use crate::value::RawValue;

/// Builds an item id from the dataset root and a file path. `Ok(None)`
/// skips the file; `Err` is reported as an unreadable item.
pub type IdBuilder =
    Arc<dyn Fn(&Path, &Path) -> Result<Option<ItemId>, String> + Send + Sync + 'static>;

type PlanEntry = Result<(ItemId, PathBuf), IndexError>;

/// How a file path becomes an item id.
#[derive(Clone, Default)]
pub enum IdPolicy {
    /// Root-relative path with `/` separators.
    RelativePath,
    /// File name without extension.
    #[default]
    Basename,
    /// First capture group of a regex matched against the relative path, or
    /// the whole match when the regex has no groups.
    Pattern(Regex),
    /// Caller-provided builder.
    Custom(IdBuilder),
}

impl fmt::Debug for IdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdPolicy::RelativePath => f.write_str("RelativePath"),
            IdPolicy::Basename => f.write_str("Basename"),
            IdPolicy::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
            IdPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl IdPolicy {
    /// Item id for `path`, `Ok(None)` when the policy does not apply, or the
    /// reason a custom builder failed.
    pub fn item_id(&self, root: &Path, path: &Path) -> Result<Option<ItemId>, String> {
        let item_id = match self {
            IdPolicy::RelativePath => relative_path_string(root, path),
            IdPolicy::Basename => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned()),
            IdPolicy::Pattern(regex) => (|| {
                let relative = relative_path_string(root, path)?;
                let captures = regex.captures(&relative)?;
                let matched = if captures.len() > 1 {
                    captures.get(1)?
                } else {
                    captures.get(0)?
                };
                Some(matched.as_str().to_string())
            })(),
            IdPolicy::Custom(builder) => builder(root, path)?,
        };
        Ok(item_id.filter(|id| !id.is_empty()))
    }
}

/// Configuration for a filesystem-backed source.
#[derive(Clone)]
pub struct FileSourceConfig {
    /// Stable source identifier used in logs and reports.
    pub source_id: SourceId,
    /// Root directory containing raw files.
    pub root: PathBuf,
    /// Glob matched against root-relative paths.
    pub pattern: String,
    /// Globs whose matches are dropped.
    pub exclude: Vec<String>,
    /// File path to item id mapping.
    pub id_policy: IdPolicy,
    /// Whether to follow symlinks while walking.
    pub follow_links: bool,
    /// Whether format extractors run.
    pub extract_metadata: bool,
    /// Merge behaviour for this source's fields.
    pub merge_policy: MergePolicy,
    /// Optional field namespace (`{prefix}.{field}`).
    pub prefix: Option<String>,
    /// Extractors keyed by normalized format.
    pub extractors: HashMap<String, MetadataExtractor>,
    /// Shared checksum memo.
    pub checksums: Arc<ChecksumCache>,
}

impl FileSourceConfig {
    /// Create a config with default pattern, basename ids and the built-in
    /// extractors.
    pub fn new(source_id: impl Into<SourceId>, root: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            root: root.into(),
            pattern: DEFAULT_FILE_PATTERN.to_string(),
            exclude: Vec::new(),
            id_policy: IdPolicy::default(),
            follow_links: true,
            extract_metadata: true,
            merge_policy: MergePolicy::Override,
            prefix: None,
            extractors: default_extractors().into_iter().collect(),
            checksums: Arc::new(ChecksumCache::new()),
        }
    }

    /// Override the include glob.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Add an exclude glob.
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Override the id policy.
    pub fn with_id_policy(mut self, id_policy: IdPolicy) -> Self {
        self.id_policy = id_policy;
        self
    }

    /// Override whether symlinks are followed.
    pub fn with_follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    /// Enable or disable format extractors.
    pub fn with_extract_metadata(mut self, extract_metadata: bool) -> Self {
        self.extract_metadata = extract_metadata;
        self
    }

    /// Override the merge policy.
    pub fn with_merge_policy(mut self, merge_policy: MergePolicy) -> Self {
        self.merge_policy = merge_policy;
        self
    }

    /// Namespace every field as `{prefix}.{field}`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Register or replace the extractor for a format.
    pub fn with_extractor(mut self, format: impl Into<String>, extractor: MetadataExtractor) -> Self {
        self.extractors.insert(format.into(), extractor);
        self
    }

    /// Share a checksum cache with other sources or the index.
    pub fn with_checksum_cache(mut self, checksums: Arc<ChecksumCache>) -> Self {
        self.checksums = checksums;
        self
    }
}

/// Source that reports one item per matching file.
pub struct FileSource {
    config: FileSourceConfig,
    include: Pattern,
    exclude: Vec<Pattern>,
}

fn compile_glob(source_id: &str, pattern: &str) -> Result<Pattern, IndexError> {
    Pattern::new(pattern).map_err(|err| {
        IndexError::Configuration(format!(
            "source '{source_id}' has invalid glob '{pattern}': {err}"
        ))
    })
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl FileSource {
    /// Compile the globs of `config`.
    pub fn new(config: FileSourceConfig) -> Result<Self, IndexError> {
        let include = compile_glob(&config.source_id, &config.pattern)?;
        let exclude = config
            .exclude
            .iter()
            .map(|pattern| compile_glob(&config.source_id, pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            include,
            exclude,
        })
    }

    /// Source configuration.
    pub fn config(&self) -> &FileSourceConfig {
        &self.config
    }

    fn matches(&self, relative: &str) -> bool {
        self.include.matches_with(relative, MATCH_OPTIONS)
            && !self
                .exclude
                .iter()
                .any(|pattern| pattern.matches_with(relative, MATCH_OPTIONS))
    }

    /// Matching files paired with their ids, in path order. Fails when two
    /// files map to the same id. Files whose id could not be built are left
    /// out; `collect` reports them.
    pub fn plan(&self) -> Result<Vec<(ItemId, PathBuf)>, IndexError> {
        Ok(self
            .plan_entries()?
            .into_iter()
            .filter_map(Result::ok)
            .collect())
    }

    fn plan_entries(&self) -> Result<Vec<PlanEntry>, IndexError> {
        let root = &self.config.root;
        let walker = FileWalker::new(root).with_follow_links(self.config.follow_links);
        let mut owners: HashMap<ItemId, PathBuf> = HashMap::new();
        let mut planned = Vec::new();
        for path in walker.files() {
            let Some(relative) = relative_path_string(root, &path) else {
                continue;
            };
            if !self.matches(&relative) {
                continue;
            }
            let item_id = match self.config.id_policy.item_id(root, &path) {
                Ok(Some(item_id)) => item_id,
                Ok(None) => {
                    warn!(
                        source_id = %self.config.source_id,
                        path = %relative,
                        "file does not yield an item id; skipping"
                    );
                    continue;
                }
                Err(reason) => {
                    planned.push(Err(IndexError::SourceRead {
                        source_id: self.config.source_id.clone(),
                        item_id: None,
                        reason: format!("{relative}: id transformation failed: {reason}"),
                    }));
                    continue;
                }
            };
            if let Some(previous) = owners.get(&item_id) {
                return Err(IndexError::DuplicateItemId {
                    source_id: self.config.source_id.clone(),
                    item_id,
                    details: format!(
                        "'{}' and '{}'",
                        relative_path_string(root, previous).unwrap_or_default(),
                        relative
                    ),
                });
            }
            owners.insert(item_id.clone(), path.clone());
            planned.push(Ok((item_id, path)));
        }
        debug!(
            source_id = %self.config.source_id,
            files = planned.len(),
            "planned file source"
        );
        Ok(planned)
    }

    fn read_item(&self, item_id: ItemId, path: &Path) -> Result<SourceItem, IndexError> {
        let read_error = |reason: String| IndexError::SourceRead {
            source_id: self.config.source_id.clone(),
            item_id: Some(item_id.clone()),
            reason,
        };
        let relative = relative_path_string(&self.config.root, path).unwrap_or_default();
        let format = path
            .extension()
            .map(|extension| format_for_extension(&extension.to_string_lossy()))
            .unwrap_or_default();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let checksum = self
            .config
            .checksums
            .checksum(path)
            .map_err(|err| read_error(format!("{relative}: {err}")))?;

        let mut item_fields = RawFieldMap::new();
        item_fields.insert(fields::PATH.to_string(), RawValue::text(relative.clone()));
        item_fields.insert(fields::NAME.to_string(), RawValue::text(name));
        item_fields.insert(fields::FORMAT.to_string(), RawValue::text(format.clone()));
        item_fields.insert(fields::CHECKSUM.to_string(), RawValue::text(checksum));

        if self.config.extract_metadata
            && let Some(extractor) = self.config.extractors.get(&format)
        {
            let bytes = std::fs::read(path).map_err(|err| read_error(format!("{relative}: {err}")))?;
            let text = String::from_utf8_lossy(&bytes);
            let extracted =
                extractor(&text).map_err(|reason| read_error(format!("{relative}: {reason}")))?;
            for (key, value) in extracted {
                item_fields.entry(key).or_insert(value);
            }
        }

        Ok(SourceItem::new(
            item_id,
            apply_prefix(self.config.prefix.as_deref(), item_fields),
        ))
    }
}

impl SourceAdapter for FileSource {
    fn id(&self) -> &str {
        &self.config.source_id
    }

    fn merge_policy(&self) -> MergePolicy {
        self.config.merge_policy
    }

    fn collect(&self, scope: &CollectScope) -> Result<ItemStream<'_>, IndexError> {
        let scope = scope.clone();
        let planned = self.plan_entries()?;
        Ok(Box::new(
            planned
                .into_iter()
                .filter(move |entry| match entry {
                    Ok((item_id, _)) => scope.includes(item_id),
                    Err(_) => matches!(scope, CollectScope::All),
                })
                .map(move |entry| {
                    let (item_id, path) = entry?;
                    self.read_item(item_id, &path)
                }),
        ))
    }

    fn fingerprints(&self) -> Result<Vec<(ItemId, ChecksumHex)>, IndexError> {
        let mut fingerprints = Vec::new();
        for (item_id, path) in self.plan()? {
            match self.config.checksums.checksum(&path) {
                Ok(digest) => fingerprints.push((item_id, digest)),
                Err(err) => warn!(
                    source_id = %self.config.source_id,
                    item_id = %item_id,
                    error = %err,
                    "could not fingerprint file"
                ),
            }
        }
        Ok(fingerprints)
    }
}
