//! Source adapters and collection helpers.
//!
//! Ownership model:
//! - A `SourceAdapter` reads one kind of raw material (files, a CSV sidecar,
//!   constants, computed values) and reports raw fields per item.
//! - Primary sources discover items through `collect`; derived sources only
//!   add fields to items discovered by primaries, through `derive`.
//! - Sources are read-only collaborators: the index owns every merged record
//!   and the resulting table.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::IndexError;
use crate::types::{ChecksumHex, ItemId, RawFieldMap, SourceId};

/// Format-specific metadata extractors used by file sources.
pub mod extract;
/// Source implementation modules.
pub mod sources;

pub use sources::computed_source::{ComputeFn, ComputedSource};
pub use sources::constant_source::ConstantSource;
pub use sources::csv_source::{CsvSource, CsvSourceConfig};
pub use sources::file_source::{FileSource, FileSourceConfig, IdBuilder, IdPolicy};

/// How a source's fields combine with fields already merged for an item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Later source wins on key collision.
    #[default]
    Override,
    /// Values are list-appended to what earlier sources reported.
    Additive,
}

/// When a source runs during collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceStage {
    /// Discovers items; collected in parallel with other primaries.
    #[default]
    Primary,
    /// Adds fields to already discovered items, after every primary ran.
    Derived,
}

/// Which items a collection pass should report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CollectScope {
    /// Every item the source knows about.
    #[default]
    All,
    /// Only the listed items (incremental passes).
    Only(HashSet<ItemId>),
}

impl CollectScope {
    /// Scope restricted to `ids`.
    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemId>,
    {
        CollectScope::Only(ids.into_iter().map(Into::into).collect())
    }

    /// True when `item_id` is in scope.
    pub fn includes(&self, item_id: &str) -> bool {
        match self {
            CollectScope::All => true,
            CollectScope::Only(ids) => ids.contains(item_id),
        }
    }
}

/// Raw fields one source reports for one item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceItem {
    /// Item identifier.
    pub item_id: ItemId,
    /// Raw fields, in source order.
    pub fields: RawFieldMap,
}

impl SourceItem {
    /// Pair an id with its fields.
    pub fn new(item_id: impl Into<ItemId>, fields: RawFieldMap) -> Self {
        Self {
            item_id: item_id.into(),
            fields,
        }
    }
}

/// Lazily produced items of one collection pass. Per-item failures are
/// yielded as errors without ending the stream.
pub type ItemStream<'a> = Box<dyn Iterator<Item = Result<SourceItem, IndexError>> + Send + 'a>;

/// Index-facing source interface.
///
/// For unchanged raw material `collect` must be idempotent: the same items,
/// in the same order, with the same fields.
pub trait SourceAdapter: Send + Sync {
    /// Stable source identifier used in logs and reports.
    fn id(&self) -> &str;

    /// Merge behaviour for this source's fields.
    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::Override
    }

    /// Collection stage.
    fn stage(&self) -> SourceStage {
        SourceStage::Primary
    }

    /// Start a collection pass. Structural failures (missing id column,
    /// duplicate ids) are returned here; per-item read failures are yielded
    /// by the stream.
    fn collect(&self, scope: &CollectScope) -> Result<ItemStream<'_>, IndexError>;

    /// Fields a derived source adds to an item, given everything merged so
    /// far. Primary sources keep the default.
    fn derive(&self, _item_id: &str, _merged: &RawFieldMap) -> Result<RawFieldMap, IndexError> {
        Ok(RawFieldMap::new())
    }

    /// Cheap per-item content fingerprints used to detect changed items.
    /// Sources without a notion of content change report nothing.
    fn fingerprints(&self) -> Result<Vec<(ItemId, ChecksumHex)>, IndexError> {
        Ok(Vec::new())
    }
}

/// Rename every field to `{prefix}.{field}` when a prefix is configured.
pub fn apply_prefix(prefix: Option<&str>, fields: RawFieldMap) -> RawFieldMap {
    match prefix {
        None | Some("") => fields,
        Some(prefix) => fields
            .into_iter()
            .map(|(name, value)| (format!("{prefix}.{name}"), value))
            .collect(),
    }
}

/// In-memory source that wraps prebuilt items.
pub struct InMemorySource {
    id: SourceId,
    items: Arc<Vec<SourceItem>>,
    merge_policy: MergePolicy,
}

impl InMemorySource {
    /// Create an in-memory source from prebuilt items.
    pub fn new(id: impl Into<SourceId>, items: Vec<SourceItem>) -> Self {
        Self {
            id: id.into(),
            items: Arc::new(items),
            merge_policy: MergePolicy::Override,
        }
    }

    /// Override the merge policy.
    pub fn with_merge_policy(mut self, merge_policy: MergePolicy) -> Self {
        self.merge_policy = merge_policy;
        self
    }
}

impl SourceAdapter for InMemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    fn collect(&self, scope: &CollectScope) -> Result<ItemStream<'_>, IndexError> {
        let mut seen = HashSet::new();
        for item in self.items.iter() {
            if !seen.insert(item.item_id.as_str()) {
                return Err(IndexError::DuplicateItemId {
                    source_id: self.id.clone(),
                    item_id: item.item_id.clone(),
                    details: "reported twice".to_string(),
                });
            }
        }
        let scope = scope.clone();
        Ok(Box::new(
            self.items
                .iter()
                .filter(move |item| scope.includes(&item.item_id))
                .cloned()
                .map(Ok),
        ))
    }

    fn fingerprints(&self) -> Result<Vec<(ItemId, ChecksumHex)>, IndexError> {
        Ok(self
            .items
            .iter()
            .map(|item| {
                let cells = item
                    .fields
                    .iter()
                    .flat_map(|(name, value)| [name.clone(), value.to_cell()]);
                (
                    item.item_id.clone(),
                    crate::checksum::checksum_iter(cells.map(|cell| cell + "\u{1f}")),
                )
            })
            .collect())
    }
}
