use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};

use crate::errors::{ErrorKind, IndexError};
use crate::types::{DatasetId, FieldName, ItemId, SourceId};

/// One problem recorded during a build.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportEntry {
    /// Item the problem belongs to, if known.
    pub item_id: Option<ItemId>,
    /// Source that failed to read the item.
    pub source_id: Option<SourceId>,
    /// Field involved in the problem.
    pub field: Option<FieldName>,
    /// Error category.
    pub kind: ErrorKind,
    /// Rendered error message.
    pub message: String,
    /// Whether the entry invalidates its row.
    pub missing_required: bool,
}

impl ReportEntry {
    /// Entry for `err`, attributed to an item when known.
    pub fn from_error(item_id: Option<&str>, err: &IndexError) -> Self {
        let (item_id, source_id) = match err {
            IndexError::SourceRead {
                source_id,
                item_id: read_item,
                ..
            } => (
                read_item.clone().or_else(|| item_id.map(str::to_string)),
                Some(source_id.clone()),
            ),
            _ => (item_id.map(str::to_string), None),
        };
        Self {
            item_id,
            source_id,
            field: err.field().map(str::to_string),
            kind: err.kind(),
            message: err.to_string(),
            missing_required: matches!(err, IndexError::MissingRequiredField(_)),
        }
    }
}

/// Per-source error count.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceErrors {
    /// Source identifier.
    pub source: SourceId,
    /// Number of report entries attributed to the source.
    pub count: usize,
}

/// Summary of one collect/transform run.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildReport {
    /// Dataset the run indexed.
    pub dataset_id: DatasetId,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished; `None` while in progress.
    pub finished_at: Option<DateTime<Utc>>,
    /// Items seen across all sources.
    pub total_items: usize,
    /// Recorded problems in discovery order.
    pub entries: Vec<ReportEntry>,
}

impl BuildReport {
    /// Empty report stamped with the current time.
    pub fn new(dataset_id: impl Into<DatasetId>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            total_items: 0,
            entries: Vec::new(),
        }
    }

    /// Record an error.
    pub fn record(&mut self, item_id: Option<&str>, err: &IndexError) {
        self.entries.push(ReportEntry::from_error(item_id, err));
    }

    /// Stamp the finish time.
    pub fn finish(&mut self, total_items: usize) {
        self.total_items = total_items;
        self.finished_at = Some(Utc::now());
    }

    /// Drop every entry concerning one of `item_ids`.
    pub fn forget_items(&mut self, item_ids: &BTreeSet<ItemId>) {
        self.entries.retain(|entry| {
            entry
                .item_id
                .as_ref()
                .is_none_or(|item_id| !item_ids.contains(item_id))
        });
    }

    /// Distinct items with at least one error.
    pub fn items_with_errors(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|entry| entry.item_id.as_deref())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Items missing a required field.
    pub fn invalid_items(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .filter(|entry| entry.missing_required)
            .filter_map(|entry| entry.item_id.as_deref())
            .collect()
    }

    /// True when any row misses a required field.
    pub fn is_failed(&self) -> bool {
        !self.invalid_items().is_empty()
    }

    /// Entry counts by kind.
    pub fn counts_by_kind(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.kind.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Sources ordered by descending error count, then by id.
    pub fn source_errors(&self) -> Vec<SourceErrors> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in &self.entries {
            if let Some(source) = entry.source_id.as_deref() {
                *counts.entry(source).or_insert(0) += 1;
            }
        }
        let mut per_source: Vec<SourceErrors> = counts
            .into_iter()
            .map(|(source, count)| SourceErrors {
                source: source.to_string(),
                count,
            })
            .collect();
        per_source.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.source.cmp(&b.source)));
        per_source
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_failed() { "FAILED" } else { "ok" };
        writeln!(f, "dataset {}: {status}", self.dataset_id)?;
        writeln!(f, "  items: {}", self.total_items)?;
        writeln!(f, "  items with errors: {}", self.items_with_errors())?;
        if let Some(finished_at) = self.finished_at {
            let elapsed = finished_at - self.started_at;
            writeln!(f, "  duration: {} ms", elapsed.num_milliseconds())?;
        }
        for (kind, count) in self.counts_by_kind() {
            writeln!(f, "  {kind} errors: {count}")?;
        }
        for source in self.source_errors() {
            writeln!(f, "  source {}: {} errors", source.source, source.count)?;
        }
        for entry in &self.entries {
            let item = entry.item_id.as_deref().unwrap_or("-");
            writeln!(f, "  [{}] {item}: {}", entry.kind.as_str(), entry.message)?;
        }
        Ok(())
    }
}
