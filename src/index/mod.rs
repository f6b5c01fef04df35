//! Dataset index: collection, transformation and persistence.
//!
//! An `Index` moves through `Uninitialized -> Initialized -> Collected ->
//! Transformed -> Saved`. Each step checks the current state and fails with
//! `InvalidState` when called out of order.
//!
//! Ownership model:
//! - Sources, schema and graph are shared read-only collaborators.
//! - The index owns merged records, typed rows, tracked fingerprints and the
//!   run report.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::checksum::{ChecksumCache, checksum_bytes, dataset_checksum};
use crate::config::{DatasetConfig, DynSource};
use crate::constants::fields;
use crate::errors::IndexError;
use crate::operations::OperationRegistry;
use crate::schema::FieldSchema;
use crate::source::{CollectScope, MergePolicy, SourceAdapter, SourceItem, SourceStage};
use crate::transformer::TransformerGraph;
use crate::types::{ChecksumHex, DatasetId, ItemId, RawFieldMap, SourceId};

/// Run summaries.
pub mod report;
/// Table and manifest encoding.
pub mod table;

pub use report::{BuildReport, ReportEntry, SourceErrors};
pub use table::{IndexRow, Manifest, columns, manifest_path};

type Fingerprints = BTreeMap<ItemId, BTreeMap<SourceId, ChecksumHex>>;

/// Lifecycle state of an index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndexState {
    /// No schema or graph yet.
    #[default]
    Uninitialized,
    /// Schema, graph and sources are set up.
    Initialized,
    /// Sources were collected and merged.
    Collected,
    /// Rows were built.
    Transformed,
    /// Rows were saved or loaded.
    Saved,
}

impl IndexState {
    /// Lowercase label used in errors and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            IndexState::Uninitialized => "uninitialized",
            IndexState::Initialized => "initialized",
            IndexState::Collected => "collected",
            IndexState::Transformed => "transformed",
            IndexState::Saved => "saved",
        }
    }
}

/// Raw fields of one item after merging every source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergedRecord {
    /// Item identifier.
    pub item_id: ItemId,
    /// Raw fields merged across sources.
    pub fields: RawFieldMap,
}

/// Merge `incoming` into `target` under `policy`.
pub fn merge_fields(target: &mut RawFieldMap, incoming: RawFieldMap, policy: MergePolicy) {
    for (name, value) in incoming {
        match (policy, target.get_mut(&name)) {
            (MergePolicy::Additive, Some(existing)) => {
                let previous = std::mem::take(existing);
                *existing = previous.append(value);
            }
            (_, Some(existing)) => *existing = value,
            (_, None) => {
                target.insert(name, value);
            }
        }
    }
}

/// Checksum of the source file behind a record, if any source reported one.
fn file_checksum_field(record: &RawFieldMap) -> Option<ChecksumHex> {
    let suffix = format!(".{}", fields::CHECKSUM);
    record
        .iter()
        .find(|(name, _)| name.as_str() == fields::CHECKSUM || name.ends_with(&suffix))
        .map(|(_, value)| value.to_cell())
        .filter(|checksum| !checksum.is_empty())
}

struct SourceBuffer {
    items: Vec<SourceItem>,
    errors: Vec<IndexError>,
}

fn collect_source(source: &DynSource, scope: &CollectScope) -> Result<SourceBuffer, IndexError> {
    let mut buffer = SourceBuffer {
        items: Vec::new(),
        errors: Vec::new(),
    };
    for item in source.collect(scope)? {
        match item {
            Ok(item) => buffer.items.push(item),
            Err(err) => {
                warn!(source_id = %source.id(), error = %err, "skipping unreadable item");
                buffer.errors.push(err);
            }
        }
    }
    debug!(
        source_id = %source.id(),
        items = buffer.items.len(),
        errors = buffer.errors.len(),
        "collected source"
    );
    Ok(buffer)
}

fn build_row(
    schema: &FieldSchema,
    graph: &TransformerGraph,
    record: &MergedRecord,
) -> (IndexRow, Vec<IndexError>) {
    let mut errors = Vec::new();
    let mut transformed = match graph.transform(&record.fields) {
        Ok(transformed) => transformed,
        Err(err) => {
            errors.push(err);
            record.fields.clone()
        }
    };
    transformed
        .entry(fields::ID.to_string())
        .or_insert_with(|| record.item_id.clone().into());

    let (values, coercion_errors) = schema.coerce_record(&transformed);
    errors.extend(coercion_errors);
    let missing = schema.missing_required(&values);
    let valid = missing.is_empty();
    errors.extend(missing.into_iter().map(IndexError::MissingRequiredField));

    let file_checksum = file_checksum_field(&record.fields);
    let mut row = IndexRow {
        item_id: record.item_id.clone(),
        values,
        checksum: ChecksumHex::new(),
        has_file: file_checksum.is_some(),
        valid,
    };
    row.checksum = match file_checksum {
        Some(checksum) => checksum,
        None => table::cells_checksum(&row.cells(schema)),
    };
    (row, errors)
}

/// Metadata index of one dataset.
pub struct Index {
    dataset_id: DatasetId,
    state: IndexState,
    schema: Arc<FieldSchema>,
    graph: Arc<TransformerGraph>,
    sources: Vec<DynSource>,
    checksums: Arc<ChecksumCache>,
    records: Vec<MergedRecord>,
    rows: Vec<IndexRow>,
    fingerprints: Fingerprints,
    report: BuildReport,
}

impl Index {
    /// Empty, uninitialized index.
    pub fn new(dataset_id: impl Into<DatasetId>) -> Self {
        let dataset_id = dataset_id.into();
        Self {
            report: BuildReport::new(dataset_id.clone()),
            dataset_id,
            state: IndexState::Uninitialized,
            schema: Arc::new(FieldSchema::default()),
            graph: Arc::new(TransformerGraph::empty()),
            sources: Vec::new(),
            checksums: Arc::new(ChecksumCache::new()),
            records: Vec::new(),
            rows: Vec::new(),
            fingerprints: Fingerprints::new(),
        }
    }

    /// Initialize, collect, transform and save in one call.
    pub fn make(
        config: &DatasetConfig,
        registry: &OperationRegistry,
        path: &Path,
    ) -> Result<Self, IndexError> {
        let mut index = Index::new(config.dataset_id.clone());
        index.initialize(config, registry)?;
        index.collect()?;
        index.transform()?;
        index.save(path)?;
        Ok(index)
    }

    fn require(&self, allowed: &[IndexState], action: &'static str) -> Result<(), IndexError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(IndexError::InvalidState {
                state: self.state.as_str(),
                action,
            })
        }
    }

    /// Load the schema, build the graph and register the configured sources.
    pub fn initialize(
        &mut self,
        config: &DatasetConfig,
        registry: &OperationRegistry,
    ) -> Result<(), IndexError> {
        self.require(&[IndexState::Uninitialized], "initialize")?;
        let schema = FieldSchema::load(&config.schema_path)?;
        let graph = config.build_graph(registry)?;
        let sources = config.build_sources(registry, Arc::clone(&self.checksums))?;
        self.initialize_with(schema, graph)?;
        self.register_sources(sources)?;
        info!(
            dataset_id = %self.dataset_id,
            fields = self.schema.len(),
            nodes = self.graph.len(),
            sources = self.sources.len(),
            "initialized index"
        );
        Ok(())
    }

    /// Programmatic initialization. Every graph leaf must be a schema field.
    pub fn initialize_with(
        &mut self,
        schema: FieldSchema,
        graph: TransformerGraph,
    ) -> Result<(), IndexError> {
        self.require(&[IndexState::Uninitialized], "initialize")?;
        let unknown: Vec<&str> = graph
            .leafs()
            .into_iter()
            .filter(|leaf| !schema.contains(leaf))
            .collect();
        if !unknown.is_empty() {
            return Err(IndexError::Configuration(format!(
                "transformation outputs [{}] are not schema fields",
                unknown.join(", ")
            )));
        }
        self.schema = Arc::new(schema);
        self.graph = Arc::new(graph);
        self.state = IndexState::Initialized;
        Ok(())
    }

    /// Append sources; later sources override earlier ones on collisions.
    pub fn register_sources<I>(&mut self, sources: I) -> Result<(), IndexError>
    where
        I: IntoIterator<Item = DynSource>,
    {
        self.require(&[IndexState::Initialized], "register sources")?;
        self.sources.extend(sources);
        Ok(())
    }

    /// Append one source.
    pub fn register_source(&mut self, source: DynSource) -> Result<(), IndexError> {
        self.register_sources([source])
    }

    /// Checksum cache shared with file sources built by `initialize`.
    pub fn checksum_cache(&self) -> Arc<ChecksumCache> {
        Arc::clone(&self.checksums)
    }

    fn collect_scope(
        &self,
        scope: &CollectScope,
    ) -> Result<(Vec<MergedRecord>, Vec<IndexError>), IndexError> {
        let (primaries, derived): (Vec<&DynSource>, Vec<&DynSource>) = self
            .sources
            .iter()
            .partition(|source| source.stage() == SourceStage::Primary);

        let buffers: Vec<Result<SourceBuffer, IndexError>> = primaries
            .par_iter()
            .map(|source| collect_source(source, scope))
            .collect();

        let mut errors = Vec::new();
        let mut merged: IndexMap<ItemId, RawFieldMap> = IndexMap::new();
        for (source, buffer) in primaries.iter().zip(buffers) {
            let buffer = buffer?;
            errors.extend(buffer.errors);
            let policy = source.merge_policy();
            for item in buffer.items {
                let target = merged.entry(item.item_id).or_default();
                merge_fields(target, item.fields, policy);
            }
        }

        for (item_id, target) in merged.iter_mut() {
            for source in &derived {
                match source.derive(item_id, target) {
                    Ok(extra) => merge_fields(target, extra, source.merge_policy()),
                    Err(err) => {
                        warn!(
                            source_id = %source.id(),
                            item_id = %item_id,
                            error = %err,
                            "derived source failed"
                        );
                        errors.push(err);
                    }
                }
            }
        }

        let records = merged
            .into_iter()
            .map(|(item_id, fields)| MergedRecord { item_id, fields })
            .collect();
        Ok((records, errors))
    }

    fn fresh_fingerprints(&self) -> Result<Fingerprints, IndexError> {
        let per_source: Vec<Result<(SourceId, Vec<(ItemId, ChecksumHex)>), IndexError>> = self
            .sources
            .par_iter()
            .filter(|source| source.stage() == SourceStage::Primary)
            .map(|source| Ok((source.id().to_string(), source.fingerprints()?)))
            .collect();
        let mut fingerprints = Fingerprints::new();
        for entry in per_source {
            let (source_id, items) = entry?;
            for (item_id, checksum) in items {
                fingerprints
                    .entry(item_id)
                    .or_default()
                    .insert(source_id.clone(), checksum);
            }
        }
        Ok(fingerprints)
    }

    /// Collect and merge every source. Per-item read failures go to the
    /// report; structural source failures abort the collection.
    pub fn collect(&mut self) -> Result<&[MergedRecord], IndexError> {
        self.require(&[IndexState::Initialized, IndexState::Collected], "collect")?;
        let mut report = BuildReport::new(self.dataset_id.clone());
        let (records, errors) = self.collect_scope(&CollectScope::All)?;
        for err in &errors {
            report.record(None, err);
        }
        self.fingerprints = self.fresh_fingerprints()?;
        info!(
            dataset_id = %self.dataset_id,
            items = records.len(),
            errors = errors.len(),
            "collected items"
        );
        self.records = records;
        self.report = report;
        self.state = IndexState::Collected;
        Ok(&self.records)
    }

    fn build_rows(&self, records: &[MergedRecord]) -> Vec<(IndexRow, Vec<IndexError>)> {
        let schema = self.schema.as_ref();
        let graph = self.graph.as_ref();
        records
            .par_iter()
            .map(|record| build_row(schema, graph, record))
            .collect()
    }

    /// Run the graph and schema over every collected record. Rows with
    /// errors are kept; a row missing a required field fails the build.
    pub fn transform(&mut self) -> Result<(), IndexError> {
        self.require(&[IndexState::Collected], "transform")?;
        let built = self.build_rows(&self.records);
        let mut rows = Vec::with_capacity(built.len());
        for (row, errors) in built {
            for err in &errors {
                self.report.record(Some(&row.item_id), err);
            }
            rows.push(row);
        }
        self.rows = rows;
        self.report.finish(self.rows.len());
        self.state = IndexState::Transformed;
        if self.report.is_failed() {
            warn!(
                dataset_id = %self.dataset_id,
                invalid = self.report.invalid_items().len(),
                "build failed: rows miss required fields"
            );
        }
        info!(
            dataset_id = %self.dataset_id,
            rows = self.rows.len(),
            items_with_errors = self.report.items_with_errors(),
            "transformed items"
        );
        Ok(())
    }

    /// Whether the index tracks a source file checksum for `item_id`.
    pub fn has_file(&self, item_id: &str) -> bool {
        self.rows
            .iter()
            .any(|row| row.item_id == item_id && row.has_file)
    }

    /// Drop every record, row, fingerprint and report entry.
    pub fn clear(&mut self) -> Result<(), IndexError> {
        if self.state == IndexState::Uninitialized {
            return Err(IndexError::InvalidState {
                state: self.state.as_str(),
                action: "clear",
            });
        }
        self.records.clear();
        self.rows.clear();
        self.fingerprints.clear();
        self.report = BuildReport::new(self.dataset_id.clone());
        self.state = IndexState::Initialized;
        Ok(())
    }

    /// Re-collect and re-transform only `item_ids`. Rows are replaced in
    /// place, new items appended, items no source reports any more removed.
    pub fn update<I, S>(&mut self, item_ids: I) -> Result<(), IndexError>
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemId>,
    {
        self.require(&[IndexState::Transformed, IndexState::Saved], "update")?;
        let ids: BTreeSet<ItemId> = item_ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let scope = CollectScope::only(ids.iter().cloned());
        let (records, errors) = self.collect_scope(&scope)?;
        let built = self.build_rows(&records);

        self.report.forget_items(&ids);
        for err in &errors {
            self.report.record(None, err);
        }
        let mut fresh: IndexMap<ItemId, IndexRow> = IndexMap::new();
        for (row, row_errors) in built {
            for err in &row_errors {
                self.report.record(Some(&row.item_id), err);
            }
            fresh.insert(row.item_id.clone(), row);
        }

        let mut replaced = 0usize;
        let mut removed = 0usize;
        let mut rows = Vec::with_capacity(self.rows.len());
        for row in std::mem::take(&mut self.rows) {
            if !ids.contains(&row.item_id) {
                rows.push(row);
            } else if let Some(updated) = fresh.shift_remove(&row.item_id) {
                rows.push(updated);
                replaced += 1;
            } else {
                removed += 1;
            }
        }
        let added = fresh.len();
        rows.extend(fresh.into_values());
        self.rows = rows;

        let mut fresh_records: IndexMap<ItemId, MergedRecord> = records
            .into_iter()
            .map(|record| (record.item_id.clone(), record))
            .collect();
        self.records.retain_mut(|record| {
            if !ids.contains(&record.item_id) {
                return true;
            }
            match fresh_records.shift_remove(&record.item_id) {
                Some(updated) => {
                    *record = updated;
                    true
                }
                None => false,
            }
        });
        self.records.extend(fresh_records.into_values());

        let mut fingerprints = self.fresh_fingerprints()?;
        for item_id in &ids {
            match fingerprints.remove(item_id) {
                Some(current) => {
                    self.fingerprints.insert(item_id.clone(), current);
                }
                None => {
                    self.fingerprints.remove(item_id);
                }
            }
        }

        self.report.finish(self.rows.len());
        self.state = IndexState::Transformed;
        info!(
            dataset_id = %self.dataset_id,
            replaced,
            added,
            removed,
            "updated items"
        );
        Ok(())
    }

    /// Items whose source fingerprints differ from the tracked ones: new,
    /// changed and vanished items.
    pub fn changed_items(&self) -> Result<BTreeSet<ItemId>, IndexError> {
        self.require(
            &[IndexState::Transformed, IndexState::Saved],
            "detect changed items",
        )?;
        let fresh = self.fresh_fingerprints()?;
        let changed: BTreeSet<ItemId> = fresh
            .keys()
            .chain(self.fingerprints.keys())
            .filter(|item_id| fresh.get(*item_id) != self.fingerprints.get(*item_id))
            .cloned()
            .collect();
        debug!(dataset_id = %self.dataset_id, changed = changed.len(), "compared fingerprints");
        Ok(changed)
    }

    /// Update every changed item; returns the ids that were updated.
    pub fn refresh(&mut self) -> Result<BTreeSet<ItemId>, IndexError> {
        let changed = self.changed_items()?;
        self.update(changed.iter().cloned())?;
        Ok(changed)
    }

    fn manifest(&self) -> Manifest {
        Manifest {
            dataset_id: self.dataset_id.clone(),
            fields: self.schema.names().map(str::to_string).collect(),
            dataset_checksum: self.dataset_checksum(),
            items: self
                .rows
                .iter()
                .map(|row| (row.item_id.clone(), row.checksum.clone()))
                .collect(),
            files: self
                .rows
                .iter()
                .filter(|row| row.has_file)
                .map(|row| row.item_id.clone())
                .collect(),
            fingerprints: self.fingerprints.clone(),
            table_checksum: ChecksumHex::new(),
        }
    }

    fn table_bytes(&self) -> Result<Vec<u8>, IndexError> {
        let mut bytes = Vec::new();
        table::write_table(&mut bytes, &self.schema, &self.rows)?;
        Ok(bytes)
    }

    /// Write the table and its manifest atomically. Refused when any row
    /// misses a required field.
    pub fn save(&mut self, path: &Path) -> Result<(), IndexError> {
        self.require(&[IndexState::Transformed, IndexState::Saved], "save")?;
        if self.report.is_failed() {
            let invalid: Vec<&str> = self.report.invalid_items().into_iter().collect();
            return Err(IndexError::BuildFailed(format!(
                "{} items miss required fields: {}",
                invalid.len(),
                invalid.join(", ")
            )));
        }
        let table_bytes = self.table_bytes()?;
        let mut manifest = self.manifest();
        manifest.table_checksum = checksum_bytes(&table_bytes);
        // The two renames are not atomic together; `load` drops a manifest
        // whose table checksum does not match the table beside it.
        table::write_atomic(path, &table_bytes)?;
        table::write_atomic(&manifest_path(path), &manifest.to_bytes()?)?;
        self.state = IndexState::Saved;
        info!(
            dataset_id = %self.dataset_id,
            path = %path.display(),
            rows = self.rows.len(),
            "saved index"
        );
        Ok(())
    }

    /// Write the best-effort table regardless of build failures. The state
    /// does not change and no manifest is written.
    pub fn save_diagnostics(&self, path: &Path) -> Result<(), IndexError> {
        self.require(
            &[IndexState::Transformed, IndexState::Saved],
            "save diagnostics",
        )?;
        table::write_atomic(path, &self.table_bytes()?)?;
        info!(
            dataset_id = %self.dataset_id,
            path = %path.display(),
            invalid = self.report.invalid_items().len(),
            "saved diagnostic table"
        );
        Ok(())
    }

    /// Restore a saved table and its manifest. A missing manifest, or one
    /// written for a different table, leaves checksums computed from the
    /// cells and no tracked fingerprints, so `refresh` re-reads every item.
    pub fn load(&mut self, path: &Path) -> Result<(), IndexError> {
        self.require(&[IndexState::Initialized], "load")?;
        let table_bytes = fs::read(path)?;
        let loaded = table::read_table(table_bytes.as_slice(), &self.schema)?;
        let manifest_file = manifest_path(path);
        let manifest = if manifest_file.exists() {
            let manifest = Manifest::load(&manifest_file)?;
            if manifest.table_checksum.is_empty()
                || manifest.table_checksum == checksum_bytes(&table_bytes)
            {
                manifest
            } else {
                warn!(
                    path = %manifest_file.display(),
                    "index manifest does not match table, ignoring it"
                );
                Manifest::default()
            }
        } else {
            warn!(path = %manifest_file.display(), "index manifest missing");
            Manifest::default()
        };

        let mut report = BuildReport::new(self.dataset_id.clone());
        let mut rows = Vec::with_capacity(loaded.len());
        for (item_id, values) in loaded {
            let missing = self.schema.missing_required(&values);
            for field in &missing {
                report.record(
                    Some(&item_id),
                    &IndexError::MissingRequiredField(field.clone()),
                );
            }
            let mut row = IndexRow {
                item_id,
                values,
                checksum: ChecksumHex::new(),
                has_file: false,
                valid: missing.is_empty(),
            };
            row.has_file = manifest.files.contains(&row.item_id);
            row.checksum = match manifest.items.get(&row.item_id) {
                Some(checksum) => checksum.clone(),
                None => table::cells_checksum(&row.cells(&self.schema)),
            };
            rows.push(row);
        }
        report.finish(rows.len());

        self.rows = rows;
        self.records.clear();
        self.fingerprints = manifest.fingerprints;
        self.report = report;
        self.state = IndexState::Saved;
        info!(
            dataset_id = %self.dataset_id,
            path = %path.display(),
            rows = self.rows.len(),
            "loaded index"
        );
        Ok(())
    }

    fn dataset_checksum(&self) -> ChecksumHex {
        dataset_checksum(
            self.rows
                .iter()
                .map(|row| (row.item_id.as_str(), row.checksum.as_str())),
        )
    }

    /// MD5 over per-item checksums in item-id order.
    pub fn checksum(&self) -> Result<ChecksumHex, IndexError> {
        self.require(&[IndexState::Transformed, IndexState::Saved], "checksum")?;
        Ok(self.dataset_checksum())
    }

    /// Dataset identifier.
    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Schema rows are coerced through.
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Dataset transformer graph.
    pub fn graph(&self) -> &TransformerGraph {
        &self.graph
    }

    /// Registered source ids in precedence order.
    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.id()).collect()
    }

    /// Merged raw records of the last collection.
    pub fn records(&self) -> &[MergedRecord] {
        &self.records
    }

    /// Typed rows in discovery order.
    pub fn rows(&self) -> &[IndexRow] {
        &self.rows
    }

    /// Row for `item_id`.
    pub fn row(&self, item_id: &str) -> Option<&IndexRow> {
        self.rows.iter().find(|row| row.item_id == item_id)
    }

    /// Report of the last build.
    pub fn report(&self) -> &BuildReport {
        &self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DType, FieldDef};
    use crate::source::{ComputedSource, ConstantSource, InMemorySource};
    use crate::value::{RawValue, TypedValue};
    use tempfile::tempdir;

    fn item(id: &str, pairs: &[(&str, &str)]) -> SourceItem {
        SourceItem::new(
            id,
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), RawValue::from(*value)))
                .collect(),
        )
    }

    fn schema() -> FieldSchema {
        FieldSchema::new([
            FieldDef::new("title", DType::String).required(),
            FieldDef::new("region", DType::String),
            FieldDef::new("tags", DType::StringList),
        ])
        .unwrap()
    }

    fn index_with(sources: Vec<DynSource>) -> Index {
        let mut index = Index::new("test");
        index
            .initialize_with(schema(), TransformerGraph::empty())
            .unwrap();
        index.register_sources(sources).unwrap();
        index
    }

    #[test]
    fn steps_out_of_order_are_rejected() {
        let mut index = Index::new("test");
        let err = index.collect().err().unwrap();
        assert!(matches!(
            err,
            IndexError::InvalidState { state: "uninitialized", action: "collect" }
        ));

        let mut index = index_with(vec![]);
        assert!(matches!(
            index.transform(),
            Err(IndexError::InvalidState { state: "initialized", .. })
        ));
        assert!(matches!(index.checksum(), Err(IndexError::InvalidState { .. })));
        index.collect().unwrap();
        assert!(matches!(
            index.register_source(Box::new(InMemorySource::new("late", vec![]))),
            Err(IndexError::InvalidState { .. })
        ));
    }

    #[test]
    fn later_sources_override_earlier_ones() {
        let mut index = index_with(vec![
            Box::new(InMemorySource::new(
                "a",
                vec![item("1", &[("title", "from a"), ("region", "Hessen")])],
            )),
            Box::new(InMemorySource::new(
                "b",
                vec![item("2", &[("title", "only b")]), item("1", &[("title", "from b")])],
            )),
        ]);
        let records = index.collect().unwrap();
        let ids: Vec<&str> = records.iter().map(|record| record.item_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(records[0].fields["title"], RawValue::from("from b"));
        assert_eq!(records[0].fields["region"], RawValue::from("Hessen"));
    }

    #[test]
    fn additive_sources_append_values() {
        let mut index = index_with(vec![
            Box::new(InMemorySource::new("a", vec![item("1", &[("tags", "ballad")])])),
            Box::new(
                InMemorySource::new("b", vec![item("1", &[("tags", "dance")])])
                    .with_merge_policy(MergePolicy::Additive),
            ),
        ]);
        let records = index.collect().unwrap();
        assert_eq!(
            records[0].fields["tags"],
            RawValue::List(vec!["ballad".into(), "dance".into()])
        );
    }

    #[test]
    fn derived_sources_run_after_primaries() {
        let mut constants = RawFieldMap::new();
        constants.insert("region".into(), RawValue::from("Europe"));
        let mut index = index_with(vec![
            Box::new(ComputedSource::new("computed", |item_id, merged| {
                let mut fields = RawFieldMap::new();
                let title = merged.get("title").map(RawValue::to_cell).unwrap_or_default();
                fields.insert("tags".into(), RawValue::text(format!("{item_id}:{title}")));
                Ok(fields)
            })),
            Box::new(InMemorySource::new("a", vec![item("1", &[("title", "T")])])),
            Box::new(ConstantSource::new("constants", constants)),
        ]);
        index.collect().unwrap();
        index.transform().unwrap();
        let row = index.row("1").unwrap();
        assert_eq!(row.values["tags"], TypedValue::StringList(vec!["1:T".into()]));
        assert_eq!(row.values["region"], TypedValue::String("Europe".into()));
    }

    #[test]
    fn rows_missing_required_fields_fail_the_build() {
        let mut index = index_with(vec![Box::new(InMemorySource::new(
            "a",
            vec![item("1", &[("title", "ok")]), item("2", &[("region", "no title")])],
        ))]);
        index.collect().unwrap();
        index.transform().unwrap();

        assert_eq!(index.rows().len(), 2);
        assert!(index.row("1").unwrap().valid);
        assert!(!index.row("2").unwrap().valid);
        assert!(index.report().is_failed());

        let temp = tempdir().unwrap();
        let path = temp.path().join("index.csv");
        let err = index.save(&path).unwrap_err();
        assert!(matches!(err, IndexError::BuildFailed(ref msg) if msg.contains('2')));
        assert!(!path.exists());

        index.save_diagnostics(&path).unwrap();
        assert!(path.exists());
        assert_eq!(index.state(), IndexState::Transformed);
    }

    #[test]
    fn update_replaces_adds_and_removes_rows() {
        let mut index = index_with(vec![Box::new(InMemorySource::new(
            "a",
            vec![item("1", &[("title", "one")]), item("2", &[("title", "two")])],
        ))]);
        index.collect().unwrap();
        index.transform().unwrap();
        let before = index.checksum().unwrap();

        index.sources = vec![Box::new(InMemorySource::new(
            "a",
            vec![item("1", &[("title", "uno")]), item("3", &[("title", "tres")])],
        ))];
        let changed = index.changed_items().unwrap();
        assert_eq!(changed, BTreeSet::from(["1".into(), "2".into(), "3".into()]));

        index.update(["1", "2", "3"]).unwrap();
        let ids: Vec<&str> = index.rows().iter().map(|row| row.item_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(
            index.row("1").unwrap().values["title"],
            TypedValue::String("uno".into())
        );
        assert_ne!(index.checksum().unwrap(), before);
        assert!(index.changed_items().unwrap().is_empty());
    }

    #[test]
    fn clear_returns_to_initialized() {
        let mut index = index_with(vec![Box::new(InMemorySource::new(
            "a",
            vec![item("1", &[("title", "one")])],
        ))]);
        index.collect().unwrap();
        index.transform().unwrap();
        assert!(!index.has_file("1"));
        index.clear().unwrap();
        assert_eq!(index.state(), IndexState::Initialized);
        assert!(index.rows().is_empty());
        assert!(index.report().entries.is_empty());
    }

    #[test]
    fn graph_leafs_must_be_schema_fields() {
        let graph = TransformerGraph::from_yaml_str(
            "- [rename, OTL, headline]\n",
            &OperationRegistry::builtin(),
        )
        .unwrap();
        let err = Index::new("test").initialize_with(schema(), graph).unwrap_err();
        assert!(matches!(err, IndexError::Configuration(ref msg) if msg.contains("headline")));
    }

    #[test]
    fn file_checksums_become_item_checksums() {
        let mut index = index_with(vec![Box::new(InMemorySource::new(
            "a",
            vec![item("1", &[("title", "one"), ("kern.cf_checksum", "abc123")])],
        ))]);
        index.collect().unwrap();
        index.transform().unwrap();
        assert!(index.has_file("1"));
        assert_eq!(index.row("1").unwrap().checksum, "abc123");
    }

    #[test]
    fn save_and_load_restore_rows() {
        let mut index = index_with(vec![Box::new(InMemorySource::new(
            "a",
            vec![item("1", &[("title", "one"), ("tags", "a|b")])],
        ))]);
        index.collect().unwrap();
        index.transform().unwrap();
        let temp = tempdir().unwrap();
        let path = temp.path().join("index.csv");
        index.save(&path).unwrap();
        assert_eq!(index.state(), IndexState::Saved);
        assert!(temp.path().join("index.manifest.json").exists());

        let mut restored = index_with(vec![]);
        restored.load(&path).unwrap();
        assert_eq!(restored.state(), IndexState::Saved);
        assert_eq!(restored.rows(), index.rows());
        assert_eq!(restored.checksum().unwrap(), index.checksum().unwrap());
    }

    #[test]
    fn manifest_from_another_table_is_ignored_on_load() {
        let source = || -> DynSource {
            Box::new(InMemorySource::new("a", vec![item("1", &[("title", "one")])]))
        };
        let temp = tempdir().unwrap();
        let path = temp.path().join("index.csv");
        let mut saved = index_with(vec![source()]);
        saved.collect().unwrap();
        saved.transform().unwrap();
        saved.save(&path).unwrap();

        // Table replaced without its manifest, as after an interrupted save.
        let mut newer = index_with(vec![Box::new(InMemorySource::new(
            "a",
            vec![item("1", &[("title", "uno")])],
        ))]);
        newer.collect().unwrap();
        newer.transform().unwrap();
        newer.save_diagnostics(&path).unwrap();

        let mut restored = index_with(vec![source()]);
        restored.load(&path).unwrap();
        assert_eq!(
            restored.row("1").unwrap().values["title"],
            TypedValue::String("uno".into())
        );
        assert_eq!(
            restored.refresh().unwrap(),
            BTreeSet::from(["1".to_string()])
        );
        assert_eq!(
            restored.row("1").unwrap().values["title"],
            TypedValue::String("one".into())
        );
        assert_eq!(restored.checksum().unwrap(), saved.checksum().unwrap());
    }
}
