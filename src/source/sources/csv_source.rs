use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use crate::checksum::checksum_iter;
use crate::constants::config::DEFAULT_ID_COLUMN;
use crate::constants::fields;
use crate::errors::IndexError;
use crate::source::{
    CollectScope, ItemStream, MergePolicy, SourceAdapter, SourceItem, apply_prefix,
};
use crate::transformer::TransformerGraph;
use crate::types::{ChecksumHex, ItemId, RawFieldMap, SourceId};
use crate::value::RawValue;

/// Configuration for a CSV sidecar source.
#[derive(Clone, Debug)]
pub struct CsvSourceConfig {
    /// Stable source identifier used in logs and reports.
    pub source_id: SourceId,
    /// CSV file location.
    pub path: PathBuf,
    /// Column holding item ids.
    pub id_column: String,
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Graph producing the field `id` from each row; replaces `id_column`.
    pub id_transformer: Option<Arc<TransformerGraph>>,
    /// Merge behaviour for this source's fields.
    pub merge_policy: MergePolicy,
    /// Optional field namespace (`{prefix}.{field}`).
    pub prefix: Option<String>,
}

impl CsvSourceConfig {
    /// Comma separated file keyed by the `id` column.
    pub fn new(source_id: impl Into<SourceId>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            delimiter: b',',
            id_transformer: None,
            merge_policy: MergePolicy::Override,
            prefix: None,
        }
    }

    /// Override the id column.
    pub fn with_id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self
    }

    /// Override the delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Derive ids through a transformer graph that outputs `id`.
    pub fn with_id_transformer(mut self, graph: TransformerGraph) -> Self {
        self.id_transformer = Some(Arc::new(graph));
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
}

/// Source that reports one item per CSV row.
#[derive(Debug)]
pub struct CsvSource {
    config: CsvSourceConfig,
}

type RowResult = Result<SourceItem, IndexError>;

impl CsvSource {
    /// Create a CSV source; the file is read on each collection pass.
    pub fn new(config: CsvSourceConfig) -> Self {
        Self { config }
    }

    /// Source configuration.
    pub fn config(&self) -> &CsvSourceConfig {
        &self.config
    }

    fn row_error(&self, item_id: Option<ItemId>, reason: String) -> IndexError {
        IndexError::SourceRead {
            source_id: self.config.source_id.clone(),
            item_id,
            reason,
        }
    }

    fn row_fields(headers: &StringRecord, record: &StringRecord) -> RawFieldMap {
        headers
            .iter()
            .zip(record.iter())
            .map(|(name, cell)| (name.to_string(), RawValue::from(cell.to_string())))
            .collect()
    }

    fn item_id(&self, fields: &RawFieldMap) -> Result<ItemId, String> {
        let id = match &self.config.id_transformer {
            Some(graph) => graph
                .transform(fields)
                .map_err(|err| format!("id transformation failed: {err}"))?
                .get(fields::ID)
                .map(RawValue::to_cell)
                .unwrap_or_default(),
            None => fields
                .get(&self.config.id_column)
                .map(RawValue::to_cell)
                .unwrap_or_default(),
        };
        if id.is_empty() {
            return Err("row has an empty id".to_string());
        }
        Ok(id)
    }

    /// Parse every row, checking the header and id uniqueness.
    fn read_rows(&self) -> Result<Vec<RowResult>, IndexError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.config.delimiter)
            .from_path(&self.config.path)
            .map_err(|err| self.row_error(None, format!("{}: {err}", self.config.path.display())))?;
        let headers = reader.headers()?.clone();
        if self.config.id_transformer.is_none()
            && !headers.iter().any(|name| name == self.config.id_column)
        {
            return Err(IndexError::MissingIdColumn {
                source_id: self.config.source_id.clone(),
                column: self.config.id_column.clone(),
            });
        }

        let mut rows = Vec::new();
        let mut lines: HashMap<ItemId, u64> = HashMap::new();
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    rows.push(Err(self.row_error(None, err.to_string())));
                    continue;
                }
            };
            let line = record.position().map(|position| position.line()).unwrap_or_default();
            let fields = Self::row_fields(&headers, &record);
            let item_id = match self.item_id(&fields) {
                Ok(item_id) => item_id,
                Err(reason) => {
                    rows.push(Err(self.row_error(None, format!("line {line}: {reason}"))));
                    continue;
                }
            };
            if let Some(previous) = lines.insert(item_id.clone(), line) {
                return Err(IndexError::DuplicateItemId {
                    source_id: self.config.source_id.clone(),
                    item_id,
                    details: format!("rows on lines {previous} and {line}"),
                });
            }
            rows.push(Ok(SourceItem::new(item_id, fields)));
        }
        debug!(
            source_id = %self.config.source_id,
            rows = rows.len(),
            "read csv source"
        );
        Ok(rows)
    }
}

impl SourceAdapter for CsvSource {
    fn id(&self) -> &str {
        &self.config.source_id
    }

    fn merge_policy(&self) -> MergePolicy {
        self.config.merge_policy
    }

    fn collect(&self, scope: &CollectScope) -> Result<ItemStream<'_>, IndexError> {
        let scope = scope.clone();
        let prefix = self.config.prefix.clone();
        let rows = self.read_rows()?;
        Ok(Box::new(
            rows.into_iter()
                .filter(move |row| match row {
                    Ok(item) => scope.includes(&item.item_id),
                    Err(_) => matches!(scope, CollectScope::All),
                })
                .map(move |row| {
                    row.map(|item| {
                        SourceItem::new(item.item_id, apply_prefix(prefix.as_deref(), item.fields))
                    })
                }),
        ))
    }

    fn fingerprints(&self) -> Result<Vec<(ItemId, ChecksumHex)>, IndexError> {
        Ok(self
            .read_rows()?
            .into_iter()
            .filter_map(Result::ok)
            .map(|item| {
                let cells = item
                    .fields
                    .iter()
                    .flat_map(|(name, value)| [name.clone(), value.to_cell()]);
                (item.item_id, checksum_iter(cells.map(|cell| cell + "\u{1f}")))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::OperationRegistry;
    use std::fs;
    use tempfile::tempdir;

    fn collect_all(source: &CsvSource) -> Vec<RowResult> {
        source.collect(&CollectScope::All).unwrap().collect()
    }

    #[test]
    fn rows_become_items_with_every_column() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("meta.csv");
        fs::write(&path, "id,title,region\n1,Der Mai,\n2,Jan Hinnerk,Hamburg\n").unwrap();

        let source = CsvSource::new(CsvSourceConfig::new("meta", &path));
        let items: Vec<SourceItem> = collect_all(&source).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_id, "1");
        assert_eq!(items[0].fields["id"], RawValue::from("1"));
        assert_eq!(items[0].fields["title"], RawValue::from("Der Mai"));
        assert_eq!(items[0].fields["region"], RawValue::Empty);
        assert_eq!(items[1].fields["region"], RawValue::from("Hamburg"));
    }

    #[test]
    fn missing_id_column_is_structural() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("meta.csv");
        fs::write(&path, "song,title\n1,x\n").unwrap();
        let err = CsvSource::new(CsvSourceConfig::new("meta", &path))
            .collect(&CollectScope::All)
            .err()
            .unwrap();
        assert!(matches!(err, IndexError::MissingIdColumn { ref column, .. } if column == "id"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("meta.csv");
        fs::write(&path, "id,title\n1,a\n1,b\n").unwrap();
        let err = CsvSource::new(CsvSourceConfig::new("meta", &path))
            .collect(&CollectScope::All)
            .err()
            .unwrap();
        assert!(matches!(err, IndexError::DuplicateItemId { ref item_id, .. } if item_id == "1"));
    }

    #[test]
    fn malformed_rows_do_not_end_the_stream() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("meta.csv");
        fs::write(&path, "id,title\n1,a\n2,b,extra\n3,c\n").unwrap();
        let rows = collect_all(&CsvSource::new(CsvSourceConfig::new("meta", &path)));
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        assert!(matches!(rows[1], Err(IndexError::SourceRead { .. })));
        assert_eq!(rows[2].as_ref().unwrap().item_id, "3");
    }

    #[test]
    fn id_transformer_and_delimiter() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("meta.tsv");
        fs::write(&path, "collection\tnumber\ttitle\nerk\t7\tSong\n").unwrap();

        let graph = TransformerGraph::from_yaml_str(
            "- [format, [collection, number], id, {pattern: '{}-{:0>4}'}]\n",
            &OperationRegistry::builtin(),
        )
        .unwrap();
        let source = CsvSource::new(
            CsvSourceConfig::new("meta", &path)
                .with_delimiter(b'\t')
                .with_id_transformer(graph)
                .with_prefix("sidecar"),
        );
        let items: Vec<SourceItem> = collect_all(&source).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items[0].item_id, "erk-0007");
        assert_eq!(items[0].fields["sidecar.title"], RawValue::from("Song"));
    }

    #[test]
    fn scope_filters_rows() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("meta.csv");
        fs::write(&path, "id,title\n1,a\n2,b\n").unwrap();
        let source = CsvSource::new(CsvSourceConfig::new("meta", &path));
        let ids: Vec<String> = source
            .collect(&CollectScope::only(["2"]))
            .unwrap()
            .map(|row| row.unwrap().item_id)
            .collect();
        assert_eq!(ids, vec!["2"]);
        assert_eq!(source.fingerprints().unwrap().len(), 2);
    }
}
