use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksum::checksum_iter;
use crate::constants::index::{ID_COLUMN, MANIFEST_EXTENSION, TMP_EXTENSION};
use crate::errors::IndexError;
use crate::schema::FieldSchema;
use crate::types::{ChecksumHex, DatasetId, FieldName, ItemId, SourceId, TypedRow};
use crate::value::RawValue;

/// One row of the index table.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexRow {
    /// Item identifier (the `id` cell).
    pub item_id: ItemId,
    /// Schema-typed values in schema order.
    pub values: TypedRow,
    /// Item checksum: the source file checksum when one exists, else the
    /// checksum of the encoded cells.
    pub checksum: ChecksumHex,
    /// Whether the checksum comes from a source file.
    pub has_file: bool,
    /// False when a required field is missing.
    pub valid: bool,
}

impl IndexRow {
    /// Encoded cells in column order (`id` first).
    pub fn cells(&self, schema: &FieldSchema) -> Vec<String> {
        std::iter::once(self.item_id.clone())
            .chain(
                schema
                    .names()
                    .filter(|name| *name != ID_COLUMN)
                    .map(|name| self.values.get(name).map(|value| value.to_cell()).unwrap_or_default()),
            )
            .collect()
    }
}

/// Table header: `id` followed by the schema fields.
pub fn columns(schema: &FieldSchema) -> Vec<FieldName> {
    std::iter::once(ID_COLUMN.to_string())
        .chain(
            schema
                .names()
                .filter(|name| *name != ID_COLUMN)
                .map(str::to_string),
        )
        .collect()
}

/// Checksum of encoded cells; cells are unit-separated so shifting text
/// between cells changes the digest.
pub fn cells_checksum(cells: &[String]) -> ChecksumHex {
    checksum_iter(cells.iter().flat_map(|cell| [cell.as_bytes(), b"\x1f"]))
}

/// Write `rows` as CSV with a header.
pub fn write_table<W: Write>(
    writer: W,
    schema: &FieldSchema,
    rows: &[IndexRow],
) -> Result<(), IndexError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(columns(schema))?;
    for row in rows {
        writer.write_record(row.cells(schema))?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a saved table, coercing every cell through `schema`. The header must
/// equal `columns(schema)`.
pub fn read_table<R: Read>(
    reader: R,
    schema: &FieldSchema,
) -> Result<Vec<(ItemId, TypedRow)>, IndexError> {
    let mut reader = csv::Reader::from_reader(reader);
    let expected = columns(schema);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers != expected {
        return Err(IndexError::Configuration(format!(
            "index header [{}] does not match schema columns [{}]",
            headers.join(", "),
            expected.join(", ")
        )));
    }
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut cells = record.iter();
        let item_id = cells.next().unwrap_or_default().to_string();
        let mut values = TypedRow::with_capacity(schema.len());
        for field in schema.fields() {
            let cell = if field.name == ID_COLUMN {
                item_id.as_str()
            } else {
                cells.next().unwrap_or_default()
            };
            values.insert(field.name.clone(), field.coerce(&RawValue::from(cell))?);
        }
        rows.push((item_id, values));
    }
    Ok(rows)
}

/// Sidecar written next to the table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Dataset the table belongs to.
    pub dataset_id: DatasetId,
    /// Table columns after `id`, in schema order.
    pub fields: Vec<FieldName>,
    /// Checksum over all item checksums.
    pub dataset_checksum: ChecksumHex,
    /// Per-item checksums.
    pub items: BTreeMap<ItemId, ChecksumHex>,
    /// Items whose checksum is a source file checksum.
    #[serde(default)]
    pub files: BTreeSet<ItemId>,
    /// Source fingerprints per item, used to detect changes between runs.
    #[serde(default)]
    pub fingerprints: BTreeMap<ItemId, BTreeMap<SourceId, ChecksumHex>>,
    /// Checksum of the table bytes this manifest was written with.
    #[serde(default)]
    pub table_checksum: ChecksumHex,
}

impl Manifest {
    /// Read a manifest file.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Pretty JSON encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// `<dir>/<stem>.manifest.json` for a table at `<dir>/<stem>.<ext>`.
pub fn manifest_path(table_path: &Path) -> PathBuf {
    let stem = table_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    table_path.with_file_name(format!("{stem}.{MANIFEST_EXTENSION}"))
}

/// Write `bytes` to `<path>.tmp`, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    tmp_name.push(".");
    tmp_name.push(TMP_EXTENSION);
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, bytes)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DType, FieldDef};
    use crate::value::TypedValue;
    use tempfile::tempdir;

    fn schema() -> FieldSchema {
        FieldSchema::new([
            FieldDef::new("title", DType::String).required(),
            FieldDef::new("year", DType::Int),
            FieldDef::new("tags", DType::StringList),
            FieldDef::new("sacred", DType::Boolean),
        ])
        .unwrap()
    }

    fn row(id: &str, title: &str) -> IndexRow {
        let mut values = TypedRow::new();
        values.insert("title".into(), TypedValue::String(title.into()));
        values.insert("year".into(), TypedValue::Int(1856));
        values.insert("tags".into(), TypedValue::StringList(vec!["a".into(), "b".into()]));
        values.insert("sacred".into(), TypedValue::Null);
        IndexRow {
            item_id: id.into(),
            values,
            checksum: String::new(),
            has_file: false,
            valid: true,
        }
    }

    #[test]
    fn writes_consumer_encoding_and_reads_it_back() {
        let schema = schema();
        let mut buffer = Vec::new();
        write_table(&mut buffer, &schema, &[row("1", "Der Mai")]).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert_eq!(text, "id,title,year,tags,sacred\n1,Der Mai,1856,a|b,\n");

        let rows = read_table(buffer.as_slice(), &schema).unwrap();
        assert_eq!(rows[0].0, "1");
        assert_eq!(rows[0].1, row("1", "Der Mai").values);
    }

    #[test]
    fn header_mismatch_is_rejected() {
        let err = read_table("id,title\n1,x\n".as_bytes(), &schema()).unwrap_err();
        assert!(matches!(err, IndexError::Configuration(ref msg) if msg.contains("header")));
    }

    #[test]
    fn cell_boundaries_affect_checksum() {
        let left = cells_checksum(&["ab".into(), "c".into()]);
        let right = cells_checksum(&["a".into(), "bc".into()]);
        assert_ne!(left, right);
    }

    #[test]
    fn manifest_sits_next_to_table() {
        assert_eq!(
            manifest_path(Path::new("/data/erk/index.csv")),
            Path::new("/data/erk/index.manifest.json")
        );
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("out/index.csv");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!temp.path().join("out/index.csv.tmp").exists());
    }
}
