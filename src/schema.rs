use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::constants::schema::{
    COLUMN_DTYPE, COLUMN_FIELD, COLUMN_GROUP, COLUMN_REQUIRED, FALSE, LIST_DELIMITER, TRUE,
};
use crate::errors::IndexError;
use crate::types::{FieldName, GroupName, RawFieldMap, TypedRow};
use crate::value::{RawValue, TypedValue};

/// Declared type of a schema field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    /// Free text.
    String,
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// `True` / `False`.
    Boolean,
    /// `|`-delimited list of strings.
    StringList,
}

impl DType {
    /// Token used in schema files.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::String => "string",
            DType::Int => "int",
            DType::Float => "float",
            DType::Boolean => "boolean",
            DType::StringList => "string-list",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = IndexError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token.trim() {
            "string" | "str" => Ok(DType::String),
            "int" | "integer" => Ok(DType::Int),
            "float" | "number" => Ok(DType::Float),
            "boolean" | "bool" => Ok(DType::Boolean),
            "string-list" | "list" => Ok(DType::StringList),
            other => Err(IndexError::SchemaParse(format!("unknown dtype '{other}'"))),
        }
    }
}

/// One typed field of the index.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    /// Unique field name (also the index column name).
    pub name: FieldName,
    /// Declared type.
    pub dtype: DType,
    /// Whether a row without this field is invalid.
    pub required: bool,
    /// Display/category group.
    pub group: GroupName,
    /// Optional human description.
    pub description: Option<String>,
}

impl FieldDef {
    /// Create an optional field in the default group.
    pub fn new(name: impl Into<FieldName>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
            required: false,
            group: String::new(),
            description: None,
        }
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the group name.
    pub fn with_group(mut self, group: impl Into<GroupName>) -> Self {
        self.group = group.into();
        self
    }

    /// Coerce a raw value into this field's type.
    pub fn coerce(&self, value: &RawValue) -> Result<TypedValue, IndexError> {
        if self.dtype == DType::StringList {
            return Ok(TypedValue::StringList(list_items(value)));
        }
        let text = match value {
            RawValue::Empty => return Ok(TypedValue::Null),
            RawValue::Text(text) => text.as_str(),
            RawValue::List(items) if items.is_empty() => return Ok(TypedValue::Null),
            RawValue::List(items) if items.len() == 1 => items[0].as_str(),
            RawValue::List(_) if self.dtype == DType::String => {
                return Ok(TypedValue::String(value.to_cell()));
            }
            RawValue::List(_) => return Err(self.type_error(&value.to_cell())),
        };
        if text.is_empty() {
            return Ok(TypedValue::Null);
        }
        match self.dtype {
            DType::String => Ok(TypedValue::String(text.to_string())),
            DType::Boolean => match text {
                TRUE => Ok(TypedValue::Boolean(true)),
                FALSE => Ok(TypedValue::Boolean(false)),
                _ => Err(self.type_error(text)),
            },
            DType::Int => parse_int(text.trim())
                .map(TypedValue::Int)
                .ok_or_else(|| self.type_error(text)),
            DType::Float => text
                .trim()
                .parse::<f64>()
                .map(TypedValue::Float)
                .map_err(|_| self.type_error(text)),
            DType::StringList => unreachable!("string lists return before scalar parsing"),
        }
    }

    fn type_error(&self, value: &str) -> IndexError {
        IndexError::SchemaType {
            field: self.name.clone(),
            dtype: self.dtype.to_string(),
            value: value.to_string(),
        }
    }
}

/// List elements are split on the delimiter too, so a coerced list always
/// matches what its cell encoding reads back as.
fn list_items(value: &RawValue) -> Vec<String> {
    match value {
        RawValue::Empty => Vec::new(),
        RawValue::Text(text) if text.is_empty() => Vec::new(),
        RawValue::Text(text) => text.split(LIST_DELIMITER).map(str::to_string).collect(),
        RawValue::List(items) => items
            .iter()
            .flat_map(|item| item.split(LIST_DELIMITER))
            .map(str::to_string)
            .collect(),
    }
}

fn parse_int(text: &str) -> Option<i64> {
    if let Ok(value) = text.parse::<i64>() {
        return Some(value);
    }
    let value = text.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

#[derive(Deserialize)]
struct SchemaFileRow {
    field: String,
    dtype: String,
    #[serde(default)]
    required: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    order: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

fn parse_required(field: &str, token: &str) -> Result<bool, IndexError> {
    match token.trim() {
        "" | "False" | "false" | "0" | "no" => Ok(false),
        "True" | "true" | "1" | "yes" => Ok(true),
        other => Err(IndexError::SchemaParse(format!(
            "field '{field}' has invalid required flag '{other}'"
        ))),
    }
}

/// Ordered registry of typed index fields. Immutable once built.
#[derive(Clone, Debug, Default)]
pub struct FieldSchema {
    fields: IndexMap<FieldName, FieldDef>,
}

impl FieldSchema {
    /// Build a schema from field definitions, rejecting duplicate names.
    pub fn new(fields: impl IntoIterator<Item = FieldDef>) -> Result<Self, IndexError> {
        let mut map = IndexMap::new();
        for field in fields {
            if field.name.trim().is_empty() {
                return Err(IndexError::SchemaParse("empty field name".to_string()));
            }
            if map.contains_key(&field.name) {
                return Err(IndexError::SchemaParse(format!(
                    "duplicate field '{}'",
                    field.name
                )));
            }
            map.insert(field.name.clone(), field);
        }
        Ok(Self { fields: map })
    }

    /// Load a schema CSV from disk.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path).map_err(|err| {
            IndexError::SchemaParse(format!("cannot open {}: {err}", path.display()))
        })?;
        Self::from_reader(file)
    }

    /// Parse a schema CSV with columns `field,dtype,required,group`
    /// (plus optional `order` and `description`). Rows are stably sorted by
    /// `order` when present.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, IndexError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = csv_reader
            .headers()
            .map_err(|err| IndexError::SchemaParse(err.to_string()))?
            .clone();
        for column in [COLUMN_FIELD, COLUMN_DTYPE, COLUMN_REQUIRED, COLUMN_GROUP] {
            if !headers.iter().any(|header| header == column) {
                return Err(IndexError::SchemaParse(format!(
                    "schema is missing column '{column}'"
                )));
            }
        }

        let mut rows = Vec::new();
        for (line, row) in csv_reader.deserialize::<SchemaFileRow>().enumerate() {
            let row = row.map_err(|err| {
                IndexError::SchemaParse(format!("schema row {}: {err}", line + 1))
            })?;
            let dtype = row.dtype.parse::<DType>()?;
            let field = FieldDef {
                required: parse_required(&row.field, &row.required)?,
                name: row.field,
                dtype,
                group: row.group,
                description: row.description.filter(|text| !text.is_empty()),
            };
            rows.push((row.order, field));
        }
        rows.sort_by(|(left, _), (right, _)| match (left, right) {
            (Some(a), Some(b)) => a.total_cmp(b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Self::new(rows.into_iter().map(|(_, field)| field))
    }

    /// Field definitions in column order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values()
    }

    /// Field names in column order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Look up one field.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    /// True when the schema declares `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Distinct group names in first-appearance order.
    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for field in self.fields.values() {
            if !groups.contains(&field.group.as_str()) {
                groups.push(&field.group);
            }
        }
        groups
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Coerce a raw value for `field_name`.
    pub fn coerce(&self, field_name: &str, value: &RawValue) -> Result<TypedValue, IndexError> {
        self.fields
            .get(field_name)
            .ok_or_else(|| IndexError::Configuration(format!("unknown field '{field_name}'")))?
            .coerce(value)
    }

    /// Check that every required field carries a value.
    pub fn validate(&self, row: &TypedRow) -> Result<(), IndexError> {
        for field in self.fields.values().filter(|field| field.required) {
            let missing = row.get(&field.name).is_none_or(TypedValue::is_missing);
            if missing {
                return Err(IndexError::MissingRequiredField(field.name.clone()));
            }
        }
        Ok(())
    }

    /// Project a raw record onto the schema. Fields that fail coercion are
    /// set to null and their errors returned alongside the row; fields not
    /// in the schema are dropped.
    pub fn coerce_record(&self, record: &RawFieldMap) -> (TypedRow, Vec<IndexError>) {
        let mut row = TypedRow::with_capacity(self.fields.len());
        let mut errors = Vec::new();
        for field in self.fields.values() {
            let raw = record.get(&field.name).cloned().unwrap_or_default();
            let value = match field.coerce(&raw) {
                Ok(value) => value,
                Err(err) => {
                    errors.push(err);
                    TypedValue::Null
                }
            };
            row.insert(field.name.clone(), value);
        }
        (row, errors)
    }

    /// Every required field missing from `row` (the full list, unlike `validate`).
    pub fn missing_required(&self, row: &TypedRow) -> Vec<FieldName> {
        self.fields
            .values()
            .filter(|field| field.required)
            .filter(|field| row.get(&field.name).is_none_or(TypedValue::is_missing))
            .map(|field| field.name.clone())
            .collect()
    }
}
