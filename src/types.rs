/// Identifier of one song/item, unique within a dataset.
/// Examples: `deut0567`, `han0012`, `kern/elsass/E0001`
pub type ItemId = String;
/// Identifier for the source that produced raw fields.
/// Examples: `scores`, `metadata_csv`, `dataset_constants`
pub type SourceId = String;
/// Identifier of a dataset (one index per dataset).
/// Examples: `essen-folksong-collection`, `creighton`
pub type DatasetId = String;
/// Name of a schema or transformer field.
/// Examples: `title`, `tonic`, `cf_path`, `title_0_lowercase`
pub type FieldName = String;
/// Registered operation name.
/// Examples: `split`, `map_numeric_bins`, `extract_groups`
pub type OperationName = String;
/// Lowercase hexadecimal MD5 digest.
/// Example: `d41d8cd98f00b204e9800998ecf8427e`
pub type ChecksumHex = String;
/// Name of a schema field group.
/// Examples: `identity`, `music`, `geography`
pub type GroupName = String;
/// Root-relative path string with `/` separators.
/// Example: `kern/altdeu1/deut0567.krn`
pub type PathString = String;
/// Raw fields reported for one item by one source, in insertion order.
pub type RawFieldMap = indexmap::IndexMap<FieldName, crate::value::RawValue>;
/// Schema-typed values of one index row, keyed by field name.
pub type TypedRow = indexmap::IndexMap<FieldName, crate::value::TypedValue>;
