/// Constants used by schema files and consumer-facing cell encoding.
pub mod schema {
    /// Delimiter joining string-list values inside one cell.
    pub const LIST_DELIMITER: &str = "|";
    /// Cell text for boolean true.
    pub const TRUE: &str = "True";
    /// Cell text for boolean false.
    pub const FALSE: &str = "False";
    /// Schema CSV column holding the field name.
    pub const COLUMN_FIELD: &str = "field";
    /// Schema CSV column holding the dtype token.
    pub const COLUMN_DTYPE: &str = "dtype";
    /// Schema CSV column holding the required flag.
    pub const COLUMN_REQUIRED: &str = "required";
    /// Schema CSV column holding the group name.
    pub const COLUMN_GROUP: &str = "group";
    /// Optional schema CSV column used to order fields.
    pub const COLUMN_ORDER: &str = "order";
    /// Optional schema CSV column with a human description.
    pub const COLUMN_DESCRIPTION: &str = "description";
}

/// Implicit fields reported by file sources.
pub mod fields {
    /// Prefix reserved for fields generated by the indexer itself.
    pub const INTERNAL_PREFIX: &str = "cf_";
    /// Root-relative path of the item's file.
    pub const PATH: &str = "cf_path";
    /// File name including extension.
    pub const NAME: &str = "cf_name";
    /// Normalized file format (`kern`, `xml`, ...).
    pub const FORMAT: &str = "cf_format";
    /// Hex MD5 digest of the file bytes.
    pub const CHECKSUM: &str = "cf_checksum";
    /// Field produced by id transformer graphs.
    pub const ID: &str = "id";
}

/// Constants used by index persistence.
pub mod index {
    /// Leading column of every persisted index table.
    pub const ID_COLUMN: &str = "id";
    /// Default file name of a persisted index table.
    pub const DEFAULT_FILENAME: &str = "index.csv";
    /// Extension (after the table stem) of the manifest sidecar.
    pub const MANIFEST_EXTENSION: &str = "manifest.json";
    /// Extension appended to in-flight writes before the atomic rename.
    pub const TMP_EXTENSION: &str = "tmp";
}

/// Constants used by file-format metadata extraction.
pub mod formats {
    /// Normalized format name for Humdrum kern files.
    pub const KERN: &str = "kern";
    /// Normalized format name for MusicXML files.
    pub const XML: &str = "xml";
    /// Buffer size used when streaming file bytes into a digest.
    pub const CHECKSUM_CHUNK_BYTES: usize = 4096;
    /// Kern reference-record key that collides with the index id column.
    pub const KERN_RESERVED_ID_KEY: &str = "id";
    /// Replacement key for `KERN_RESERVED_ID_KEY`.
    pub const KERN_RENAMED_ID_KEY: &str = "_id";
    /// Parent elements whose child text becomes XML metadata.
    pub const XML_METADATA_PARENTS: [&str; 2] = ["work", "identification"];
}

/// Constants used by dataset configuration loading.
pub mod config {
    /// Default dataset configuration file name.
    pub const DATASET_FILENAME: &str = "dataset.yml";
    /// Default schema file name, relative to the dataset root.
    pub const SCHEMA_FILENAME: &str = "schema.csv";
    /// Default file-source glob pattern.
    pub const DEFAULT_FILE_PATTERN: &str = "**/*.krn";
    /// Default CSV sidecar id column.
    pub const DEFAULT_ID_COLUMN: &str = "id";
}
