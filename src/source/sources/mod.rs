/// Derived source computing fields from the item id and merged fields.
pub mod computed_source;
/// Derived source adding the same fields to every item.
pub mod constant_source;
/// CSV sidecar source.
pub mod csv_source;
/// Filesystem-backed source.
pub mod file_source;
