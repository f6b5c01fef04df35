use super::push_field;
use crate::constants::formats::{KERN_RENAMED_ID_KEY, KERN_RESERVED_ID_KEY};
use crate::types::RawFieldMap;

const REFERENCE_PREFIX: &str = "!!!";

/// Split a `!!!KEY: value` line into key and value.
fn reference_record(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.strip_prefix(REFERENCE_PREFIX)?.split_once(':')?;
    let value = value.trim_start_matches([' ', '\t']).trim_end();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Collect `!!!KEY: value` reference records.
///
/// Repeated keys become lists in file order. The key `id` is stored as `_id`
/// so it cannot shadow the index id column.
pub fn reference_records(text: &str) -> RawFieldMap {
    let mut fields = RawFieldMap::new();
    for (key, value) in text.lines().filter_map(reference_record) {
        let key = if key == KERN_RESERVED_ID_KEY {
            KERN_RENAMED_ID_KEY
        } else {
            key
        };
        push_field(&mut fields, key, value.to_string());
    }
    fields
}
