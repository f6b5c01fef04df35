use std::sync::Arc;

use crate::constants::formats::{KERN, XML};
use crate::types::RawFieldMap;
use crate::value::RawValue;

/// Humdrum kern reference records.
pub mod kern;
/// MusicXML work and identification metadata.
pub mod xml;

/// Extracts raw metadata fields from the text of one file.
pub type MetadataExtractor =
    Arc<dyn Fn(&str) -> Result<RawFieldMap, String> + Send + Sync + 'static>;

/// Normalized format name for a file extension: `krn` is `kern`, `xml` and
/// `musicxml` are `xml`, anything else is the lowercased extension.
pub fn format_for_extension(extension: &str) -> String {
    let extension = extension.to_ascii_lowercase();
    match extension.as_str() {
        "krn" => KERN.to_string(),
        "xml" | "musicxml" => XML.to_string(),
        _ => extension,
    }
}

/// Built-in extractors keyed by normalized format.
pub fn default_extractors() -> Vec<(String, MetadataExtractor)> {
    vec![
        (
            KERN.to_string(),
            Arc::new(|text: &str| Ok(kern::reference_records(text))) as MetadataExtractor,
        ),
        (XML.to_string(), Arc::new(xml::work_metadata) as MetadataExtractor),
    ]
}

/// Insert `value` under `key`, turning repeated keys into lists.
pub(crate) fn push_field(fields: &mut RawFieldMap, key: &str, value: String) {
    match fields.get_mut(key) {
        Some(existing) => {
            let previous = std::mem::take(existing);
            *existing = previous.append(RawValue::List(vec![value]));
        }
        None => {
            fields.insert(key.to_string(), RawValue::Text(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_map_to_formats() {
        assert_eq!(format_for_extension("krn"), "kern");
        assert_eq!(format_for_extension("XML"), "xml");
        assert_eq!(format_for_extension("musicxml"), "xml");
        assert_eq!(format_for_extension("MID"), "mid");
    }

    #[test]
    fn repeated_keys_become_lists() {
        let mut fields = RawFieldMap::new();
        push_field(&mut fields, "OTL", "a".into());
        assert_eq!(fields["OTL"], RawValue::from("a"));
        push_field(&mut fields, "OTL", "b".into());
        push_field(&mut fields, "OTL", "c".into());
        assert_eq!(
            fields["OTL"],
            RawValue::List(vec!["a".into(), "b".into(), "c".into()])
        );
    }
}
