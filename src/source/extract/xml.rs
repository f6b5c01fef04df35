use quick_xml::Reader;
use quick_xml::events::Event;

use super::push_field;
use crate::constants::formats::XML_METADATA_PARENTS;
use crate::types::RawFieldMap;

struct OpenElement {
    name: String,
    text: String,
    in_container: bool,
}

/// Collect non-empty element text found under `work` and `identification`.
///
/// Fields are keyed by local tag name (namespace prefixes dropped); a tag
/// that carries text more than once becomes a list in document order.
pub fn work_metadata(text: &str) -> Result<RawFieldMap, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut fields = RawFieldMap::new();
    let mut stack: Vec<OpenElement> = Vec::new();

    loop {
        let position = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                let in_container = stack.last().is_some_and(|parent| parent.in_container)
                    || XML_METADATA_PARENTS.contains(&name.as_str());
                stack.push(OpenElement {
                    name,
                    text: String::new(),
                    in_container,
                });
            }
            Ok(Event::Text(content)) => {
                if let Some(open) = stack.last_mut() {
                    let unescaped = content
                        .unescape()
                        .map_err(|err| format!("invalid text at byte {position}: {err}"))?;
                    open.text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(content)) => {
                if let Some(open) = stack.last_mut() {
                    open.text
                        .push_str(&String::from_utf8_lossy(&content.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if let Some(open) = stack.pop() {
                    let value = open.text.trim();
                    if open.in_container && !value.is_empty() {
                        push_field(&mut fields, &open.name, value.to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(format!("malformed XML at byte {position}: {err}")),
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RawValue;

    const SCORE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <work>
    <work-number>12</work-number>
    <work-title>Der Mai ist gekommen</work-title>
  </work>
  <movement-title>Ignored</movement-title>
  <identification>
    <creator type="composer">Anonymous</creator>
    <creator type="lyricist">E. Geibel</creator>
    <rights>Public &amp; free</rights>
    <encoding>
      <software>Finale</software>
      <encoding-date>2011-04-02</encoding-date>
    </encoding>
  </identification>
  <part-list/>
</score-partwise>
"#;

    #[test]
    fn collects_work_and_identification_text() {
        let fields = work_metadata(SCORE).unwrap();
        assert_eq!(fields["work-title"], RawValue::from("Der Mai ist gekommen"));
        assert_eq!(fields["work-number"], RawValue::from("12"));
        assert_eq!(fields["rights"], RawValue::from("Public & free"));
        assert_eq!(fields["software"], RawValue::from("Finale"));
        assert_eq!(fields["encoding-date"], RawValue::from("2011-04-02"));
        assert!(!fields.contains_key("movement-title"));
        assert!(!fields.contains_key("work"));
    }

    #[test]
    fn repeated_tags_become_lists() {
        let fields = work_metadata(SCORE).unwrap();
        assert_eq!(
            fields["creator"],
            RawValue::List(vec!["Anonymous".into(), "E. Geibel".into()])
        );
    }

    #[test]
    fn malformed_documents_are_reported() {
        let err = work_metadata("<work><work-title>x</work></work-title>").unwrap_err();
        assert!(err.contains("malformed XML"));
    }
}
