use std::fmt;

use crate::constants::schema::{FALSE, LIST_DELIMITER, TRUE};

/// Untyped value as reported by a source or produced by an operation.
///
/// `Empty` stands for "no value" (an empty CSV cell, a missing reference
/// record, an operation result with nothing to report).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RawValue {
    /// No value.
    #[default]
    Empty,
    /// A single text value.
    Text(String),
    /// An ordered list of text values.
    List(Vec<String>),
}

impl RawValue {
    /// Build a text value, mapping `""` to `Empty`.
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            RawValue::Empty
        } else {
            RawValue::Text(value)
        }
    }

    /// True for `Empty`, `Text("")`, and empty lists.
    pub fn is_empty(&self) -> bool {
        match self {
            RawValue::Empty => true,
            RawValue::Text(text) => text.is_empty(),
            RawValue::List(items) => items.is_empty(),
        }
    }

    /// Borrow the text of a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Flatten into list elements (`Empty` yields none, `Text` yields one).
    pub fn to_items(&self) -> Vec<String> {
        match self {
            RawValue::Empty => Vec::new(),
            RawValue::Text(text) => vec![text.clone()],
            RawValue::List(items) => items.clone(),
        }
    }

    /// Cell text; lists are joined with the list delimiter.
    pub fn to_cell(&self) -> String {
        match self {
            RawValue::Empty => String::new(),
            RawValue::Text(text) => text.clone(),
            RawValue::List(items) => items.join(LIST_DELIMITER),
        }
    }

    /// Apply `f` to every text element, keeping the shape of the value.
    pub fn map_text(&self, f: impl Fn(&str) -> String) -> RawValue {
        match self {
            RawValue::Empty => RawValue::Empty,
            RawValue::Text(text) => RawValue::Text(f(text)),
            RawValue::List(items) => RawValue::List(items.iter().map(|item| f(item)).collect()),
        }
    }

    /// Append `other` to this value, promoting to a list when both carry data.
    pub fn append(self, other: RawValue) -> RawValue {
        match (self, other) {
            (left, right) if right.is_empty() => left,
            (left, right) if left.is_empty() => right,
            (left, right) => {
                let mut items = left.to_items();
                items.extend(right.to_items());
                RawValue::List(items)
            }
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::text(value)
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::text(value)
    }
}

impl From<Vec<String>> for RawValue {
    fn from(value: Vec<String>) -> Self {
        RawValue::List(value)
    }
}

impl From<Option<String>> for RawValue {
    fn from(value: Option<String>) -> Self {
        value.map(RawValue::text).unwrap_or_default()
    }
}

/// Schema-typed cell value.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedValue {
    /// Missing value.
    Null,
    /// `string` field value.
    String(String),
    /// `int` field value.
    Int(i64),
    /// `float` field value.
    Float(f64),
    /// `boolean` field value.
    Boolean(bool),
    /// `string-list` field value.
    StringList(Vec<String>),
}

impl TypedValue {
    /// True for `Null` and empty string lists.
    pub fn is_missing(&self) -> bool {
        match self {
            TypedValue::Null => true,
            TypedValue::StringList(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Consumer-facing cell encoding: null is empty, booleans are
    /// `True`/`False`, lists are delimiter-joined.
    pub fn to_cell(&self) -> String {
        self.to_string()
    }

    /// Convert back to a raw value (used when re-encoding persisted rows).
    pub fn to_raw(&self) -> RawValue {
        match self {
            TypedValue::Null => RawValue::Empty,
            TypedValue::StringList(items) => RawValue::List(items.clone()),
            other => RawValue::text(other.to_cell()),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => Ok(()),
            TypedValue::String(value) => f.write_str(value),
            TypedValue::Int(value) => write!(f, "{value}"),
            TypedValue::Float(value) if value.is_finite() && value.fract() == 0.0 => {
                write!(f, "{value:.1}")
            }
            TypedValue::Float(value) => write!(f, "{value}"),
            TypedValue::Boolean(true) => f.write_str(TRUE),
            TypedValue::Boolean(false) => f.write_str(FALSE),
            TypedValue::StringList(items) => f.write_str(&items.join(LIST_DELIMITER)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_collapses_to_empty() {
        assert_eq!(RawValue::from(""), RawValue::Empty);
        assert!(RawValue::List(Vec::new()).is_empty());
        assert!(!RawValue::from("a").is_empty());
    }

    #[test]
    fn append_promotes_to_list_and_skips_empties() {
        let merged = RawValue::from("a").append(RawValue::List(vec!["b".into(), "c".into()]));
        assert_eq!(
            merged,
            RawValue::List(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(RawValue::Empty.append("x".into()), RawValue::from("x"));
        assert_eq!(RawValue::from("x").append(RawValue::Empty), RawValue::from("x"));
    }

    #[test]
    fn typed_cells_use_consumer_encoding() {
        assert_eq!(TypedValue::Null.to_cell(), "");
        assert_eq!(TypedValue::Boolean(true).to_cell(), "True");
        assert_eq!(TypedValue::Boolean(false).to_cell(), "False");
        assert_eq!(TypedValue::Float(2.0).to_cell(), "2.0");
        assert_eq!(TypedValue::Float(2.5).to_cell(), "2.5");
        assert_eq!(
            TypedValue::StringList(vec!["a".into(), "b".into()]).to_cell(),
            "a|b"
        );
        assert!(TypedValue::StringList(Vec::new()).is_missing());
    }
}
