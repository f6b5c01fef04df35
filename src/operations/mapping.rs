use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{
    Operation, OperationFailure, OperationParams, json_to_raw, parse_params, same_arity,
};
use crate::errors::IndexError;
use crate::value::RawValue;

fn anchored(pattern: &str, operation: &str) -> Result<Regex, IndexError> {
    Regex::new(&format!("^(?:{pattern})")).map_err(|err| {
        IndexError::Configuration(format!("operation '{operation}' pattern '{pattern}': {err}"))
    })
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MapValuesParams {
    mapping: IndexMap<String, Value>,
    #[serde(default = "default_true")]
    regex: bool,
    #[serde(default)]
    return_missing: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug)]
enum Matcher {
    Pattern(Regex),
    Literal(String),
}

impl Matcher {
    fn matches(&self, text: &str) -> bool {
        match self {
            Matcher::Pattern(pattern) => pattern.is_match(text),
            Matcher::Literal(literal) => literal == text,
        }
    }
}

/// Lookup table applied element-wise.
///
/// Keys are tried in declaration order and the first match wins. Keys are
/// regexes anchored at the start of the value unless `regex: false`.
/// Unmatched values pass through when `return_missing` is set, otherwise they
/// become empty (and are dropped from lists).
#[derive(Clone, Debug)]
pub struct MapValues {
    entries: Vec<(Matcher, RawValue)>,
    return_missing: bool,
}

impl MapValues {
    /// Build from `{mapping, regex, return_missing}`.
    pub fn from_params(params: &OperationParams) -> Result<Self, IndexError> {
        let parsed: MapValuesParams = parse_params("map_values", params)?;
        let mut entries = Vec::with_capacity(parsed.mapping.len());
        for (key, target) in &parsed.mapping {
            let matcher = if parsed.regex {
                Matcher::Pattern(anchored(key, "map_values")?)
            } else {
                Matcher::Literal(key.clone())
            };
            entries.push((matcher, json_to_raw(target)));
        }
        Ok(Self {
            entries,
            return_missing: parsed.return_missing,
        })
    }

    fn lookup(&self, text: &str) -> RawValue {
        self.entries
            .iter()
            .find(|(matcher, _)| matcher.matches(text))
            .map(|(_, target)| target.clone())
            .unwrap_or_else(|| {
                if self.return_missing {
                    RawValue::text(text)
                } else {
                    RawValue::Empty
                }
            })
    }
}

impl Operation for MapValues {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        same_arity(inputs, outputs)
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        _outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        Ok(inputs
            .iter()
            .map(|value| match value {
                RawValue::Empty => RawValue::Empty,
                RawValue::Text(text) => self.lookup(text),
                RawValue::List(items) => RawValue::List(
                    items
                        .iter()
                        .flat_map(|item| self.lookup(item).to_items())
                        .collect(),
                ),
            })
            .collect())
    }
}

/// One half-open interval `[min, max)` of a bin table.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NumericBin {
    /// Inclusive lower edge.
    pub min: f64,
    /// Exclusive upper edge.
    pub max: f64,
    /// Label written for values inside the bin.
    pub value: Value,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BinParams {
    bins: Vec<NumericBin>,
    #[serde(default)]
    default: Value,
}

/// Maps numbers to labels through a table of half-open bins.
///
/// A value equal to an edge belongs to the bin that edge opens. Empty,
/// non-numeric, and out-of-range inputs map to `default`.
#[derive(Clone, Debug)]
pub struct MapNumericBins {
    bins: Vec<(f64, f64, RawValue)>,
    default: RawValue,
}

impl MapNumericBins {
    /// Build from `{bins: [{min, max, value}], default}`; bins are sorted by
    /// `min` and must not overlap.
    pub fn from_params(params: &OperationParams) -> Result<Self, IndexError> {
        let parsed: BinParams = parse_params("map_numeric_bins", params)?;
        let mut bins: Vec<(f64, f64, RawValue)> = parsed
            .bins
            .iter()
            .map(|bin| (bin.min, bin.max, json_to_raw(&bin.value)))
            .collect();
        bins.sort_by(|left, right| left.0.total_cmp(&right.0));
        for (min, max, _) in &bins {
            if min >= max || min.is_nan() || max.is_nan() {
                return Err(IndexError::Configuration(format!(
                    "operation 'map_numeric_bins' has an empty bin [{min}, {max})"
                )));
            }
        }
        for pair in bins.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(IndexError::Configuration(format!(
                    "operation 'map_numeric_bins' has overlapping bins [{}, {}) and [{}, {})",
                    pair[0].0, pair[0].1, pair[1].0, pair[1].1
                )));
            }
        }
        Ok(Self {
            bins,
            default: json_to_raw(&parsed.default),
        })
    }

    fn label(&self, text: &str) -> RawValue {
        let Ok(number) = text.trim().parse::<f64>() else {
            return self.default.clone();
        };
        self.bins
            .iter()
            .find(|(min, max, _)| *min <= number && number < *max)
            .map(|(_, _, label)| label.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}

impl Operation for MapNumericBins {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        same_arity(inputs, outputs)
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        _outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        Ok(inputs
            .iter()
            .map(|value| match value {
                RawValue::Empty => self.default.clone(),
                RawValue::Text(text) => self.label(text),
                RawValue::List(items) => RawValue::List(
                    items
                        .iter()
                        .flat_map(|item| self.label(item).to_items())
                        .collect(),
                ),
            })
            .collect())
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtractParams {
    pattern: String,
    #[serde(default)]
    groups: Option<Vec<usize>>,
}

/// Regex capture groups of one input, matched at the start of the value.
///
/// Group 0 is the whole match. Without `groups` every group (0 included) is
/// returned. No match, or a group that did not participate, yields empty.
#[derive(Clone, Debug)]
pub struct ExtractGroups {
    pattern: Regex,
    groups: Vec<usize>,
}

impl ExtractGroups {
    /// Build from `{pattern, groups}`.
    pub fn from_params(params: &OperationParams) -> Result<Self, IndexError> {
        let parsed: ExtractParams = parse_params("extract_groups", params)?;
        let pattern = anchored(&parsed.pattern, "extract_groups")?;
        // the anchoring wrapper is non-capturing, so group numbers are unchanged
        let available = pattern.captures_len();
        let groups = match parsed.groups {
            Some(groups) => groups,
            None => (0..available).collect(),
        };
        if let Some(group) = groups.iter().find(|group| **group >= available) {
            return Err(IndexError::Configuration(format!(
                "operation 'extract_groups' pattern '{}' has no group {group}",
                parsed.pattern
            )));
        }
        Ok(Self { pattern, groups })
    }
}

impl Operation for ExtractGroups {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        if inputs != 1 {
            return Err(format!("expects a single input, got {inputs}"));
        }
        if outputs != self.groups.len() {
            return Err(format!(
                "extracts {} groups but declares {outputs} outputs",
                self.groups.len()
            ));
        }
        Ok(())
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        let text = inputs[0].to_cell();
        let Some(captures) = self.pattern.captures(&text) else {
            return Ok(vec![RawValue::Empty; outputs]);
        };
        Ok(self
            .groups
            .iter()
            .map(|group| {
                captures
                    .get(*group)
                    .map(|found| RawValue::text(found.as_str()))
                    .unwrap_or_default()
            })
            .collect())
    }
}
