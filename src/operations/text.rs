use regex::Regex;
use serde::Deserialize;

use super::{
    Operation, OperationFailure, OperationParams, parse_params, per_input_or_single, same_arity,
};
use crate::errors::IndexError;
use crate::value::RawValue;

/// Case conversion applied element-wise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaseConversion {
    /// `lowercase`
    Lower,
    /// `uppercase`
    Upper,
    /// `titlecase`: first letter of every alphabetic run upper, rest lower.
    Title,
}

impl Operation for CaseConversion {
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
            .map(|value| match self {
                CaseConversion::Lower => value.map_text(str::to_lowercase),
                CaseConversion::Upper => value.map_text(str::to_uppercase),
                CaseConversion::Title => value.map_text(title_case),
            })
            .collect())
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_alpha = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if previous_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(ch);
            previous_alpha = false;
        }
    }
    out
}

/// Decodes HTML character references (`&ouml;`, `&#246;`) element-wise.
#[derive(Clone, Copy, Debug)]
pub struct UnescapeHtml;

impl Operation for UnescapeHtml {
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
            .map(|value| value.map_text(|text| html_escape::decode_html_entities(text).into_owned()))
            .collect())
    }
}

/// Passes values through as text (`to_string`).
#[derive(Clone, Copy, Debug)]
pub struct ToText;

impl Operation for ToText {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        same_arity(inputs, outputs)
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        _outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        Ok(inputs.to_vec())
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplaceParams {
    old: String,
    #[serde(default)]
    new: String,
    #[serde(default)]
    regex: bool,
}

/// Substring (or pattern) replacement applied element-wise.
#[derive(Clone, Debug)]
pub struct Replace {
    old: String,
    new: String,
    pattern: Option<Regex>,
}

impl Replace {
    /// Build from `{old, new, regex}`.
    pub fn from_params(params: &OperationParams) -> Result<Self, IndexError> {
        let parsed: ReplaceParams = parse_params("replace", params)?;
        if parsed.old.is_empty() {
            return Err(IndexError::Configuration(
                "operation 'replace' needs a non-empty 'old'".to_string(),
            ));
        }
        let pattern = if parsed.regex {
            Some(Regex::new(&parsed.old).map_err(|err| {
                IndexError::Configuration(format!("operation 'replace' pattern: {err}"))
            })?)
        } else {
            None
        };
        Ok(Self {
            old: parsed.old,
            new: parsed.new,
            pattern,
        })
    }
}

impl Operation for Replace {
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
            .map(|value| {
                value.map_text(|text| match &self.pattern {
                    Some(pattern) => pattern.replace_all(text, self.new.as_str()).into_owned(),
                    None => text.replace(&self.old, &self.new),
                })
            })
            .collect())
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct JoinParams {
    #[serde(default)]
    sep: String,
}

/// Delimiter join.
///
/// With one output per input every list input is joined on its own; with a
/// single output all non-empty inputs (list elements flattened) are joined
/// together.
#[derive(Clone, Debug)]
pub struct Join {
    sep: String,
}

impl Join {
    /// Build from `{sep}` (default `""`).
    pub fn from_params(params: &OperationParams) -> Result<Self, IndexError> {
        let parsed: JoinParams = parse_params("join", params)?;
        Ok(Self { sep: parsed.sep })
    }

    fn join_items(&self, items: Vec<String>) -> RawValue {
        RawValue::text(
            items
                .into_iter()
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
                .join(&self.sep),
        )
    }
}

impl Operation for Join {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        per_input_or_single(inputs, outputs)
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        if outputs == inputs.len() && (outputs > 1 || matches!(inputs[0], RawValue::List(_))) {
            return Ok(inputs
                .iter()
                .map(|value| self.join_items(value.to_items()))
                .collect());
        }
        let items = inputs.iter().flat_map(RawValue::to_items).collect();
        Ok(vec![self.join_items(items)])
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SplitParams {
    #[serde(default)]
    sep: Option<String>,
}

/// Delimiter split (whitespace when no `sep` is given).
///
/// A single input with a single output yields a list; a single input with N
/// outputs spreads the parts over the outputs (missing parts are empty,
/// surplus parts stay joined in the last output); N inputs with N outputs
/// split every input into its own list.
#[derive(Clone, Debug)]
pub struct Split {
    sep: Option<String>,
}

impl Split {
    /// Build from `{sep}`.
    pub fn from_params(params: &OperationParams) -> Result<Self, IndexError> {
        let parsed: SplitParams = parse_params("split", params)?;
        if parsed.sep.as_deref() == Some("") {
            return Err(IndexError::Configuration(
                "operation 'split' needs a non-empty 'sep'".to_string(),
            ));
        }
        Ok(Self { sep: parsed.sep })
    }

    fn parts(&self, text: &str) -> Vec<String> {
        match &self.sep {
            Some(sep) => text.split(sep.as_str()).map(str::to_string).collect(),
            None => text.split_whitespace().map(str::to_string).collect(),
        }
    }

    fn split_value(&self, value: &RawValue) -> RawValue {
        match value {
            RawValue::Empty => RawValue::Empty,
            RawValue::Text(text) => RawValue::List(self.parts(text)),
            RawValue::List(items) => {
                RawValue::List(items.iter().flat_map(|item| self.parts(item)).collect())
            }
        }
    }
}

impl Operation for Split {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        if inputs == 1 && outputs >= 1 {
            return Ok(());
        }
        same_arity(inputs, outputs)
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        if inputs.len() > 1 || outputs == 1 {
            return Ok(inputs.iter().map(|value| self.split_value(value)).collect());
        }
        let mut parts = self.split_value(&inputs[0]).to_items();
        let mut spread = Vec::with_capacity(outputs);
        if parts.len() > outputs {
            let surplus = parts.split_off(outputs - 1);
            let sep = self.sep.as_deref().unwrap_or(" ");
            parts.push(surplus.join(sep));
        }
        let mut parts = parts.into_iter();
        for _ in 0..outputs {
            spread.push(parts.next().map(RawValue::text).unwrap_or_default());
        }
        Ok(spread)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FormatParams {
    #[serde(default)]
    pattern: Option<String>,
}

/// Template substitution with positional placeholders.
///
/// Without a `pattern` parameter the first input is used as the pattern.
/// Any empty argument makes the output empty.
#[derive(Clone, Debug)]
pub struct Format {
    pattern: Option<String>,
}

impl Format {
    /// Build from `{pattern}`; the pattern is checked for syntax errors.
    pub fn from_params(params: &OperationParams) -> Result<Self, IndexError> {
        let parsed: FormatParams = parse_params("format", params)?;
        if let Some(pattern) = &parsed.pattern {
            parse_template(pattern).map_err(|err| {
                IndexError::Configuration(format!("operation 'format' pattern: {err}"))
            })?;
        }
        Ok(Self {
            pattern: parsed.pattern,
        })
    }
}

impl Operation for Format {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        if self.pattern.is_none() && inputs < 2 {
            return Err("without a 'pattern' parameter expects the pattern plus arguments".into());
        }
        if outputs != 1 {
            return Err(format!("expects exactly one output, got {outputs}"));
        }
        Ok(())
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        _outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        let (pattern, args) = match &self.pattern {
            Some(pattern) => (pattern.clone(), inputs),
            None => (inputs[0].to_cell(), &inputs[1..]),
        };
        if pattern.is_empty() || args.iter().any(RawValue::is_empty) {
            return Ok(vec![RawValue::Empty]);
        }
        let args: Vec<String> = args.iter().map(RawValue::to_cell).collect();
        render_format(&pattern, &args)
            .map(|text| vec![RawValue::text(text)])
            .map_err(OperationFailure::new)
    }
}

#[derive(Debug, PartialEq)]
enum Piece {
    Literal(String),
    Field(FieldSpec),
}

#[derive(Debug, Default, PartialEq)]
struct FieldSpec {
    index: Option<usize>,
    fill: Option<char>,
    align: Option<char>,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_template(pattern: &str) -> Result<Vec<Piece>, String> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut body = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    body.push(inner);
                }
                if !closed {
                    return Err(format!("unclosed placeholder in '{pattern}'"));
                }
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(Piece::Field(parse_field(&body)?));
            }
            '}' => return Err(format!("single '}}' in '{pattern}'")),
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

fn parse_field(body: &str) -> Result<FieldSpec, String> {
    let (index, spec) = match body.split_once(':') {
        Some((index, spec)) => (index, spec),
        None => (body, ""),
    };
    let mut field = FieldSpec::default();
    if !index.is_empty() {
        field.index = Some(
            index
                .parse()
                .map_err(|_| format!("placeholder index '{index}' is not a number"))?,
        );
    }
    let chars: Vec<char> = spec.chars().collect();
    let mut pos = 0;
    let is_align = |ch: char| matches!(ch, '<' | '>' | '^');
    if chars.len() >= 2 && is_align(chars[1]) {
        field.fill = Some(chars[0]);
        field.align = Some(chars[1]);
        pos = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        field.align = Some(chars[0]);
        pos = 1;
    }
    if field.align.is_none() && chars.get(pos) == Some(&'0') {
        field.fill = Some('0');
        field.align = Some('>');
        pos += 1;
    }
    let width_start = pos;
    while chars.get(pos).is_some_and(char::is_ascii_digit) {
        pos += 1;
    }
    if pos > width_start {
        field.width = chars[width_start..pos]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| format!("invalid width in '{spec}'"))?;
    }
    if chars.get(pos) == Some(&'.') {
        pos += 1;
        let precision_start = pos;
        while chars.get(pos).is_some_and(char::is_ascii_digit) {
            pos += 1;
        }
        if pos == precision_start {
            return Err(format!("missing precision in '{spec}'"));
        }
        field.precision = chars[precision_start..pos]
            .iter()
            .collect::<String>()
            .parse()
            .ok();
    }
    if let Some(kind) = chars.get(pos) {
        if !matches!(kind, 's' | 'd' | 'f') {
            return Err(format!("unsupported format type '{kind}'"));
        }
        field.kind = Some(*kind);
        pos += 1;
    }
    if pos != chars.len() {
        return Err(format!("invalid format spec '{spec}'"));
    }
    Ok(field)
}

fn render_field(field: &FieldSpec, arg: &str) -> Result<String, String> {
    let numeric = matches!(field.kind, Some('d') | Some('f'))
        || (field.precision.is_some() && field.kind != Some('s'));
    let body = match field.kind {
        Some('d') => {
            let value: f64 = arg
                .trim()
                .parse()
                .map_err(|_| format!("'{arg}' is not a number"))?;
            if value.fract() != 0.0 {
                return Err(format!("'{arg}' is not an integer"));
            }
            format!("{}", value as i64)
        }
        _ if numeric => {
            let value: f64 = arg
                .trim()
                .parse()
                .map_err(|_| format!("'{arg}' is not a number"))?;
            format!("{value:.prec$}", prec = field.precision.unwrap_or(6))
        }
        _ => match field.precision {
            Some(limit) => arg.chars().take(limit).collect(),
            None => arg.to_string(),
        },
    };
    let len = body.chars().count();
    if len >= field.width {
        return Ok(body);
    }
    let pad = field.width - len;
    let fill = field.fill.unwrap_or(' ');
    let align = field.align.unwrap_or(if numeric { '>' } else { '<' });
    let repeat = |count: usize| std::iter::repeat_n(fill, count).collect::<String>();
    Ok(match align {
        '>' => format!("{}{body}", repeat(pad)),
        '^' => format!("{}{body}{}", repeat(pad / 2), repeat(pad - pad / 2)),
        _ => format!("{body}{}", repeat(pad)),
    })
}

/// Render `pattern` with positional `args`.
///
/// Supports `{}` (next argument), `{N}` (argument N), `{{`/`}}` escapes and
/// `:[[fill]align][0][width][.precision][s|d|f]` specs, so `{:0>3}` pads
/// `7` to `007`.
pub fn render_format(pattern: &str, args: &[String]) -> Result<String, String> {
    let mut out = String::new();
    let mut next = 0;
    for piece in parse_template(pattern)? {
        match piece {
            Piece::Literal(text) => out.push_str(&text),
            Piece::Field(field) => {
                let index = match field.index {
                    Some(index) => index,
                    None => {
                        next += 1;
                        next - 1
                    }
                };
                let arg = args.get(index).ok_or_else(|| {
                    format!("placeholder {index} has no argument ({} given)", args.len())
                })?;
                out.push_str(&render_field(&field, arg)?);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn params(value: Value) -> OperationParams {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    fn list(items: &[&str]) -> RawValue {
        RawValue::List(items.iter().map(|item| item.to_string()).collect())
    }

    #[test]
    fn case_conversions_are_element_wise() {
        let inputs = vec![RawValue::from("THIS is"), list(&["o'neil", "mcDONALD"])];
        assert_eq!(
            CaseConversion::Lower.apply(&inputs, 2).unwrap(),
            vec![RawValue::from("this is"), list(&["o'neil", "mcdonald"])]
        );
        assert_eq!(
            CaseConversion::Title.apply(&inputs, 2).unwrap(),
            vec![RawValue::from("This Is"), list(&["O'Neil", "Mcdonald"])]
        );
        assert_eq!(
            CaseConversion::Upper.apply(&[RawValue::Empty], 1).unwrap(),
            vec![RawValue::Empty]
        );
    }

    #[test]
    fn unescape_html_decodes_entities() {
        let out = UnescapeHtml
            .apply(&["f&ouml;&ograve; bar &amp; &#252;".into()], 1)
            .unwrap();
        assert_eq!(out, vec![RawValue::from("föò bar & ü")]);
    }

    #[test]
    fn join_list_with_separator() {
        let join = Join::from_params(&params(json!({"sep": ", "}))).unwrap();
        assert_eq!(
            join.apply(&[list(&["a", "b", "c"])], 1).unwrap(),
            vec![RawValue::from("a, b, c")]
        );
        assert_eq!(
            join.apply(&["x".into(), RawValue::Empty, "z".into()], 1).unwrap(),
            vec![RawValue::from("x, z")]
        );
        assert_eq!(
            join.apply(&[list(&["a", "b"]), list(&["c"])], 2).unwrap(),
            vec![RawValue::from("a, b"), RawValue::from("c")]
        );
    }

    #[test]
    fn split_yields_list_or_spreads_parts() {
        let split = Split::from_params(&params(json!({"sep": "|"}))).unwrap();
        assert_eq!(
            split.apply(&["a|b|c".into()], 1).unwrap(),
            vec![list(&["a", "b", "c"])]
        );
        assert_eq!(
            split.apply(&["a|b|c".into()], 2).unwrap(),
            vec![RawValue::from("a"), RawValue::from("b|c")]
        );
        assert_eq!(
            split.apply(&["a".into()], 3).unwrap(),
            vec![RawValue::from("a"), RawValue::Empty, RawValue::Empty]
        );
        let whitespace = Split::from_params(&OperationParams::new()).unwrap();
        assert_eq!(
            whitespace.apply(&["  one two\tthree ".into()], 1).unwrap(),
            vec![list(&["one", "two", "three"])]
        );
        assert_eq!(whitespace.apply(&[RawValue::Empty], 1).unwrap(), vec![RawValue::Empty]);
    }

    #[test]
    fn split_then_join_round_trips() {
        let split = Split::from_params(&params(json!({"sep": "|"}))).unwrap();
        let join = Join::from_params(&params(json!({"sep": ", "}))).unwrap();
        let parts = split.apply(&["a|b|c".into()], 1).unwrap();
        assert_eq!(join.apply(&parts, 1).unwrap(), vec![RawValue::from("a, b, c")]);
    }

    #[test]
    fn format_with_pattern_parameter() {
        let format = Format::from_params(&params(json!({"pattern": "{} world"}))).unwrap();
        assert_eq!(
            format.apply(&["hello".into()], 1).unwrap(),
            vec![RawValue::from("hello world")]
        );
        assert_eq!(format.apply(&[RawValue::Empty], 1).unwrap(), vec![RawValue::Empty]);
    }

    #[test]
    fn format_uses_first_input_as_pattern() {
        let format = Format::from_params(&OperationParams::new()).unwrap();
        assert!(format.check_arity(1, 1).is_err());
        assert_eq!(
            format.apply(&["{1}-{0}".into(), "a".into(), "b".into()], 1).unwrap(),
            vec![RawValue::from("b-a")]
        );
    }

    #[test]
    fn format_specs_pad_and_round() {
        let args = vec!["7".to_string(), "3.14159".to_string(), "ab".to_string()];
        assert_eq!(render_format("{:0>3}", &args).unwrap(), "007");
        assert_eq!(render_format("{:03}", &args).unwrap(), "007");
        assert_eq!(render_format("{1:.2f}", &args).unwrap(), "3.14");
        assert_eq!(render_format("{2:*^6}", &args).unwrap(), "**ab**");
        assert_eq!(render_format("{{{0}}}", &args).unwrap(), "{7}");
        assert!(render_format("{5}", &args).is_err());
        assert!(render_format("{2:d}", &args).is_err());
    }

    #[test]
    fn invalid_format_pattern_fails_at_build() {
        let err = Format::from_params(&params(json!({"pattern": "{oops"}))).unwrap_err();
        assert!(matches!(err, IndexError::Configuration(ref msg) if msg.contains("unclosed")));
    }

    #[test]
    fn replace_literal_and_regex() {
        let literal = Replace::from_params(&params(json!({"old": "_", "new": " "}))).unwrap();
        assert_eq!(
            literal.apply(&["a_b_c".into()], 1).unwrap(),
            vec![RawValue::from("a b c")]
        );
        let pattern =
            Replace::from_params(&params(json!({"old": "[0-9]+", "new": "#", "regex": true})))
                .unwrap();
        assert_eq!(
            pattern.apply(&["deut12 v3".into()], 1).unwrap(),
            vec![RawValue::from("deut# v#")]
        );
    }
}
