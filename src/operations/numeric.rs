use super::{Operation, OperationFailure, same_arity, single_output};
use crate::value::RawValue;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Number {
    Int(i64),
    Float(f64),
}

fn parse_number(text: &str) -> Result<Number, OperationFailure> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i64>() {
        return Ok(Number::Int(value));
    }
    text.parse::<f64>()
        .map(Number::Float)
        .map_err(|_| OperationFailure::new(format!("'{text}' is not a number")))
}

fn float_text(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Numeric sum of all non-empty inputs (list elements included).
///
/// The result stays integral when every operand is an integer.
#[derive(Clone, Copy, Debug)]
pub struct Add;

impl Operation for Add {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        single_output(inputs, outputs)
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        _outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        let mut total: Option<Number> = None;
        for item in inputs.iter().flat_map(RawValue::to_items) {
            if item.is_empty() {
                continue;
            }
            let operand = parse_number(&item)?;
            total = Some(match (total, operand) {
                (None, operand) => operand,
                (Some(Number::Int(left)), Number::Int(right)) => match left.checked_add(right) {
                    Some(sum) => Number::Int(sum),
                    None => Number::Float(left as f64 + right as f64),
                },
                (Some(Number::Int(left)), Number::Float(right)) => Number::Float(left as f64 + right),
                (Some(Number::Float(left)), Number::Int(right)) => Number::Float(left + right as f64),
                (Some(Number::Float(left)), Number::Float(right)) => Number::Float(left + right),
            });
        }
        Ok(vec![match total {
            None => RawValue::Empty,
            Some(Number::Int(value)) => RawValue::text(value.to_string()),
            Some(Number::Float(value)) => RawValue::text(float_text(value)),
        }])
    }
}

/// Normalizes numeric text to an integer, element-wise.
#[derive(Clone, Copy, Debug)]
pub struct ToInt;

impl Operation for ToInt {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        same_arity(inputs, outputs)
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        _outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        inputs
            .iter()
            .map(|value| convert(value, |number| match number {
                Number::Int(value) => Ok(value.to_string()),
                Number::Float(value) if value.is_finite() && value.fract() == 0.0 => {
                    Ok(format!("{}", value as i64))
                }
                Number::Float(value) => Err(OperationFailure::new(format!(
                    "'{value}' is not an integer"
                ))),
            }))
            .collect()
    }
}

/// Normalizes numeric text to a float, element-wise.
#[derive(Clone, Copy, Debug)]
pub struct ToFloat;

impl Operation for ToFloat {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        same_arity(inputs, outputs)
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        _outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        inputs
            .iter()
            .map(|value| convert(value, |number| match number {
                Number::Int(value) => Ok(float_text(value as f64)),
                Number::Float(value) => Ok(float_text(value)),
            }))
            .collect()
    }
}

fn convert(
    value: &RawValue,
    render: impl Fn(Number) -> Result<String, OperationFailure>,
) -> Result<RawValue, OperationFailure> {
    match value {
        RawValue::Empty => Ok(RawValue::Empty),
        RawValue::Text(text) => Ok(RawValue::text(render(parse_number(text)?)?)),
        RawValue::List(items) => items
            .iter()
            .map(|item| render(parse_number(item)?))
            .collect::<Result<Vec<_>, _>>()
            .map(RawValue::List),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_keeps_integers_integral() {
        assert_eq!(
            Add.apply(&["2".into(), RawValue::Empty, "3".into()], 1).unwrap(),
            vec![RawValue::from("5")]
        );
        assert_eq!(
            Add.apply(&["2".into(), "0.5".into()], 1).unwrap(),
            vec![RawValue::from("2.5")]
        );
        assert_eq!(Add.apply(&[RawValue::Empty], 1).unwrap(), vec![RawValue::Empty]);
    }

    #[test]
    fn add_rejects_non_numeric_inputs() {
        let err = Add.apply(&["2".into(), "two".into()], 1).unwrap_err();
        assert!(err.0.contains("two"));
    }

    #[test]
    fn numeric_normalization() {
        assert_eq!(
            ToInt.apply(&["3.0".into(), RawValue::Empty], 2).unwrap(),
            vec![RawValue::from("3"), RawValue::Empty]
        );
        assert!(ToInt.apply(&["3.5".into()], 1).is_err());
        assert_eq!(ToFloat.apply(&["3".into()], 1).unwrap(), vec![RawValue::from("3.0")]);
    }
}
