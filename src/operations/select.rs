use serde::Deserialize;
use serde_json::Value;

use super::{
    Operation, OperationFailure, OperationParams, json_to_raw, parse_params, per_input_or_single,
    same_arity, single_output,
};
use crate::errors::IndexError;
use crate::value::RawValue;

/// Passes inputs through under new names.
#[derive(Clone, Copy, Debug)]
pub struct Rename;

impl Operation for Rename {
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
struct ConstantParams {
    #[serde(default)]
    value: Value,
}

/// Writes the same value to every output; inputs are ignored.
#[derive(Clone, Debug)]
pub struct Constant {
    value: RawValue,
}

impl Constant {
    /// Build from `{value}`.
    pub fn from_params(params: &OperationParams) -> Result<Self, IndexError> {
        let parsed: ConstantParams = parse_params("constant", params)?;
        Ok(Self {
            value: json_to_raw(&parsed.value),
        })
    }
}

impl Operation for Constant {
    fn check_arity(&self, _inputs: usize, outputs: usize) -> Result<(), String> {
        if outputs == 0 {
            return Err("expects at least one output".to_string());
        }
        Ok(())
    }

    fn apply(
        &self,
        _inputs: &[RawValue],
        outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        Ok(vec![self.value.clone(); outputs])
    }
}

fn first_item(value: &RawValue) -> RawValue {
    match value {
        RawValue::List(items) => items.first().cloned().map(RawValue::text).unwrap_or_default(),
        other => other.clone(),
    }
}

fn last_item(value: &RawValue) -> RawValue {
    match value {
        RawValue::List(items) => items.last().cloned().map(RawValue::text).unwrap_or_default(),
        other => other.clone(),
    }
}

/// First element of each list input, or the first of several inputs.
#[derive(Clone, Copy, Debug)]
pub struct First;

impl Operation for First {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        per_input_or_single(inputs, outputs)
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        if outputs == inputs.len() {
            return Ok(inputs.iter().map(first_item).collect());
        }
        Ok(vec![inputs[0].clone()])
    }
}

/// Last element of each list input, or the last of several inputs.
#[derive(Clone, Copy, Debug)]
pub struct Last;

impl Operation for Last {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        per_input_or_single(inputs, outputs)
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        if outputs == inputs.len() {
            return Ok(inputs.iter().map(last_item).collect());
        }
        Ok(vec![inputs[inputs.len() - 1].clone()])
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PickParams {
    #[serde(default)]
    index: usize,
}

/// Selects the input at `index`.
#[derive(Clone, Copy, Debug)]
pub struct Pick {
    index: usize,
}

impl Pick {
    /// Build from `{index}` (default 0).
    pub fn from_params(params: &OperationParams) -> Result<Self, IndexError> {
        let parsed: PickParams = parse_params("pick", params)?;
        Ok(Self {
            index: parsed.index,
        })
    }
}

impl Operation for Pick {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        single_output(inputs, outputs)?;
        if self.index >= inputs {
            return Err(format!(
                "index {} is out of range for {inputs} inputs",
                self.index
            ));
        }
        Ok(())
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        _outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        inputs
            .get(self.index)
            .cloned()
            .map(|value| vec![value])
            .ok_or_else(|| OperationFailure::new(format!("no input at index {}", self.index)))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DefaultParams {
    #[serde(default)]
    values: Option<Vec<Value>>,
    #[serde(default)]
    value: Option<Value>,
}

/// Replaces empty inputs by per-position fallbacks.
#[derive(Clone, Debug)]
pub struct DefaultValues {
    values: Vec<RawValue>,
    broadcast: bool,
}

impl DefaultValues {
    /// Build from `{values: [...]}` (one per input) or `{value}` (shared).
    pub fn from_params(params: &OperationParams) -> Result<Self, IndexError> {
        let parsed: DefaultParams = parse_params("default", params)?;
        match (parsed.values, parsed.value) {
            (Some(values), None) => Ok(Self {
                values: values.iter().map(json_to_raw).collect(),
                broadcast: false,
            }),
            (None, Some(value)) => Ok(Self {
                values: vec![json_to_raw(&value)],
                broadcast: true,
            }),
            _ => Err(IndexError::Configuration(
                "operation 'default' needs exactly one of 'values' or 'value'".to_string(),
            )),
        }
    }

    fn fallback(&self, position: usize) -> RawValue {
        if self.broadcast {
            self.values[0].clone()
        } else {
            self.values.get(position).cloned().unwrap_or_default()
        }
    }
}

impl Operation for DefaultValues {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        same_arity(inputs, outputs)?;
        if !self.broadcast && self.values.len() != inputs {
            return Err(format!(
                "has {} default values for {inputs} inputs",
                self.values.len()
            ));
        }
        Ok(())
    }

    fn apply(
        &self,
        inputs: &[RawValue],
        _outputs: usize,
    ) -> Result<Vec<RawValue>, OperationFailure> {
        Ok(inputs
            .iter()
            .enumerate()
            .map(|(position, value)| {
                if value.is_empty() {
                    self.fallback(position)
                } else {
                    value.clone()
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

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
    fn constant_fills_every_output() {
        let constant = Constant::from_params(&params(json!({"value": 4}))).unwrap();
        assert!(constant.check_arity(0, 2).is_ok());
        assert_eq!(
            constant.apply(&[], 2).unwrap(),
            vec![RawValue::from("4"), RawValue::from("4")]
        );
    }

    #[test]
    fn first_and_last_of_lists() {
        let inputs = vec![list(&["a", "b", "c"]), list(&[])];
        assert_eq!(
            First.apply(&inputs, 2).unwrap(),
            vec![RawValue::from("a"), RawValue::Empty]
        );
        assert_eq!(
            Last.apply(&inputs, 2).unwrap(),
            vec![RawValue::from("c"), RawValue::Empty]
        );
        let scalars = vec![RawValue::from("x"), RawValue::from("y")];
        assert_eq!(First.apply(&scalars, 1).unwrap(), vec![RawValue::from("x")]);
        assert_eq!(Last.apply(&scalars, 1).unwrap(), vec![RawValue::from("y")]);
    }

    #[test]
    fn pick_validates_index_at_load() {
        let pick = Pick::from_params(&params(json!({"index": 2}))).unwrap();
        assert!(pick.check_arity(2, 1).is_err());
        assert!(pick.check_arity(3, 1).is_ok());
        assert_eq!(
            pick.apply(&["a".into(), "b".into(), "c".into()], 1).unwrap(),
            vec![RawValue::from("c")]
        );
    }

    #[test]
    fn default_replaces_only_empty_inputs() {
        let default =
            DefaultValues::from_params(&params(json!({"values": ["unknown", 0]}))).unwrap();
        assert!(default.check_arity(3, 3).is_err());
        assert_eq!(
            default.apply(&[RawValue::Empty, "5".into()], 2).unwrap(),
            vec![RawValue::from("unknown"), RawValue::from("5")]
        );
        let shared = DefaultValues::from_params(&params(json!({"value": "n/a"}))).unwrap();
        assert_eq!(
            shared.apply(&[RawValue::Empty, RawValue::Empty], 2).unwrap(),
            vec![RawValue::from("n/a"), RawValue::from("n/a")]
        );
        assert!(DefaultValues::from_params(&OperationParams::new()).is_err());
    }
}
