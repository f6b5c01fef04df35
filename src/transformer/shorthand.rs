//! Expansion of declarative transformation entries into single-operation
//! specs.
//!
//! Accepted entry forms:
//!
//! - `{operation, inputs, outputs, params}`: one explicit node.
//! - `{operations: [...], inputs, outputs, params: [...]}`: a chain.
//! - `[ops, inputs, outputs, params?]`: list chain; scalars become one-item
//!   lists and missing params become `{}` per operation.
//! - `[constant, output, value]`: a constant.
//! - `{op: [inputs, outputs, params?]}` or `{op: {inputs, outputs, params}}`.
//!
//! Chains assume the output count stays fixed after the first operation.
//! Intermediate fields are named by [`intermediate_name`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::IndexError;
use crate::operations::OperationParams;
use crate::types::{FieldName, OperationName};

const CONSTANT: &str = "constant";
const KEY_OPERATION: &str = "operation";
const KEY_OPERATIONS: &str = "operations";
const KEY_INPUTS: &str = "inputs";
const KEY_OUTPUTS: &str = "outputs";
const KEY_PARAMS: &str = "params";
const KEY_TRANSFORMATIONS: &str = "transformations";

/// One fully expanded graph node declaration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Registered operation name.
    pub operation: OperationName,
    /// Input field names, in argument order.
    pub inputs: Vec<FieldName>,
    /// Output field names, in result order.
    pub outputs: Vec<FieldName>,
    /// Operation parameters.
    #[serde(default)]
    pub params: OperationParams,
}

impl OperationSpec {
    /// Create a node declaration without parameters.
    pub fn new<I, O>(operation: impl Into<OperationName>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<FieldName>,
        O: IntoIterator,
        O::Item: Into<FieldName>,
    {
        Self {
            operation: operation.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            params: OperationParams::new(),
        }
    }

    /// Attach parameters (must be a JSON object; anything else is ignored).
    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }
}

/// Name of the field carrying `output` after chain step `index` ran
/// `operation`: `{output}_{index}_{operation}`.
pub fn intermediate_name(output: &str, index: usize, operation: &str) -> FieldName {
    format!("{output}_{index}_{operation}")
}

/// Expand a whole transformation list. Accepts a list of entries, an object
/// with a `transformations` list, or null (no transformations).
pub fn expand_all(value: &Value) -> Result<Vec<OperationSpec>, IndexError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(entries) => {
            let mut specs = Vec::new();
            for (position, entry) in entries.iter().enumerate() {
                let expanded = expand(entry).map_err(|err| match err {
                    IndexError::Configuration(reason) => {
                        IndexError::Configuration(format!("transformation #{position}: {reason}"))
                    }
                    other => other,
                })?;
                specs.extend(expanded);
            }
            Ok(specs)
        }
        Value::Object(map) if map.contains_key(KEY_TRANSFORMATIONS) => {
            expand_all(&map[KEY_TRANSFORMATIONS])
        }
        other => Err(invalid(format!(
            "expected a list of transformations, got {}",
            kind(other)
        ))),
    }
}

/// Expand one entry into one or more node declarations.
pub fn expand(entry: &Value) -> Result<Vec<OperationSpec>, IndexError> {
    match entry {
        Value::Object(map) if is_keyed_by_operation(map) => {
            let Some((operation, body)) = map.iter().next() else {
                return Err(invalid("empty transformation entry"));
            };
            match body {
                Value::Array(items) => {
                    let mut list = Vec::with_capacity(items.len() + 1);
                    list.push(Value::String(operation.clone()));
                    list.extend(items.iter().cloned());
                    expand_list(&list)
                }
                Value::Object(fields) => {
                    let mut fields = fields.clone();
                    fields.insert(KEY_OPERATION.to_string(), Value::String(operation.clone()));
                    expand_object(&fields)
                }
                other => Err(invalid(format!(
                    "operation '{operation}' must map to a list or an object, got {}",
                    kind(other)
                ))),
            }
        }
        Value::Object(map) => expand_object(map),
        Value::Array(items) => expand_list(items),
        other => Err(invalid(format!(
            "a transformation must be a list or an object, got {}",
            kind(other)
        ))),
    }
}

fn is_keyed_by_operation(map: &Map<String, Value>) -> bool {
    map.len() == 1 && !map.contains_key(KEY_OPERATION) && !map.contains_key(KEY_OPERATIONS)
}

fn expand_object(map: &Map<String, Value>) -> Result<Vec<OperationSpec>, IndexError> {
    for key in map.keys() {
        if ![KEY_OPERATION, KEY_OPERATIONS, KEY_INPUTS, KEY_OUTPUTS, KEY_PARAMS]
            .contains(&key.as_str())
        {
            return Err(invalid(format!("unknown key '{key}'")));
        }
    }
    let inputs = map
        .get(KEY_INPUTS)
        .map(|value| names(value, KEY_INPUTS))
        .transpose()?
        .unwrap_or_default();
    let outputs = names(
        map.get(KEY_OUTPUTS)
            .ok_or_else(|| invalid("missing 'outputs'"))?,
        KEY_OUTPUTS,
    )?;

    match (map.get(KEY_OPERATION), map.get(KEY_OPERATIONS)) {
        (Some(_), Some(_)) => Err(invalid("use either 'operation' or 'operations', not both")),
        (Some(operation), None) => {
            let operation = operation
                .as_str()
                .ok_or_else(|| invalid("'operation' must be a name"))?;
            let params = map
                .get(KEY_PARAMS)
                .map(params_object)
                .transpose()?
                .unwrap_or_default();
            Ok(vec![OperationSpec {
                operation: operation.to_string(),
                inputs,
                outputs,
                params,
            }])
        }
        (None, Some(operations)) => {
            let operations = names(operations, KEY_OPERATIONS)?;
            let params = match map.get(KEY_PARAMS) {
                None => vec![OperationParams::new(); operations.len()],
                Some(Value::Array(items)) => items
                    .iter()
                    .map(params_object)
                    .collect::<Result<Vec<_>, _>>()?,
                Some(single) => vec![params_object(single)?],
            };
            chain(operations, inputs, outputs, params)
        }
        (None, None) => Err(invalid("missing 'operation'")),
    }
}

fn expand_list(items: &[Value]) -> Result<Vec<OperationSpec>, IndexError> {
    if items.first().and_then(Value::as_str) == Some(CONSTANT) && items.len() == 3 {
        let output = items[1]
            .as_str()
            .ok_or_else(|| invalid("constant output must be a field name"))?;
        let mut params = OperationParams::new();
        params.insert("value".to_string(), items[2].clone());
        return Ok(vec![OperationSpec {
            operation: CONSTANT.to_string(),
            inputs: Vec::new(),
            outputs: vec![output.to_string()],
            params,
        }]);
    }
    if items.len() != 3 && items.len() != 4 {
        return Err(invalid(format!(
            "list shorthand needs [operations, inputs, outputs, params?], got {} elements",
            items.len()
        )));
    }
    let operations = names(&items[0], KEY_OPERATIONS)?;
    let inputs = names(&items[1], KEY_INPUTS)?;
    let outputs = names(&items[2], KEY_OUTPUTS)?;
    let params = match items.get(3) {
        None => vec![OperationParams::new(); operations.len()],
        Some(Value::Array(entries)) => entries
            .iter()
            .map(params_object)
            .collect::<Result<Vec<_>, _>>()?,
        Some(single) => vec![params_object(single)?],
    };
    chain(operations, inputs, outputs, params)
}

fn chain(
    operations: Vec<OperationName>,
    inputs: Vec<FieldName>,
    outputs: Vec<FieldName>,
    params: Vec<OperationParams>,
) -> Result<Vec<OperationSpec>, IndexError> {
    if operations.is_empty() {
        return Err(invalid("a chain needs at least one operation"));
    }
    if outputs.is_empty() {
        return Err(invalid("a chain needs at least one output"));
    }
    if params.len() != operations.len() {
        return Err(invalid(format!(
            "{} parameter sets for {} operations",
            params.len(),
            operations.len()
        )));
    }
    let last = operations.len() - 1;
    let mut specs = Vec::with_capacity(operations.len());
    let mut step_inputs = inputs;
    for (index, (operation, params)) in operations.into_iter().zip(params).enumerate() {
        let step_outputs: Vec<FieldName> = if index == last {
            outputs.clone()
        } else {
            outputs
                .iter()
                .map(|output| intermediate_name(output, index, &operation))
                .collect()
        };
        specs.push(OperationSpec {
            operation,
            inputs: step_inputs,
            outputs: step_outputs.clone(),
            params,
        });
        step_inputs = step_outputs;
    }
    Ok(specs)
}

fn names(value: &Value, what: &str) -> Result<Vec<String>, IndexError> {
    match value {
        Value::String(name) => Ok(vec![name.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(format!("'{what}' must contain names, got {item}")))
            })
            .collect(),
        other => Err(invalid(format!(
            "'{what}' must be a name or a list of names, got {}",
            kind(other)
        ))),
    }
}

fn params_object(value: &Value) -> Result<OperationParams, IndexError> {
    match value {
        Value::Null => Ok(OperationParams::new()),
        Value::Object(map) => Ok(map.clone()),
        other => Err(invalid(format!(
            "parameters must be an object, got {}",
            kind(other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn invalid(reason: impl Into<String>) -> IndexError {
    IndexError::Configuration(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn intermediate_names_follow_output_index_operation() {
        assert_eq!(intermediate_name("title", 0, "split"), "title_0_split");
        assert_eq!(intermediate_name("part2", 3, "lowercase"), "part2_3_lowercase");
    }

    #[test]
    fn list_chain_names_intermediates_per_output() {
        let specs = expand(&json!([
            ["split", "uppercase"],
            "my_input",
            ["part1", "part2"],
            [{"sep": "-"}, {}]
        ]))
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(
            specs[0],
            OperationSpec::new("split", ["my_input"], ["part1_0_split", "part2_0_split"])
                .with_params(json!({"sep": "-"}))
        );
        assert_eq!(
            specs[1],
            OperationSpec::new(
                "uppercase",
                ["part1_0_split", "part2_0_split"],
                ["part1", "part2"]
            )
        );
    }

    #[test]
    fn scalars_are_promoted_and_params_default_to_empty() {
        let specs = expand(&json!(["lowercase", "my_input", "my_output"])).unwrap();
        assert_eq!(
            specs,
            vec![OperationSpec::new("lowercase", ["my_input"], ["my_output"])]
        );
    }

    #[test]
    fn three_step_chain_numbers_every_intermediate() {
        let specs = expand(&json!([["split", "last", "lowercase"], "raw", "out"])).unwrap();
        let outputs: Vec<&str> = specs.iter().map(|spec| spec.outputs[0].as_str()).collect();
        assert_eq!(outputs, vec!["out_0_split", "out_1_last", "out"]);
        assert_eq!(specs[1].inputs, vec!["out_0_split".to_string()]);
    }

    #[test]
    fn constant_shorthand() {
        let specs = expand(&json!(["constant", "my_constant", 10])).unwrap();
        assert_eq!(
            specs,
            vec![
                OperationSpec::new("constant", Vec::<String>::new(), ["my_constant"])
                    .with_params(json!({"value": 10}))
            ]
        );
    }

    #[test]
    fn operation_keyed_dictionaries() {
        let from_list = expand(&json!({"split": ["my_input", ["a", "b"], {"sep": "-"}]})).unwrap();
        let from_object = expand(&json!({"split": {
            "inputs": ["my_input"],
            "outputs": ["a", "b"],
            "params": {"sep": "-"}
        }}))
        .unwrap();
        let expected = vec![
            OperationSpec::new("split", ["my_input"], ["a", "b"]).with_params(json!({"sep": "-"})),
        ];
        assert_eq!(from_list, expected);
        assert_eq!(from_object, expected);
    }

    #[test]
    fn explicit_and_chain_objects() {
        let explicit = expand(&json!({
            "operation": "rename",
            "inputs": ["OTL"],
            "outputs": ["title"]
        }))
        .unwrap();
        assert_eq!(explicit, vec![OperationSpec::new("rename", ["OTL"], ["title"])]);

        let chained = expand(&json!({
            "operations": ["split", "lowercase"],
            "inputs": ["input1"],
            "outputs": ["output1", "output2"],
            "params": [{"sep": "-"}, {}]
        }))
        .unwrap();
        assert_eq!(chained[0].outputs, vec!["output1_0_split", "output2_0_split"]);
        assert_eq!(chained[1].outputs, vec!["output1", "output2"]);
    }

    #[test]
    fn malformed_entries_are_configuration_errors() {
        for entry in [
            json!(["split", "a"]),
            json!({"operation": "split", "inputs": ["a"]}),
            json!([["split", "lowercase"], "a", "b", [{}]]),
            json!({"operation": "split", "inputs": "a", "outputs": "b", "extra": 1}),
            json!(42),
        ] {
            let err = expand(&entry).unwrap_err();
            assert!(matches!(err, IndexError::Configuration(_)), "{entry}");
        }
    }

    #[test]
    fn expand_all_reports_entry_position() {
        let err = expand_all(&json!([["lowercase", "a", "b"], ["oops"]])).unwrap_err();
        assert!(matches!(err, IndexError::Configuration(ref msg) if msg.contains("#1")));

        let specs = expand_all(&json!({"transformations": [["lowercase", "a", "b"]]})).unwrap();
        assert_eq!(specs.len(), 1);
        assert!(expand_all(&Value::Null).unwrap().is_empty());
    }
}
