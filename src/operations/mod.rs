//! Named, pure value transforms referenced by transformer graphs.
//!
//! Every operation is built once per graph node from a parameter object and
//! then applied to a slice of input values, producing exactly the declared
//! number of outputs. Parameters are validated (and regexes compiled) at
//! build time so a bad graph fails when it is loaded, not halfway through a
//! dataset.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::constants::schema::{FALSE, TRUE};
use crate::errors::IndexError;
use crate::types::OperationName;
use crate::value::RawValue;

mod mapping;
mod numeric;
mod select;
mod text;

pub use mapping::{ExtractGroups, MapNumericBins, MapValues, NumericBin};
pub use numeric::{Add, ToFloat, ToInt};
pub use select::{Constant, DefaultValues, First, Last, Pick, Rename};
pub use text::{
    CaseConversion, Format, Join, Replace, Split, ToText, UnescapeHtml, render_format,
};

/// Parameter object of one graph node.
pub type OperationParams = serde_json::Map<String, Value>;

/// Builds an operation instance from node parameters.
pub type OperationFactory =
    Arc<dyn Fn(&OperationParams) -> Result<Arc<dyn Operation>, IndexError> + Send + Sync + 'static>;

/// Failure raised while applying an operation to one record.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct OperationFailure(pub String);

impl OperationFailure {
    /// Wrap a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A pure transform over raw values.
pub trait Operation: Send + Sync + fmt::Debug {
    /// Validate input/output counts for one node. Called once at graph load.
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String>;

    /// Apply to `inputs`, producing exactly `outputs` values.
    fn apply(&self, inputs: &[RawValue], outputs: usize)
    -> Result<Vec<RawValue>, OperationFailure>;
}

/// Registry mapping stable operation names to factories.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    factories: IndexMap<OperationName, OperationFactory>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OperationRegistry {
    /// Registry without any operations.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in operation.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("rename", |params| {
            no_params("rename", params)?;
            Ok(Arc::new(Rename))
        });
        registry.register("constant", |params| {
            Ok(Arc::new(Constant::from_params(params)?))
        });
        registry.register("format", |params| Ok(Arc::new(Format::from_params(params)?)));
        registry.register("join", |params| Ok(Arc::new(Join::from_params(params)?)));
        registry.register("split", |params| Ok(Arc::new(Split::from_params(params)?)));
        registry.register("first", |params| {
            no_params("first", params)?;
            Ok(Arc::new(First))
        });
        registry.register("last", |params| {
            no_params("last", params)?;
            Ok(Arc::new(Last))
        });
        registry.register("pick", |params| Ok(Arc::new(Pick::from_params(params)?)));
        registry.register("default", |params| {
            Ok(Arc::new(DefaultValues::from_params(params)?))
        });
        registry.register("map_values", |params| {
            Ok(Arc::new(MapValues::from_params(params)?))
        });
        registry.register("map_numeric_bins", |params| {
            Ok(Arc::new(MapNumericBins::from_params(params)?))
        });
        registry.register("extract_groups", |params| {
            Ok(Arc::new(ExtractGroups::from_params(params)?))
        });
        registry.register("add", |params| {
            no_params("add", params)?;
            Ok(Arc::new(Add))
        });
        registry.register("to_int", |params| {
            no_params("to_int", params)?;
            Ok(Arc::new(ToInt))
        });
        registry.register("to_float", |params| {
            no_params("to_float", params)?;
            Ok(Arc::new(ToFloat))
        });
        registry.register("to_string", |params| {
            no_params("to_string", params)?;
            Ok(Arc::new(ToText))
        });
        registry.register("lowercase", |params| {
            no_params("lowercase", params)?;
            Ok(Arc::new(CaseConversion::Lower))
        });
        registry.register("uppercase", |params| {
            no_params("uppercase", params)?;
            Ok(Arc::new(CaseConversion::Upper))
        });
        registry.register("titlecase", |params| {
            no_params("titlecase", params)?;
            Ok(Arc::new(CaseConversion::Title))
        });
        registry.register("unescape_html", |params| {
            no_params("unescape_html", params)?;
            Ok(Arc::new(UnescapeHtml))
        });
        registry.register("replace", |params| {
            Ok(Arc::new(Replace::from_params(params)?))
        });
        registry
    }

    /// Register (or replace) an operation factory under `name`.
    pub fn register<F>(&mut self, name: impl Into<OperationName>, factory: F) -> &mut Self
    where
        F: Fn(&OperationParams) -> Result<Arc<dyn Operation>, IndexError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build an operation instance for one node.
    pub fn build(
        &self,
        name: &str,
        params: &OperationParams,
    ) -> Result<Arc<dyn Operation>, IndexError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| IndexError::UnknownOperation(name.to_string()))?;
        factory(params)
    }
}

/// Deserialize a typed parameter struct for operation `name`.
pub(crate) fn parse_params<T: DeserializeOwned>(
    name: &str,
    params: &OperationParams,
) -> Result<T, IndexError> {
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|err| IndexError::Configuration(format!("operation '{name}' parameters: {err}")))
}

fn no_params(name: &str, params: &OperationParams) -> Result<(), IndexError> {
    match params.keys().next() {
        None => Ok(()),
        Some(key) => Err(IndexError::Configuration(format!(
            "operation '{name}' takes no parameters, got '{key}'"
        ))),
    }
}

/// Convert a declarative parameter value into a raw value.
pub(crate) fn json_to_raw(value: &Value) -> RawValue {
    match value {
        Value::Null => RawValue::Empty,
        Value::Bool(true) => RawValue::text(TRUE),
        Value::Bool(false) => RawValue::text(FALSE),
        Value::Number(number) => RawValue::text(number.to_string()),
        Value::String(text) => RawValue::text(text.as_str()),
        Value::Array(items) => RawValue::List(
            items
                .iter()
                .map(|item| json_to_raw(item).to_cell())
                .filter(|item| !item.is_empty())
                .collect(),
        ),
        Value::Object(_) => RawValue::text(value.to_string()),
    }
}

pub(crate) fn same_arity(inputs: usize, outputs: usize) -> Result<(), String> {
    if inputs == 0 {
        return Err("expects at least one input".to_string());
    }
    if inputs != outputs {
        return Err(format!(
            "expects as many outputs as inputs, got {inputs} inputs and {outputs} outputs"
        ));
    }
    Ok(())
}

pub(crate) fn single_output(inputs: usize, outputs: usize) -> Result<(), String> {
    if inputs == 0 {
        return Err("expects at least one input".to_string());
    }
    if outputs != 1 {
        return Err(format!("expects exactly one output, got {outputs}"));
    }
    Ok(())
}

pub(crate) fn per_input_or_single(inputs: usize, outputs: usize) -> Result<(), String> {
    if inputs == 0 {
        return Err("expects at least one input".to_string());
    }
    if outputs != 1 && outputs != inputs {
        return Err(format!(
            "expects one output or one output per input, got {inputs} inputs and {outputs} outputs"
        ));
    }
    Ok(())
}
