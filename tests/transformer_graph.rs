use std::sync::Arc;

use catafolk::operations::OperationParams;
use catafolk::{
    FieldSchema, IndexError, MissingInputPolicy, Operation, OperationFailure, OperationRegistry,
    OperationSpec, RawFieldMap, RawValue, TransformerGraph, TypedValue,
};

const ESSEN_GRAPH: &str = r#"
transformations:
  - [unescape_html, OTL, title]
  - [extract_groups, AMT, [meter_count, meter_unit], {pattern: '(\d+)/(\d+)', groups: [1, 2]}]
  - [format, [meter_count, meter_unit], meter, {pattern: "{} over {}"}]
  - [map_values, ARE, continent, {mapping: {"Europa": Europe, "Asien": Asia}}]
  - [map_numeric_bins, bars, length, {bins: [{min: 0, max: 20, value: high}], default: other}]
  - [map_values, LYR, has_lyrics, {mapping: {ja: "True", nein: "False"}, regex: false}]
  - [[split, last], SCT, number, [{sep: "-"}, {}]]
  - [to_int, number, number_int]
"#;

const SCHEMA_CSV: &str = "\
field,dtype,required,group
title,str,True,identity
meter,str,False,music
continent,str,False,geography
length,str,False,music
has_lyrics,bool,False,music
number_int,int,False,identity
";

fn record(pairs: &[(&str, &str)]) -> RawFieldMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), RawValue::from(*value)))
        .collect()
}

fn essen() -> TransformerGraph {
    TransformerGraph::from_yaml_str(ESSEN_GRAPH, &OperationRegistry::builtin()).unwrap()
}

#[test]
fn essen_style_graph_types_through_the_schema() {
    let schema = FieldSchema::from_reader(SCHEMA_CSV.as_bytes()).unwrap();
    let out = essen()
        .transform_outputs(&record(&[
            ("OTL", "Der Mai ist gekommen &amp; mehr"),
            ("AMT", "3/4"),
            ("ARE", "Europa, Mitteleuropa"),
            ("bars", "10"),
            ("LYR", "ja"),
            ("SCT", "E-0042"),
        ]))
        .unwrap();

    let (row, errors) = schema.coerce_record(&out);
    assert!(errors.is_empty());
    assert_eq!(row["title"], TypedValue::String("Der Mai ist gekommen & mehr".into()));
    assert_eq!(row["meter"], TypedValue::String("3 over 4".into()));
    assert_eq!(row["continent"], TypedValue::String("Europe".into()));
    assert_eq!(row["length"], TypedValue::String("high".into()));
    assert_eq!(row["has_lyrics"], TypedValue::Boolean(true));
    assert_eq!(row["number_int"], TypedValue::Int(42));
    assert!(schema.missing_required(&row).is_empty());
}

#[test]
fn out_of_range_and_unmatched_values_fall_back() {
    let out = essen()
        .transform_outputs(&record(&[
            ("OTL", "Jodler"),
            ("AMT", "frei"),
            ("ARE", "Amerika"),
            ("bars", "25"),
            ("LYR", "nein"),
            ("SCT", "Q-7"),
        ]))
        .unwrap();
    assert_eq!(out["length"], RawValue::from("other"));
    assert_eq!(out["continent"], RawValue::Empty);
    assert_eq!(out["meter"], RawValue::Empty);
    assert_eq!(out["has_lyrics"], RawValue::from("False"));
    assert_eq!(out["number_int"], RawValue::from("7"));
}

#[test]
fn introspection_covers_intermediate_fields() {
    let graph = essen();
    assert_eq!(graph.len(), 9);
    let mut roots = graph.roots();
    roots.sort_unstable();
    assert_eq!(roots, vec!["AMT", "ARE", "LYR", "OTL", "SCT", "bars"]);
    assert!(graph.leafs().contains(&"meter"));
    assert!(!graph.leafs().contains(&"meter_count"));
    assert!(!graph.leafs().contains(&"number"));

    let order = graph.execution_order();
    let position = |name: &str| order.iter().position(|node| *node == name).unwrap();
    assert!(position("extract_groups_1") < position("format_1"));
    assert!(position("last_1") < position("to_int_1"));
}

#[test]
fn missing_inputs_error_by_default() {
    let err = essen().transform(&record(&[("OTL", "Jodler")])).unwrap_err();
    assert!(matches!(err, IndexError::MissingInputField { ref field, .. } if field == "AMT"));

    let lenient = essen().with_missing_inputs(MissingInputPolicy::Empty);
    let out = lenient.transform_outputs(&record(&[("OTL", "Jodler")])).unwrap();
    assert_eq!(out["title"], RawValue::from("Jodler"));
    assert_eq!(out["length"], RawValue::from("other"));
}

#[test]
fn json_and_yaml_forms_build_the_same_graph() {
    let registry = OperationRegistry::builtin();
    let from_json = TransformerGraph::from_json_str(
        r#"[{"operation": "join", "inputs": ["a", "b"], "outputs": ["ab"], "params": {"sep": "+"}}]"#,
        &registry,
    )
    .unwrap();
    let from_yaml =
        TransformerGraph::from_yaml_str("- join: [[a, b], ab, {sep: '+'}]\n", &registry).unwrap();
    let mut spec = OperationSpec::new("join", ["a", "b"], ["ab"]);
    spec.params.insert("sep".into(), "+".into());
    let from_specs = TransformerGraph::from_specs(vec![spec], &registry).unwrap();

    let input = record(&[("a", "x"), ("b", "y")]);
    for graph in [from_json, from_yaml, from_specs] {
        assert_eq!(graph.transform_outputs(&input).unwrap()["ab"], RawValue::from("x+y"));
    }
}

#[test]
fn composed_graphs_reject_cycles() {
    let registry = OperationRegistry::builtin();
    let first = TransformerGraph::from_yaml_str("- [rename, OTL, title]\n", &registry).unwrap();
    let second = TransformerGraph::from_yaml_str("- [lowercase, title, OTL]\n", &registry).unwrap();
    let err = first.compose(&second).unwrap_err();
    assert!(matches!(err, IndexError::CyclicGraph { .. }));
}

#[derive(Debug)]
struct Syllables;

impl Operation for Syllables {
    fn check_arity(&self, inputs: usize, outputs: usize) -> Result<(), String> {
        if inputs == 1 && outputs == 1 {
            Ok(())
        } else {
            Err("expects one input and one output".into())
        }
    }

    fn apply(&self, inputs: &[RawValue], _outputs: usize) -> Result<Vec<RawValue>, OperationFailure> {
        let text = inputs[0].to_cell();
        if text.is_empty() {
            return Err(OperationFailure::new("no lyrics"));
        }
        Ok(vec![RawValue::text(text.split('-').count().to_string())])
    }
}

#[test]
fn custom_operations_plug_into_the_registry() {
    let mut registry = OperationRegistry::builtin();
    registry.register("syllables", |_: &OperationParams| {
        Ok(Arc::new(Syllables) as Arc<dyn Operation>)
    });
    let graph =
        TransformerGraph::from_yaml_str("- [syllables, lyrics, count]\n", &registry).unwrap();
    let out = graph.transform_outputs(&record(&[("lyrics", "Der-Mai-ist")])).unwrap();
    assert_eq!(out["count"], RawValue::from("3"));

    let err = graph.transform(&record(&[("lyrics", "")])).unwrap_err();
    assert!(matches!(err, IndexError::Operation { ref reason, .. } if reason == "no lyrics"));

    let err = TransformerGraph::from_yaml_str(
        "- [syllables, lyrics, count]\n",
        &OperationRegistry::builtin(),
    )
    .unwrap_err();
    assert!(matches!(err, IndexError::UnknownOperation(ref name) if name == "syllables"));
}
