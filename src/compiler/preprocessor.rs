//! Normalizes the three accepted input-descriptor surface forms
//! (`["literal", v]`, `{"literal": v}`, bare legacy literal) to one tagged
//! shape, mirroring `original_source/core/preprocessor.py`'s
//! `WorkflowPreprocessor` exactly: same five tag names, same integer
//! codes, same error wording (an enumerated list of valid tags).

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::error::{LexFlowError, Result};

/// `tag name -> normalized integer code`, in the original's declared order.
const INPUT_TYPE_MAP: [(&str, u8); 5] = [
    ("literal", 1),
    ("node", 2),
    ("variable", 3),
    ("branch", 4),
    ("workflow_call", 5),
];

fn tag_code(name: &str) -> Option<u8> {
    INPUT_TYPE_MAP.iter().find(|(n, _)| *n == name).map(|(_, c)| *c)
}

fn valid_tags_listed() -> String {
    INPUT_TYPE_MAP
        .iter()
        .map(|(n, _)| format!("\"{n}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One input descriptor after normalization: a tag code (1..=5, or an
/// already-numeric legacy tag passed through unchecked) plus its payload.
#[derive(Debug, Clone)]
pub struct NormalizedInput {
    pub tag: i64,
    pub data: Json,
}

/// Normalize one node's raw `inputs` map to tagged descriptors.
pub fn normalize_inputs(raw: &HashMap<String, Json>) -> Result<HashMap<String, NormalizedInput>> {
    raw.iter()
        .map(|(name, value)| Ok((name.clone(), normalize_input_value(value)?)))
        .collect()
}

fn normalize_input_value(value: &Json) -> Result<NormalizedInput> {
    match value {
        Json::Object(map) => normalize_nested_input(map),
        Json::Array(items) if items.len() == 2 => {
            let type_identifier = &items[0];
            let data = items[1].clone();
            match type_identifier {
                Json::String(name) => match tag_code(name) {
                    Some(code) => Ok(NormalizedInput {
                        tag: code as i64,
                        data,
                    }),
                    None => Err(unknown_tag_error(name)),
                },
                Json::Number(n) => {
                    let code = n.as_i64().ok_or_else(|| {
                        LexFlowError::validation(
                            "Invalid input format: numeric type identifier must be an integer",
                        )
                    })?;
                    Ok(NormalizedInput { tag: code, data })
                }
                other => Err(LexFlowError::validation(format!(
                    "Invalid input format: first element must be string or integer, got {}. \
                     Example: [\"literal\", \"value\"] or [1, \"value\"]",
                    json_type_name(other)
                ))),
            }
        }
        Json::Array(items) => Err(LexFlowError::validation(format!(
            "Invalid input format: list inputs must have exactly 2 elements [type, value], got {} elements. \
             Example: [\"literal\", \"value\"]",
            items.len()
        ))),
        // Non-object, non-array values are treated as literals (legacy support).
        other => Ok(NormalizedInput {
            tag: 1,
            data: other.clone(),
        }),
    }
}

fn normalize_nested_input(map: &serde_json::Map<String, Json>) -> Result<NormalizedInput> {
    for (name, data) in map {
        if let Some(code) = tag_code(name) {
            return Ok(NormalizedInput {
                tag: code as i64,
                data: data.clone(),
            });
        }
    }
    let invalid: Vec<String> = map.keys().map(|k| format!("\"{k}\"")).collect();
    Err(LexFlowError::validation(format!(
        "Unknown input type(s): {}. Valid input types are: {}. \
         Example: {{\"literal\": \"value\"}} or {{\"variable\": \"var_name\"}}",
        invalid.join(", "),
        valid_tags_listed()
    )))
}

fn unknown_tag_error(tag: &str) -> LexFlowError {
    LexFlowError::validation(format!(
        "Unknown input type \"{tag}\". Valid input types are: {}. \
         Example: [\"literal\", \"value\"] or [\"variable\", \"var_name\"]",
        valid_tags_listed()
    ))
}

fn json_type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_form_with_known_string_tag() {
        let n = normalize_input_value(&json!(["literal", 42])).unwrap();
        assert_eq!(n.tag, 1);
        assert_eq!(n.data, json!(42));
    }

    #[test]
    fn dict_form_with_known_tag() {
        let n = normalize_input_value(&json!({"variable": "x"})).unwrap();
        assert_eq!(n.tag, 3);
        assert_eq!(n.data, json!("x"));
    }

    #[test]
    fn already_numeric_tag_passes_through() {
        let n = normalize_input_value(&json!([2, "some_node"])).unwrap();
        assert_eq!(n.tag, 2);
        assert_eq!(n.data, json!("some_node"));
    }

    #[test]
    fn bare_scalar_is_legacy_literal() {
        let n = normalize_input_value(&json!(42)).unwrap();
        assert_eq!(n.tag, 1);
        assert_eq!(n.data, json!(42));
    }

    #[test]
    fn unknown_string_tag_lists_valid_ones() {
        let err = normalize_input_value(&json!(["bogus", 1])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Unknown input type"));
        assert!(msg.contains("\"literal\""));
    }

    #[test]
    fn wrong_length_list_errors() {
        let err = normalize_input_value(&json!(["literal", 1, 2])).unwrap_err();
        assert!(err.to_string().contains("exactly 2 elements"));
    }

    #[test]
    fn unknown_dict_key_lists_valid_ones() {
        let err = normalize_input_value(&json!({"bogus": 1})).unwrap_err();
        assert!(err.to_string().contains("Unknown input type(s)"));
    }
}
