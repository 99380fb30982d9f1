//! Output-schema validation gate.
//!
//! Every step result is checked against the step's declared output schema
//! before it is handed to downstream steps. The schemas are the
//! JSON-Schema-like subset the process definitions actually use: `type`,
//! `required`, `properties`, `items`, `enum`, `const`, and
//! `additionalProperties: false`.

use serde_json::Value;
use thiserror::Error;

/// A step result that does not conform to its declared output schema
#[derive(Debug, Clone, Error)]
#[error("result for step '{step}' failed schema validation at {path}: {reason}")]
pub struct SchemaViolation {
    /// The step whose result was rejected
    pub step: String,

    /// JSON path of the offending value (e.g., "$.solution.cost")
    pub path: String,

    /// What was wrong
    pub reason: String,
}

/// Validate a step result against its declared output schema.
///
/// A null schema means the step declared no contract; everything passes.
pub fn validate_result(step: &str, value: &Value, schema: &Value) -> Result<(), SchemaViolation> {
    if schema.is_null() {
        return Ok(());
    }

    validate_value(value, schema, "$").map_err(|(path, reason)| SchemaViolation {
        step: step.to_string(),
        path,
        reason,
    })
}

fn validate_value(value: &Value, schema: &Value, path: &str) -> Result<(), (String, String)> {
    let schema_obj = schema
        .as_object()
        .ok_or_else(|| (path.to_string(), "schema must be an object".to_string()))?;

    if let Some(type_spec) = schema_obj.get("type") {
        validate_type(value, type_spec, path)?;
    }

    if let Some(constant) = schema_obj.get("const") {
        if value != constant {
            return Err((path.to_string(), format!("expected const {}", constant)));
        }
    }

    if let Some(variants) = schema_obj.get("enum").and_then(|v| v.as_array()) {
        if !variants.iter().any(|candidate| candidate == value) {
            return Err((
                path.to_string(),
                "not one of the allowed enum values".to_string(),
            ));
        }
    }

    if let Some(required) = schema_obj.get("required").and_then(|v| v.as_array()) {
        let object = value.as_object().ok_or_else(|| {
            (
                path.to_string(),
                "must be an object to satisfy required fields".to_string(),
            )
        })?;
        for key in required.iter().filter_map(|v| v.as_str()) {
            if !object.contains_key(key) {
                return Err((
                    path.to_string(),
                    format!("missing required field '{}'", key),
                ));
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(|v| v.as_object()) {
        let object = value.as_object().ok_or_else(|| {
            (
                path.to_string(),
                "must be an object for properties validation".to_string(),
            )
        })?;

        for (key, property_schema) in properties {
            if let Some(child) = object.get(key) {
                let child_path = format!("{}.{}", path, key);
                validate_value(child, property_schema, &child_path)?;
            }
        }

        if schema_obj
            .get("additionalProperties")
            .and_then(|v| v.as_bool())
            == Some(false)
        {
            for key in object.keys() {
                if !properties.contains_key(key) {
                    return Err((path.to_string(), format!("unknown field '{}'", key)));
                }
            }
        }
    }

    if let Some(item_schema) = schema_obj.get("items") {
        let array = value.as_array().ok_or_else(|| {
            (
                path.to_string(),
                "must be an array for items validation".to_string(),
            )
        })?;
        for (idx, item) in array.iter().enumerate() {
            let item_path = format!("{}[{}]", path, idx);
            validate_value(item, item_schema, &item_path)?;
        }
    }

    Ok(())
}

fn validate_type(value: &Value, type_spec: &Value, path: &str) -> Result<(), (String, String)> {
    let matches = |t: &str, v: &Value| match t {
        "object" => v.is_object(),
        "array" => v.is_array(),
        "string" => v.is_string(),
        "number" => v.is_number(),
        "integer" => v.as_i64().is_some() || v.as_u64().is_some(),
        "boolean" => v.is_boolean(),
        "null" => v.is_null(),
        _ => false,
    };

    match type_spec {
        Value::String(type_name) => {
            if matches(type_name, value) {
                Ok(())
            } else {
                Err((path.to_string(), format!("expected type '{}'", type_name)))
            }
        }
        Value::Array(types) => {
            let any_match = types
                .iter()
                .filter_map(|t| t.as_str())
                .any(|type_name| matches(type_name, value));
            if any_match {
                Ok(())
            } else {
                Err((
                    path.to_string(),
                    "did not match any allowed type".to_string(),
                ))
            }
        }
        _ => Err((
            path.to_string(),
            "schema.type must be a string or array".to_string(),
        )),
    }
}
