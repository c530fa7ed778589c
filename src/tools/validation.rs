//! Validate committed tool arguments against their JSON Schema.

use crate::error::{AgoraError, Result};

/// Validate tool arguments against a JSON Schema.
///
/// Checks the top-level object shape, required fields, property types, string
/// enums and the element type of arrays. Returns the first violation as
/// `InvalidArgument`; the runtime hands it back to the model as an error
/// result instead of executing the tool.
pub fn validate_arguments(args: &serde_json::Value, schema: &serde_json::Value) -> Result<()> {
    validate(args, schema).map_err(AgoraError::InvalidArgument)
}

fn validate(args: &serde_json::Value, schema: &serde_json::Value) -> std::result::Result<(), String> {
    if schema.get("type").and_then(|v| v.as_str()) == Some("object") && !args.is_object() {
        return Err(format!(
            "expected object arguments, got {}",
            json_type_name(args)
        ));
    }
    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        if let Some(missing) = required
            .iter()
            .filter_map(|field| field.as_str())
            .find(|name| obj.get(*name).map_or(true, |v| v.is_null()))
        {
            return Err(format!("missing required field '{missing}'"));
        }
    }

    let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) else {
        return Ok(());
    };
    for (key, value) in obj {
        let Some(prop) = properties.get(key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        check_value(key, value, prop)?;
        if let (Some(items), Some(elements)) = (prop.get("items"), value.as_array()) {
            for (index, element) in elements.iter().enumerate() {
                check_value(&format!("{key}[{index}]"), element, items)?;
            }
        }
    }
    Ok(())
}

fn check_value(
    key: &str,
    value: &serde_json::Value,
    schema: &serde_json::Value,
) -> std::result::Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(|v| v.as_str()) {
        if !value_matches_type(value, expected) {
            return Err(format!(
                "field '{key}' expected type '{expected}', got {}",
                json_type_name(value)
            ));
        }
    }
    if let Some(allowed) = schema.get("enum").and_then(|v| v.as_array()) {
        if !allowed.contains(value) {
            return Err(format!("field '{key}' must be one of {}", serde_json::Value::Array(allowed.clone())));
        }
    }
    Ok(())
}

fn value_matches_type(value: &serde_json::Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
