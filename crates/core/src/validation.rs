use serde_json::{Map, Value};

use relay_shared::{ActionDescriptor, ParamSpec, ParamType, RelayError, RelayResult};

/// Validate an incoming parameter bag against an action's schema and return
/// the normalized map (defaults filled in for absent optional parameters).
///
/// Runs before execution begins: a failure here means zero progress updates
/// and no side effects. Unknown keys are passed through untouched.
pub fn validate_params(
    descriptor: &ActionDescriptor,
    params: Value,
) -> RelayResult<Map<String, Value>> {
    let mut map = match params {
        Value::Null => Map::new(),
        Value::Object(m) => m,
        other => {
            return Err(RelayError::InvalidArgument(format!(
                "parameter bag must be a JSON object, got {}",
                type_name(&other)
            )))
        }
    };

    for (name, spec) in &descriptor.params {
        match map.get(name) {
            None => {
                if let Some(default) = &spec.default {
                    map.insert(name.clone(), default.clone());
                } else if spec.required {
                    return Err(RelayError::InvalidArgument(format!(
                        "missing required parameter '{}'",
                        name
                    )));
                }
            }
            Some(value) => {
                if !type_matches(spec.ty, value) {
                    return Err(RelayError::InvalidArgument(format!(
                        "parameter '{}' expected {}, got {}",
                        name,
                        spec.ty,
                        type_name(value)
                    )));
                }
            }
        }
    }

    Ok(map)
}

/// Sanity-check a descriptor at registration time: a declared default must
/// match its own declared type, or every invocation would fail later.
pub fn validate_descriptor(descriptor: &ActionDescriptor) -> RelayResult<()> {
    if descriptor.name.trim().is_empty() {
        return Err(RelayError::Config("action name must not be empty".into()));
    }
    for (name, spec) in &descriptor.params {
        if let Some(default) = &spec.default {
            if !type_matches(spec.ty, default) {
                return Err(RelayError::Config(format!(
                    "action '{}': default for parameter '{}' is not a {}",
                    descriptor.name, name, spec.ty
                )));
            }
        }
    }
    Ok(())
}

fn type_matches(ty: ParamType, value: &Value) -> bool {
    match ty {
        ParamType::String => value.is_string(),
        ParamType::Integer => value.is_i64() || value.is_u64(),
        ParamType::Float => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Array => value.is_array(),
        ParamType::Object => value.is_object(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
