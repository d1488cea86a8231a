use serde_json::Value;

use super::{ArgValue, TypeTag};

#[derive(Debug, Clone, PartialEq)]
pub struct CoercionFailure {
    pub tag: TypeTag,
    pub raw: Value,
}

pub fn coerce(tag: TypeTag, raw: &Value) -> Result<ArgValue, CoercionFailure> {
    let failure = || CoercionFailure {
        tag,
        raw: raw.clone(),
    };
    match tag {
        TypeTag::Float => to_float(raw).map(ArgValue::Float).ok_or_else(failure),
        TypeTag::Int => to_int(raw).map(ArgValue::Int).ok_or_else(failure),
        TypeTag::Bool => Ok(ArgValue::Bool(truthy(raw))),
        TypeTag::String => Ok(ArgValue::Text(stringify(raw))),
        TypeTag::Image | TypeTag::Unknown => Ok(ArgValue::Raw(raw.clone())),
    }
}

fn to_float(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn to_int(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.is_finite())
                .map(f64::trunc)
                .filter(|value| *value >= i64::MIN as f64 && *value <= i64::MAX as f64)
                .map(|value| value as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        Value::Bool(flag) => Some(i64::from(*flag)),
        _ => None,
    }
}

fn truthy(raw: &Value) -> bool {
    match raw {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
    }
}

fn stringify(raw: &Value) -> String {
    match raw {
        Value::String(text) => text.clone(),
        Value::Bool(true) => String::from("True"),
        Value::Bool(false) => String::from("False"),
        Value::Null => String::from("None"),
        other => other.to_string(),
    }
}
