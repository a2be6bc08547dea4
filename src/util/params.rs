use serde_json::Value;

use crate::model::error::SdkError;

pub fn required_str(params: &Value, name: &str) -> Result<String, SdkError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| SdkError::missing_parameter(name))
}

pub fn optional_str(params: &Value, name: &str) -> Option<String> {
    params.get(name).and_then(Value::as_str).map(|s| s.to_string())
}

/// Reads `Body` as bytes. Accepts a string or an array of byte values; a missing
/// body is an empty object.
pub fn body_bytes(params: &Value) -> Result<Vec<u8>, SdkError> {
    match params.get("Body") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s.as_bytes().to_vec()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .filter(|b| *b <= u8::MAX as u64)
                    .map(|b| b as u8)
                    .ok_or_else(|| SdkError::new("InvalidParameterType", "Body must be bytes"))
            })
            .collect(),
        Some(_) => Err(SdkError::new(
            "InvalidParameterType",
            "Body must be a string or bytes",
        )),
    }
}

/// Parses `bytes=<start>-<end>` into an inclusive range.
pub fn parse_range(range: &str) -> Option<(u64, u64)> {
    let (start, end) = range.strip_prefix("bytes=")?.split_once('-')?;
    let start = start.parse().ok()?;
    let end = end.parse().ok()?;

    if start > end {
        return None;
    }

    Some((start, end))
}

/// True when every field of `expected` is present in `actual` with an equal
/// value, recursing into objects. Anything that is not an object must match
/// exactly.
pub fn is_subset(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => expected
            .iter()
            .all(|(k, v)| actual.get(k).is_some_and(|a| is_subset(v, a))),
        _ => expected == actual,
    }
}
