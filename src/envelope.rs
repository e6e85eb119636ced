//! Request envelope rendering and parsing.
//!
//! A request travels as one JSON object with two fields: `name`, the
//! function to call, and `args`, the value handed to it. Responses are
//! not enveloped; a handler's result crosses back as a bare JSON value.

use serde_json::{Value, json};

use crate::error::Error;

/// Renders a call envelope.
pub(crate) fn build(name: &str, args: &Value) -> Value {
    json!({ "name": name, "args": args })
}

/// Splits received text into the target function name and its argument.
///
/// Rejects text that is not a JSON object, lacks either field, or names
/// the function with anything but a string.
pub(crate) fn split(text: &str) -> Result<(String, Value), Error> {
    let value: Value = serde_json::from_str(text).map_err(|_| Error::BadJson)?;
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or(Error::BadJson)?
        .to_owned();
    let args = value.get("args").cloned().ok_or(Error::BadJson)?;
    Ok((name, args))
}
