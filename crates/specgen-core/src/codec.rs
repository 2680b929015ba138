//! Conversion of values across the sandbox boundary.
//!
//! Host values travel into the sandbox as JSON text materialized by the
//! engine's own JSON parser, so any `serde_json::Value` arrives with its
//! natural JavaScript shape. Results come back as a [`ScriptValue`].

use rquickjs::{Ctx, Value};
use serde_json::Value as JsonValue;

/// A value returned from the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    String(String),
    Int(i32),
    /// Anything else, with its JavaScript type name and JSON text if it has one.
    Opaque {
        kind: &'static str,
        json: Option<String>,
    },
}

impl ScriptValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScriptValue::String(_) => "string",
            ScriptValue::Int(_) => "int",
            ScriptValue::Opaque { kind, .. } => kind,
        }
    }
}

/// Materialize a JSON value inside the sandbox.
pub fn to_js<'js>(ctx: &Ctx<'js>, value: &JsonValue) -> rquickjs::Result<Value<'js>> {
    let text = serde_json::to_string(value)
        .map_err(|e| rquickjs::Error::new_from_js_message("json", "value", e.to_string()))?;
    ctx.json_parse(text)
}

/// Convert a sandbox value for the host.
pub fn from_js<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<ScriptValue> {
    if let Some(s) = value.as_string() {
        return Ok(ScriptValue::String(s.to_string()?));
    }
    if let Some(n) = value.as_int() {
        return Ok(ScriptValue::Int(n));
    }
    if let Some(n) = value.as_float().and_then(integral_i32) {
        return Ok(ScriptValue::Int(n));
    }

    let kind = value.type_of().as_str();
    let json = match ctx.json_stringify(value) {
        Ok(Some(text)) => Some(text.to_string()?),
        Ok(None) | Err(_) => None,
    };
    Ok(ScriptValue::Opaque { kind, json })
}

#[allow(clippy::cast_possible_truncation)]
fn integral_i32(n: f64) -> Option<i32> {
    if n.fract() == 0.0 && n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX) {
        Some(n as i32)
    } else {
        None
    }
}
