//! Values flowing through a template at render time.

use serde_json::Value;

use crate::encoding::{EncodedString, EncodedStringFactory};

/// A value tagged with the template offset it was produced at.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionTagged<T> {
    pub value: T,
    pub position: usize,
}

impl<T> PositionTagged<T> {
    pub fn new(value: T, position: usize) -> Self {
        Self { value, position }
    }
}

/// A model or literal value, or text that is already encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Json(Value),
    Encoded(EncodedString),
}

impl TemplateValue {
    pub fn null() -> Self {
        TemplateValue::Json(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TemplateValue::Json(Value::Null))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TemplateValue::Json(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Text form of the value before encoding; `None` for null.
    pub fn display_text(&self) -> Option<String> {
        match self {
            TemplateValue::Json(value) => json_text(value),
            TemplateValue::Encoded(encoded) => Some(encoded.as_str().to_string()),
        }
    }

    /// The text to write, encoding it through `encoder` unless it already is.
    pub fn encoded_text(&self, encoder: &dyn EncodedStringFactory) -> Option<String> {
        match self {
            TemplateValue::Encoded(encoded) => Some(encoded.as_str().to_string()),
            TemplateValue::Json(value) => {
                json_text(value).map(|text| encoder.create_encoded_string(&text).as_str().to_string())
            }
        }
    }
}

impl From<Value> for TemplateValue {
    fn from(value: Value) -> Self {
        TemplateValue::Json(value)
    }
}

impl From<EncodedString> for TemplateValue {
    fn from(value: EncodedString) -> Self {
        TemplateValue::Encoded(value)
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::Json(Value::String(value.to_string()))
    }
}

impl From<bool> for TemplateValue {
    fn from(value: bool) -> Self {
        TemplateValue::Json(Value::Bool(value))
    }
}

fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
