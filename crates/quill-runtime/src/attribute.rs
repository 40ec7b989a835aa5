//! Rendering of HTML attributes whose value contains expressions.
//!
//! `<p class="foo @a bar">` is split into fragments `foo`, `@a` and `bar`, each
//! with the whitespace before it as prefix. Rendering drops fragments whose
//! value is `null` or `false`, renders `true` as the attribute name, and omits
//! the whole attribute when no fragment produced output.

use serde_json::Value;

use crate::encoding::EncodedStringFactory;
use crate::value::{PositionTagged, TemplateValue};

/// One fragment of an attribute value.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValue {
    pub prefix: PositionTagged<String>,
    pub value: PositionTagged<TemplateValue>,
    /// Literal fragments are written without encoding.
    pub literal: bool,
}

impl AttributeValue {
    pub fn literal(prefix: (&str, usize), value: (&str, usize)) -> Self {
        Self {
            prefix: PositionTagged::new(prefix.0.to_string(), prefix.1),
            value: PositionTagged::new(TemplateValue::from(value.0), value.1),
            literal: true,
        }
    }

    pub fn dynamic(prefix: (&str, usize), value: TemplateValue, position: usize) -> Self {
        Self {
            prefix: PositionTagged::new(prefix.0.to_string(), prefix.1),
            value: PositionTagged::new(value, position),
            literal: false,
        }
    }
}

/// Where rendered template text goes.
pub trait TemplateOutput {
    fn write_literal(&mut self, text: &str);

    fn encoder(&self) -> &dyn EncodedStringFactory;

    /// Writes `value`, encoding it unless it is already encoded. Null writes nothing.
    fn write_value(&mut self, value: &TemplateValue) {
        if let Some(text) = value.encoded_text(self.encoder()) {
            self.write_literal(&text);
        }
    }
}

/// Renders one attribute to `out`.
///
/// With no fragments the prefix and suffix are written as they are.
pub fn write_attribute_to<O: TemplateOutput + ?Sized>(
    out: &mut O,
    name: &str,
    prefix: &PositionTagged<String>,
    suffix: &PositionTagged<String>,
    values: &[AttributeValue],
) {
    if values.is_empty() {
        out.write_literal(&prefix.value);
        out.write_literal(&suffix.value);
        return;
    }

    let mut first = true;
    let mut wrote_something = false;
    for fragment in values {
        let value = match &fragment.value.value {
            v if v.is_null() => continue,
            v => match v.as_bool() {
                Some(false) => continue,
                Some(true) => TemplateValue::Json(Value::String(name.to_string())),
                None => v.clone(),
            },
        };

        if first {
            out.write_literal(&prefix.value);
            first = false;
        } else {
            out.write_literal(&fragment.prefix.value);
        }

        if fragment.literal {
            if let Some(text) = value.display_text() {
                out.write_literal(&text);
            }
        } else {
            out.write_value(&value);
        }
        wrote_something = true;
    }

    if wrote_something {
        out.write_literal(&suffix.value);
    }
}
