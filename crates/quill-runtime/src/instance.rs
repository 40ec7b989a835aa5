//! The host-side object a compiled template writes into.
//!
//! A [`TemplateInstance`] lives for one render. Generated code only ever sees
//! an opaque pointer to it and calls back through the host vtable; the instance
//! evaluates expressions against the model and data bag and buffers output so
//! that a failed render never leaves partial text in the caller's sink.

use std::ffi::c_void;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::abi::{TemplateTypeInfo, ABI_VERSION};
use crate::attribute::{write_attribute_to, AttributeValue, TemplateOutput};
use crate::data::TemplateData;
use crate::encoding::{EncodedString, EncodedStringFactory};
use crate::error::RenderError;
use crate::host::HOST_VTABLE;
use crate::value::{PositionTagged, TemplateValue};

/// Root name that always refers to the model.
pub const MODEL_ROOT: &str = "Model";
/// Root name that always refers to the data bag.
pub const DATA_ROOT: &str = "TemplateData";

/// An expression decoded from generated code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostExpr<'a> {
    Path(&'a str),
    Str(&'a str),
    Number(&'a str),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Default,
    /// Value is already encoded.
    Raw,
    /// Value is always HTML-encoded.
    Encode,
}

pub struct TemplateInstance {
    model: Value,
    data: TemplateData,
    encoder: Arc<dyn EncodedStringFactory>,
    output: String,
    error: Option<RenderError>,
}

impl std::fmt::Debug for TemplateInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateInstance")
            .field("model", &self.model)
            .field("data", &self.data)
            .field("encoder", &self.encoder)
            .field("buffered", &self.output.len())
            .field("error", &self.error)
            .finish()
    }
}

/// Looks up one path segment: an object key or an array index.
pub(crate) fn member<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn walk<'v>(mut value: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    for segment in segments {
        value = member(value, segment)?;
    }
    Some(value)
}

/// Parses a number literal. Negative zero becomes zero.
fn parse_number(text: &str) -> Result<serde_json::Number, RenderError> {
    let number: serde_json::Number =
        serde_json::from_str(text).map_err(|_| RenderError::InvalidNumber(text.to_string()))?;
    match number.as_f64() {
        Some(f) if f == 0.0 && f.is_sign_negative() => Ok(if text.contains(['.', 'e', 'E']) {
            serde_json::Number::from_f64(0.0).unwrap_or_else(|| 0.into())
        } else {
            0.into()
        }),
        _ => Ok(number),
    }
}

impl TemplateInstance {
    pub fn new(model: Value, data: TemplateData, encoder: Arc<dyn EncodedStringFactory>) -> Self {
        Self {
            model,
            data,
            encoder,
            output: String::new(),
            error: None,
        }
    }

    pub fn model(&self) -> &Value {
        &self.model
    }

    pub fn data(&self) -> &TemplateData {
        &self.data
    }

    /// Text buffered so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Records `error`; only the first error is kept and further writes are ignored.
    pub fn fail(&mut self, error: RenderError) {
        if self.error.is_none() {
            warn!(error = %error, "template render failed");
            self.error = Some(error);
        }
    }

    /// Resolves a dotted member path.
    ///
    /// `Model.` paths read the model and `TemplateData.` paths read the data bag.
    /// A bare path reads the model when it has the first member, otherwise the
    /// data bag. Missing model members are an error; missing data keys are null.
    pub fn resolve_path(&self, path: &str) -> Result<Value, RenderError> {
        let missing = || RenderError::MissingMember {
            path: path.to_string(),
        };
        let segments: Vec<&str> = path.split('.').collect();
        let (head, rest) = match segments.split_first() {
            Some((head, rest)) => (*head, rest),
            None => return Err(missing()),
        };

        match head {
            MODEL_ROOT => walk(&self.model, rest).cloned().ok_or_else(missing),
            DATA_ROOT if rest.is_empty() => Ok(self.data.to_value()),
            DATA_ROOT => Ok(self.data.lookup(&rest.join("."))),
            _ => match member(&self.model, head) {
                Some(first) => walk(first, rest).cloned().ok_or_else(missing),
                None if self.data.contains_key(head) => Ok(self.data.lookup(path)),
                None => Err(missing()),
            },
        }
    }

    pub fn evaluate(&self, expr: HostExpr<'_>, mode: WriteMode) -> Result<TemplateValue, RenderError> {
        let value = match expr {
            HostExpr::Path(path) => TemplateValue::Json(self.resolve_path(path)?),
            HostExpr::Str(text) => TemplateValue::from(text),
            HostExpr::Number(text) => TemplateValue::Json(Value::Number(parse_number(text)?)),
            HostExpr::Bool(b) => TemplateValue::from(b),
            HostExpr::Null => TemplateValue::null(),
        };

        Ok(match (mode, value.display_text()) {
            (WriteMode::Default, _) | (_, None) => value,
            (WriteMode::Raw, Some(text)) => EncodedString::raw(text).into(),
            (WriteMode::Encode, Some(text)) => EncodedString::html(&text).into(),
        })
    }

    pub fn write_expr(&mut self, expr: HostExpr<'_>, mode: WriteMode) {
        if self.has_failed() {
            return;
        }
        match self.evaluate(expr, mode) {
            Ok(value) => self.write_value(&value),
            Err(err) => self.fail(err),
        }
    }

    pub fn write_attribute(
        &mut self,
        name: &str,
        prefix: &PositionTagged<String>,
        suffix: &PositionTagged<String>,
        values: &[AttributeValue],
    ) {
        if self.has_failed() {
            return;
        }
        write_attribute_to(self, name, prefix, suffix, values);
    }

    /// Runs the compiled template and returns its output.
    ///
    /// # Safety
    ///
    /// `info` must come from a loaded template library that is still loaded.
    pub unsafe fn execute(mut self, info: &TemplateTypeInfo) -> Result<String, RenderError> {
        if info.abi_version != ABI_VERSION {
            return Err(RenderError::AbiMismatch {
                expected: ABI_VERSION,
                found: info.abi_version,
            });
        }
        let name = info.full_name.as_str().unwrap_or("<unnamed>");
        let writer = &mut self as *mut TemplateInstance as *mut c_void;
        (info.execute)(writer, &HOST_VTABLE);
        debug!(template = name, bytes = self.output.len(), failed = self.has_failed(), "template executed");
        self.finish()
    }

    /// The buffered output, or the first recorded error.
    pub fn finish(self) -> Result<String, RenderError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.output),
        }
    }
}

impl TemplateOutput for TemplateInstance {
    fn write_literal(&mut self, text: &str) {
        if self.error.is_none() {
            self.output.push_str(text);
        }
    }

    fn encoder(&self) -> &dyn EncodedStringFactory {
        self.encoder.as_ref()
    }
}
