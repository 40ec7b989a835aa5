//! Host callbacks handed to compiled templates.
//!
//! Each callback receives the opaque writer pointer created by
//! [`TemplateInstance::execute`](crate::TemplateInstance::execute). Panics are
//! caught here and recorded on the instance; nothing unwinds into the
//! template library.

use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};

use crate::abi::{FfiAttributeValue, FfiExpr, FfiStr, HostVTable, ABI_VERSION};
use crate::attribute::{AttributeValue, TemplateOutput};
use crate::error::RenderError;
use crate::instance::{HostExpr, TemplateInstance, WriteMode};
use crate::value::PositionTagged;

pub static HOST_VTABLE: HostVTable = HostVTable {
    abi_version: ABI_VERSION,
    write_to: host_write_to,
    write_literal_to: host_write_literal_to,
    write_attribute_to: host_write_attribute_to,
    fail: host_fail,
};

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// # Safety
///
/// `expr.text` must be valid for `'a`.
unsafe fn decode_expr<'a>(expr: &FfiExpr) -> Result<(HostExpr<'a>, WriteMode), RenderError> {
    let text = expr.text.as_str()?;
    let value = match expr.kind {
        FfiExpr::PATH => HostExpr::Path(text),
        FfiExpr::STRING => HostExpr::Str(text),
        FfiExpr::NUMBER => HostExpr::Number(text),
        FfiExpr::TRUE => HostExpr::Bool(true),
        FfiExpr::FALSE => HostExpr::Bool(false),
        FfiExpr::NULL => HostExpr::Null,
        other => return Err(RenderError::Abi(format!("unknown expression kind {other}"))),
    };
    let mode = match expr.mode {
        FfiExpr::MODE_DEFAULT => WriteMode::Default,
        FfiExpr::MODE_RAW => WriteMode::Raw,
        FfiExpr::MODE_ENCODE => WriteMode::Encode,
        other => return Err(RenderError::Abi(format!("unknown write mode {other}"))),
    };
    Ok((value, mode))
}

fn guarded<F>(writer: *mut c_void, f: F)
where
    F: FnOnce(&mut TemplateInstance) -> Result<(), RenderError>,
{
    // SAFETY: the writer pointer is the instance passed to `execute`, which
    // outlives the template call.
    let Some(instance) = (unsafe { (writer as *mut TemplateInstance).as_mut() }) else {
        return;
    };
    if instance.has_failed() {
        return;
    }
    match panic::catch_unwind(AssertUnwindSafe(|| f(&mut *instance))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => instance.fail(err),
        Err(payload) => instance.fail(RenderError::Panicked(panic_message(payload.as_ref()))),
    }
}

unsafe extern "C" fn host_write_to(writer: *mut c_void, value: FfiExpr) {
    guarded(writer, |instance| {
        let (expr, mode) = unsafe { decode_expr(&value)? };
        instance.write_expr(expr, mode);
        Ok(())
    });
}

unsafe extern "C" fn host_write_literal_to(writer: *mut c_void, text: FfiStr) {
    guarded(writer, |instance| {
        let text = unsafe { text.as_str()? };
        instance.write_literal(text);
        Ok(())
    });
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn host_write_attribute_to(
    writer: *mut c_void,
    name: FfiStr,
    prefix: FfiStr,
    prefix_position: usize,
    suffix: FfiStr,
    suffix_position: usize,
    values: *const FfiAttributeValue,
    count: usize,
) {
    guarded(writer, |instance| {
        let fragments: &[FfiAttributeValue] = if values.is_null() || count == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(values, count) }
        };

        let mut decoded = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let fragment_prefix = unsafe { fragment.prefix.as_str()? };
            let value = if fragment.literal {
                let text = unsafe { fragment.value.text.as_str()? };
                AttributeValue::literal(
                    (fragment_prefix, fragment.prefix_position),
                    (text, fragment.value_position),
                )
            } else {
                let (expr, mode) = unsafe { decode_expr(&fragment.value)? };
                AttributeValue::dynamic(
                    (fragment_prefix, fragment.prefix_position),
                    instance.evaluate(expr, mode)?,
                    fragment.value_position,
                )
            };
            decoded.push(value);
        }

        let name = unsafe { name.as_str()? };
        let prefix = PositionTagged::new(unsafe { prefix.as_str()? }.to_string(), prefix_position);
        let suffix = PositionTagged::new(unsafe { suffix.as_str()? }.to_string(), suffix_position);
        instance.write_attribute(name, &prefix, &suffix, &decoded);
        Ok(())
    });
}

unsafe extern "C" fn host_fail(writer: *mut c_void, message: FfiStr) {
    guarded(writer, |_| {
        let message = unsafe { message.as_str() }.unwrap_or("template failed");
        Err(RenderError::Panicked(message.to_string()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TemplateData;
    use crate::encoding::HtmlEncodedStringFactory;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn with_instance(model: Value, f: impl FnOnce(*mut c_void)) -> Result<String, RenderError> {
        let mut instance =
            TemplateInstance::new(model, TemplateData::new(), Arc::new(HtmlEncodedStringFactory));
        f(&mut instance as *mut TemplateInstance as *mut c_void);
        instance.finish()
    }

    fn expr(kind: u32, mode: u32, text: &'static str) -> FfiExpr {
        FfiExpr {
            kind,
            mode,
            text: FfiStr::from_static(text),
        }
    }

    #[test]
    fn vtable_writes_literals_and_values() {
        let out = with_instance(json!({"Name": "<Ada>"}), |w| unsafe {
            (HOST_VTABLE.write_literal_to)(w, FfiStr::from_static("Hi "));
            (HOST_VTABLE.write_to)(w, expr(FfiExpr::PATH, FfiExpr::MODE_DEFAULT, "Name"));
            (HOST_VTABLE.write_to)(w, expr(FfiExpr::STRING, FfiExpr::MODE_RAW, "<br>"));
        });
        assert_eq!(out.unwrap(), "Hi &lt;Ada&gt;<br>");
    }

    #[test]
    fn vtable_renders_attributes() {
        let values = [
            FfiAttributeValue {
                prefix: FfiStr::from_static(""),
                prefix_position: 10,
                value: expr(FfiExpr::STRING, FfiExpr::MODE_DEFAULT, "foo"),
                value_position: 10,
                literal: true,
            },
            FfiAttributeValue {
                prefix: FfiStr::from_static(" "),
                prefix_position: 13,
                value: expr(FfiExpr::PATH, FfiExpr::MODE_DEFAULT, "f"),
                value_position: 14,
                literal: false,
            },
        ];
        let out = with_instance(json!({"f": null}), |w| unsafe {
            (HOST_VTABLE.write_attribute_to)(
                w,
                FfiStr::from_static("class"),
                FfiStr::from_static(" class=\""),
                2,
                FfiStr::from_static("\""),
                20,
                values.as_ptr(),
                values.len(),
            );
        });
        assert_eq!(out.unwrap(), r#" class="foo""#);
    }

    #[test]
    fn unknown_kind_is_an_abi_error() {
        let out = with_instance(Value::Null, |w| unsafe {
            (HOST_VTABLE.write_to)(w, expr(99, 0, ""));
        });
        assert!(matches!(out, Err(RenderError::Abi(_))));
    }

    #[test]
    fn fail_records_the_message() {
        let out = with_instance(Value::Null, |w| unsafe {
            (HOST_VTABLE.fail)(w, FfiStr::from_static("boom"));
        });
        assert_eq!(out, Err(RenderError::Panicked("boom".into())));
    }

    #[test]
    fn null_writer_is_ignored() {
        unsafe {
            (HOST_VTABLE.write_literal_to)(std::ptr::null_mut(), FfiStr::from_static("x"));
        }
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(3);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
