//! # Quill Runtime
//!
//! Everything a compiled template needs at render time.
//!
//! Compiled templates are dynamic libraries produced by a separate `rustc`
//! run. They cannot link against this crate, so the two sides meet at a small
//! C ABI ([`abi`]): the template calls back into the host through a vtable of
//! `extern "C"` functions, passing expressions as tagged strings. The host side
//! of that conversation is a [`TemplateInstance`], which evaluates expressions
//! against a `serde_json` model and a [`TemplateData`] bag, encodes output, and
//! buffers it until the render finishes.
//!
//! ## Attribute rendering
//!
//! [`write_attribute_to`] implements conditional attributes: fragments whose
//! value is `null` or `false` are dropped, `true` renders the attribute name,
//! and an attribute with nothing left to render disappears entirely.
//!
//! ## Generated-side source
//!
//! [`TEMPLATE_BASE_SOURCE`] is the MiniJinja template of the Rust source that
//! is compiled into every template library: the mirror of [`abi`] plus the
//! `TemplateBase` and `TemplateBaseOf<M>` types generated classes wrap. It is
//! rendered with the configured method names before compilation.

pub mod abi;
mod attribute;
mod data;
mod encoding;
mod error;
mod host;
mod instance;
mod value;

pub use attribute::{write_attribute_to, AttributeValue, TemplateOutput};
pub use data::TemplateData;
pub use encoding::{EncodedString, EncodedStringFactory, HtmlEncodedStringFactory, RawStringFactory};
pub use error::RenderError;
pub use host::HOST_VTABLE;
pub use instance::{HostExpr, TemplateInstance, WriteMode, DATA_ROOT, MODEL_ROOT};
pub use value::{PositionTagged, TemplateValue};

/// MiniJinja source of the generated-side base template types.
///
/// Expects `abi_version` and a `names` object carrying the method names.
pub const TEMPLATE_BASE_SOURCE: &str = include_str!("template_base.rs.jinja");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_source_mirrors_the_abi() {
        for symbol in [
            "pub struct FfiStr",
            "pub struct FfiExpr",
            "pub struct FfiAttributeValue",
            "pub struct HostVTable",
            "pub struct TemplateTypeInfo",
            "pub struct TemplateBase",
            "pub struct TemplateBaseOf<M: ModelMarker>",
        ] {
            assert!(TEMPLATE_BASE_SOURCE.contains(symbol), "missing {symbol}");
        }
        assert!(TEMPLATE_BASE_SOURCE.contains("{{ abi_version }}"));
    }
}
