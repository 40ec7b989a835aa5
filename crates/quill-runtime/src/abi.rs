//! C ABI shared between the host process and compiled template libraries.
//!
//! Compiled templates are `cdylib`s built by a separate `rustc` invocation, so
//! nothing Rust-specific may cross the boundary. Everything here is `#[repr(C)]`
//! and mirrored field-for-field by the generated-side base source
//! (`template_base.rs.jinja`). Bump [`ABI_VERSION`] whenever either side changes.

use std::ffi::c_void;
use std::str::Utf8Error;

/// Version of the layout below. Checked on load and before every execution.
pub const ABI_VERSION: u32 = 1;

/// Prefix of the per-type export, see [`type_symbol_name`].
pub const TYPE_SYMBOL_PREFIX: &str = "quill_type__";

/// Export listing every template type a library contains.
pub const MODULE_TYPES_SYMBOL: &str = "quill_module_types";

/// Name of the `#[no_mangle]` function returning the [`TemplateTypeInfo`] of
/// the type with the given dotted full name.
///
/// ```
/// use quill_runtime::abi::type_symbol_name;
///
/// assert_eq!(
///     type_symbol_name("CompiledTemplates.Dynamic.Home"),
///     "quill_type__CompiledTemplates_Dynamic_Home"
/// );
/// ```
pub fn type_symbol_name(full_name: &str) -> String {
    format!("{TYPE_SYMBOL_PREFIX}{}", full_name.replace('.', "_"))
}

/// Borrowed UTF-8 string.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiStr {
    pub ptr: *const u8,
    pub len: usize,
}

// Only ever built from `&str` data that outlives the call, or from statics.
unsafe impl Send for FfiStr {}
unsafe impl Sync for FfiStr {}

impl FfiStr {
    pub const fn from_static(s: &'static str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    pub fn new(s: &str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// # Safety
    ///
    /// `ptr` must point at `len` readable bytes that live for `'a`.
    pub unsafe fn as_str<'a>(&self) -> Result<&'a str, Utf8Error> {
        if self.ptr.is_null() || self.len == 0 {
            return Ok("");
        }
        let bytes = std::slice::from_raw_parts(self.ptr, self.len);
        std::str::from_utf8(bytes)
    }
}

/// An expression handed from generated code to the host for evaluation.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiExpr {
    pub kind: u32,
    pub mode: u32,
    pub text: FfiStr,
}

impl FfiExpr {
    pub const PATH: u32 = 0;
    pub const STRING: u32 = 1;
    pub const NUMBER: u32 = 2;
    pub const TRUE: u32 = 3;
    pub const FALSE: u32 = 4;
    pub const NULL: u32 = 5;

    pub const MODE_DEFAULT: u32 = 0;
    pub const MODE_RAW: u32 = 1;
    pub const MODE_ENCODE: u32 = 2;
}

/// One fragment of a dynamic attribute.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiAttributeValue {
    pub prefix: FfiStr,
    pub prefix_position: usize,
    pub value: FfiExpr,
    pub value_position: usize,
    pub literal: bool,
}

pub type WriteToFn = unsafe extern "C" fn(writer: *mut c_void, value: FfiExpr);
pub type WriteLiteralToFn = unsafe extern "C" fn(writer: *mut c_void, text: FfiStr);
pub type WriteAttributeToFn = unsafe extern "C" fn(
    writer: *mut c_void,
    name: FfiStr,
    prefix: FfiStr,
    prefix_position: usize,
    suffix: FfiStr,
    suffix_position: usize,
    values: *const FfiAttributeValue,
    count: usize,
);
pub type FailFn = unsafe extern "C" fn(writer: *mut c_void, message: FfiStr);

/// Callbacks the host exposes to generated code.
#[repr(C)]
pub struct HostVTable {
    pub abi_version: u32,
    pub write_to: WriteToFn,
    pub write_literal_to: WriteLiteralToFn,
    pub write_attribute_to: WriteAttributeToFn,
    pub fail: FailFn,
}

pub type ExecuteFn = unsafe extern "C" fn(writer: *mut c_void, host: *const HostVTable);

/// Static description of a compiled template type.
#[repr(C)]
pub struct TemplateTypeInfo {
    pub abi_version: u32,
    pub full_name: FfiStr,
    pub base_type: FfiStr,
    pub model_type: FfiStr,
    pub execute: ExecuteFn,
}

/// Signature of the per-type export.
pub type TypeInfoFn = unsafe extern "C" fn() -> *const TemplateTypeInfo;

/// Signature of [`MODULE_TYPES_SYMBOL`]; writes the entry count to `len`.
pub type ModuleTypesFn = unsafe extern "C" fn(len: *mut usize) -> *const FfiStr;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffi_str_round_trips_borrowed_text() {
        let owned = String::from("héllo");
        let ffi = FfiStr::new(&owned);
        assert_eq!(unsafe { ffi.as_str() }.unwrap(), "héllo");
    }

    #[test]
    fn null_ffi_str_reads_as_empty() {
        let ffi = FfiStr {
            ptr: std::ptr::null(),
            len: 0,
        };
        assert_eq!(unsafe { ffi.as_str() }.unwrap(), "");
    }

    #[test]
    fn invalid_utf8_is_reported() {
        static BYTES: [u8; 2] = [0xff, 0xfe];
        let ffi = FfiStr {
            ptr: BYTES.as_ptr(),
            len: BYTES.len(),
        };
        assert!(unsafe { ffi.as_str() }.is_err());
    }

    #[test]
    fn symbol_name_replaces_dots() {
        assert_eq!(type_symbol_name("A.B.C"), "quill_type__A_B_C");
        assert_eq!(type_symbol_name("Plain"), "quill_type__Plain");
    }
}
