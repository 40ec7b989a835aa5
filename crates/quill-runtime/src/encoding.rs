//! Output encoding.
//!
//! Values written by a template pass through an [`EncodedStringFactory`]. The
//! default factory HTML-encodes; [`RawStringFactory`] passes text through for
//! non-HTML output. Values already wrapped in an [`EncodedString`] are written
//! as they are.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Text that is safe to write to the output without further encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodedString {
    /// Text that went through HTML encoding.
    Html(String),
    /// Text written verbatim.
    Raw(String),
}

impl EncodedString {
    pub fn html(text: &str) -> Self {
        EncodedString::Html(html_escape::encode_quoted_attribute(text).into_owned())
    }

    pub fn raw(text: impl Into<String>) -> Self {
        EncodedString::Raw(text.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            EncodedString::Html(s) | EncodedString::Raw(s) => s,
        }
    }
}

impl fmt::Display for EncodedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates [`EncodedString`]s for values written by a template.
pub trait EncodedStringFactory: fmt::Debug + Send + Sync {
    /// Encodes `text` for the output format.
    fn create_encoded_string(&self, text: &str) -> EncodedString;

    /// Wraps `text` that is already encoded.
    fn create_raw_string(&self, text: &str) -> EncodedString {
        EncodedString::raw(text)
    }
}

/// HTML-encodes `&`, `<`, `>`, `"` and `'`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlEncodedStringFactory;

impl EncodedStringFactory for HtmlEncodedStringFactory {
    fn create_encoded_string(&self, text: &str) -> EncodedString {
        EncodedString::html(text)
    }
}

/// Writes text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStringFactory;

impl EncodedStringFactory for RawStringFactory {
    fn create_encoded_string(&self, text: &str) -> EncodedString {
        EncodedString::raw(text)
    }
}
