//! Render-time errors.

/// Error raised while executing a compiled template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("model has no member `{path}`")]
    MissingMember { path: String },

    #[error("invalid number literal `{0}`")]
    InvalidNumber(String),

    #[error("template ABI error: {0}")]
    Abi(String),

    #[error("template ABI version {found} does not match host version {expected}")]
    AbiMismatch { expected: u32, found: u32 },

    #[error("template panicked: {0}")]
    Panicked(String),

    #[error("failed to write template output")]
    Write,
}

impl From<std::fmt::Error> for RenderError {
    fn from(_: std::fmt::Error) -> Self {
        RenderError::Write
    }
}

impl From<std::str::Utf8Error> for RenderError {
    fn from(err: std::str::Utf8Error) -> Self {
        RenderError::Abi(format!("string is not valid UTF-8: {err}"))
    }
}
