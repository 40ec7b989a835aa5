//! # Quill compiler
//!
//! Everything between generated source and a library on disk:
//!
//! - [`CompilerReference`] describes a dependency of generated code (a file,
//!   a loaded module, a byte stream) and [`ReferenceRegistry`] collects them.
//! - [`loaded_modules`] lists the shared libraries in the current process.
//! - [`CompilerBackend`] compiles source; [`RustcBackend`] drives `rustc`
//!   with JSON diagnostics, a timeout and a private scratch directory.
//! - [`CompilationData`] owns that scratch directory and removes it once.
//!
//! ```no_run
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//! use quill_compiler::{CompileRequest, CompilerBackend, CompilerSettings, ReferenceRegistry, RustcBackend};
//!
//! let backend = RustcBackend::new(CompilerSettings::default(), Arc::new(ReferenceRegistry::new()));
//! let namespaces = BTreeSet::new();
//! let output = backend
//!     .compile(CompileRequest {
//!         source: "#[no_mangle] pub extern \"C\" fn answer() -> u32 { 42 }",
//!         assembly_name: "Answer",
//!         namespaces: &namespaces,
//!         references: &[],
//!     })
//!     .unwrap();
//! assert!(!output.has_errors());
//! ```

mod backend;
mod compilation;
mod diagnostics;
mod module;
mod reference;
mod registry;

pub use backend::{
    crate_roots, BackendError, BackendOutput, CompileRequest, CompilerBackend, CompilerSettings,
    RustcBackend, COMPILER_LOG, GENERATED_SOURCE_FILE, IMPLICIT_CRATES,
};
pub use compilation::{create_scratch_directory, CompilationData, SCRATCH_ATTEMPTS};
pub use diagnostics::{parse_rustc_diagnostics, CompilerError};
pub use module::{
    is_rust_library_name, is_shared_library_name, loaded_modules, parse_library_file_name,
    parse_proc_maps, LoadedModule, ModuleVersion, RUST_LIBRARY_EXTENSIONS,
};
pub use reference::{CompilerReference, ReferenceError, StreamReference};
pub use registry::ReferenceRegistry;
