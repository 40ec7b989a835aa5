//! Loading compiled template libraries.
//!
//! By default the library file is opened in place. With temp file locking
//! disabled the bytes are read first and the library is opened from a copy
//! (an anonymous memory file on Linux, a shadow file elsewhere), so the
//! scratch directory can be deleted while the template is in use.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use quill_compiler::{BackendOutput, CompilationData};
use quill_runtime::abi::{
    type_symbol_name, FfiStr, ModuleTypesFn, TemplateTypeInfo, TypeInfoFn, ABI_VERSION, MODULE_TYPES_SYMBOL,
};
use quill_runtime::{RenderError, TemplateInstance};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::TypeContext;
use crate::error::{QuillError, TemplateCompilationError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open template library {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("failed to read template library {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy template library into memory: {0}")]
    Memory(#[source] io::Error),

    #[error("template library {} exports no types", path.display())]
    NoTypes { path: PathBuf },

    #[error("type `{name}` not found in template library; it exports: {}", found.join(", "))]
    TypeNotFound { name: String, found: Vec<String> },

    #[error("template library ABI version {found} does not match host version {expected}")]
    AbiMismatch { expected: u32, found: u32 },

    #[error("malformed template library: {0}")]
    Malformed(String),
}

/// An opened library plus whatever keeps its backing file valid.
///
/// Fields drop in order: the library is closed before its backing file goes.
struct LoadedLibrary {
    library: Library,
    _memory: Option<fs::File>,
    _shadow: Option<ShadowFile>,
}

/// A copy of a library file, removed once the library is closed.
#[cfg_attr(target_os = "linux", allow(dead_code))]
struct ShadowFile(PathBuf);

impl Drop for ShadowFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.0) {
            debug!(path = %self.0.display(), error = %err, "could not remove shadow library");
        }
    }
}

/// A template type exported by a loaded library.
///
/// Cloning shares the library; it is closed when the last clone drops.
#[derive(Clone)]
pub struct TemplateType {
    info: *const TemplateTypeInfo,
    full_name: String,
    base_type: String,
    model_type: String,
    path: PathBuf,
    // Never read; holding it keeps `info` valid.
    _library: Arc<LoadedLibrary>,
}

// `info` points at an immutable static inside `_library`, which the type keeps alive.
unsafe impl Send for TemplateType {}
unsafe impl Sync for TemplateType {}

impl fmt::Debug for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateType")
            .field("full_name", &self.full_name)
            .field("base_type", &self.base_type)
            .field("model_type", &self.model_type)
            .field("path", &self.path)
            .finish()
    }
}

impl TemplateType {
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn base_type_name(&self) -> &str {
        &self.base_type
    }

    /// The model type the template was compiled for, `dynamic` if none.
    pub fn model_type_name(&self) -> &str {
        &self.model_type
    }

    /// The file the library was compiled to.
    pub fn library_path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &TemplateTypeInfo {
        // SAFETY: the library holding the static is owned by `self`.
        unsafe { &*self.info }
    }

    /// Executes the template against `instance`.
    pub fn run(&self, instance: TemplateInstance) -> Result<String, RenderError> {
        // SAFETY: `info` came from this library and the library is loaded.
        unsafe { instance.execute(self.info()) }
    }
}

/// Opens compiled libraries and finds the generated template type in them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeLoader {
    disable_temp_file_locking: bool,
}

impl TypeLoader {
    pub fn new(disable_temp_file_locking: bool) -> Self {
        Self {
            disable_temp_file_locking,
        }
    }

    /// Turns backend output into a loaded type.
    ///
    /// Output with errors becomes a compilation failure that owns the
    /// scratch directory.
    pub fn load(
        &self,
        output: BackendOutput,
        context: &TypeContext,
    ) -> Result<(TemplateType, CompilationData), QuillError> {
        if output.has_errors() {
            return Err(TemplateCompilationError::new(
                output.errors,
                Some(output.compilation_data),
                context.template_content.clone(),
            )
            .into());
        }
        for warning in &output.errors {
            debug!(class = %context.class_name, %warning, "compiler warning");
        }
        let template_type = self.load_type(&output.library_path, &context.full_name())?;
        Ok((template_type, output.compilation_data))
    }

    /// Opens `path` and looks up the type `full_name`.
    pub fn load_type(&self, path: &Path, full_name: &str) -> Result<TemplateType, LoadError> {
        let library = Arc::new(if self.disable_temp_file_locking {
            open_copy(path)?
        } else {
            open_in_place(path)?
        });
        let template_type = find_type(library, path, full_name)?;
        info!(
            template = %template_type.full_name,
            model = %template_type.model_type,
            in_memory = self.disable_temp_file_locking,
            "template type loaded"
        );
        Ok(template_type)
    }
}

fn open_library(path: &Path) -> Result<Library, LoadError> {
    // SAFETY: template libraries run no initialisers beyond Rust statics.
    unsafe { Library::new(path) }.map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn open_in_place(path: &Path) -> Result<LoadedLibrary, LoadError> {
    Ok(LoadedLibrary {
        library: open_library(path)?,
        _memory: None,
        _shadow: None,
    })
}

fn read_library(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(target_os = "linux")]
fn open_copy(path: &Path) -> Result<LoadedLibrary, LoadError> {
    use std::ffi::CString;
    use std::io::Write;
    use std::os::fd::FromRawFd;

    let bytes = read_library(path)?;
    let name = CString::new("quill_template").map_err(|e| LoadError::Memory(io::Error::other(e)))?;
    // SAFETY: `name` is a valid C string; the descriptor is owned by `file`.
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(LoadError::Memory(io::Error::last_os_error()));
    }
    let mut file = unsafe { fs::File::from_raw_fd(fd) };
    file.write_all(&bytes).map_err(LoadError::Memory)?;

    let memory_path = PathBuf::from(format!("/proc/self/fd/{fd}"));
    let library = open_library(&memory_path)?;
    debug!(path = %path.display(), bytes = bytes.len(), "template library loaded from memory");
    // The dynamic loader matches loaded objects by path, so the descriptor
    // stays open until the library is closed.
    Ok(LoadedLibrary {
        library,
        _memory: Some(file),
        _shadow: None,
    })
}

#[cfg(not(target_os = "linux"))]
fn open_copy(path: &Path) -> Result<LoadedLibrary, LoadError> {
    let bytes = read_library(path)?;
    let shadow = std::env::temp_dir().join(format!(
        "quill_shadow_{}.{}",
        uuid::Uuid::new_v4().simple(),
        std::env::consts::DLL_EXTENSION
    ));
    fs::write(&shadow, &bytes).map_err(LoadError::Memory)?;
    let shadow = ShadowFile(shadow);
    let library = open_library(&shadow.0)?;
    Ok(LoadedLibrary {
        library,
        _memory: None,
        _shadow: Some(shadow),
    })
}

fn ffi_string(text: &FfiStr) -> Result<String, LoadError> {
    // SAFETY: the string points into a static of the loaded library.
    unsafe { text.as_str() }
        .map(str::to_string)
        .map_err(|e| LoadError::Malformed(e.to_string()))
}

fn find_type(library: Arc<LoadedLibrary>, path: &Path, full_name: &str) -> Result<TemplateType, LoadError> {
    let symbol = type_symbol_name(full_name);
    let info = {
        // SAFETY: type symbols are generated with the `TypeInfoFn` signature.
        let type_fn: Result<Symbol<TypeInfoFn>, _> = unsafe { library.library.get(symbol.as_bytes()) };
        let Ok(type_fn) = type_fn else {
            return Err(missing_type(&library.library, path, full_name));
        };
        unsafe { type_fn() }
    };
    if info.is_null() {
        return Err(LoadError::Malformed(format!("`{symbol}` returned no type")));
    }
    // SAFETY: non-null pointers from type symbols point at a static.
    let described = unsafe { &*info };
    if described.abi_version != ABI_VERSION {
        return Err(LoadError::AbiMismatch {
            expected: ABI_VERSION,
            found: described.abi_version,
        });
    }

    Ok(TemplateType {
        info,
        full_name: ffi_string(&described.full_name)?,
        base_type: ffi_string(&described.base_type)?,
        model_type: ffi_string(&described.model_type)?,
        path: path.to_path_buf(),
        _library: library,
    })
}

/// The error for a library without the requested type symbol.
fn missing_type(library: &Library, path: &Path, full_name: &str) -> LoadError {
    let no_types = || LoadError::NoTypes {
        path: path.to_path_buf(),
    };
    // SAFETY: the module table symbol is generated with the `ModuleTypesFn` signature.
    let table: Result<Symbol<ModuleTypesFn>, _> = unsafe { library.get(MODULE_TYPES_SYMBOL.as_bytes()) };
    let Ok(table) = table else {
        return no_types();
    };

    let mut len = 0usize;
    let entries = unsafe { table(&mut len) };
    if entries.is_null() || len == 0 {
        return no_types();
    }
    // SAFETY: the table is a static array of `len` entries.
    let found = unsafe { std::slice::from_raw_parts(entries, len) }
        .iter()
        .map(|entry| ffi_string(entry).unwrap_or_else(|_| "<invalid>".to_string()))
        .collect();
    LoadError::TypeNotFound {
        name: full_name.to_string(),
        found,
    }
}
