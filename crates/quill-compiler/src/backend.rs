//! The `rustc` compiler backend.
//!
//! Generated template source is compiled as a standalone `cdylib`. Rust
//! libraries among the references become `--extern` flags; anything else is
//! added to the native library search path. Crates that generated code names
//! in its imports but that no reference provides are looked up by name in the
//! shared [`ReferenceRegistry`].

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use wait_timeout::ChildExt;

use crate::compilation::{create_scratch_directory, CompilationData};
use crate::diagnostics::{parse_rustc_diagnostics, CompilerError};
use crate::module::is_rust_library_name;
use crate::reference::{CompilerReference, ReferenceError};
use crate::registry::ReferenceRegistry;

/// Crate roots that never need a reference.
pub const IMPLICIT_CRATES: [&str; 6] = ["std", "core", "alloc", "crate", "self", "super"];

/// File the compiler's diagnostics are captured to, inside the scratch directory.
pub const COMPILER_LOG: &str = "compiler.log";

/// Copy of the generated source kept in debug mode.
pub const GENERATED_SOURCE_FILE: &str = "generated_template.rs";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unsupported compiler reference: {0}")]
    UnsupportedReference(#[from] ReferenceError),

    #[error("could not create a scratch directory under {}", root.display())]
    TempDir {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to run `{}`", rustc.display())]
    Spawn {
        rustc: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("`{}` timed out after {timeout:?}", rustc.display())]
    Timeout { rustc: PathBuf, timeout: Duration },

    #[error("I/O error during compilation: {0}")]
    Io(#[from] io::Error),
}

/// How the backend invokes the compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerSettings {
    pub rustc: PathBuf,
    pub edition: String,
    /// Kill the compiler after this long.
    pub timeout: Option<Duration>,
    /// Root under which scratch directories are created.
    pub temp_dir: PathBuf,
    /// Build with debug info and keep a copy of the generated source.
    pub debug: bool,
    /// References passed to every compilation.
    pub references: Vec<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            rustc: PathBuf::from("rustc"),
            edition: "2021".into(),
            timeout: None,
            temp_dir: std::env::temp_dir(),
            debug: false,
            references: Vec::new(),
            extra_args: Vec::new(),
        }
    }
}

/// Everything the backend needs to compile one template.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub source: &'a str,
    /// Base name of the source file and library, usually the class name.
    pub assembly_name: &'a str,
    pub namespaces: &'a BTreeSet<String>,
    pub references: &'a [CompilerReference],
}

#[derive(Debug)]
pub struct BackendOutput {
    pub errors: Vec<CompilerError>,
    pub compilation_data: CompilationData,
    pub library_path: PathBuf,
}

impl BackendOutput {
    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(|e| !e.is_warning)
    }
}

/// Compiles generated source into a loadable library.
pub trait CompilerBackend: Send + Sync {
    /// Extension of generated source files, without the dot.
    fn source_file_extension(&self) -> &str;

    /// References every compilation needs regardless of the resolver.
    fn include_references(&self) -> Vec<CompilerReference>;

    fn compile(&self, request: CompileRequest<'_>) -> Result<BackendOutput, BackendError>;
}

/// First path segment of every import that names an external crate.
pub fn crate_roots<'a>(namespaces: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    namespaces
        .into_iter()
        .filter_map(|ns| ns.trim().trim_start_matches("::").split("::").next())
        .map(str::trim)
        .filter(|root| !root.is_empty() && !IMPLICIT_CRATES.contains(root))
        .map(str::to_string)
        .collect()
}

fn crate_name_for(assembly_name: &str) -> String {
    let sanitized: String = assembly_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("quill_dynamic_{sanitized}")
}

fn is_rust_library_path(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| is_rust_library_name(&name.to_string_lossy()))
}

/// Search paths and externs already on the command line.
#[derive(Default)]
struct LinkArgs {
    search_paths: BTreeSet<OsString>,
    externs: BTreeSet<String>,
}

impl LinkArgs {
    /// Rust libraries (`name` set) get `-L dependency=` and `--extern`;
    /// everything else only `-L native=`.
    fn add(&mut self, args: &mut Vec<OsString>, path: &Path, name: Option<&str>) {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let kind = if name.is_some() { "dependency" } else { "native" };
        let mut search = OsString::from(format!("{kind}="));
        search.push(parent);
        if self.search_paths.insert(search.clone()) {
            args.push("-L".into());
            args.push(search);
        }
        if let Some(name) = name {
            if self.externs.insert(name.to_string()) {
                let mut flag = OsString::from(format!("{name}="));
                flag.push(path);
                args.push("--extern".into());
                args.push(flag);
            }
        }
    }
}

#[derive(Debug)]
pub struct RustcBackend {
    settings: CompilerSettings,
    registry: Arc<ReferenceRegistry>,
}

impl RustcBackend {
    pub fn new(settings: CompilerSettings, registry: Arc<ReferenceRegistry>) -> Self {
        Self { settings, registry }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ReferenceRegistry> {
        &self.registry
    }

    /// Command-line arguments for compiling `source_path` into `output_path`.
    pub fn arguments(
        &self,
        request: &CompileRequest<'_>,
        files: &[PathBuf],
        source_path: &Path,
        output_path: &Path,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--crate-type".into(),
            "cdylib".into(),
            "--edition".into(),
            self.settings.edition.clone().into(),
            "--error-format".into(),
            "json".into(),
            "--crate-name".into(),
            crate_name_for(request.assembly_name).into(),
        ];
        if self.settings.debug {
            args.extend(["-g", "-C", "opt-level=0"].map(OsString::from));
        } else {
            args.extend(["-C", "opt-level=2"].map(OsString::from));
        }

        let mut links = LinkArgs::default();
        for file in files {
            if is_rust_library_path(file) {
                let name = CompilerReference::File(file.clone()).identity_name();
                links.add(&mut args, file, name.as_deref());
            } else {
                links.add(&mut args, file, None);
            }
        }

        for root in crate_roots(request.namespaces) {
            if links.externs.contains(&root) {
                continue;
            }
            let Some(module) = self.registry.resolve_by_name(&root) else {
                debug!(crate_name = %root, "no reference provides crate");
                continue;
            };
            let Some(location) = module.location() else {
                continue;
            };
            if is_rust_library_path(location) {
                links.add(&mut args, location, Some(&root));
            }
        }

        args.extend(self.settings.extra_args.iter().map(OsString::from));
        args.push("-o".into());
        args.push(output_path.into());
        args.push(source_path.into());
        args
    }

    fn run(&self, args: &[OsString], scratch: &Path) -> Result<(ExitStatus, String), BackendError> {
        let log_path = scratch.join(COMPILER_LOG);
        let log = File::create(&log_path)?;
        let rustc = &self.settings.rustc;

        let mut child = Command::new(rustc)
            .args(args)
            .current_dir(scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|source| BackendError::Spawn {
                rustc: rustc.clone(),
                source,
            })?;

        let status = match self.settings.timeout {
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => status,
                None => {
                    child.kill()?;
                    child.wait()?;
                    return Err(BackendError::Timeout {
                        rustc: rustc.clone(),
                        timeout,
                    });
                }
            },
            None => child.wait()?,
        };

        let stderr = fs::read_to_string(&log_path)?;
        Ok((status, stderr))
    }

    fn keep_generated_source(&self, scratch: &Path, source_path: &Path, source: &str) -> io::Result<()> {
        let target = scratch.join(GENERATED_SOURCE_FILE);
        if target.exists() {
            return Ok(());
        }
        if source_path.exists() && fs::copy(source_path, &target).is_ok() {
            return Ok(());
        }
        fs::write(&target, source)
    }
}

impl CompilerBackend for RustcBackend {
    fn source_file_extension(&self) -> &str {
        "rs"
    }

    fn include_references(&self) -> Vec<CompilerReference> {
        self.settings
            .references
            .iter()
            .cloned()
            .map(CompilerReference::File)
            .collect()
    }

    fn compile(&self, request: CompileRequest<'_>) -> Result<BackendOutput, BackendError> {
        let mut files = Vec::with_capacity(request.references.len());
        for reference in request.references {
            let file = reference.to_file()?;
            if !file.as_os_str().is_empty() && !files.contains(&file) {
                files.push(file);
            }
        }

        let scratch = create_scratch_directory(&self.settings.temp_dir).map_err(|source| {
            BackendError::TempDir {
                root: self.settings.temp_dir.clone(),
                source,
            }
        })?;
        // from here on the scratch directory is cleaned up on every exit path
        let compilation_data = CompilationData::new(Some(request.source.to_string()), Some(scratch.clone()));

        let source_path = scratch.join(format!(
            "{}.{}",
            request.assembly_name,
            self.source_file_extension()
        ));
        let library_path = scratch.join(format!(
            "{}.{}",
            request.assembly_name,
            std::env::consts::DLL_EXTENSION
        ));
        fs::write(&source_path, request.source)?;

        let args = self.arguments(&request, &files, &source_path, &library_path);
        info!(
            assembly = request.assembly_name,
            references = files.len(),
            debug = self.settings.debug,
            "compiling template"
        );
        debug!(?args, "rustc arguments");

        let (status, stderr) = self.run(&args, &scratch)?;

        if self.settings.debug {
            self.keep_generated_source(&scratch, &source_path, request.source)?;
        }

        let mut errors = parse_rustc_diagnostics(&stderr);
        if !status.success() && !errors.iter().any(|e| !e.is_warning) {
            errors.push(CompilerError::error(format!(
                "rustc exited with {status}: {}",
                stderr.trim()
            )));
        }
        debug!(
            assembly = request.assembly_name,
            errors = errors.iter().filter(|e| !e.is_warning).count(),
            warnings = errors.iter().filter(|e| e.is_warning).count(),
            "compilation finished"
        );

        Ok(BackendOutput {
            errors,
            compilation_data,
            library_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{LoadedModule, ModuleVersion};

    fn backend(debug: bool) -> RustcBackend {
        let settings = CompilerSettings {
            debug,
            ..CompilerSettings::default()
        };
        RustcBackend::new(settings, Arc::new(ReferenceRegistry::new()))
    }

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn rustc_available() -> bool {
        which::which("rustc").is_ok()
    }

    #[test]
    fn crate_roots_skip_implicit_crates() {
        let namespaces: BTreeSet<String> = ["std::fmt", "serde_json::Value", "crate::x", "::regex"]
            .into_iter()
            .map(String::from)
            .collect();
        let roots: Vec<String> = crate_roots(&namespaces).into_iter().collect();
        assert_eq!(roots, vec!["regex".to_string(), "serde_json".to_string()]);
    }

    #[test]
    fn crate_name_is_sanitized() {
        assert_eq!(crate_name_for("QuillTemplate_AB12"), "quill_dynamic_quilltemplate_ab12");
        assert_eq!(crate_name_for("a-b"), "quill_dynamic_a_b");
    }

    #[test]
    fn arguments_link_rust_and_native_libraries() {
        let backend = backend(false);
        let namespaces = BTreeSet::new();
        let request = CompileRequest {
            source: "",
            assembly_name: "Tpl",
            namespaces: &namespaces,
            references: &[],
        };
        let files = vec![
            PathBuf::from("/deps/libserde_json-1a2b.rlib"),
            PathBuf::from("/deps/libserde-3c4d.rlib"),
            PathBuf::from("/usr/lib/libssl.so.3"),
        ];
        let args = args_as_strings(&backend.arguments(
            &request,
            &files,
            Path::new("/s/Tpl.rs"),
            Path::new("/s/Tpl.so"),
        ));

        assert_eq!(&args[..8], &[
            "--crate-type", "cdylib", "--edition", "2021", "--error-format", "json", "--crate-name",
            "quill_dynamic_tpl",
        ]);
        assert!(args.windows(2).any(|w| w == ["--extern", "serde_json=/deps/libserde_json-1a2b.rlib"]));
        assert!(args.windows(2).any(|w| w == ["--extern", "serde=/deps/libserde-3c4d.rlib"]));
        assert!(args.windows(2).any(|w| w == ["-L", "native=/usr/lib"]));
        // one search path per directory
        assert_eq!(args.iter().filter(|a| *a == "dependency=/deps").count(), 1);
        assert_eq!(args.last().map(String::as_str), Some("/s/Tpl.rs"));
        assert!(args.windows(2).any(|w| w == ["-o", "/s/Tpl.so"]));
        assert!(args.windows(2).any(|w| w == ["-C", "opt-level=2"]));
    }

    #[test]
    fn debug_arguments() {
        let backend = backend(true);
        let namespaces = BTreeSet::new();
        let request = CompileRequest {
            source: "",
            assembly_name: "Tpl",
            namespaces: &namespaces,
            references: &[],
        };
        let args = args_as_strings(&backend.arguments(&request, &[], Path::new("a.rs"), Path::new("a.so")));
        assert!(args.contains(&"-g".to_string()));
        assert!(args.windows(2).any(|w| w == ["-C", "opt-level=0"]));
    }

    #[test]
    fn imported_crates_resolve_through_the_registry() {
        let registry = Arc::new(ReferenceRegistry::new());
        registry.add(CompilerReference::Module(LoadedModule::new(
            "itoa",
            ModuleVersion::default(),
            Some(PathBuf::from("/deps/libitoa-99.rlib")),
            false,
        )));
        let backend = RustcBackend::new(CompilerSettings::default(), registry);
        let namespaces: BTreeSet<String> = ["itoa::Buffer".to_string(), "missing::X".to_string()]
            .into_iter()
            .collect();
        let request = CompileRequest {
            source: "",
            assembly_name: "Tpl",
            namespaces: &namespaces,
            references: &[],
        };
        let args = args_as_strings(&backend.arguments(&request, &[], Path::new("a.rs"), Path::new("a.so")));
        assert!(args.windows(2).any(|w| w == ["--extern", "itoa=/deps/libitoa-99.rlib"]));
        assert!(!args.iter().any(|a| a.starts_with("missing=")));
    }

    #[test]
    fn unsupported_references_abort_before_compiling() {
        let backend = backend(false);
        let namespaces = BTreeSet::new();
        let references = [CompilerReference::bytes(vec![1u8, 2, 3])];
        let request = CompileRequest {
            source: "",
            assembly_name: "Tpl",
            namespaces: &namespaces,
            references: &references,
        };
        assert!(matches!(
            backend.compile(request),
            Err(BackendError::UnsupportedReference(_))
        ));
    }

    #[test]
    fn missing_compiler_is_a_spawn_error() {
        let root = tempfile::tempdir().unwrap();
        let settings = CompilerSettings {
            rustc: PathBuf::from("/nonexistent/rustc-quill"),
            temp_dir: root.path().to_path_buf(),
            ..CompilerSettings::default()
        };
        let backend = RustcBackend::new(settings, Arc::new(ReferenceRegistry::new()));
        let namespaces = BTreeSet::new();
        let request = CompileRequest {
            source: "",
            assembly_name: "Tpl",
            namespaces: &namespaces,
            references: &[],
        };
        assert!(matches!(backend.compile(request), Err(BackendError::Spawn { .. })));
        // scratch directory removed with the dropped compilation data
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn compiles_a_cdylib() {
        if !rustc_available() {
            eprintln!("rustc not found, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let settings = CompilerSettings {
            temp_dir: root.path().to_path_buf(),
            debug: true,
            ..CompilerSettings::default()
        };
        let backend = RustcBackend::new(settings, Arc::new(ReferenceRegistry::new()));
        let namespaces = BTreeSet::new();
        let request = CompileRequest {
            source: "#[no_mangle]\npub extern \"C\" fn answer() -> u32 { 42 }\n",
            assembly_name: "Answer",
            namespaces: &namespaces,
            references: &[],
        };
        let output = backend.compile(request).unwrap();
        assert!(!output.has_errors(), "{:?}", output.errors);
        assert!(output.library_path.exists());
        let scratch = output.compilation_data.tmp_folder().unwrap().to_path_buf();
        assert!(scratch.join(GENERATED_SOURCE_FILE).exists());
        assert!(scratch.join(COMPILER_LOG).exists());

        output.compilation_data.dispose();
        assert!(!scratch.exists());
    }

    #[test]
    fn reports_compile_errors() {
        if !rustc_available() {
            eprintln!("rustc not found, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let settings = CompilerSettings {
            temp_dir: root.path().to_path_buf(),
            ..CompilerSettings::default()
        };
        let backend = RustcBackend::new(settings, Arc::new(ReferenceRegistry::new()));
        let namespaces = BTreeSet::new();
        let request = CompileRequest {
            source: "pub fn broken() -> u32 { missing_value }\n",
            assembly_name: "Broken",
            namespaces: &namespaces,
            references: &[],
        };
        let output = backend.compile(request).unwrap();
        assert!(output.has_errors());
        let first = output.errors.iter().find(|e| !e.is_warning).unwrap();
        assert_eq!(first.code, "E0425");
        assert_eq!(first.line, 1);
    }
}
