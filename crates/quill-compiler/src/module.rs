//! Modules (libraries) loaded into the current process.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use tracing::debug;

use crate::reference::ReferenceError;

/// Extensions of Rust library artifacts `rustc` accepts through `--extern`.
pub const RUST_LIBRARY_EXTENSIONS: [&str; 2] = ["rlib", "rmeta"];

/// Numeric version parsed from a library file name, e.g. `libssl.so.3` → `3`.
///
/// Compares component-wise; a name without version numbers is the lowest version.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleVersion(pub Vec<u64>);

impl ModuleVersion {
    pub fn is_unversioned(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("0");
        }
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// Splits a library file name into its identity name and version.
///
/// `libserde_json-1a2b.rlib` → (`serde_json`, []), `libc.so.6` → (`c`, [6]),
/// `libfoo-2.31.so` → (`foo`, [2, 31]).
pub fn parse_library_file_name(file_name: &str) -> (String, ModuleVersion) {
    let stem = file_name.strip_prefix("lib").unwrap_or(file_name);
    let head = stem.split('.').next().unwrap_or(stem);

    let (name, rest_start) = match head.rfind('-') {
        Some(dash) if dash > 0 && head[dash + 1..].chars().all(|c| c.is_ascii_alphanumeric()) => {
            (&head[..dash], dash)
        }
        _ => (head, head.len()),
    };

    let version = stem[rest_start..]
        .split(['.', '-'])
        .filter(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|part| part.parse::<u64>().ok())
        .collect();

    (name.to_string(), ModuleVersion(version))
}

/// True for names like `libfoo.so`, `libfoo.so.1`, `foo.dylib` and `foo.dll`.
pub fn is_shared_library_name(file_name: &str) -> bool {
    file_name.ends_with(".so")
        || file_name.contains(".so.")
        || file_name.ends_with(".dylib")
        || file_name.ends_with(".dll")
}

pub fn is_rust_library_name(file_name: &str) -> bool {
    RUST_LIBRARY_EXTENSIONS
        .iter()
        .any(|ext| file_name.ends_with(&format!(".{ext}")))
}

struct ModuleInner {
    name: String,
    version: ModuleVersion,
    location: Option<PathBuf>,
    dynamic: bool,
    library: Option<Library>,
}

/// A library known to the process, optionally kept open.
///
/// Cheap to clone. Dropping the last clone of an opened module closes the library.
#[derive(Clone)]
pub struct LoadedModule {
    inner: Arc<ModuleInner>,
}

impl LoadedModule {
    pub fn new(
        name: impl Into<String>,
        version: ModuleVersion,
        location: Option<PathBuf>,
        dynamic: bool,
    ) -> Self {
        Self {
            inner: Arc::new(ModuleInner {
                name: name.into(),
                version,
                location,
                dynamic,
                library: None,
            }),
        }
    }

    /// Describes the library at `path` without opening it.
    ///
    /// Anonymous memory files, deleted files and paths missing on disk are dynamic.
    pub fn describe(path: impl Into<PathBuf>) -> Self {
        let raw: PathBuf = path.into();
        let text = raw.to_string_lossy();
        let deleted = text.ends_with(" (deleted)");
        let location = match text.strip_suffix(" (deleted)") {
            Some(stripped) => PathBuf::from(stripped),
            None => raw.clone(),
        };
        let memfd = text.starts_with("memfd:") || text.starts_with("/memfd:");
        let dynamic = deleted || memfd || !location.exists();

        let file_name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (name, version) = parse_library_file_name(&file_name);
        Self::new(name, version, Some(location), dynamic)
    }

    /// Opens the library at `path`.
    ///
    /// Shared libraries are loaded with `dlopen`; Rust libraries cannot be
    /// loaded and are only described.
    pub fn open(path: &Path) -> Result<Self, ReferenceError> {
        let described = Self::describe(path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !is_shared_library_name(&file_name) {
            return Ok(described);
        }

        // SAFETY: loading runs the library's initialisers; callers only open
        // libraries that are already part of the resolved reference set.
        let library = unsafe { Library::new(path) }.map_err(|source| ReferenceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "opened module");

        Ok(Self {
            inner: Arc::new(ModuleInner {
                name: described.inner.name.clone(),
                version: described.inner.version.clone(),
                location: described.inner.location.clone(),
                dynamic: described.inner.dynamic,
                library: Some(library),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> &ModuleVersion {
        &self.inner.version
    }

    pub fn location(&self) -> Option<&Path> {
        self.inner.location.as_deref()
    }

    /// Created at runtime rather than backed by a stable file.
    pub fn is_dynamic(&self) -> bool {
        self.inner.dynamic
    }

    pub fn library(&self) -> Option<&Library> {
        self.inner.library.as_ref()
    }
}

impl PartialEq for LoadedModule {
    fn eq(&self, other: &Self) -> bool {
        self.inner.name == other.inner.name
            && self.inner.version == other.inner.version
            && self.inner.location == other.inner.location
            && self.inner.dynamic == other.inner.dynamic
    }
}

impl Eq for LoadedModule {}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("location", &self.inner.location)
            .field("dynamic", &self.inner.dynamic)
            .field("open", &self.inner.library.is_some())
            .finish()
    }
}

/// Libraries mapped into the current process.
///
/// Reads `/proc/self/maps` on Linux. Other platforms report no modules.
#[cfg(target_os = "linux")]
pub fn loaded_modules() -> Vec<LoadedModule> {
    match std::fs::read_to_string("/proc/self/maps") {
        Ok(maps) => parse_proc_maps(&maps),
        Err(err) => {
            debug!(error = %err, "cannot read process maps");
            Vec::new()
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn loaded_modules() -> Vec<LoadedModule> {
    Vec::new()
}

/// Extracts the shared libraries from `/proc/<pid>/maps` text, one per path.
pub fn parse_proc_maps(maps: &str) -> Vec<LoadedModule> {
    let mut seen = BTreeSet::new();
    let mut modules = Vec::new();
    for line in maps.lines() {
        let Some(path) = maps_path(line) else {
            continue;
        };
        if !(path.starts_with('/') || path.starts_with("memfd:")) {
            continue;
        }
        let file_name = path
            .trim_end_matches(" (deleted)")
            .rsplit('/')
            .next()
            .unwrap_or_default();
        if !is_shared_library_name(file_name) {
            continue;
        }
        if seen.insert(path.to_string()) {
            modules.push(LoadedModule::describe(path));
        }
    }
    modules
}

// address perms offset dev inode pathname
fn maps_path(line: &str) -> Option<&str> {
    let mut rest = line;
    for _ in 0..5 {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        rest = &rest[end..];
    }
    let path = rest.trim();
    (!path.is_empty()).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rust_library_names() {
        assert_eq!(
            parse_library_file_name("libserde_json-1a2b3c.rlib"),
            ("serde_json".to_string(), ModuleVersion(vec![]))
        );
        assert_eq!(
            parse_library_file_name("libstd-8f1e.so"),
            ("std".to_string(), ModuleVersion(vec![]))
        );
    }

    #[test]
    fn parses_versioned_shared_libraries() {
        assert_eq!(
            parse_library_file_name("libc.so.6"),
            ("c".to_string(), ModuleVersion(vec![6]))
        );
        assert_eq!(
            parse_library_file_name("libfoo-2.31.so"),
            ("foo".to_string(), ModuleVersion(vec![2, 31]))
        );
        assert_eq!(
            parse_library_file_name("plugin.dll"),
            ("plugin".to_string(), ModuleVersion(vec![]))
        );
    }

    #[test]
    fn versions_order_component_wise() {
        assert!(ModuleVersion(vec![2, 31]) > ModuleVersion(vec![2, 4]));
        assert!(ModuleVersion(vec![1]) > ModuleVersion(vec![]));
        assert_eq!(ModuleVersion(vec![]).to_string(), "0");
        assert_eq!(ModuleVersion(vec![1, 2]).to_string(), "1.2");
    }

    #[test]
    fn classifies_library_names() {
        assert!(is_shared_library_name("libssl.so.3"));
        assert!(is_shared_library_name("libfoo.dylib"));
        assert!(!is_shared_library_name("libfoo.rlib"));
        assert!(is_rust_library_name("libfoo-abc.rlib"));
        assert!(is_rust_library_name("libfoo-abc.rmeta"));
    }

    #[test]
    fn proc_maps_lines_are_parsed() {
        let maps = "\
55d0c0a00000-55d0c0a21000 r--p 00000000 08:01 131 /usr/bin/app
7f1c2a000000-7f1c2a028000 r--p 00000000 08:01 262 /nonexistent/lib/libc.so.6
7f1c2a028000-7f1c2a1bd000 r-xp 00028000 08:01 262 /nonexistent/lib/libc.so.6
7f1c2b000000-7f1c2b001000 r-xp 00000000 00:01 9   /memfd:template (deleted)
7f1c2c000000-7f1c2c001000 rw-p 00000000 00:00 0   [heap]
7f1c2d000000-7f1c2d001000 rw-p 00000000 00:00 0
";
        let modules = parse_proc_maps(maps);
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name(), "c");
        assert_eq!(modules[0].version(), &ModuleVersion(vec![6]));
        // not on disk
        assert!(modules[0].is_dynamic());
    }

    #[test]
    fn deleted_mappings_are_dynamic() {
        let maps = "7f00-7f01 r-xp 00000000 08:01 5 /tmp/quill_x/libtpl.so (deleted)\n";
        let modules = parse_proc_maps(maps);
        assert_eq!(modules.len(), 1);
        assert!(modules[0].is_dynamic());
        assert_eq!(modules[0].location(), Some(Path::new("/tmp/quill_x/libtpl.so")));
    }

    #[test]
    fn describe_existing_file_is_static() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libdemo-1.2.so");
        std::fs::write(&path, b"").unwrap();
        let module = LoadedModule::describe(&path);
        assert_eq!(module.name(), "demo");
        assert_eq!(module.version(), &ModuleVersion(vec![1, 2]));
        assert!(!module.is_dynamic());
        assert!(module.library().is_none());
    }

    #[test]
    fn opening_a_rust_library_only_describes_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libdemo-abc.rlib");
        std::fs::write(&path, b"!<arch>\n").unwrap();
        let module = LoadedModule::open(&path).unwrap();
        assert_eq!(module.name(), "demo");
        assert!(module.library().is_none());
    }

    #[test]
    fn opening_garbage_shared_library_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libbroken.so");
        std::fs::write(&path, b"not an elf").unwrap();
        assert!(matches!(
            LoadedModule::open(&path),
            Err(ReferenceError::Open { .. })
        ));
    }
}
