//! Append-only set of every reference handed to the compiler.

use dashmap::DashSet;
use tracing::debug;

use crate::module::LoadedModule;
use crate::reference::CompilerReference;

/// References accumulated by an engine, shared with its compiler backend.
///
/// Entries are never removed. Lookups by name let the backend resolve crates
/// that generated code mentions without an explicit `--extern`.
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    references: DashSet<CompilerReference>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `reference`; returns `false` if an equal one was already present.
    pub fn add(&self, reference: CompilerReference) -> bool {
        self.references.insert(reference)
    }

    pub fn extend(&self, references: impl IntoIterator<Item = CompilerReference>) {
        for reference in references {
            self.references.insert(reference);
        }
    }

    pub fn contains(&self, reference: &CompilerReference) -> bool {
        self.references.contains(reference)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn snapshot(&self) -> Vec<CompilerReference> {
        self.references.iter().map(|r| r.key().clone()).collect()
    }

    /// Finds the module providing `name`.
    ///
    /// Known modules win over files; a matching file is opened (shared
    /// libraries) or described (Rust libraries). The registry is not modified.
    pub fn resolve_by_name(&self, name: &str) -> Option<LoadedModule> {
        let mut files = Vec::new();
        for entry in self.references.iter() {
            match entry.key() {
                CompilerReference::Module(module) if module.name() == name => {
                    return Some(module.clone());
                }
                CompilerReference::File(path) if entry.key().identity_name().as_deref() == Some(name) => {
                    files.push(path.clone());
                }
                _ => {}
            }
        }

        // open outside the shard locks
        files.sort();
        for path in files {
            match LoadedModule::open(&path) {
                Ok(module) => return Some(module),
                Err(err) => debug!(name, path = %path.display(), error = %err, "cannot open reference"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleVersion;
    use std::path::PathBuf;

    #[test]
    fn add_is_idempotent() {
        let registry = ReferenceRegistry::new();
        assert!(registry.add(CompilerReference::file("/a/liba.rlib")));
        assert!(!registry.add(CompilerReference::file("/a/liba.rlib")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn located_module_and_file_are_one_entry() {
        let registry = ReferenceRegistry::new();
        registry.add(CompilerReference::file("/lib/libfoo.so"));
        registry.add(CompilerReference::Module(LoadedModule::new(
            "foo",
            ModuleVersion::default(),
            Some(PathBuf::from("/lib/libfoo.so")),
            false,
        )));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolves_known_module_by_name() {
        let registry = ReferenceRegistry::new();
        let module = LoadedModule::new("bar", ModuleVersion(vec![2]), None, true);
        registry.add(CompilerReference::Module(module.clone()));
        assert_eq!(registry.resolve_by_name("bar"), Some(module));
        assert_eq!(registry.resolve_by_name("baz"), None);
    }

    #[test]
    fn resolves_rust_library_file_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libdemo-0a1b.rlib");
        std::fs::write(&path, b"!<arch>\n").unwrap();

        let registry = ReferenceRegistry::new();
        registry.add(CompilerReference::File(path.clone()));
        let module = registry.resolve_by_name("demo").unwrap();
        assert_eq!(module.name(), "demo");
        assert_eq!(module.location(), Some(path.as_path()));
        // lookup does not add entries
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unopenable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libbroken.so");
        std::fs::write(&path, b"junk").unwrap();

        let registry = ReferenceRegistry::new();
        registry.add(CompilerReference::File(path));
        assert!(registry.resolve_by_name("broken").is_none());
    }
}
