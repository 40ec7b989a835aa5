//! Resolution of the dependencies generated code is compiled against.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use quill_compiler::{loaded_modules, CompilerReference, LoadedModule};
use tracing::debug;

use crate::context::{TypeContext, DYNAMIC_TEMPLATE_NAMESPACE};

/// Supplies the references a compilation needs.
pub trait ReferenceResolver: Send + Sync + fmt::Debug {
    /// References for `context`; `include` are the backend's own and must be
    /// part of the result.
    fn resolve(&self, context: &TypeContext, include: Vec<CompilerReference>) -> Vec<CompilerReference>;
}

/// Uses the newest version of every library loaded into this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentModulesReferenceResolver;

impl ReferenceResolver for CurrentModulesReferenceResolver {
    fn resolve(&self, context: &TypeContext, include: Vec<CompilerReference>) -> Vec<CompilerReference> {
        let references = latest_modules(loaded_modules(), include);
        debug!(
            class = %context.class_name,
            references = references.len(),
            "resolved references from loaded modules"
        );
        references
    }
}

/// Resolves to a fixed list plus the include references.
#[derive(Debug, Clone, Default)]
pub struct FixedReferenceResolver {
    references: Vec<CompilerReference>,
}

impl FixedReferenceResolver {
    pub fn new(references: impl IntoIterator<Item = CompilerReference>) -> Self {
        Self {
            references: references.into_iter().collect(),
        }
    }
}

impl ReferenceResolver for FixedReferenceResolver {
    fn resolve(&self, _context: &TypeContext, include: Vec<CompilerReference>) -> Vec<CompilerReference> {
        let mut references = self.references.clone();
        append_unique(&mut references, include);
        references
    }
}

/// Picks one file reference per library name, the highest version winning.
///
/// Modules created at runtime and previously compiled templates are skipped.
/// `include` references are appended unless already present.
pub fn latest_modules(
    modules: impl IntoIterator<Item = LoadedModule>,
    include: Vec<CompilerReference>,
) -> Vec<CompilerReference> {
    let mut latest: BTreeMap<String, LoadedModule> = BTreeMap::new();
    for module in modules {
        let Some(location) = module.location() else {
            continue;
        };
        if module.is_dynamic() || is_template_library(location) {
            continue;
        }
        match latest.get(module.name()) {
            Some(current) if current.version() >= module.version() => {}
            _ => {
                latest.insert(module.name().to_string(), module);
            }
        }
    }

    let mut references: Vec<CompilerReference> = latest
        .into_values()
        .filter_map(|m| m.location().map(|l| CompilerReference::File(l.to_path_buf())))
        .collect();
    append_unique(&mut references, include);
    references
}

fn append_unique(references: &mut Vec<CompilerReference>, extra: Vec<CompilerReference>) {
    for reference in extra {
        if !references.contains(&reference) {
            references.push(reference);
        }
    }
}

/// Libraries built by this crate: the namespace in the path, or a scratch
/// directory (`quill_` and 32 hex digits) among its components.
fn is_template_library(location: &Path) -> bool {
    if location.to_string_lossy().contains(DYNAMIC_TEMPLATE_NAMESPACE) {
        return true;
    }
    location.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        name.strip_prefix("quill_")
            .is_some_and(|id| id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_compiler::ModuleVersion;
    use std::path::PathBuf;

    fn module(name: &str, version: &[u64], path: &str, dynamic: bool) -> LoadedModule {
        LoadedModule::new(name, ModuleVersion(version.to_vec()), Some(PathBuf::from(path)), dynamic)
    }

    #[test]
    fn highest_version_wins() {
        let refs = latest_modules(
            vec![
                module("ssl", &[1, 1], "/lib/libssl.so.1.1", false),
                module("ssl", &[3], "/lib/libssl.so.3", false),
                module("c", &[6], "/lib/libc.so.6", false),
            ],
            vec![],
        );
        assert_eq!(
            refs,
            vec![
                CompilerReference::file("/lib/libc.so.6"),
                CompilerReference::file("/lib/libssl.so.3"),
            ]
        );
    }

    #[test]
    fn dynamic_and_template_modules_are_skipped() {
        let refs = latest_modules(
            vec![
                module("gen", &[], "/memfd:quill", true),
                module(
                    "QuillTemplate_1",
                    &[],
                    "/tmp/quill_0123456789abcdef0123456789abcdef/QuillTemplate_1.so",
                    false,
                ),
                module("x", &[], "/cache/CompiledTemplates.Dynamic/libx.so", false),
                LoadedModule::new("nowhere", ModuleVersion::default(), None, false),
                module("m", &[6], "/lib/libm.so.6", false),
            ],
            vec![],
        );
        assert_eq!(refs, vec![CompilerReference::file("/lib/libm.so.6")]);
    }

    #[test]
    fn include_references_are_appended_once() {
        let refs = latest_modules(
            vec![module("m", &[6], "/lib/libm.so.6", false)],
            vec![
                CompilerReference::file("/lib/libm.so.6"),
                CompilerReference::file("/deps/libitoa-1.rlib"),
            ],
        );
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1], CompilerReference::file("/deps/libitoa-1.rlib"));
    }

    #[test]
    fn fixed_resolver_merges_include() {
        let resolver = FixedReferenceResolver::new([CompilerReference::file("/a/liba.rlib")]);
        let refs = resolver.resolve(
            &TypeContext::new("x"),
            vec![CompilerReference::file("/a/liba.rlib"), CompilerReference::file("/b/libb.rlib")],
        );
        assert_eq!(refs.len(), 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_modules_resolve_to_files() {
        let refs = CurrentModulesReferenceResolver.resolve(&TypeContext::new("x"), vec![]);
        assert!(refs.iter().all(|r| r.to_file().is_ok()));
    }
}
