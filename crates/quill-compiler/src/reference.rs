//! Dependencies handed to the compiler backend.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::module::{parse_library_file_name, LoadedModule};

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("module `{name}` has no location on disk")]
    NoLocation { name: String },

    #[error("{kind} references cannot be resolved to a file")]
    Unsupported { kind: &'static str },

    #[error("failed to open library {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}

/// A named byte stream, e.g. a library embedded in the host binary.
///
/// Two stream references are equal only when they share the same stream.
#[derive(Clone)]
pub struct StreamReference {
    name: String,
    stream: Arc<Mutex<dyn Read + Send>>,
}

impl StreamReference {
    pub fn new(name: impl Into<String>, stream: impl Read + Send + 'static) -> Self {
        Self {
            name: name.into(),
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads the rest of the stream.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| io::Error::other("stream lock poisoned"))?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.stream) as *const () as usize
    }
}

impl fmt::Debug for StreamReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReference")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A dependency of generated code.
///
/// A `File` and a `Module` are the same reference when the module is located at
/// that file.
#[derive(Debug, Clone)]
pub enum CompilerReference {
    File(PathBuf),
    Module(LoadedModule),
    Stream(StreamReference),
    Bytes(Arc<[u8]>),
}

impl CompilerReference {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        CompilerReference::File(path.into())
    }

    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        CompilerReference::Bytes(bytes.into())
    }

    /// Resolves the reference to a path on disk.
    pub fn to_file(&self) -> Result<PathBuf, ReferenceError> {
        match self {
            CompilerReference::File(path) => Ok(path.clone()),
            CompilerReference::Module(module) => module
                .location()
                .map(Path::to_path_buf)
                .ok_or_else(|| ReferenceError::NoLocation {
                    name: module.name().to_string(),
                }),
            CompilerReference::Stream(_) => Err(ReferenceError::Unsupported { kind: "stream" }),
            CompilerReference::Bytes(_) => Err(ReferenceError::Unsupported { kind: "byte" }),
        }
    }

    /// Crate or library name the reference provides, e.g. `serde_json`.
    pub fn identity_name(&self) -> Option<String> {
        match self {
            CompilerReference::File(path) => path
                .file_name()
                .map(|n| parse_library_file_name(&n.to_string_lossy()).0),
            CompilerReference::Module(module) => Some(module.name().to_string()),
            CompilerReference::Stream(stream) => Some(stream.name().to_string()),
            CompilerReference::Bytes(_) => None,
        }
    }

    /// The on-disk location used for equality, if any.
    fn location(&self) -> Option<&Path> {
        match self {
            CompilerReference::File(path) => Some(path),
            CompilerReference::Module(module) => module.location(),
            _ => None,
        }
    }
}

impl PartialEq for CompilerReference {
    fn eq(&self, other: &Self) -> bool {
        use CompilerReference::*;
        match (self, other) {
            (File(a), File(b)) => a == b,
            (File(path), Module(module)) | (Module(module), File(path)) => {
                module.location() == Some(path.as_path())
            }
            (Module(a), Module(b)) => a == b,
            (Stream(a), Stream(b)) => a.address() == b.address(),
            (Bytes(a), Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for CompilerReference {}

impl Hash for CompilerReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // files and located modules share a tag so equal values hash alike
        if let Some(location) = self.location() {
            0u8.hash(state);
            location.hash(state);
            return;
        }
        match self {
            CompilerReference::Module(module) => {
                1u8.hash(state);
                module.name().hash(state);
                module.version().hash(state);
            }
            CompilerReference::Stream(stream) => {
                2u8.hash(state);
                stream.address().hash(state);
            }
            CompilerReference::Bytes(bytes) => {
                3u8.hash(state);
                bytes.hash(state);
            }
            CompilerReference::File(_) => {}
        }
    }
}

impl From<PathBuf> for CompilerReference {
    fn from(path: PathBuf) -> Self {
        CompilerReference::File(path)
    }
}

impl From<LoadedModule> for CompilerReference {
    fn from(module: LoadedModule) -> Self {
        CompilerReference::Module(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleVersion;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn hash_of(r: &CompilerReference) -> u64 {
        let mut h = DefaultHasher::new();
        r.hash(&mut h);
        h.finish()
    }

    fn module_at(path: &str) -> LoadedModule {
        LoadedModule::new("foo", ModuleVersion(vec![1]), Some(PathBuf::from(path)), false)
    }

    #[test]
    fn file_equals_module_at_same_location() {
        let file = CompilerReference::file("/lib/libfoo.so.1");
        let module = CompilerReference::Module(module_at("/lib/libfoo.so.1"));
        assert_eq!(file, module);
        assert_eq!(module, file);
        assert_eq!(hash_of(&file), hash_of(&module));

        let set: HashSet<_> = [file, module].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn file_differs_from_module_elsewhere() {
        let file = CompilerReference::file("/lib/libfoo.so.1");
        let module = CompilerReference::Module(module_at("/other/libfoo.so.1"));
        assert_ne!(file, module);
    }

    #[test]
    fn streams_compare_by_identity() {
        let a = StreamReference::new("a", io::empty());
        let b = StreamReference::new("a", io::empty());
        assert_eq!(
            CompilerReference::Stream(a.clone()),
            CompilerReference::Stream(a.clone())
        );
        assert_ne!(CompilerReference::Stream(a), CompilerReference::Stream(b));
    }

    #[test]
    fn bytes_compare_by_content() {
        assert_eq!(
            CompilerReference::bytes(vec![1u8, 2]),
            CompilerReference::bytes(vec![1u8, 2])
        );
        assert_ne!(
            CompilerReference::bytes(vec![1u8]),
            CompilerReference::file("/x")
        );
    }

    #[test]
    fn to_file_resolves_files_and_modules() {
        assert_eq!(
            CompilerReference::file("/a/liba.rlib").to_file().unwrap(),
            PathBuf::from("/a/liba.rlib")
        );
        assert_eq!(
            CompilerReference::Module(module_at("/lib/libfoo.so")).to_file().unwrap(),
            PathBuf::from("/lib/libfoo.so")
        );
    }

    #[test]
    fn to_file_fails_for_unresolvable_references() {
        let unlocated = LoadedModule::new("x", ModuleVersion::default(), None, true);
        assert!(matches!(
            CompilerReference::Module(unlocated).to_file(),
            Err(ReferenceError::NoLocation { .. })
        ));
        assert!(matches!(
            CompilerReference::bytes(vec![0u8]).to_file(),
            Err(ReferenceError::Unsupported { kind: "byte" })
        ));
        let stream = StreamReference::new("s", io::empty());
        assert!(matches!(
            CompilerReference::Stream(stream).to_file(),
            Err(ReferenceError::Unsupported { kind: "stream" })
        ));
    }

    #[test]
    fn identity_names() {
        assert_eq!(
            CompilerReference::file("/deps/libserde_json-1a2b.rlib").identity_name(),
            Some("serde_json".to_string())
        );
        assert_eq!(
            CompilerReference::file("/lib/libc.so.6").identity_name(),
            Some("c".to_string())
        );
        assert_eq!(CompilerReference::bytes(vec![1u8]).identity_name(), None);
    }

    #[test]
    fn stream_reads_content() {
        let stream = StreamReference::new("s", io::Cursor::new(b"abc".to_vec()));
        assert_eq!(stream.read_all().unwrap(), b"abc");
    }
}
