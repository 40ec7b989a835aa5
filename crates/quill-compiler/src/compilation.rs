//! Temporary artifacts of one compilation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;
use uuid::Uuid;

/// Attempts at finding an unused scratch directory name.
pub const SCRATCH_ATTEMPTS: usize = 10;

/// Creates a fresh, randomly named directory under `root`.
pub fn create_scratch_directory(root: &Path) -> io::Result<PathBuf> {
    create_directory_named(root, || format!("quill_{}", Uuid::new_v4().simple()))
}

/// Only a name collision moves on to the next candidate.
fn create_directory_named(root: &Path, mut next_name: impl FnMut() -> String) -> io::Result<PathBuf> {
    fs::create_dir_all(root)?;
    let mut last_error = None;
    for attempt in 1..=SCRATCH_ATTEMPTS {
        let candidate = root.join(next_name());
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                debug!(attempt, path = %candidate.display(), "scratch directory name taken");
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_error.unwrap_or_else(|| io::Error::other("no scratch directory attempts made")))
}

/// Generated source and scratch directory of a compilation.
///
/// The directory is deleted by [`dispose`](Self::dispose) or, failing that, on
/// drop. Deletion is best effort and happens at most once.
#[derive(Debug)]
pub struct CompilationData {
    source_code: Option<String>,
    tmp_folder: Option<PathBuf>,
    disposed: AtomicBool,
}

impl CompilationData {
    pub fn new(source_code: Option<String>, tmp_folder: Option<PathBuf>) -> Self {
        Self {
            source_code,
            tmp_folder,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn source_code(&self) -> Option<&str> {
        self.source_code.as_deref()
    }

    pub fn tmp_folder(&self) -> Option<&Path> {
        self.tmp_folder.as_deref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Deletes the scratch directory. Later calls do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(folder) = &self.tmp_folder {
            remove_scratch_directory(folder);
        }
    }
}

impl Drop for CompilationData {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Files first, then subdirectories, then the directory. Errors are logged and ignored.
fn remove_scratch_directory(folder: &Path) {
    let mut subdirectories = Vec::new();
    match fs::read_dir(folder) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    subdirectories.push(path);
                } else if let Err(err) = fs::remove_file(&path) {
                    debug!(path = %path.display(), error = %err, "could not delete temporary file");
                }
            }
        }
        Err(err) => {
            debug!(path = %folder.display(), error = %err, "could not list scratch directory");
        }
    }

    for dir in subdirectories {
        if let Err(err) = fs::remove_dir_all(&dir) {
            debug!(path = %dir.display(), error = %err, "could not delete temporary directory");
        }
    }

    match fs::remove_dir(folder) {
        Ok(()) => debug!(path = %folder.display(), "scratch directory removed"),
        Err(err) => debug!(path = %folder.display(), error = %err, "could not delete scratch directory"),
    }
}
