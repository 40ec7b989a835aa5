//! Engine configuration.
//!
//! [`EngineConfig`] is what an [`Engine`](crate::Engine) is built from: the
//! pluggable pieces (translator, resolver, encoder, backend) plus the plain
//! [`EngineSettings`]. Settings are serde types, so they can come from YAML:
//!
//! ```yaml
//! rustc: /opt/rust/bin/rustc
//! debug: true
//! timeout_secs: 60
//! namespaces:
//!   - itoa::Buffer
//! references:
//!   - target/release/deps/libitoa-0f3c.rlib
//! encoding: html
//! ```
//!
//! `QUILL_RUSTC` (or `RUSTC`), `QUILL_DEBUG` and `QUILL_TEMP_DIR` override the
//! corresponding settings.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quill_compiler::{CompilerBackend, CompilerSettings, ReferenceRegistry, RustcBackend};
use quill_runtime::{EncodedStringFactory, HtmlEncodedStringFactory, RawStringFactory};
use quill_syntax::{MarkupTranslator, TemplateTranslator};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::base::TemplateBaseType;
use crate::error::QuillError;
use crate::resolver::{CurrentModulesReferenceResolver, ReferenceResolver};

/// Environment variable naming the compiler.
pub const ENV_RUSTC: &str = "QUILL_RUSTC";
/// Environment variable enabling debug builds.
pub const ENV_DEBUG: &str = "QUILL_DEBUG";
/// Environment variable naming the scratch root.
pub const ENV_TEMP_DIR: &str = "QUILL_TEMP_DIR";

/// Abstraction over environment variables.
pub trait EnvReader: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealEnv;

impl EnvReader for RealEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Encoder for values written by templates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Html,
    Raw,
}

impl Encoding {
    pub fn factory(self) -> Arc<dyn EncodedStringFactory> {
        match self {
            Encoding::Html => Arc::new(HtmlEncodedStringFactory),
            Encoding::Raw => Arc::new(RawStringFactory),
        }
    }
}

/// Plain, serializable engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Compiler executable; `rustc` from `PATH` when unset.
    pub rustc: Option<PathBuf>,
    pub edition: String,
    /// Build templates with debug info and keep the generated source.
    pub debug: bool,
    /// Load compiled libraries from a private copy instead of the scratch file.
    pub disable_temp_file_locking: bool,
    /// Root for scratch directories; the system temp directory when unset.
    pub temp_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    /// Imports added to every template.
    pub namespaces: BTreeSet<String>,
    /// Libraries passed to every compilation.
    pub references: Vec<PathBuf>,
    pub extra_args: Vec<String>,
    pub encoding: Encoding,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rustc: None,
            edition: "2021".into(),
            debug: false,
            disable_temp_file_locking: false,
            temp_dir: None,
            timeout_secs: None,
            namespaces: BTreeSet::new(),
            references: Vec::new(),
            extra_args: Vec::new(),
            encoding: Encoding::Html,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl EngineSettings {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, QuillError> {
        serde_yaml::from_str(yaml).map_err(|e| QuillError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, QuillError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| QuillError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    /// Applies the `QUILL_*` overrides found in `env`.
    pub fn apply_env(&mut self, env: &dyn EnvReader) {
        if let Some(rustc) = env
            .var(ENV_RUSTC)
            .or_else(|| env.var("RUSTC"))
            .filter(|v| !v.is_empty())
        {
            debug!(rustc = %rustc, "compiler overridden from environment");
            self.rustc = Some(PathBuf::from(rustc));
        }
        if let Some(flag) = env.var(ENV_DEBUG) {
            self.debug = is_truthy(&flag);
        }
        if let Some(dir) = env.var(ENV_TEMP_DIR).filter(|v| !v.is_empty()) {
            self.temp_dir = Some(PathBuf::from(dir));
        }
    }

    /// These settings with the process environment applied.
    pub fn with_process_env(mut self) -> Self {
        self.apply_env(&RealEnv);
        self
    }

    /// The backend's view of these settings.
    pub fn compiler_settings(&self) -> CompilerSettings {
        let defaults = CompilerSettings::default();
        CompilerSettings {
            rustc: self.rustc.clone().unwrap_or(defaults.rustc),
            edition: self.edition.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
            temp_dir: self.temp_dir.clone().unwrap_or(defaults.temp_dir),
            debug: self.debug,
            references: self.references.clone(),
            extra_args: self.extra_args.clone(),
        }
    }
}

/// Creates the compiler backend an engine uses.
pub trait CompilerBackendFactory: Send + Sync {
    fn create(&self, settings: CompilerSettings, registry: Arc<ReferenceRegistry>) -> Arc<dyn CompilerBackend>;
}

/// Builds [`RustcBackend`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustcBackendFactory;

impl CompilerBackendFactory for RustcBackendFactory {
    fn create(&self, settings: CompilerSettings, registry: Arc<ReferenceRegistry>) -> Arc<dyn CompilerBackend> {
        Arc::new(RustcBackend::new(settings, registry))
    }
}

/// Everything an engine is configured with.
#[derive(Clone)]
pub struct EngineConfig {
    pub settings: EngineSettings,
    /// Base type for templates that do not declare one.
    pub base_template_type: Option<TemplateBaseType>,
    pub encoder: Arc<dyn EncodedStringFactory>,
    pub resolver: Arc<dyn ReferenceResolver>,
    pub translator: Arc<dyn TemplateTranslator>,
    pub backend_factory: Arc<dyn CompilerBackendFactory>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(EngineSettings::default())
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("settings", &self.settings)
            .field("base_template_type", &self.base_template_type)
            .field("encoder", &self.encoder)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: EngineSettings) -> Self {
        Self {
            encoder: settings.encoding.factory(),
            settings,
            base_template_type: None,
            resolver: Arc::new(CurrentModulesReferenceResolver),
            translator: Arc::new(MarkupTranslator::new()),
            backend_factory: Arc::new(RustcBackendFactory),
        }
    }

    /// Settings from a YAML file, with environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, QuillError> {
        Ok(Self::from_settings(EngineSettings::from_file(path)?.with_process_env()))
    }

    pub fn base_template_type(mut self, base: TemplateBaseType) -> Self {
        self.base_template_type = Some(base);
        self
    }

    pub fn encode_using(mut self, encoder: Arc<dyn EncodedStringFactory>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn resolve_using(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn translate_using(mut self, translator: Arc<dyn TemplateTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn compile_using(mut self, factory: Arc<dyn CompilerBackendFactory>) -> Self {
        self.backend_factory = factory;
        self
    }

    pub fn include_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings
            .namespaces
            .extend(namespaces.into_iter().map(Into::into));
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.settings.debug = debug;
        self
    }

    pub fn disable_temp_file_locking(mut self, disable: bool) -> Self {
        self.settings.disable_temp_file_locking = disable;
        self
    }

    pub fn rustc(mut self, rustc: impl Into<PathBuf>) -> Self {
        self.settings.rustc = Some(rustc.into());
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.temp_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Adds a library every compilation links against.
    pub fn reference(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.references.push(path.into());
        self
    }

    pub fn compiler_settings(&self) -> CompilerSettings {
        self.settings.compiler_settings()
    }
}
