//! Runnables and their compiled modules
//!
//! A runnable is any immediate subdirectory of the project that carries a
//! `.runnable.yaml` descriptor. Its compiled module is expected next to the
//! descriptor as `<name>.wasm`; producing that file is the job of the build
//! step, the packager only checks that it exists.
//!
//! ```text
//! my-app/
//! ├── Directive.yaml
//! ├── get-cart/
//! │   ├── .runnable.yaml
//! │   ├── src/lib.rs
//! │   └── get-cart.wasm
//! └── checkout/
//!     ├── .runnable.yaml
//!     └── checkout.wasm
//! ```

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bundle_directive::bundle::MODULE_EXTENSION;
use bundle_directive::directive::DEFAULT_NAMESPACE;
use serde::{Deserialize, Serialize};

use crate::error::PackageError;
use crate::static_files::is_excluded_dir;

/// Descriptor file names, in priority order
const DESCRIPTOR_FILENAMES: &[&str] = &[".runnable.yaml", ".runnable.yml"];

/// Contents of a `.runnable.yaml` descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnableDescriptor {
    pub name: String,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub lang: Option<String>,
}

/// A build input discovered in the project tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runnable {
    pub name: String,
    pub namespace: String,
    pub lang: Option<String>,
    /// Directory holding the runnable's sources and descriptor
    pub source_path: PathBuf,
    /// Where the compiled module is expected
    pub artifact_path: PathBuf,
}

impl Runnable {
    pub fn new(name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        let source_path = source_path.into();
        let artifact_path = source_path.join(format!("{}.{}", name, MODULE_EXTENSION));
        Self {
            name,
            namespace: DEFAULT_NAMESPACE.to_string(),
            lang: None,
            source_path,
            artifact_path,
        }
    }

    /// Load a runnable from a directory containing a descriptor
    ///
    /// Returns `Ok(None)` when the directory has no descriptor.
    pub fn from_dir(dir: &Path) -> Result<Option<Self>> {
        let Some(descriptor_path) = DESCRIPTOR_FILENAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
        else {
            return Ok(None);
        };

        let content = fs::read_to_string(&descriptor_path)
            .with_context(|| format!("Failed to read runnable descriptor: {:?}", descriptor_path))?;
        let descriptor: RunnableDescriptor = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse runnable descriptor: {:?}", descriptor_path))?;

        if descriptor.name.trim().is_empty() {
            anyhow::bail!("Runnable descriptor {:?} has an empty name", descriptor_path);
        }

        let mut runnable = Runnable::new(descriptor.name.trim(), dir);
        if let Some(namespace) = descriptor.namespace.filter(|ns| !ns.trim().is_empty()) {
            runnable.namespace = namespace;
        }
        runnable.lang = descriptor.lang;

        Ok(Some(runnable))
    }

    /// Check that the compiled module is present
    pub fn has_module(&self) -> Result<(), PackageError> {
        if self.artifact_path.is_file() {
            Ok(())
        } else {
            Err(PackageError::MissingModule {
                name: self.name.clone(),
                path: self.artifact_path.clone(),
            })
        }
    }

    /// Open the compiled module for reading
    pub fn open_module(&self) -> Result<Module> {
        let file = File::open(&self.artifact_path)
            .with_context(|| format!("Failed to open module for runnable {:?}", self.name))?;
        Ok(Module::new(self.name.clone(), BufReader::new(file)))
    }
}

/// An exclusively owned handle on a compiled module
///
/// The underlying file is closed when the module is dropped, which the bundle
/// writer does exactly once per module whether or not assembly succeeds.
pub struct Module {
    name: String,
    reader: Box<dyn Read + Send>,
}

impl Module {
    pub fn new(name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: name.into(),
            reader: Box::new(reader),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Read for Module {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module").field("name", &self.name).finish()
    }
}

/// The runnables of a project, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnableSet {
    runnables: Vec<Runnable>,
}

impl RunnableSet {
    /// Build a set from runnables, rejecting duplicate names
    pub fn new(mut runnables: Vec<Runnable>) -> Result<Self, PackageError> {
        runnables.sort_by(|a, b| a.name.cmp(&b.name));

        for pair in runnables.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(PackageError::DuplicateRunnable {
                    name: pair[0].name.clone(),
                    first: pair[0].source_path.clone(),
                    second: pair[1].source_path.clone(),
                });
            }
        }

        Ok(Self { runnables })
    }

    /// Discover runnables in the immediate subdirectories of `root`
    pub fn discover(root: &Path) -> Result<Self> {
        let entries = fs::read_dir(root)
            .with_context(|| format!("Failed to read project directory: {:?}", root))?;

        let mut runnables = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if !file_type.is_dir() {
                continue;
            }

            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || is_excluded_dir(&name) {
                continue;
            }

            if let Some(runnable) = Runnable::from_dir(&entry.path())? {
                tracing::debug!("Found runnable {} in {:?}", runnable.name, runnable.source_path);
                runnables.push(runnable);
            }
        }

        Ok(Self::new(runnables)?)
    }

    /// Confirm every runnable has a built module, stopping at the first gap
    pub fn validate(&self) -> Result<(), PackageError> {
        self.runnables.iter().try_for_each(Runnable::has_module)
    }

    /// Open every module, in set order
    ///
    /// If any module fails to open, the ones already opened are dropped (and
    /// closed) before the error is returned.
    pub fn open_modules(&self) -> Result<Vec<Module>> {
        self.open_modules_for(self.runnables.iter().map(|r| r.name.as_str()))
    }

    /// Open the modules backing `names`, in the order given
    pub fn open_modules_for<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<Module>> {
        names
            .into_iter()
            .map(|name| {
                let runnable = self
                    .get(name)
                    .ok_or_else(|| PackageError::UnknownFunction(name.to_string()))?;
                runnable.open_module()
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Runnable> {
        self.runnables.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Runnable> {
        self.runnables.iter()
    }

    pub fn len(&self) -> usize {
        self.runnables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runnables.is_empty()
    }
}
