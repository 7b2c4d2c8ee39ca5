//! Project context
//!
//! Everything the packager reads from a project directory: the runnables, the
//! directive (if the author wrote one), and the current state of the bundle.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bundle_directive::{Directive, BUNDLE_FILENAME, DIRECTIVE_FILENAME};

use crate::runnable::RunnableSet;
use crate::static_files::STATIC_DIR;

/// Pointer to a produced bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRef {
    pub exists: bool,
    pub full_path: PathBuf,
}

impl BundleRef {
    /// Reference to the bundle location of a project, checking the filesystem
    pub fn for_project(root: &Path) -> Self {
        let full_path = root.join(BUNDLE_FILENAME);
        Self {
            exists: full_path.is_file(),
            full_path,
        }
    }
}

/// The inputs of a packaging run
#[derive(Debug, Clone)]
pub struct ProjectContext {
    /// Absolute project root
    pub root: PathBuf,
    pub runnables: RunnableSet,
    /// `None` when the project has no `Directive.yaml`
    pub directive: Option<Directive>,
    pub bundle: BundleRef,
}

impl ProjectContext {
    /// Load the context for a project directory
    pub fn for_directory(dir: &Path) -> Result<Self> {
        let root = dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory: {:?}", dir))?;

        let runnables = RunnableSet::discover(&root)?;

        let directive_path = root.join(DIRECTIVE_FILENAME);
        let directive = if directive_path.is_file() {
            let directive = Directive::load(&directive_path)
                .with_context(|| format!("Failed to load directive: {:?}", directive_path))?;
            Some(directive)
        } else {
            None
        };

        let bundle = BundleRef::for_project(&root);

        tracing::debug!(
            "Loaded project {:?}: {} runnables, directive={}",
            root,
            runnables.len(),
            directive.is_some()
        );

        Ok(Self {
            root,
            runnables,
            directive,
            bundle,
        })
    }

    /// Path of the directive file
    pub fn directive_path(&self) -> PathBuf {
        self.root.join(DIRECTIVE_FILENAME)
    }

    /// Root of the static asset tree
    pub fn static_dir(&self) -> PathBuf {
        self.root.join(STATIC_DIR)
    }

    /// Fixed location of the bundle
    pub fn bundle_path(&self) -> PathBuf {
        self.root.join(BUNDLE_FILENAME)
    }
}

/// Overwrite the project's directive file with `directive`
pub fn write_directive_file(root: &Path, directive: &Directive) -> Result<()> {
    let path = root.join(DIRECTIVE_FILENAME);
    let bytes = directive
        .to_yaml()
        .context("Failed to serialize directive")?;

    fs::write(&path, bytes)
        .with_context(|| format!("Failed to write directive file: {:?}", path))?;

    tracing::debug!("Wrote directive to {:?}", path);
    Ok(())
}
