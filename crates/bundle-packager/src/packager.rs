//! Packaging jobs
//!
//! The bundle job runs the whole pipeline for one project:
//!
//! 1. every runnable must have a built module (fail fast on the first gap)
//! 2. the directive is synthesized when absent, or bumped and persisted when headless
//! 3. functions are reconciled with the runnables and the directive is validated
//! 4. static files are collected
//! 5. the directive, modules (in function order), and static files are assembled into the bundle
//!
//! Nothing is written to the bundle location until steps 1-4 have passed. The
//! only side effect that can survive a failed run is the persisted headless
//! version bump.

use anyhow::{Context, Result};
use bundle_directive::Directive;

use crate::augment::{augment, AugmentPolicy};
use crate::bundle::write_bundle;
use crate::config::{PackagerConfig, RUNTIME_VERSION};
use crate::project::{write_directive_file, BundleRef, ProjectContext};
use crate::static_files::collect_static_files;
use crate::version::bump_headless;

const BUNDLE_PACKAGE_JOB_TYPE: &str = "bundle";

/// A step that turns a project into a build output
pub trait PackageJob {
    /// Short name of the job, used in logs
    fn job_type(&self) -> &'static str;

    /// Package the project
    fn package(&self, ctx: &ProjectContext) -> Result<PackageOutcome>;
}

/// What a successful bundle job produced
#[derive(Debug, Clone)]
pub struct PackageOutcome {
    pub bundle: BundleRef,
    /// The directive as written into the bundle
    pub directive: Directive,
    pub static_files: usize,
    /// Whether a headless version bump was persisted
    pub version_bumped: bool,
}

/// Packages a project into `runnables.wasm.zip`
#[derive(Debug, Clone)]
pub struct BundlePackageJob {
    runtime_version: String,
    policy: AugmentPolicy,
}

impl BundlePackageJob {
    pub fn new() -> Self {
        Self {
            runtime_version: RUNTIME_VERSION.to_string(),
            policy: AugmentPolicy::default(),
        }
    }

    pub fn from_config(config: &PackagerConfig) -> Self {
        Self {
            runtime_version: config.runtime_version.clone(),
            policy: config.augment_policy,
        }
    }

    pub fn with_policy(mut self, policy: AugmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve the directive to package, persisting a headless bump
    fn prepare_directive(&self, ctx: &ProjectContext) -> Result<(Directive, bool)> {
        match &ctx.directive {
            None => {
                tracing::info!("No directive found, using defaults");
                Ok((Directive::synthesize(&self.runtime_version), false))
            }
            Some(directive) if directive.headless => {
                tracing::info!("Updating headless directive");
                let bumped = bump_headless(directive.clone())
                    .context("Failed to bump headless appVersion")?;
                write_directive_file(&ctx.root, &bumped)
                    .context("Failed to persist bumped directive")?;
                Ok((bumped, true))
            }
            Some(directive) => Ok((directive.clone(), false)),
        }
    }
}

impl Default for BundlePackageJob {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageJob for BundlePackageJob {
    fn job_type(&self) -> &'static str {
        BUNDLE_PACKAGE_JOB_TYPE
    }

    fn package(&self, ctx: &ProjectContext) -> Result<PackageOutcome> {
        ctx.runnables.validate().context("Missing built module")?;

        let (directive, version_bumped) = self.prepare_directive(ctx)?;

        let directive = augment(directive, &ctx.runnables, self.policy)
            .context("Failed to reconcile directive functions with runnables")?;
        directive.validate().context("Failed to validate directive")?;

        let statics = collect_static_files(&ctx.static_dir())
            .context("Failed to collect static files")?;
        if !statics.is_empty() {
            tracing::info!("Adding {} static files to bundle", statics.len());
        }

        let directive_bytes = directive.to_yaml().context("Failed to serialize directive")?;

        let modules = ctx
            .runnables
            .open_modules_for(directive.functions.iter().map(|f| f.name.as_str()))
            .context("Failed to open modules for bundle")?;

        let bundle = write_bundle(&directive_bytes, modules, &statics, &ctx.bundle_path())
            .context("Failed to write bundle")?;

        tracing::info!(
            "Bundle was created -> {} @ {}",
            bundle.full_path.display(),
            directive.app_version
        );

        Ok(PackageOutcome {
            bundle,
            directive,
            static_files: statics.len(),
            version_bumped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use bundle_directive::{BundleReader, Function, BUNDLE_FILENAME, DIRECTIVE_FILENAME};
    use tempfile::TempDir;

    use crate::error::PackageError;

    fn add_runnable(root: &Path, name: &str, built: bool) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(".runnable.yaml"), format!("name: {}\nlang: rust\n", name)).unwrap();
        if built {
            fs::write(dir.join(format!("{}.wasm", name)), format!("\0asm {}", name)).unwrap();
        }
    }

    fn write_directive(root: &Path, app_version: &str, headless: bool, functions: &[&str]) {
        let directive = Directive {
            identifier: "com.example.shop".to_string(),
            app_version: app_version.to_string(),
            runtime_version: "v0.4.2".to_string(),
            headless,
            functions: functions.iter().map(|n| Function::new(*n)).collect(),
            extra: Default::default(),
        };
        fs::write(root.join(DIRECTIVE_FILENAME), directive.to_yaml().unwrap()).unwrap();
    }

    fn package(root: &Path) -> Result<PackageOutcome> {
        let ctx = ProjectContext::for_directory(root)?;
        BundlePackageJob::new().package(&ctx)
    }

    fn zip_files(root: &Path) -> Vec<String> {
        fs::read_dir(root)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".zip"))
            .collect()
    }

    #[test]
    fn test_packages_complete_project() {
        let tmp = TempDir::new().unwrap();
        add_runnable(tmp.path(), "get-cart", true);
        add_runnable(tmp.path(), "checkout", true);
        write_directive(tmp.path(), "v1.2.0", false, &["get-cart"]);
        fs::create_dir_all(tmp.path().join("static/.git")).unwrap();
        fs::write(tmp.path().join("static/index.html"), "<html></html>").unwrap();
        fs::write(tmp.path().join("static/.git/HEAD"), "ref").unwrap();

        let outcome = package(tmp.path()).unwrap();

        assert!(outcome.bundle.exists);
        assert!(outcome.bundle.full_path.ends_with(BUNDLE_FILENAME));
        assert_eq!(zip_files(tmp.path()), vec![BUNDLE_FILENAME.to_string()]);
        assert_eq!(outcome.static_files, 1);
        assert!(!outcome.version_bumped);

        let mut reader = BundleReader::open(&outcome.bundle.full_path).unwrap();
        reader.verify().unwrap();
        assert_eq!(reader.directive(), &outcome.directive);
        assert_eq!(reader.module_names(), vec!["get-cart", "checkout"]);
        assert_eq!(reader.static_paths(), vec!["index.html"]);
        assert_eq!(reader.module("checkout").unwrap(), b"\0asm checkout");
    }

    #[test]
    fn test_directive_roundtrips_through_bundle() {
        let tmp = TempDir::new().unwrap();
        add_runnable(tmp.path(), "hello", true);
        write_directive(tmp.path(), "v1.0.0", false, &["hello"]);

        let outcome = package(tmp.path()).unwrap();
        let from_bundle = BundleReader::open(&outcome.bundle.full_path)
            .unwrap()
            .into_directive();

        assert_eq!(from_bundle.identifier, "com.example.shop");
        assert_eq!(from_bundle.app_version, "v1.0.0");
        assert_eq!(from_bundle.functions, outcome.directive.functions);
    }

    #[test]
    fn test_synthesizes_directive_when_absent() {
        let tmp = TempDir::new().unwrap();
        add_runnable(tmp.path(), "hello", true);

        let outcome = package(tmp.path()).unwrap();
        assert_eq!(outcome.directive.identifier, "com.suborbital.app");
        assert_eq!(outcome.directive.app_version, "v0.0.1");
        assert_eq!(outcome.directive.runtime_version, format!("v{}", RUNTIME_VERSION));
        assert_eq!(outcome.directive.functions.len(), 1);
        assert!(!tmp.path().join(DIRECTIVE_FILENAME).exists());
    }

    #[test]
    fn test_missing_module_fails_before_writing() {
        let tmp = TempDir::new().unwrap();
        add_runnable(tmp.path(), "built", true);
        add_runnable(tmp.path(), "unbuilt", false);

        let err = package(tmp.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("unbuilt"));
        assert!(matches!(
            err.downcast_ref::<PackageError>(),
            Some(PackageError::MissingModule { name, .. }) if name == "unbuilt"
        ));
        assert!(zip_files(tmp.path()).is_empty());
    }

    #[test]
    fn test_headless_bump_is_persisted() {
        let tmp = TempDir::new().unwrap();
        add_runnable(tmp.path(), "hello", true);
        write_directive(tmp.path(), "v2.3.7", true, &["hello"]);

        let outcome = package(tmp.path()).unwrap();
        assert!(outcome.version_bumped);
        assert_eq!(outcome.directive.app_version, "v3.0.0");

        let on_disk = Directive::load(tmp.path().join(DIRECTIVE_FILENAME)).unwrap();
        assert_eq!(on_disk.app_version, "v3.0.0");

        let bundled = BundleReader::open(&outcome.bundle.full_path).unwrap().into_directive();
        assert_eq!(bundled.app_version, "v3.0.0");
    }

    #[test]
    fn test_headless_rewrite_keeps_unmodelled_keys() {
        let tmp = TempDir::new().unwrap();
        add_runnable(tmp.path(), "hello", true);
        fs::write(
            tmp.path().join(DIRECTIVE_FILENAME),
            "identifier: com.example.shop\n\
             appVersion: v1.0.0\n\
             runtimeVersion: v0.4.2\n\
             headless: true\n\
             functions:\n  - name: hello\n\
             handlers:\n  - type: request\n    resource: /hello\n",
        )
        .unwrap();

        package(tmp.path()).unwrap();

        let on_disk = fs::read_to_string(tmp.path().join(DIRECTIVE_FILENAME)).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&on_disk).unwrap();
        assert_eq!(value["appVersion"].as_str(), Some("v2.0.0"));
        assert_eq!(value["handlers"][0]["resource"].as_str(), Some("/hello"));
        assert_eq!(value["handlers"][0]["type"].as_str(), Some("request"));
    }

    #[test]
    fn test_headless_bump_survives_later_failure() {
        let tmp = TempDir::new().unwrap();
        add_runnable(tmp.path(), "hello", true);
        write_directive(tmp.path(), "v2.3.7", true, &["hello", "ghost"]);

        let err = package(tmp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackageError>(),
            Some(PackageError::UnknownFunction(name)) if name == "ghost"
        ));

        let on_disk = Directive::load(tmp.path().join(DIRECTIVE_FILENAME)).unwrap();
        assert_eq!(on_disk.app_version, "v3.0.0");
        assert!(zip_files(tmp.path()).is_empty());
    }

    #[test]
    fn test_malformed_version_fails_without_archive() {
        let tmp = TempDir::new().unwrap();
        add_runnable(tmp.path(), "hello", true);
        write_directive(tmp.path(), "banana", false, &["hello"]);

        let err = package(tmp.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("banana"));
        assert!(zip_files(tmp.path()).is_empty());

        write_directive(tmp.path(), "banana", true, &["hello"]);
        let err = package(tmp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackageError>(),
            Some(PackageError::InvalidVersion { .. })
        ));
        assert!(zip_files(tmp.path()).is_empty());
    }

    #[test]
    fn test_require_declared_policy() {
        let tmp = TempDir::new().unwrap();
        add_runnable(tmp.path(), "declared", true);
        add_runnable(tmp.path(), "stray", true);
        write_directive(tmp.path(), "v1.0.0", false, &["declared"]);

        let ctx = ProjectContext::for_directory(tmp.path()).unwrap();
        let job = BundlePackageJob::new().with_policy(AugmentPolicy::RequireDeclared);
        assert_eq!(job.job_type(), "bundle");

        let err = job.package(&ctx).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackageError>(),
            Some(PackageError::UndeclaredRunnable(name)) if name == "stray"
        ));
        assert!(zip_files(tmp.path()).is_empty());
    }
}
