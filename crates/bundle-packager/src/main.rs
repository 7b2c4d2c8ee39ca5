//! Packager - Main entry point
//!
//! Commands:
//! - `build`: package a project into `runnables.wasm.zip`
//! - `inspect`: show the manifest and entries of an existing bundle
//! - `deploy`: render and apply the Kubernetes installation
//! - `version`: print the packager and runtime versions
//!
//! Every command runs alongside the advisory release check, which never
//! affects the exit status.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bundle_directive::{version_tag, BundleReader};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bundle_packager::augment::AugmentPolicy;
use bundle_packager::config::{PackagerConfig, PACKAGER_VERSION};
use bundle_packager::deploy::{run_deploy, DeployOptions, Prompt};
use bundle_packager::release::ReleaseChecker;
use bundle_packager::{BundlePackageJob, PackageJob, ProjectContext};

#[derive(Parser, Debug)]
#[command(name = "packager", version, about = "Package runnables into a deployable bundle")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Package the project into runnables.wasm.zip
    Build {
        /// Project directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Fail when a runnable is not declared in Directive.yaml
        #[arg(long)]
        require_declared: bool,
    },

    /// Print the manifest and entries of an existing bundle
    Inspect {
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Render the Kubernetes manifests and apply them with kubectl
    Deploy {
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Write the manifests to .deploy/ without applying them
        #[arg(long)]
        dry_run: bool,

        /// Template repository branch to download
        #[arg(long, default_value = "main")]
        branch: String,

        /// Local template directory to use instead of downloading
        #[arg(long)]
        templates: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,bundle_packager=debug".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = PackagerConfig::from_env();
    tracing::debug!("Configuration loaded: {:?}", config);

    let release_check = spawn_release_check(&config);

    let result = match cli.command {
        Commands::Build { dir, require_declared } => {
            build(&config, project_dir(&config, dir), require_declared).await
        }
        Commands::Inspect { dir, json } => inspect(&project_dir(&config, dir), json),
        Commands::Deploy {
            dir,
            dry_run,
            branch,
            templates,
        } => {
            let options = DeployOptions {
                dry_run,
                branch,
                templates,
            };
            deploy(&config, &project_dir(&config, dir), &options).await
        }
        Commands::Version => {
            println!("packager version: {}", PACKAGER_VERSION);
            println!("runtime version: {}", version_tag(&config.runtime_version));
            Ok(())
        }
    };

    report_release_check(release_check).await;

    result
}

fn project_dir(config: &PackagerConfig, dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| config.project_dir.clone())
}

async fn build(config: &PackagerConfig, dir: PathBuf, require_declared: bool) -> Result<()> {
    let mut job = BundlePackageJob::from_config(config);
    if require_declared {
        job = job.with_policy(AugmentPolicy::RequireDeclared);
    }

    // Packaging is blocking filesystem work
    let outcome = tokio::task::spawn_blocking(move || {
        let ctx = ProjectContext::for_directory(&dir)?;
        tracing::info!(
            "Packaging {} runnables with {} job",
            ctx.runnables.len(),
            job.job_type()
        );
        job.package(&ctx)
    })
    .await
    .context("Packaging task panicked")??;

    if outcome.version_bumped {
        tracing::info!("Headless appVersion is now {}", outcome.directive.app_version);
    }

    Ok(())
}

#[derive(Serialize)]
struct BundleSummary<'a> {
    path: &'a Path,
    identifier: &'a str,
    app_version: &'a str,
    runtime_version: &'a str,
    headless: bool,
    functions: Vec<String>,
    modules: Vec<String>,
    static_files: Vec<String>,
}

fn inspect(dir: &Path, json: bool) -> Result<()> {
    let ctx = ProjectContext::for_directory(dir)?;
    if !ctx.bundle.exists {
        anyhow::bail!("No bundle found at {:?}, run `packager build` first", ctx.bundle.full_path);
    }

    let mut reader = BundleReader::open(&ctx.bundle.full_path)
        .with_context(|| format!("Failed to open bundle {:?}", ctx.bundle.full_path))?;
    reader.verify().context("Bundle is inconsistent")?;

    let directive = reader.directive();
    let summary = BundleSummary {
        path: &ctx.bundle.full_path,
        identifier: &directive.identifier,
        app_version: &directive.app_version,
        runtime_version: &directive.runtime_version,
        headless: directive.headless,
        functions: directive
            .functions
            .iter()
            .map(|f| f.fqfn.clone().unwrap_or_else(|| f.name.clone()))
            .collect(),
        modules: reader.module_names(),
        static_files: reader.static_paths(),
    };

    if json {
        let rendered =
            serde_json::to_string_pretty(&summary).context("Failed to serialize bundle summary")?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("bundle:  {}", summary.path.display());
    println!("app:     {} @ {}", summary.identifier, summary.app_version);
    println!("runtime: {}", summary.runtime_version);
    if summary.headless {
        println!("headless: true");
    }
    println!("functions:");
    for function in &summary.functions {
        println!("  {}", function);
    }
    println!("static files: {}", summary.static_files.len());
    for path in &summary.static_files {
        println!("  {}", path);
    }

    Ok(())
}

async fn deploy(config: &PackagerConfig, dir: &Path, options: &DeployOptions) -> Result<()> {
    let root = dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve project directory: {:?}", dir))?;

    let stdin = io::stdin();
    let mut prompt = Prompt::new(stdin.lock(), io::stdout());
    let outcome = run_deploy(config, &root, options, &mut prompt).await?;

    tracing::debug!(
        "Deploy finished (applied: {}, {} manifests in {:?})",
        outcome.applied,
        outcome.files.len(),
        outcome.staging_dir
    );

    Ok(())
}

fn spawn_release_check(config: &PackagerConfig) -> Option<JoinHandle<Result<Option<String>>>> {
    if config.release_check_disabled {
        tracing::debug!("Release check disabled");
        return None;
    }

    match ReleaseChecker::from_config(config) {
        Ok(checker) => Some(tokio::spawn(async move {
            checker.check_for_latest_version().await
        })),
        Err(e) => {
            tracing::warn!("Release check unavailable: {:#}", e);
            None
        }
    }
}

async fn report_release_check(handle: Option<JoinHandle<Result<Option<String>>>>) {
    let Some(handle) = handle else {
        return;
    };

    match tokio::time::timeout(Duration::from_secs(2), handle).await {
        Ok(Ok(Ok(Some(notice)))) => tracing::info!("{}", notice),
        Ok(Ok(Ok(None))) => {}
        Ok(Ok(Err(e))) => tracing::warn!("Release check failed: {:#}", e),
        Ok(Err(e)) => tracing::warn!("Release check task failed: {}", e),
        Err(_) => tracing::debug!("Release check did not finish in time"),
    }
}
