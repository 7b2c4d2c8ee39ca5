//! Bundle packager
//!
//! Turns a project directory into a single deployable bundle:
//! - discovers runnables and checks their compiled modules
//! - synthesizes, bumps, and reconciles the directive
//! - collects static assets
//! - writes `runnables.wasm.zip` atomically
//!
//! Also carries the advisory release check and the Kubernetes deploy flow
//! used by the `packager` binary.

pub mod augment;
pub mod bundle;
pub mod config;
pub mod deploy;
pub mod error;
pub mod packager;
pub mod project;
pub mod release;
pub mod runnable;
pub mod static_files;
pub mod version;

pub use config::PackagerConfig;
pub use error::PackageError;
pub use packager::{BundlePackageJob, PackageJob, PackageOutcome};
pub use project::{BundleRef, ProjectContext};
