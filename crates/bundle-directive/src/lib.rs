//! Bundle Directive - the contract between the packager and the runtimes that load its bundles
//!
//! This crate owns the directive (application manifest) model, its validation
//! rules, and the naming of entries inside a `runnables.wasm.zip` bundle.

pub mod bundle;
pub mod directive;
pub mod error;

pub mod prelude {
    //! Common imports for bundle producers and consumers
    pub use crate::bundle::{BundleReader, BUNDLE_FILENAME};
    pub use crate::directive::{Directive, Function};
    pub use crate::error::DirectiveError;
}

// Re-export key types at crate root
pub use bundle::{module_entry_name, static_entry_name, BundleReader, BUNDLE_FILENAME};
pub use directive::{parse_version, version_tag, Directive, Function, DIRECTIVE_FILENAME};
pub use error::DirectiveError;
