//! Directive model
//!
//! The directive is the application manifest stored as `Directive.yaml` at the
//! project root and embedded as the first entry of every bundle. Runtimes read
//! it before resolving any module, so its function names must line up exactly
//! with the module entries in the archive.

use std::collections::HashSet;
use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::error::DirectiveError;

/// Identifier used when a project has no directive of its own
pub const DEFAULT_IDENTIFIER: &str = "com.suborbital.app";

/// Application version given to a synthesized directive
pub const DEFAULT_APP_VERSION: &str = "v0.0.1";

/// Namespace assigned to functions that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Canonical file name of the directive, both on disk and inside a bundle
pub const DIRECTIVE_FILENAME: &str = "Directive.yaml";

/// The application manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directive {
    /// Stable name of the application
    #[serde(default = "default_identifier")]
    pub identifier: String,

    /// Application version, e.g. `v1.2.0`
    pub app_version: String,

    /// Version of the runtime this bundle declares compatibility with
    pub runtime_version: String,

    /// Machine-generated directive; bumped to the next major on every package
    #[serde(default, skip_serializing_if = "is_false")]
    pub headless: bool,

    /// Declared functions, each backed by one runnable module
    #[serde(default)]
    pub functions: Vec<Function>,

    /// Keys this model does not interpret (handlers, schedules, connections, ...),
    /// kept so a rewritten directive loses nothing
    #[serde(flatten)]
    pub extra: Mapping,
}

/// A function declared by the directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    /// Fully-qualified function name, filled in during packaging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqfn: Option<String>,
}

fn default_identifier() -> String {
    DEFAULT_IDENTIFIER.to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Function {
    /// Create a function in the default namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: default_namespace(),
            lang: None,
            fqfn: None,
        }
    }

    /// Build the fully-qualified name `identifier#namespace::name@version`
    pub fn qualified_name(&self, identifier: &str, app_version: &str) -> String {
        format!(
            "{}#{}::{}@{}",
            identifier, self.namespace, self.name, app_version
        )
    }
}

impl Directive {
    /// Minimal directive used when the project does not provide one
    pub fn synthesize(runtime_version: &str) -> Self {
        Self {
            identifier: default_identifier(),
            app_version: DEFAULT_APP_VERSION.to_string(),
            runtime_version: version_tag(runtime_version),
            headless: false,
            functions: Vec::new(),
            extra: Mapping::new(),
        }
    }

    /// Parse a directive from YAML bytes
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, DirectiveError> {
        Ok(serde_yaml::from_slice(bytes)?)
    }

    /// Serialize the directive to YAML bytes
    pub fn to_yaml(&self) -> Result<Vec<u8>, DirectiveError> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    /// Load a directive from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DirectiveError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_yaml(&bytes)
    }

    /// Look up a declared function by name
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Parsed `appVersion`
    pub fn parsed_app_version(&self) -> Result<Version, DirectiveError> {
        parse_version("appVersion", &self.app_version)
    }

    /// Validate the structural invariants of the directive
    ///
    /// Resolution of functions against built modules is left to the packager,
    /// which is the only party that knows the runnable set.
    pub fn validate(&self) -> Result<(), DirectiveError> {
        if self.identifier.trim().is_empty() {
            return Err(DirectiveError::EmptyIdentifier);
        }

        parse_version("appVersion", &self.app_version)?;
        parse_version("runtimeVersion", &self.runtime_version)?;

        let mut seen = HashSet::new();
        for function in &self.functions {
            if !is_valid_module_key(&function.name) {
                return Err(DirectiveError::InvalidFunctionName(function.name.clone()));
            }
            if !seen.insert(function.name.as_str()) {
                return Err(DirectiveError::DuplicateFunction(function.name.clone()));
            }
        }

        Ok(())
    }
}

/// `version` with exactly one leading `v`
pub fn version_tag(version: &str) -> String {
    format!("v{}", version.trim().trim_start_matches('v'))
}

/// Parse a `v`-prefixed semantic version
///
/// The `v` is required. `vMAJOR` and `vMAJOR.MINOR` are shorthand for
/// `vMAJOR.0.0` and `vMAJOR.MINOR.0`; shorthand cannot carry a pre-release
/// or build suffix.
pub fn parse_version(field: &'static str, value: &str) -> Result<Version, DirectiveError> {
    let invalid = |reason: String| DirectiveError::InvalidVersion {
        field,
        value: value.to_string(),
        reason,
    };

    let Some(bare) = value.trim().strip_prefix('v') else {
        return Err(invalid("version must start with 'v'".to_string()));
    };

    let expanded = match bare.matches('.').count() {
        _ if bare.contains(['-', '+']) => bare.to_string(),
        0 => format!("{}.0.0", bare),
        1 => format!("{}.0", bare),
        _ => bare.to_string(),
    };

    Version::parse(&expanded).map_err(|err| invalid(err.to_string()))
}

/// Whether `name` can be turned into a `<name>.wasm` archive entry
fn is_valid_module_key(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_whitespace)
}
