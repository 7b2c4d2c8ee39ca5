//! Headless version policy
//!
//! Headless directives are machine-maintained, so every packaging run rounds
//! them up to the next major release: `v2.3.7` becomes `v3.0.0`. This is not a
//! conventional semver bump; minor and patch are always reset.

use bundle_directive::{parse_version, Directive, DirectiveError};

use crate::error::PackageError;

/// Bump a headless directive to the next major version
///
/// Directives that are not headless are returned unchanged.
pub fn bump_headless(directive: Directive) -> Result<Directive, PackageError> {
    if !directive.headless {
        return Ok(directive);
    }

    let next = next_major(&directive.app_version)?;
    tracing::info!("Bumping headless appVersion {} -> {}", directive.app_version, next);

    Ok(Directive {
        app_version: next,
        ..directive
    })
}

/// `v<major+1>.0.0` for the given version string
pub fn next_major(app_version: &str) -> Result<String, PackageError> {
    let version = parse_version("appVersion", app_version).map_err(|err| match err {
        DirectiveError::InvalidVersion { value, reason, .. } => {
            PackageError::InvalidVersion { value, reason }
        }
        other => PackageError::InvalidVersion {
            value: app_version.to_string(),
            reason: other.to_string(),
        },
    })?;

    let major = version
        .major
        .checked_add(1)
        .ok_or_else(|| PackageError::InvalidVersion {
            value: app_version.to_string(),
            reason: "major version overflow".to_string(),
        })?;

    Ok(format!("v{}.0.0", major))
}
