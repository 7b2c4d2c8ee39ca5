//! Bundle assembly - write the directive, modules, and static files into one archive
//!
//! The archive is written to a temporary file next to the target and renamed
//! into place only once it is complete, so a failed run never leaves a
//! truncated bundle behind and never disturbs the previous one.
//!
//! Entry order is fixed: the manifest first, then modules in the order given,
//! then static files in the order given. Entry timestamps and permissions are
//! pinned so identical inputs produce identical bytes.

use std::collections::HashSet;
#[cfg(unix)]
use std::fs::Permissions;
use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bundle_directive::{module_entry_name, static_entry_name, DIRECTIVE_FILENAME};
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PackageError;
use crate::project::BundleRef;
use crate::runnable::Module;
use crate::static_files::StaticFile;

/// File mode of a written bundle
#[cfg(unix)]
const BUNDLE_MODE: u32 = 0o644;

/// Assemble a bundle at `target`
///
/// Every module is consumed: each one is dropped (closing its file) exactly
/// once, whether assembly succeeds or fails.
pub fn write_bundle(
    directive_bytes: &[u8],
    modules: Vec<Module>,
    statics: &[StaticFile],
    target: &Path,
) -> Result<BundleRef> {
    check_entry_names(&modules, statics)?;

    let parent = target
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Bundle path has no parent directory: {:?}", target))?;

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary bundle in {:?}", parent))?;

    let module_count = modules.len();
    write_archive(tmp.as_file_mut(), directive_bytes, modules, statics)?;

    tmp.as_file()
        .sync_all()
        .context("Failed to flush temporary bundle")?;
    set_bundle_permissions(tmp.as_file())?;
    tmp.persist(target)
        .with_context(|| format!("Failed to move bundle into place: {:?}", target))?;

    tracing::debug!(
        "Wrote bundle {:?} ({} modules, {} static files)",
        target,
        module_count,
        statics.len()
    );

    Ok(BundleRef {
        exists: true,
        full_path: target.to_path_buf(),
    })
}

/// Write the archive body to any seekable writer
pub fn write_archive<W: Write + Seek>(
    writer: W,
    directive_bytes: &[u8],
    modules: Vec<Module>,
    statics: &[StaticFile],
) -> Result<W> {
    let options = entry_options();
    let mut zip = ZipWriter::new(writer);

    zip.start_file(DIRECTIVE_FILENAME, options)
        .context("Failed to add directive to bundle")?;
    zip.write_all(directive_bytes)
        .context("Failed to write directive to bundle")?;

    for mut module in modules {
        let entry = module_entry_name(module.name());
        zip.start_file(entry.as_str(), options)
            .with_context(|| format!("Failed to add module {:?} to bundle", module.name()))?;
        io::copy(&mut module, &mut zip)
            .with_context(|| format!("Failed to write module {:?} to bundle", module.name()))?;
    }

    for file in statics {
        let entry = static_entry_name(&file.relative_path);
        let mut reader = file.open()?;
        zip.start_file(entry.as_str(), options)
            .with_context(|| format!("Failed to add static file {:?} to bundle", file.relative_path))?;
        io::copy(&mut reader, &mut zip)
            .with_context(|| format!("Failed to write static file {:?} to bundle", file.relative_path))?;
    }

    zip.finish().context("Failed to finalize bundle")
}

/// Temporary files are created owner-only; bundles are read by other tooling
#[cfg(unix)]
fn set_bundle_permissions(file: &File) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(Permissions::from_mode(BUNDLE_MODE))
        .context("Failed to set bundle permissions")
}

#[cfg(not(unix))]
fn set_bundle_permissions(_file: &File) -> Result<()> {
    Ok(())
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

/// Reject inputs that would produce two entries with the same name
fn check_entry_names(modules: &[Module], statics: &[StaticFile]) -> Result<(), PackageError> {
    let mut seen = HashSet::new();
    seen.insert(DIRECTIVE_FILENAME.to_string());

    let names = modules
        .iter()
        .map(|m| module_entry_name(m.name()))
        .chain(statics.iter().map(|f| static_entry_name(&f.relative_path)));

    for name in names {
        if !seen.insert(name.clone()) {
            return Err(PackageError::DuplicateEntry(name));
        }
    }

    Ok(())
}
