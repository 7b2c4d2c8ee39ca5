//! Bundle archive layout and read access
//!
//! Bundle structure:
//! ```text
//! runnables.wasm.zip
//! ├── Directive.yaml        # Manifest, always the first entry
//! ├── get-cart.wasm         # One module per declared function
//! ├── checkout.wasm
//! └── static/
//!     ├── index.html        # Mirrors the project's static tree
//!     └── css/site.css
//! ```

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use zip::ZipArchive;

use crate::directive::{Directive, DIRECTIVE_FILENAME};
use crate::error::DirectiveError;

/// Fixed file name of the bundle at the project root
pub const BUNDLE_FILENAME: &str = "runnables.wasm.zip";

/// Extension of compiled module entries
pub const MODULE_EXTENSION: &str = "wasm";

/// Directory prefix under which static files are stored
pub const STATIC_PREFIX: &str = "static/";

/// Archive entry name for a module
pub fn module_entry_name(function: &str) -> String {
    format!("{}.{}", function, MODULE_EXTENSION)
}

/// Archive entry name for a static file given its relative path
pub fn static_entry_name(relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");
    format!("{}{}", STATIC_PREFIX, normalized.trim_start_matches('/'))
}

/// Read-side view of a bundle, as a runtime would consume it
pub struct BundleReader<R: Read + Seek> {
    archive: ZipArchive<R>,
    directive: Directive,
}

impl BundleReader<BufReader<File>> {
    /// Open a bundle file from disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DirectiveError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> BundleReader<R> {
    /// Read the archive index and parse the manifest
    pub fn new(reader: R) -> Result<Self, DirectiveError> {
        let mut archive = ZipArchive::new(reader)?;

        let directive = {
            let mut entry = match archive.by_name(DIRECTIVE_FILENAME) {
                Ok(entry) => entry,
                Err(zip::result::ZipError::FileNotFound) => {
                    return Err(DirectiveError::MissingEntry(DIRECTIVE_FILENAME.to_string()))
                }
                Err(err) => return Err(err.into()),
            };
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            Directive::from_yaml(&bytes)?
        };

        Ok(Self { archive, directive })
    }

    /// The manifest stored in the bundle
    pub fn directive(&self) -> &Directive {
        &self.directive
    }

    /// Consume the reader, keeping only the manifest
    pub fn into_directive(self) -> Directive {
        self.directive
    }

    /// All entry names in archive order
    pub fn entry_names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    /// Names of the module entries, without extension, in archive order
    pub fn module_names(&self) -> Vec<String> {
        let suffix = format!(".{}", MODULE_EXTENSION);
        (0..self.archive.len())
            .filter_map(|i| self.archive.name_for_index(i).map(str::to_string))
            .filter(|name| !name.starts_with(STATIC_PREFIX) && !name.contains('/'))
            .filter_map(|name| name.strip_suffix(&suffix).map(str::to_string))
            .collect()
    }

    /// Relative paths of the static files, in archive order
    pub fn static_paths(&self) -> Vec<String> {
        self.archive
            .file_names()
            .filter_map(|name| name.strip_prefix(STATIC_PREFIX))
            .map(str::to_string)
            .collect()
    }

    /// Read the module backing a function
    pub fn module(&mut self, function: &str) -> Result<Vec<u8>, DirectiveError> {
        self.read_entry(&module_entry_name(function))
    }

    /// Read a static file by its relative path
    pub fn static_file(&mut self, relative_path: &str) -> Result<Vec<u8>, DirectiveError> {
        self.read_entry(&static_entry_name(relative_path))
    }

    /// Check that every declared function has a module entry
    pub fn verify(&mut self) -> Result<(), DirectiveError> {
        self.directive.validate()?;

        for function in &self.directive.functions {
            let name = module_entry_name(&function.name);
            if self.archive.index_for_name(&name).is_none() {
                return Err(DirectiveError::MissingEntry(name));
            }
        }

        Ok(())
    }

    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, DirectiveError> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(DirectiveError::MissingEntry(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::Function;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn archive_with(entries: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(bytes).unwrap();
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    fn directive_bytes() -> Vec<u8> {
        let mut directive = Directive::synthesize("0.4.2");
        directive.functions.push(Function::new("hello"));
        directive.to_yaml().unwrap()
    }

    #[test]
    fn test_entry_names() {
        assert_eq!(module_entry_name("hello"), "hello.wasm");
        assert_eq!(static_entry_name("css/site.css"), "static/css/site.css");
        assert_eq!(static_entry_name("img\\logo.png"), "static/img/logo.png");
    }

    #[test]
    fn test_read_bundle() {
        let manifest = directive_bytes();
        let cursor = archive_with(&[
            (DIRECTIVE_FILENAME, manifest.as_slice()),
            ("hello.wasm", &b"\0asm"[..]),
            ("static/index.html", &b"<html></html>"[..]),
        ]);

        let mut reader = BundleReader::new(cursor).unwrap();
        assert_eq!(reader.directive().functions[0].name, "hello");
        assert_eq!(reader.module_names(), vec!["hello".to_string()]);
        assert_eq!(reader.static_paths(), vec!["index.html".to_string()]);
        assert_eq!(reader.module("hello").unwrap(), b"\0asm");
        assert_eq!(reader.static_file("index.html").unwrap(), b"<html></html>");
        reader.verify().unwrap();
    }

    #[test]
    fn test_missing_manifest() {
        let cursor = archive_with(&[("hello.wasm", &b"\0asm"[..])]);
        let err = BundleReader::new(cursor).err().unwrap();
        assert!(matches!(err, DirectiveError::MissingEntry(name) if name == DIRECTIVE_FILENAME));
    }

    #[test]
    fn test_verify_detects_missing_module() {
        let manifest = directive_bytes();
        let cursor = archive_with(&[(DIRECTIVE_FILENAME, manifest.as_slice())]);

        let mut reader = BundleReader::new(cursor).unwrap();
        let err = reader.verify().unwrap_err();
        assert!(matches!(err, DirectiveError::MissingEntry(name) if name == "hello.wasm"));
    }
}
