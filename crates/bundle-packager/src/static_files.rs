//! Static asset collection
//!
//! Walks a directory tree and gathers the regular files that get embedded
//! under `static/` in the bundle. Version-control metadata and build output
//! directories are skipped at any depth, and symlinks are never followed.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;

/// Directory holding static assets, relative to the project root
pub const STATIC_DIR: &str = "static";

/// Directory names never descended into
const EXCLUDED_DIRS: &[&str] = &[".git", ".hg", ".svn", "target", "node_modules", ".deploy"];

/// Whether a directory name is excluded from collection and discovery
pub fn is_excluded_dir(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
}

/// A file to embed in the bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFile {
    /// Path relative to the collection root, `/`-separated
    pub relative_path: String,
    /// Absolute location on disk
    pub source: PathBuf,
}

impl StaticFile {
    /// Open the file contents
    pub fn open(&self) -> Result<BufReader<File>> {
        let file = File::open(&self.source)
            .with_context(|| format!("Failed to open static file: {:?}", self.source))?;
        Ok(BufReader::new(file))
    }
}

/// Collect every eligible file under `root`, sorted by relative path
///
/// A missing root is not an error and yields no files.
pub fn collect_static_files(root: &Path) -> Result<Vec<StaticFile>> {
    if !root.is_dir() {
        tracing::debug!("No static directory at {:?}", root);
        return Ok(Vec::new());
    }

    let files = walk_files(root)?
        .into_iter()
        .map(|(relative_path, source)| StaticFile {
            relative_path,
            source,
        })
        .collect();

    Ok(files)
}

/// Regular files under `root` as `(relative, absolute)` pairs, sorted by relative path
///
/// Ignore files and hidden-file rules are not applied; only the excluded
/// directories are skipped. Symlinks are not followed.
pub fn walk_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            entry.depth() == 0 || !is_dir || !is_excluded_dir(&entry.file_name().to_string_lossy())
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", root))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let path = entry.into_path();
        let relative = path
            .strip_prefix(root)
            .with_context(|| format!("{:?} is outside {:?}", path, root))?;
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.push((relative_path, path));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let files = collect_static_files(&tmp.path().join("static")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_excludes_vcs_and_sorts() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "index.html", "<html></html>");
        touch(tmp.path(), "css/site.css", "body {}");
        touch(tmp.path(), "assets/img/logo.svg", "<svg/>");
        touch(tmp.path(), ".git/HEAD", "ref: refs/heads/main");
        touch(tmp.path(), ".git/objects/ab/cdef", "blob");
        touch(tmp.path(), "nested/node_modules/pkg/index.js", "");

        let files = collect_static_files(tmp.path()).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["assets/img/logo.svg", "css/site.css", "index.html"]);

        let again = collect_static_files(tmp.path()).unwrap();
        assert_eq!(files, again);
    }

    #[test]
    fn test_hidden_and_ignored_files_are_collected() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), ".well-known/security.txt", "Contact: ops");
        touch(tmp.path(), ".gitignore", "*.css");
        touch(tmp.path(), "site.css", "body {}");

        let files = collect_static_files(tmp.path()).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec![".gitignore", ".well-known/security.txt", "site.css"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("outside");
        touch(&outside, "secret.txt", "secret");
        let root = tmp.path().join("static");
        touch(&root, "index.html", "<html></html>");
        std::os::unix::fs::symlink(&outside, root.join("linked")).unwrap();

        let files = collect_static_files(&root).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["index.html"]);
    }

    #[test]
    fn test_open_reads_contents() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "robots.txt", "User-agent: *");

        let files = collect_static_files(tmp.path()).unwrap();
        let mut content = String::new();
        files[0].open().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "User-agent: *");
    }
}
