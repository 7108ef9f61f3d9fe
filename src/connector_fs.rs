//! Document discovery on the local filesystem.
//!
//! Walks the document directory, keeps files matching the include globs
//! and not matching the exclude globs, and loads each as a [`Document`].
//! Version-control and build directories are always excluded.
//!
//! Document ids are paths relative to the document directory with `/`
//! separators, so the same corpus reached through a different working
//! directory fingerprints identically. Output is sorted by id.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use docqa_core::models::Document;
use docqa_core::{Error, Result};

use crate::config::DocumentsConfig;

/// Which files under a directory count as documents.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub dir: PathBuf,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Descend into subdirectories. When false only top-level files count.
    pub recursive: bool,
    pub follow_symlinks: bool,
}

impl ScanOptions {
    /// Default `.md`/`.txt` filters over `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::from_config(&DocumentsConfig {
            dir: dir.into(),
            ..DocumentsConfig::default()
        })
    }

    pub fn from_config(config: &DocumentsConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            include_globs: config.include_globs.clone(),
            exclude_globs: config.exclude_globs.clone(),
            recursive: config.recursive,
            follow_symlinks: config.follow_symlinks,
        }
    }
}

/// Load every eligible file under `options.dir`.
///
/// A missing directory yields [`Error::NoDocumentsFound`]. An existing
/// directory with no eligible files yields an empty vector; deciding
/// whether that is fatal is the caller's job.
pub fn scan_documents(options: &ScanOptions) -> Result<Vec<Document>> {
    let root = &options.dir;
    if !root.is_dir() {
        return Err(Error::NoDocumentsFound { dir: root.clone() });
    }

    let include_set = build_globset("documents.include_globs", &options.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(options.exclude_globs.iter().cloned());
    let exclude_set = build_globset("documents.exclude_globs", &excludes)?;

    let mut walker = WalkDir::new(root).follow_links(options.follow_symlinks);
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let mut documents = Vec::new();

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root.as_path()).to_path_buf();
            match e.into_io_error() {
                Some(io) => Error::io(path, io),
                None => Error::Storage(format!("filesystem loop at {}", path.display())),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative_id(relative);

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        documents.push(load_document(path, rel_str)?);
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));

    tracing::debug!(
        dir = %root.display(),
        documents = documents.len(),
        "scanned document directory"
    );

    Ok(documents)
}

/// Document id -> content hash for a scanned corpus.
pub fn fingerprints(documents: &[Document]) -> BTreeMap<String, String> {
    documents
        .iter()
        .map(|d| (d.id.clone(), d.content_hash.clone()))
        .collect()
}

/// Hex SHA-256 of raw file bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn load_document(path: &Path, id: String) -> Result<Document> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    let metadata = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
    let modified_time = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let content_hash = content_hash(&bytes);
    let raw_text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                "document is not valid UTF-8; invalid sequences replaced"
            );
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };

    Ok(Document {
        id,
        source_path: path.display().to_string(),
        raw_text,
        modified_time,
        content_hash,
    })
}

fn relative_id(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(field: &'static str, patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::config(field, format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::config(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn corpus() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("auth.md"), "To authenticate, send your API key.").unwrap();
        fs::write(root.join("limits.txt"), "100 requests per minute.").unwrap();
        fs::write(root.join("logo.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();
        fs::create_dir_all(root.join("guides/admin")).unwrap();
        fs::write(root.join("guides/admin/reset.md"), "Reset a password.").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/notes.md"), "internal").unwrap();
        tmp
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = corpus();
        let docs = scan_documents(&ScanOptions::new(tmp.path())).unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["auth.md", "guides/admin/reset.md", "limits.txt"]);
        assert_eq!(docs[0].raw_text, "To authenticate, send your API key.");
        assert_eq!(docs[0].content_hash.len(), 64);
    }

    #[test]
    fn test_non_recursive_scan() {
        let tmp = corpus();
        let mut options = ScanOptions::new(tmp.path());
        options.recursive = false;
        let docs = scan_documents(&options).unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["auth.md", "limits.txt"]);
    }

    #[test]
    fn test_user_excludes() {
        let tmp = corpus();
        let mut options = ScanOptions::new(tmp.path());
        options.exclude_globs = vec!["guides/**".to_string()];
        let docs = scan_documents(&options).unwrap();
        assert!(docs.iter().all(|d| !d.id.starts_with("guides/")));
    }

    #[test]
    fn test_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let err = scan_documents(&ScanOptions::new(tmp.path().join("absent"))).unwrap_err();
        assert!(matches!(err, Error::NoDocumentsFound { .. }));
    }

    #[test]
    fn test_empty_dir_is_empty_vec() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_documents(&ScanOptions::new(tmp.path())).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_glob_names_field() {
        let tmp = corpus();
        let mut options = ScanOptions::new(tmp.path());
        options.include_globs = vec!["[".to_string()];
        assert!(matches!(
            scan_documents(&options),
            Err(Error::Config {
                field: "documents.include_globs",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.txt"), b"caf\xe9 menu").unwrap();
        let docs = scan_documents(&ScanOptions::new(tmp.path())).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].raw_text.starts_with("caf"));
        assert!(docs[0].raw_text.ends_with(" menu"));
        assert_eq!(docs[0].content_hash, content_hash(b"caf\xe9 menu"));
    }

    #[test]
    fn test_fingerprints_keyed_by_id() {
        let tmp = corpus();
        let docs = scan_documents(&ScanOptions::new(tmp.path())).unwrap();
        let fp = fingerprints(&docs);
        assert_eq!(fp.len(), 3);
        assert_eq!(
            fp.get("auth.md"),
            Some(&content_hash(b"To authenticate, send your API key."))
        );
    }
}
