//! Startup loading of manifest files
//!
//! Walks a manifest directory, validates every record of every YAML file
//! and feeds the accepted ones to the index. Broken files are logged and
//! skipped; they never stop the load.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::index::PayloadIndex;
use super::validator::{admit_manifest, ManifestReport};
use crate::Result;

/// File extensions recognised as manifests
pub const MANIFEST_EXTENSIONS: &[&str] = &["yml", "yaml"];

/// Parse a YAML manifest document into a raw value tree
pub fn parse_document(content: &str) -> Result<Value> {
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_yaml_ng::from_str(content)?)
}

/// Validation outcome for one manifest file
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub report: ManifestReport,
}

/// Result of loading a manifest directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    /// Manifest files read
    pub files: usize,
    /// Entries that entered the index
    pub accepted: usize,
    /// Entries rejected by validation
    pub rejected: usize,
    /// Files that could not be read or parsed
    pub unreadable: Vec<PathBuf>,
    /// Per-file validation reports
    pub reports: Vec<FileReport>,
}

pub(crate) fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MANIFEST_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Loads manifest directories into a [`PayloadIndex`]
pub struct ManifestLoader<'a> {
    index: &'a PayloadIndex,
}

impl<'a> ManifestLoader<'a> {
    pub fn new(index: &'a PayloadIndex) -> Self {
        Self { index }
    }

    /// Load a single manifest file
    pub fn load_file(&self, path: &Path) -> anyhow::Result<ManifestReport> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let document = parse_document(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;

        let admission = admit_manifest(&document);
        for entry in admission.entries {
            self.index.upsert(entry);
        }
        for rejection in &admission.report.rejected {
            debug!(
                path = %path.display(),
                index = ?rejection.index,
                reasons = %rejection.reasons.join("; "),
                "Rejected manifest entry"
            );
        }
        Ok(admission.report)
    }

    /// Recursively load every manifest below `dir`.
    ///
    /// A missing directory yields an empty summary.
    pub fn load_dir(&self, dir: &Path) -> LoadSummary {
        let mut summary = LoadSummary::default();
        if !dir.is_dir() {
            debug!("Manifest directory {} does not exist", dir.display());
            return summary;
        }

        let files = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("Skipping unreadable manifest path: {}", err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && is_manifest(e.path()));

        for file in files {
            let path = file.path();
            summary.files += 1;
            match self.load_file(path) {
                Ok(report) => {
                    summary.accepted += report.accepted;
                    summary.rejected += report.rejected.len();
                    summary.reports.push(FileReport {
                        path: path.to_path_buf(),
                        report,
                    });
                }
                Err(e) => {
                    warn!("Failed to load manifest {}: {:#}", path.display(), e);
                    summary.unreadable.push(path.to_path_buf());
                }
            }
        }

        info!(
            "Loaded {} payloads from {} manifest files ({} rejected)",
            summary.accepted, summary.files, summary.rejected
        );
        summary
    }
}

#[cfg(test)]
mod loader_tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
items:
  - id: p1
    name: Stager
    description: PowerShell stager
    md5: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
    file_type: ps1
    os: [windows]
    tactics: [TA0002]
    source: url
    download_url: http://x/y
    executor: psh
  - id: p2
    name: Broken
    description: bad hash
    md5: not-hex
    file_type: sh
    os: [linux]
    tactics: [TA0002]
    source: url
    download_url: http://x/z
    executor: sh
"#;

    #[test]
    fn test_load_dir_walks_recursively_and_filters_extensions() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("windows").join("execution");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("stager.YAML"), MANIFEST).unwrap();
        fs::write(dir.path().join("notes.txt"), "items: [oops]").unwrap();
        fs::write(dir.path().join("broken.yml"), "items: [unclosed").unwrap();
        fs::write(dir.path().join("empty.yml"), "").unwrap();

        let index = PayloadIndex::new();
        let summary = ManifestLoader::new(&index).load_dir(dir.path());

        assert_eq!(summary.files, 3);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.unreadable.len(), 1);
        assert!(index.get("p1").is_some());
        assert!(index.get("p2").is_none());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let index = PayloadIndex::new();
        let summary = ManifestLoader::new(&index).load_dir(Path::new("/nonexistent/manifests"));
        assert_eq!(summary.files, 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_parse_empty_document() {
        assert_eq!(parse_document("  \n").unwrap(), Value::Null);
    }
}
