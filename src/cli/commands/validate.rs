use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use walkdir::WalkDir;

use super::CommandHandler;
use crate::catalog::{is_manifest, parse_document, validate_manifest, ManifestReport};
use crate::{PayloadError, Result};

/// Handler for the `validate` command
pub struct ValidateCommand {
    pub paths: Vec<PathBuf>,
    pub json: bool,
}

#[derive(Serialize)]
struct FileOutcome {
    path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ManifestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl FileOutcome {
    fn is_clean(&self) -> bool {
        self.error.is_none() && self.report.as_ref().map_or(true, |r| r.is_clean())
    }
}

#[async_trait]
impl CommandHandler for ValidateCommand {
    async fn execute(&self) -> Result<()> {
        let outcomes: Vec<FileOutcome> = self
            .manifest_files()
            .into_iter()
            .map(Self::check)
            .collect();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        } else {
            for outcome in &outcomes {
                print_outcome(outcome);
            }
        }

        let failed: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.is_clean())
            .map(|o| o.path.display().to_string())
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(PayloadError::Validation(failed))
        }
    }

    fn name(&self) -> &'static str {
        "validate"
    }
}

impl ValidateCommand {
    pub fn new(paths: Vec<PathBuf>, json: bool) -> Self {
        Self { paths, json }
    }

    /// Expand directories into the manifest files below them
    fn manifest_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for path in &self.paths {
            if path.is_dir() {
                files.extend(
                    WalkDir::new(path)
                        .sort_by_file_name()
                        .into_iter()
                        .filter_map(|e| e.ok())
                        .filter(|e| e.file_type().is_file() && is_manifest(e.path()))
                        .map(|e| e.into_path()),
                );
            } else {
                files.push(path.clone());
            }
        }
        files
    }

    fn check(path: PathBuf) -> FileOutcome {
        let parsed = std::fs::read_to_string(&path)
            .map_err(PayloadError::from)
            .and_then(|content| parse_document(&content));
        match parsed {
            Ok(document) => FileOutcome {
                report: Some(validate_manifest(&document)),
                error: None,
                path,
            },
            Err(e) => FileOutcome {
                report: None,
                error: Some(e.to_string()),
                path,
            },
        }
    }
}

fn print_outcome(outcome: &FileOutcome) {
    let path = outcome.path.display();
    if let Some(error) = &outcome.error {
        println!("✗ {path}: {error}");
        return;
    }
    let Some(report) = &outcome.report else {
        return;
    };
    if report.is_clean() {
        println!("✓ {path}: {} entries", report.accepted);
        return;
    }
    println!(
        "✗ {path}: {} accepted, {} rejected",
        report.accepted,
        report.rejected.len()
    );
    for rejection in &report.rejected {
        let at = rejection
            .index
            .map(|i| format!("item {i}"))
            .unwrap_or_else(|| "document".to_string());
        for reason in &rejection.reasons {
            println!("    {at}: {reason}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_validate_flags_bad_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("bad.yml"),
            "items:\n  - id: p1\n    md5: not-hex\n",
        )
        .unwrap();

        let command = ValidateCommand::new(vec![dir.path().to_path_buf()], true);
        assert!(matches!(
            command.execute().await,
            Err(PayloadError::Validation(files)) if files.len() == 1
        ));
    }

    #[test]
    fn test_directory_walk_matches_loader_extensions() {
        let dir = TempDir::new().unwrap();
        for name in ["a.yml", "b.YAML", "notes.txt", "c.json"] {
            std::fs::write(dir.path().join(name), "items: []\n").unwrap();
        }

        let command = ValidateCommand::new(vec![dir.path().to_path_buf()], true);
        let names: Vec<_> = command
            .manifest_files()
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        assert_eq!(names, vec!["a.yml", "b.YAML"]);
    }

    #[tokio::test]
    async fn test_validate_accepts_empty_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "items: []\n").unwrap();

        let command = ValidateCommand::new(vec![path], false);
        assert!(command.execute().await.is_ok());
    }
}
