//! Manifest import and export
//!
//! Export renders entries either as a YAML manifest (the same shape the
//! loader reads) or as a flat CSV sheet. Import validates a manifest
//! document and upserts every record that passes.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::entry::{CatalogEntry, Platform};
use super::index::PayloadIndex;
use super::loader::parse_document;
use super::validator::{admit_manifest, Rejection};
use crate::{PayloadError, Result};

/// Columns of the CSV export, in order
pub const CSV_COLUMNS: [&str; 10] = [
    "id",
    "name",
    "md5",
    "file_type",
    "os",
    "tactics",
    "severity",
    "status",
    "updated_at",
    "tags",
];

/// Export rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Yaml,
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Yaml => "application/x-yaml",
            ExportFormat::Csv => "text/csv",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ExportFormat::Yaml => "payloads.yml",
            ExportFormat::Csv => "payloads.csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(PayloadError::InvalidRequest(format!(
                "unsupported export format '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Yaml => f.write_str("yaml"),
            ExportFormat::Csv => f.write_str("csv"),
        }
    }
}

#[derive(Serialize)]
struct ManifestDocument<'a> {
    items: &'a [CatalogEntry],
}

/// Render entries as a YAML manifest document
pub fn render_yaml(entries: &[CatalogEntry]) -> Result<String> {
    Ok(serde_yaml_ng::to_string(&ManifestDocument { items: entries })?)
}

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn csv_row(fields: &[String]) -> String {
    let mut row = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    row.push_str("\r\n");
    row
}

/// Render entries as CSV with list fields comma-joined
pub fn render_csv(entries: &[CatalogEntry]) -> String {
    let header: Vec<String> = CSV_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut out = csv_row(&header);
    for entry in entries {
        out.push_str(&csv_row(&[
            entry.id.clone(),
            entry.name.clone(),
            entry.md5.clone(),
            entry.file_type.clone(),
            entry
                .os
                .iter()
                .map(Platform::as_str)
                .collect::<Vec<_>>()
                .join(","),
            entry.tactics.join(","),
            entry.severity.to_string(),
            entry.status.to_string(),
            entry.updated_at.clone().unwrap_or_default(),
            entry.tags.join(","),
        ]));
    }
    out
}

/// Render entries in the requested format
pub fn render(entries: &[CatalogEntry], format: ExportFormat) -> Result<Vec<u8>> {
    Ok(match format {
        ExportFormat::Yaml => render_yaml(entries)?.into_bytes(),
        ExportFormat::Csv => render_csv(entries).into_bytes(),
    })
}

/// Outcome of a batch import
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
    pub errors: Vec<Rejection>,
}

/// Validate a manifest document and upsert every record that passes
pub fn import_document(index: &PayloadIndex, data: &[u8]) -> Result<ImportReport> {
    let document = parse_document(&String::from_utf8_lossy(data))?;
    let admission = admit_manifest(&document);

    let imported = admission.entries.len();
    for entry in admission.entries {
        index.upsert(entry);
    }

    let report = ImportReport {
        imported,
        failed: admission.report.rejected.len(),
        errors: admission.report.rejected,
    };
    info!(
        imported = report.imported,
        failed = report.failed,
        "Imported payload manifest"
    );
    Ok(report)
}
