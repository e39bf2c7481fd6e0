//! Catalog entry types
//!
//! A catalog entry is one payload artifact record. Known fields are typed;
//! anything else found in a manifest is kept in `extra` and written back
//! unchanged on export.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Target operating system of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Darwin,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::Linux, Platform::Darwin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Darwin => "darwin",
        }
    }

    /// Parse an exact platform name
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }

    /// Map the platform string an agent reports onto a command family.
    ///
    /// Agents report free-form strings; anything that is not windows or
    /// darwin gets the POSIX treatment.
    pub fn from_agent(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "windows" => Platform::Windows,
            "darwin" => Platform::Darwin,
            _ => Platform::Linux,
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Platform::Windows)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload severity. Ordered low < medium < high < critical.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Fixed sort ordinal
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
            Severity::Critical => 3,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Disabled,
}

impl Status {
    pub const ALL: [Status; 2] = [Status::Active, Status::Disabled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the artifact bytes live
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    /// Stored by this service, see `source_path`
    Local,
    /// Fetched by the agent from `download_url`
    Url,
    /// Anything else a manifest declared. Cannot be dispatched.
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::Local => "local",
            Source::Url => "url",
            Source::Other(other) => other,
        }
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        match value.as_str() {
            "local" => Source::Local,
            "url" => Source::Url,
            _ => Source::Other(value),
        }
    }
}

impl From<Source> for String {
    fn from(value: Source) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared argument type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Int,
    Bool,
    Enum,
    Path,
}

impl ArgType {
    pub const NAMES: &'static [&'static str] = &["string", "int", "bool", "enum", "path"];
}

/// An execution argument declared by a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub key: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ArgType>,

    /// Defaults, choices, help text and the like
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One payload record in the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub md5: String,

    #[serde(default)]
    pub file_type: String,

    #[serde(default)]
    pub os: Vec<Platform>,

    #[serde(default)]
    pub tactics: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default)]
    pub status: Status,

    pub source: Source,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    #[serde(default)]
    pub executor: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    /// Fields the library does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CatalogEntry {
    /// Build a typed entry from a raw manifest record.
    ///
    /// Null-valued keys are treated as absent so that typed defaults apply.
    /// A numeric or boolean `id` (`id: 123` in YAML) is taken as its text.
    pub fn from_raw(raw: &Value) -> Result<Self, serde_json::Error> {
        let mut raw = raw.clone();
        if let Value::Object(map) = &mut raw {
            map.retain(|_, v| !v.is_null());
            if let Some(id) = map.get_mut("id") {
                if matches!(id, Value::Number(_) | Value::Bool(_)) {
                    *id = Value::String(id.to_string());
                }
            }
        }
        serde_json::from_value(raw)
    }

    /// File type as used for facet keys and command selection
    pub fn file_type_key(&self) -> String {
        self.file_type.trim().to_lowercase()
    }

    /// Text fed to the free-text word index
    pub fn search_text(&self) -> String {
        let mut parts = vec![self.name.as_str(), self.description.as_str()];
        parts.extend(self.tags.iter().map(String::as_str));
        parts.join(" ")
    }

    /// Raw value of a field for sorting, if the entry has one
    pub fn field_text(&self, field: &str) -> Option<String> {
        let value = match field {
            "id" => self.id.clone(),
            "name" => self.name.clone(),
            "description" => self.description.clone(),
            "md5" => self.md5.clone(),
            "file_type" | "fileType" => self.file_type.clone(),
            "severity" => self.severity.as_str().to_string(),
            "status" => self.status.as_str().to_string(),
            "source" => self.source.as_str().to_string(),
            "executor" => self.executor.clone(),
            "updated_at" | "updatedAt" => self.updated_at.clone()?,
            "os" => self
                .os
                .iter()
                .map(Platform::as_str)
                .collect::<Vec<_>>()
                .join(","),
            "tactics" => self.tactics.join(","),
            "tags" => self.tags.join(","),
            other => match self.extra.get(other)? {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            },
        };
        Some(value)
    }
}
