//! Manifest validation
//!
//! Every record must pass these rules before it may enter the index.
//! Rules are independent: all violations of a record are collected and
//! one bad record never affects its siblings.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::entry::{ArgType, CatalogEntry, Platform, Severity, Status};

/// Fields every record must carry with a non-empty value
pub const REQUIRED_FIELDS: &[&str] = &[
    "id",
    "name",
    "description",
    "md5",
    "file_type",
    "os",
    "tactics",
    "source",
    "executor",
];

static MD5_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-f0-9]{32}$").expect("md5 pattern is valid"));

static TACTIC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^TA\d{4}$").expect("tactic pattern is valid"));

/// Outcome of validating a whole manifest document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ManifestReport {
    /// Number of records that passed
    pub accepted: usize,

    /// Records that failed, with every reason
    pub rejected: Vec<Rejection>,
}

/// A rejected record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    /// Position in `items`; absent when the whole document was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,

    pub reasons: Vec<String>,
}

impl ManifestReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Typed entries admitted from a document, plus the report
#[derive(Debug, Clone, Default)]
pub struct Admission {
    pub entries: Vec<CatalogEntry>,
    pub report: ManifestReport,
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Validate one raw record, returning every violation found
pub fn validate_entry(raw: &Value) -> Vec<String> {
    let Some(item) = raw.as_object() else {
        return vec!["entry must be a mapping".to_string()];
    };
    let mut errors = Vec::new();

    for field in REQUIRED_FIELDS {
        if is_blank(item.get(*field)) {
            errors.push(format!("missing required field: {field}"));
        }
    }

    match item.get("md5") {
        None | Some(Value::Null) => {}
        Some(Value::String(md5)) if md5.is_empty() || MD5_PATTERN.is_match(md5) => {}
        Some(_) => errors.push("md5 must be 32 lowercase hex characters".to_string()),
    }

    match item.get("os") {
        None | Some(Value::Null) => {}
        Some(Value::Array(values)) => {
            for value in values {
                if value.as_str().and_then(Platform::parse).is_none() {
                    errors.push(format!(
                        "os '{}' must be one of [darwin, linux, windows]",
                        display(value)
                    ));
                }
            }
        }
        Some(_) => errors.push("os must be a list".to_string()),
    }

    match item.get("tactics") {
        None | Some(Value::Null) => {}
        Some(Value::Array(values)) => {
            for value in values {
                let tactic = display(value);
                if !value.is_string() || !TACTIC_PATTERN.is_match(&tactic) {
                    errors.push(format!(
                        "tactics '{tactic}' must be an ATT&CK tactic key like TA0001"
                    ));
                }
            }
        }
        Some(_) => errors.push("tactics must be a list".to_string()),
    }

    if !is_blank(item.get("severity")) {
        let valid = item
            .get("severity")
            .and_then(Value::as_str)
            .and_then(Severity::parse)
            .is_some();
        if !valid {
            errors.push("severity must be one of [critical, high, low, medium]".to_string());
        }
    }

    if !is_blank(item.get("status")) {
        let valid = item
            .get("status")
            .and_then(Value::as_str)
            .and_then(Status::parse)
            .is_some();
        if !valid {
            errors.push("status must be one of [active, disabled]".to_string());
        }
    }

    match item.get("source").and_then(Value::as_str) {
        Some("local") if is_blank(item.get("source_path")) => {
            errors.push("source_path required for local source".to_string());
        }
        Some("url") if is_blank(item.get("download_url")) => {
            errors.push("download_url required for url source".to_string());
        }
        _ => {}
    }

    match item.get("args") {
        None | Some(Value::Null) => {}
        Some(Value::Array(args)) => {
            for arg in args {
                let Some(arg) = arg.as_object() else {
                    errors.push("each arg must be a mapping".to_string());
                    continue;
                };
                let key = arg.get("key").and_then(Value::as_str).unwrap_or_default();
                if key.is_empty() {
                    errors.push("each arg must have key".to_string());
                }
                if !is_blank(arg.get("type")) {
                    let kind = arg.get("type").and_then(Value::as_str).unwrap_or_default();
                    if !ArgType::NAMES.contains(&kind) {
                        let key = if key.is_empty() { "?" } else { key };
                        errors.push(format!("arg {key} type invalid"));
                    }
                }
            }
        }
        Some(_) => errors.push("args must be a list".to_string()),
    }

    errors
}

/// Validate one raw record and convert it into a typed entry
pub fn admit_entry(raw: &Value) -> Result<CatalogEntry, Vec<String>> {
    let errors = validate_entry(raw);
    if !errors.is_empty() {
        return Err(errors);
    }
    CatalogEntry::from_raw(raw).map_err(|e| vec![format!("invalid entry: {e}")])
}

/// Validate every record of a manifest document and keep the ones that pass
pub fn admit_manifest(document: &Value) -> Admission {
    let items = match document {
        Value::Null => return Admission::default(),
        Value::Object(doc) => doc.get("items").unwrap_or(&Value::Null),
        _ => {
            return Admission {
                entries: Vec::new(),
                report: ManifestReport {
                    accepted: 0,
                    rejected: vec![Rejection {
                        index: None,
                        reasons: vec!["manifest must be a mapping with an items list".to_string()],
                    }],
                },
            }
        }
    };

    let items = match items {
        Value::Null => return Admission::default(),
        Value::Array(items) => items,
        _ => {
            return Admission {
                entries: Vec::new(),
                report: ManifestReport {
                    accepted: 0,
                    rejected: vec![Rejection {
                        index: None,
                        reasons: vec!["items must be a list".to_string()],
                    }],
                },
            }
        }
    };

    let mut admission = Admission::default();
    for (index, item) in items.iter().enumerate() {
        match admit_entry(item) {
            Ok(entry) => {
                admission.report.accepted += 1;
                admission.entries.push(entry);
            }
            Err(reasons) => admission.report.rejected.push(Rejection {
                index: Some(index),
                reasons,
            }),
        }
    }
    admission
}

/// Validate a manifest document without keeping the entries
pub fn validate_manifest(document: &Value) -> ManifestReport {
    admit_manifest(document).report
}

#[cfg(test)]
mod validator_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn valid_item() -> Value {
        json!({
            "id": "p1",
            "name": "Stager",
            "description": "PowerShell stager",
            "md5": "a".repeat(32),
            "file_type": "ps1",
            "os": ["windows"],
            "tactics": ["TA0002"],
            "source": "url",
            "download_url": "http://x/y",
            "executor": "psh"
        })
    }

    #[test]
    fn test_valid_item_has_no_violations() {
        assert!(validate_entry(&valid_item()).is_empty());
    }

    #[test]
    fn test_missing_fields_are_each_reported() {
        let errors = validate_entry(&json!({"id": "p1", "source": "url", "download_url": "u"}));
        for field in ["name", "description", "md5", "file_type", "os", "tactics", "executor"] {
            assert!(
                errors.contains(&format!("missing required field: {field}")),
                "expected violation for {field}: {errors:?}"
            );
        }
        assert!(!errors.iter().any(|e| e.contains(": id")));
    }

    #[test]
    fn test_bad_md5_names_the_field() {
        let mut item = valid_item();
        item["md5"] = json!("not-hex");
        let errors = validate_entry(&item);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("md5"));

        item["md5"] = json!("A".repeat(32));
        assert_eq!(validate_entry(&item).len(), 1);
    }

    #[test]
    fn test_each_bad_os_member_is_a_violation() {
        let mut item = valid_item();
        item["os"] = json!(["windows", "solaris", "plan9"]);
        let errors = validate_entry(&item);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.starts_with("os ")));

        item["os"] = json!("windows");
        assert_eq!(validate_entry(&item), vec!["os must be a list".to_string()]);
    }

    #[test]
    fn test_tactic_pattern() {
        let mut item = valid_item();
        item["tactics"] = json!(["TA0002", "execution", "TA12", 1234]);
        assert_eq!(validate_entry(&item).len(), 3);
    }

    #[test]
    fn test_severity_and_status_values() {
        let mut item = valid_item();
        item["severity"] = json!("catastrophic");
        item["status"] = json!("archived");
        let errors = validate_entry(&item);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("severity"));
        assert!(errors[1].starts_with("status"));
    }

    #[test]
    fn test_source_requirements() {
        let mut item = valid_item();
        item["download_url"] = json!("");
        assert_eq!(
            validate_entry(&item),
            vec!["download_url required for url source".to_string()]
        );

        item["source"] = json!("local");
        assert_eq!(
            validate_entry(&item),
            vec!["source_path required for local source".to_string()]
        );

        item["source_path"] = json!("plugins/payloads/data/files/stager.ps1");
        assert!(validate_entry(&item).is_empty());
    }

    #[test]
    fn test_arg_rules() {
        let mut item = valid_item();
        item["args"] = json!([
            {"key": "port", "type": "int"},
            {"type": "string"},
            {"key": "mode", "type": "float"}
        ]);
        assert_eq!(
            validate_entry(&item),
            vec![
                "each arg must have key".to_string(),
                "arg mode type invalid".to_string()
            ]
        );
    }

    #[test]
    fn test_manifest_rejects_bad_entry_keeps_others() {
        let mut bad = valid_item();
        bad["id"] = json!("p2");
        bad["md5"] = json!("not-hex");
        let mut good = valid_item();
        good["id"] = json!("p3");

        let admission = admit_manifest(&json!({"items": [valid_item(), bad, good]}));
        assert_eq!(admission.report.accepted, 2);
        assert_eq!(admission.report.rejected.len(), 1);
        assert_eq!(admission.report.rejected[0].index, Some(1));
        assert!(admission.report.rejected[0].reasons[0].contains("md5"));

        let ids: Vec<_> = admission.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }

    #[test]
    fn test_items_not_a_list_rejects_document() {
        let report = validate_manifest(&json!({"items": {"id": "p1"}}));
        assert_eq!(report.accepted, 0);
        assert_eq!(
            report.rejected,
            vec![Rejection {
                index: None,
                reasons: vec!["items must be a list".to_string()]
            }]
        );
    }

    #[test]
    fn test_empty_document_is_clean() {
        assert!(validate_manifest(&Value::Null).is_clean());
        assert!(validate_manifest(&json!({})).is_clean());
    }

    #[test]
    fn test_numeric_id_is_admitted() {
        let mut item = valid_item();
        item["id"] = json!(123);
        let entry = admit_entry(&item).unwrap();
        assert_eq!(entry.id, "123");

        let admission = admit_manifest(&json!({"items": [item]}));
        assert!(admission.report.is_clean());
        assert_eq!(admission.entries[0].id, "123");
    }

    #[test]
    fn test_conversion_failure_becomes_violation() {
        let mut item = valid_item();
        item["tags"] = json!([{"nested": true}]);
        let err = admit_entry(&item).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err[0].starts_with("invalid entry"));
    }
}
