//! In-memory payload index
//!
//! The index owns every catalog entry together with the derived lookup
//! structures: one inverted index per facet and a free-text word index.
//! All of it sits behind a single read-write lock, so a reader always sees
//! the primary map and the derived indices in agreement.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{SecondsFormat, Utc};
use tracing::debug;

use super::entry::{CatalogEntry, Status};

/// A categorical dimension used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Facet {
    Tactics,
    Os,
    FileType,
    Tags,
    Status,
    Severity,
}

impl Facet {
    pub const ALL: [Facet; 6] = [
        Facet::Tactics,
        Facet::Os,
        Facet::FileType,
        Facet::Tags,
        Facet::Status,
        Facet::Severity,
    ];

    /// Name of the dimension in filters and facet summaries
    pub fn dimension(&self) -> &'static str {
        match self {
            Facet::Tactics => "tactics",
            Facet::Os => "os",
            Facet::FileType => "file_types",
            Facet::Tags => "tags",
            Facet::Status => "status",
            Facet::Severity => "severity",
        }
    }

    /// Facet keys an entry belongs to
    pub fn values(&self, entry: &CatalogEntry) -> Vec<String> {
        match self {
            Facet::Tactics => entry.tactics.clone(),
            Facet::Os => entry.os.iter().map(|p| p.as_str().to_string()).collect(),
            Facet::FileType => {
                let key = entry.file_type_key();
                if key.is_empty() {
                    Vec::new()
                } else {
                    vec![key]
                }
            }
            Facet::Tags => entry.tags.clone(),
            Facet::Status => vec![entry.status.as_str().to_string()],
            Facet::Severity => vec![entry.severity.as_str().to_string()],
        }
    }
}

/// Split text into lower-cased whitespace tokens
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

#[derive(Debug)]
struct Stored {
    /// Insertion sequence, kept across replacement
    seq: u64,
    entry: CatalogEntry,
}

/// Lock-protected index contents
#[derive(Debug, Default)]
pub(crate) struct IndexState {
    entries: HashMap<String, Stored>,
    facets: HashMap<Facet, BTreeMap<String, HashSet<String>>>,
    words: HashMap<String, HashSet<String>>,
    next_seq: u64,
}

impl IndexState {
    pub(crate) fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id).map(|s| &s.entry)
    }

    pub(crate) fn seq(&self, id: &str) -> u64 {
        self.entries.get(id).map(|s| s.seq).unwrap_or(u64::MAX)
    }

    pub(crate) fn all_ids(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn facet_set(&self, facet: Facet, value: &str) -> Option<&HashSet<String>> {
        self.facets.get(&facet).and_then(|m| m.get(value))
    }

    /// Every key of a facet with its members, keys ascending
    pub(crate) fn facet_keys(
        &self,
        facet: Facet,
    ) -> impl Iterator<Item = (&String, &HashSet<String>)> {
        self.facets.get(&facet).into_iter().flat_map(|m| m.iter())
    }

    pub(crate) fn word_set(&self, token: &str) -> Option<&HashSet<String>> {
        self.words.get(token)
    }

    fn link(&mut self, entry: &CatalogEntry) {
        for facet in Facet::ALL {
            let index = self.facets.entry(facet).or_default();
            for value in facet.values(entry) {
                index.entry(value).or_default().insert(entry.id.clone());
            }
        }
        for token in tokenize(&entry.search_text()) {
            self.words.entry(token).or_default().insert(entry.id.clone());
        }
    }

    fn unlink(&mut self, entry: &CatalogEntry) {
        for facet in Facet::ALL {
            if let Some(index) = self.facets.get_mut(&facet) {
                for value in facet.values(entry) {
                    if let Some(ids) = index.get_mut(&value) {
                        ids.remove(&entry.id);
                        if ids.is_empty() {
                            index.remove(&value);
                        }
                    }
                }
            }
        }
        for token in tokenize(&entry.search_text()) {
            if let Some(ids) = self.words.get_mut(&token) {
                ids.remove(&entry.id);
                if ids.is_empty() {
                    self.words.remove(&token);
                }
            }
        }
    }

    fn put(&mut self, entry: CatalogEntry) -> UpsertOutcome {
        let (seq, outcome) = match self.entries.remove(&entry.id) {
            Some(old) => {
                self.unlink(&old.entry);
                (old.seq, UpsertOutcome::Replaced)
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                (seq, UpsertOutcome::Inserted)
            }
        };
        self.link(&entry);
        self.entries.insert(entry.id.clone(), Stored { seq, entry });
        outcome
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The canonical collection of catalog entries
#[derive(Debug, Default)]
pub struct PayloadIndex {
    state: RwLock<IndexState>,
}

impl PayloadIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or atomically replace an entry.
    ///
    /// Callers must only pass entries that passed validation.
    pub fn upsert(&self, mut entry: CatalogEntry) -> UpsertOutcome {
        if entry.name.is_empty() {
            entry.name = entry.id.clone();
        }

        let mut state = self.write();
        if entry.updated_at.is_none() {
            entry.updated_at = state
                .get(&entry.id)
                .and_then(|existing| existing.updated_at.clone())
                .or_else(|| Some(now_rfc3339()));
        }
        let id = entry.id.clone();
        let outcome = state.put(entry);
        debug!(id = %id, ?outcome, "Upserted catalog entry");
        outcome
    }

    /// Remove an entry and every index reference to it
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.write();
        match state.entries.remove(id) {
            Some(stored) => {
                state.unlink(&stored.entry);
                debug!(id = %id, "Removed catalog entry");
                true
            }
            None => false,
        }
    }

    /// Change the status of an entry, reindexing it
    pub fn set_status(&self, id: &str, status: Status) -> bool {
        let mut state = self.write();
        let Some(mut entry) = state.get(id).cloned() else {
            return false;
        };
        entry.status = status;
        entry.updated_at = Some(now_rfc3339());
        state.put(entry);
        debug!(id = %id, status = %status, "Changed catalog entry status");
        true
    }

    pub fn get(&self, id: &str) -> Option<CatalogEntry> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().entries.contains_key(id)
    }

    pub fn all_ids(&self) -> HashSet<String> {
        self.read().all_ids()
    }

    /// Entries for the given ids, in the given order, skipping unknown ids
    pub fn entries(&self, ids: &[String]) -> Vec<CatalogEntry> {
        let state = self.read();
        ids.iter().filter_map(|id| state.get(id).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids indexed under a facet value
    pub fn facet_members(&self, facet: Facet, value: &str) -> HashSet<String> {
        self.read()
            .facet_set(facet, value)
            .cloned()
            .unwrap_or_default()
    }

    /// Ids indexed under a search token
    pub fn word_members(&self, token: &str) -> HashSet<String> {
        self.read().word_set(token).cloned().unwrap_or_default()
    }

    /// Whether any facet or word index still names the id
    pub fn references(&self, id: &str) -> bool {
        let state = self.read();
        let in_facets = state
            .facets
            .values()
            .flat_map(|m| m.values())
            .any(|ids| ids.contains(id));
        in_facets || state.words.values().any(|ids| ids.contains(id))
    }
}

#[cfg(test)]
mod index_tests {
    use super::*;
    use crate::catalog::entry::{Platform, Severity, Source};
    use std::collections::BTreeMap;

    fn entry(id: &str, description: &str, tags: &[&str]) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            name: String::new(),
            description: description.to_string(),
            md5: "0".repeat(32),
            file_type: "EXE".to_string(),
            os: vec![Platform::Windows],
            tactics: vec!["TA0002".to_string()],
            tags: tags.iter().map(|t| t.to_string()).collect(),
            severity: Severity::High,
            status: Status::Active,
            source: Source::Url,
            source_path: None,
            download_url: Some("http://x/y".to_string()),
            executor: "psh".to_string(),
            args: vec![],
            updated_at: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_tokenize_keeps_punctuation() {
        assert_eq!(
            tokenize("  Mimikatz, dumps\tLSASS  memory. "),
            vec!["mimikatz,", "dumps", "lsass", "memory."]
        );
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_upsert_normalizes() {
        let index = PayloadIndex::new();
        assert_eq!(index.upsert(entry("p1", "dump creds", &[])), UpsertOutcome::Inserted);

        let stored = index.get("p1").unwrap();
        assert_eq!(stored.name, "p1");
        assert!(stored.updated_at.is_some());
        assert!(index.facet_members(Facet::FileType, "exe").contains("p1"));
        assert!(index.word_members("p1").contains("p1"));
    }

    #[test]
    fn test_replace_drops_stale_memberships() {
        let index = PayloadIndex::new();
        index.upsert(entry("p1", "dump creds", &["lsass"]));

        let mut updated = entry("p1", "keylogger", &["input"]);
        updated.os = vec![Platform::Linux];
        updated.severity = Severity::Low;
        assert_eq!(index.upsert(updated), UpsertOutcome::Replaced);

        assert_eq!(index.len(), 1);
        assert!(index.facet_members(Facet::Os, "windows").is_empty());
        assert!(index.facet_members(Facet::Os, "linux").contains("p1"));
        assert!(index.facet_members(Facet::Severity, "high").is_empty());
        assert!(index.facet_members(Facet::Tags, "lsass").is_empty());
        assert!(index.word_members("creds").is_empty());
        assert!(index.word_members("keylogger").contains("p1"));
    }

    #[test]
    fn test_replace_without_timestamp_keeps_previous() {
        let index = PayloadIndex::new();
        index.upsert(entry("p1", "a", &[]));
        let first = index.get("p1").unwrap().updated_at;
        index.upsert(entry("p1", "a", &[]));
        assert_eq!(index.get("p1").unwrap().updated_at, first);
    }

    #[test]
    fn test_remove_clears_every_reference() {
        let index = PayloadIndex::new();
        index.upsert(entry("p1", "dump creds", &["lsass"]));
        index.upsert(entry("p2", "dump hashes", &[]));

        assert!(index.remove("p1"));
        assert!(!index.remove("p1"));
        assert!(index.get("p1").is_none());
        assert!(!index.references("p1"));
        assert!(index.references("p2"));
        assert_eq!(index.word_members("dump").len(), 1);
    }

    #[test]
    fn test_set_status_reindexes() {
        let index = PayloadIndex::new();
        index.upsert(entry("p1", "x", &[]));
        assert!(index.set_status("p1", Status::Disabled));
        assert!(!index.set_status("missing", Status::Disabled));

        assert!(index.facet_members(Facet::Status, "active").is_empty());
        assert!(index.facet_members(Facet::Status, "disabled").contains("p1"));
        assert_eq!(index.get("p1").unwrap().status, Status::Disabled);
    }
}
