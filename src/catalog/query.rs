//! Faceted and free-text queries over the payload index

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::entry::CatalogEntry;
use super::index::{tokenize, Facet, IndexState, PayloadIndex};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_SORT: &str = "updated_at:desc";

/// Query parameters for listing payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    /// Free text; every token must match
    pub search: String,
    pub tactics: Vec<String>,
    pub os: Vec<String>,
    pub file_types: Vec<String>,
    pub tags: Vec<String>,
    pub status: Vec<String>,
    pub severity: Vec<String>,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    /// `<field>:<asc|desc>`
    pub sort: String,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            search: String::new(),
            tactics: Vec::new(),
            os: Vec::new(),
            file_types: Vec::new(),
            tags: Vec::new(),
            status: Vec::new(),
            severity: Vec::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: DEFAULT_SORT.to_string(),
        }
    }
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn with_facet(mut self, facet: Facet, value: impl Into<String>) -> Self {
        let value = value.into();
        match facet {
            Facet::Tactics => self.tactics.push(value),
            Facet::Os => self.os.push(value),
            Facet::FileType => self.file_types.push(value),
            Facet::Tags => self.tags.push(value),
            Facet::Status => self.status.push(value),
            Facet::Severity => self.severity.push(value),
        }
        self
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = sort.into();
        self
    }

    /// Requested values of a facet dimension
    pub fn facet_values(&self, facet: Facet) -> &[String] {
        match facet {
            Facet::Tactics => &self.tactics,
            Facet::Os => &self.os,
            Facet::FileType => &self.file_types,
            Facet::Tags => &self.tags,
            Facet::Status => &self.status,
            Facet::Severity => &self.severity,
        }
    }
}

/// Parsed `<field>:<direction>` sort specifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    /// A missing or unknown direction sorts ascending
    pub fn parse(spec: &str) -> Self {
        let spec = if spec.trim().is_empty() {
            DEFAULT_SORT
        } else {
            spec.trim()
        };
        let (field, direction) = spec.split_once(':').unwrap_or((spec, "asc"));
        Self {
            field: field.to_string(),
            descending: direction.eq_ignore_ascii_case("desc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Rank(u8),
    Text(String),
}

fn sort_key(entry: &CatalogEntry, field: &str) -> SortKey {
    if field == "severity" {
        SortKey::Rank(entry.severity.rank())
    } else {
        SortKey::Text(entry.field_text(field).unwrap_or_default())
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    /// Cut one page out of the full result list.
    ///
    /// Page 0 is read as page 1 and a zero page size as the default.
    /// Pages past the end are empty.
    pub fn slice(all: Vec<T>, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        let total = all.len();
        let start = (page - 1).saturating_mul(page_size);
        let items = all.into_iter().skip(start).take(page_size).collect();
        Self {
            items,
            total,
            page,
            page_size,
        }
    }
}

/// Count of entries under one facet key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount {
    pub key: String,
    pub count: usize,
}

/// Facet counts keyed by dimension name
pub type FacetSummary = BTreeMap<String, Vec<FacetCount>>;

fn intersect_into(running: &mut Option<HashSet<String>>, set: HashSet<String>) {
    *running = Some(match running.take() {
        None => set,
        Some(current) => current.intersection(&set).cloned().collect(),
    });
}

fn candidates(state: &IndexState, filter: &FilterSpec) -> HashSet<String> {
    let mut running: Option<HashSet<String>> = None;

    let tokens = tokenize(&filter.search);
    if !tokens.is_empty() {
        let mut words: Option<HashSet<String>> = None;
        for token in &tokens {
            intersect_into(
                &mut words,
                state.word_set(token).cloned().unwrap_or_default(),
            );
        }
        intersect_into(&mut running, words.unwrap_or_default());
    }

    for facet in Facet::ALL {
        let values = filter.facet_values(facet);
        if values.is_empty() {
            continue;
        }
        // Every requested value must hold, also within one dimension
        let mut matched: Option<HashSet<String>> = None;
        for value in values {
            let value = match facet {
                Facet::FileType => value.trim().to_lowercase(),
                _ => value.clone(),
            };
            intersect_into(
                &mut matched,
                state.facet_set(facet, &value).cloned().unwrap_or_default(),
            );
        }
        intersect_into(&mut running, matched.unwrap_or_default());
    }

    running.unwrap_or_else(|| state.all_ids())
}

fn sorted_ids(state: &IndexState, filter: &FilterSpec) -> Vec<String> {
    let sort = SortSpec::parse(&filter.sort);

    let mut ids: Vec<String> = candidates(state, filter).into_iter().collect();
    ids.sort_by_key(|id| state.seq(id));

    let mut keyed: Vec<(SortKey, String)> = ids
        .into_iter()
        .filter_map(|id| {
            let key = sort_key(state.get(&id)?, &sort.field);
            Some((key, id))
        })
        .collect();
    // Stable in both directions: equal keys keep insertion order
    keyed.sort_by(|(a, _), (b, _)| {
        let ordering = a.cmp(b);
        if sort.descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    keyed.into_iter().map(|(_, id)| id).collect()
}

/// Answers list and facet queries against a [`PayloadIndex`]
#[derive(Debug, Clone)]
pub struct QueryEngine {
    index: Arc<PayloadIndex>,
}

impl QueryEngine {
    pub fn new(index: Arc<PayloadIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<PayloadIndex> {
        &self.index
    }

    /// Ids matching the filter, in the requested order
    pub fn matching_ids(&self, filter: &FilterSpec) -> Vec<String> {
        sorted_ids(&self.index.read(), filter)
    }

    /// Filter, sort and paginate
    pub fn query(&self, filter: &FilterSpec) -> Page<CatalogEntry> {
        let state = self.index.read();
        let page = Page::slice(sorted_ids(&state, filter), filter.page, filter.page_size);
        Page {
            items: page
                .items
                .iter()
                .filter_map(|id| state.get(id).cloned())
                .collect(),
            total: page.total,
            page: page.page,
            page_size: page.page_size,
        }
    }

    /// Facet counts over the entries matching `search` alone
    pub fn facets(&self, search: &str) -> FacetSummary {
        let state = self.index.read();
        let filter = FilterSpec::new().with_search(search);
        let ids = candidates(&state, &filter);

        Facet::ALL
            .into_iter()
            .map(|facet| {
                let counts = state
                    .facet_keys(facet)
                    .map(|(key, members)| FacetCount {
                        key: key.clone(),
                        count: members.intersection(&ids).count(),
                    })
                    .collect();
                (facet.dimension().to_string(), counts)
            })
            .collect()
    }
}
