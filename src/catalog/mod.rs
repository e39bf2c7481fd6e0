//! Payload catalog - indexing, validation and queries
//!
//! # Overview
//!
//! The catalog holds every payload record the library knows about and
//! answers faceted and free-text queries over them.
//!
//! # Architecture
//!
//! ```text
//! manifest/**/*.yml
//!        │
//!        ▼
//! ManifestLoader ──► validator ──► PayloadIndex ◄── QueryEngine
//!                                   │   ▲
//!                                   │   └── exchange (import)
//!                                   ▼
//!                                exchange (YAML / CSV export)
//! ```

mod entry;
mod exchange;
mod index;
mod loader;
mod query;
mod validator;

pub use entry::{ArgSpec, ArgType, CatalogEntry, Platform, Severity, Source, Status};
pub use exchange::{
    import_document, render, render_csv, render_yaml, ExportFormat, ImportReport, CSV_COLUMNS,
};
pub use index::{tokenize, Facet, PayloadIndex, UpsertOutcome};
pub(crate) use loader::is_manifest;
pub use loader::{parse_document, FileReport, LoadSummary, ManifestLoader, MANIFEST_EXTENSIONS};
pub use query::{
    FacetCount, FacetSummary, FilterSpec, Page, QueryEngine, SortSpec, DEFAULT_PAGE_SIZE,
    DEFAULT_SORT,
};
pub use validator::{
    admit_entry, admit_manifest, validate_entry, validate_manifest, Admission, ManifestReport,
    Rejection, REQUIRED_FIELDS,
};
