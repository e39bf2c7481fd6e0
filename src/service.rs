//! The payload service
//!
//! `PayloadService` is the single entry point the outside world talks to.
//! It owns the index and wires the query engine, the exchange formats and
//! the dispatch engine to the injected collaborators.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::{
    import_document, render, CatalogEntry, ExportFormat, FacetSummary, FilterSpec, ImportReport,
    LoadSummary, ManifestLoader, Page, PayloadIndex, QueryEngine, Source, Status,
};
use crate::config::{RemoteDownloads, Settings};
use crate::dispatch::{
    dedupe, Agent, AgentFilter, AgentFleet, ArtifactStore, BatchDispatchItem, DispatchOrchestrator,
    DispatchRecord, DispatchReport, HttpFetcher, OperationScheduler, RemoteFetcher,
};
use crate::{PayloadError, Result};

/// Which entries an export covers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportSelection {
    /// Explicit ids; unknown ids are skipped
    Ids(Vec<String>),
    /// Every page of a filter, up to the export limit
    Filter(FilterSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchAction {
    Enable,
    Disable,
    Delete,
    Dispatch,
}

/// Agents a dispatch goes to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Targets {
    pub agent_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub action: BatchAction,
    pub ids: Vec<String>,
    #[serde(default)]
    pub targets: Targets,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub affected: usize,
    pub errors: Vec<ItemError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<BatchDispatchItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub payload_id: String,
    #[serde(default)]
    pub targets: Targets,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentQuery {
    /// Case-insensitive substring of host or id
    pub search: String,
    /// Only agents that are checking in
    pub online_only: bool,
    pub page: usize,
    pub page_size: usize,
}

/// Where an uploaded artifact was stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadInfo {
    pub source_path: String,
    pub md5: String,
    pub size: usize,
}

/// What a download resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Artifact bytes, read from the store or fetched upstream
    Local { file_name: String, bytes: Vec<u8> },
    /// The caller should be redirected here
    Remote(String),
}

pub struct PayloadService {
    settings: Settings,
    queries: QueryEngine,
    dispatcher: DispatchOrchestrator,
    fleet: Arc<dyn AgentFleet>,
    artifacts: Arc<dyn ArtifactStore>,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl PayloadService {
    pub fn new(
        settings: Settings,
        scheduler: Arc<dyn OperationScheduler>,
        fleet: Arc<dyn AgentFleet>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        let index = Arc::new(PayloadIndex::new());
        let dispatcher = DispatchOrchestrator::new(
            index.clone(),
            scheduler,
            fleet.clone(),
            settings.dispatch_config(),
        );
        let fetcher = Arc::new(HttpFetcher::new(settings.fetch_timeout()));
        Self {
            queries: QueryEngine::new(index),
            settings,
            dispatcher,
            fleet,
            artifacts,
            fetcher,
        }
    }

    /// Replace the fetcher used for `url`-sourced downloads
    pub fn with_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn index(&self) -> &Arc<PayloadIndex> {
        self.queries.index()
    }

    /// Load the configured manifest directory into the index
    pub fn load_manifests(&self) -> LoadSummary {
        self.load_manifests_from(&self.settings.manifest_dir)
    }

    pub fn load_manifests_from(&self, dir: &Path) -> LoadSummary {
        ManifestLoader::new(self.index()).load_dir(dir)
    }

    pub fn list(&self, filter: &FilterSpec) -> Page<CatalogEntry> {
        if filter.page_size == 0 {
            let mut filter = filter.clone();
            filter.page_size = self.settings.default_page_size;
            return self.queries.query(&filter);
        }
        self.queries.query(filter)
    }

    pub fn facets(&self, search: &str) -> FacetSummary {
        self.queries.facets(search)
    }

    pub fn get(&self, id: &str) -> Result<CatalogEntry> {
        self.index()
            .get(id)
            .ok_or_else(|| PayloadError::NotFound(id.to_string()))
    }

    pub fn import_batch(&self, data: &[u8]) -> Result<ImportReport> {
        import_document(self.index(), data)
    }

    pub fn export_batch(&self, selection: &ExportSelection, format: ExportFormat) -> Result<Vec<u8>> {
        let entries = match selection {
            ExportSelection::Ids(ids) => self.index().entries(ids),
            ExportSelection::Filter(filter) => {
                let filter = filter
                    .clone()
                    .with_page(1, self.settings.export_limit);
                self.queries.query(&filter).items
            }
        };
        info!(count = entries.len(), %format, "Exporting payloads");
        render(&entries, format)
    }

    /// Apply one action to many payloads.
    ///
    /// Unknown ids are reported per item and never abort the batch.
    pub async fn batch_action(&self, request: &BatchRequest) -> Result<BatchReport> {
        if request.ids.is_empty() {
            return Err(PayloadError::InvalidRequest("ids must not be empty".to_string()));
        }

        let mut report = BatchReport::default();
        match request.action {
            BatchAction::Dispatch => {
                report.results = self
                    .dispatcher
                    .dispatch_many(&request.ids, &request.targets.agent_ids, &request.args)
                    .await;
                for item in &report.results {
                    match &item.error {
                        None => report.affected += 1,
                        Some(reason) => report.errors.push(ItemError {
                            id: item.payload_id.clone(),
                            reason: reason.clone(),
                        }),
                    }
                }
            }
            action => {
                for id in &dedupe(&request.ids) {
                    let applied = match action {
                        BatchAction::Enable => self.index().set_status(id, Status::Active),
                        BatchAction::Disable => self.index().set_status(id, Status::Disabled),
                        _ => self.index().remove(id),
                    };
                    if applied {
                        report.affected += 1;
                    } else {
                        report.errors.push(ItemError {
                            id: id.clone(),
                            reason: "not found".to_string(),
                        });
                    }
                }
            }
        }

        info!(
            action = ?request.action,
            affected = report.affected,
            failed = report.errors.len(),
            "Applied batch action"
        );
        Ok(report)
    }

    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReport> {
        self.dispatcher
            .dispatch(&request.payload_id, &request.targets.agent_ids, &request.args)
            .await
    }

    /// Known agents matching a host/id search, paginated
    pub async fn list_agents(&self, query: &AgentQuery) -> Result<Page<Agent>> {
        let filter = if query.search.trim().is_empty() {
            AgentFilter::default()
        } else {
            AgentFilter::search(query.search.trim())
        }
        .online(query.online_only);
        let agents: Vec<Agent> = self
            .fleet
            .list_agents(&filter)
            .await?
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        Ok(Page::slice(agents, query.page, query.page_size))
    }

    /// Store an uploaded artifact under the configured prefix
    pub async fn upload_artifact(&self, filename: &str, bytes: &[u8]) -> Result<UploadInfo> {
        let name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                PayloadError::InvalidRequest(format!("invalid artifact filename '{filename}'"))
            })?;

        let prefix = self.settings.artifact_prefix.trim_matches('/');
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        };
        let source_path = self.artifacts.save_artifact(&path, bytes).await?;
        let md5 = hex::encode(Md5::digest(bytes));

        info!(path = %source_path, size = bytes.len(), "Stored artifact");
        Ok(UploadInfo {
            source_path,
            md5,
            size: bytes.len(),
        })
    }

    /// Resolve a payload's artifact for download.
    ///
    /// `url` sources are fetched upstream unless settings ask for a redirect.
    pub async fn download_artifact(&self, id: &str) -> Result<Artifact> {
        let entry = self.get(id)?;
        match &entry.source {
            Source::Url => {
                let url = entry
                    .download_url
                    .clone()
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| {
                        PayloadError::UnsupportedSource(format!("{id} has no download_url"))
                    })?;
                if self.settings.remote_downloads == RemoteDownloads::Redirect {
                    return Ok(Artifact::Remote(url));
                }
                let bytes = self.fetcher.fetch(&url).await.map_err(|e| {
                    warn!(payload = id, "Upstream fetch failed: {:#}", e);
                    PayloadError::Upstream(format!("{url}: {e:#}"))
                })?;
                Ok(Artifact::Local {
                    file_name: remote_file_name(&url, &entry),
                    bytes,
                })
            }
            Source::Local => {
                let path = entry.source_path.clone().unwrap_or_default();
                let bytes = self.artifacts.read_artifact(&path).await.map_err(|e| {
                    warn!(payload = id, "Artifact unavailable: {:#}", e);
                    PayloadError::NotFound(format!("artifact for {id}"))
                })?;
                let file_name = Path::new(&path)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(id)
                    .to_string();
                Ok(Artifact::Local { file_name, bytes })
            }
            Source::Other(other) => Err(PayloadError::UnsupportedSource(other.clone())),
        }
    }

    /// Dispatch records, newest first
    pub async fn history(&self) -> Vec<DispatchRecord> {
        self.dispatcher.history().await
    }
}

/// Last path segment of a download URL, or `<id>.<file_type>` when it has none
fn remote_file_name(url: &str, entry: &CatalogEntry) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    match path.split_once('/').map(|(_, p)| p.rsplit('/').next().unwrap_or(p)) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ if entry.file_type.is_empty() => entry.id.clone(),
        _ => format!("{}.{}", entry.id, entry.file_type),
    }
}
