//! Collaborators of the dispatch engine
//!
//! The engine never talks to agents itself. Operation bookkeeping and
//! command delivery go through an [`OperationScheduler`], agent lookup
//! through an [`AgentFleet`], artifact bytes through an [`ArtifactStore`]
//! and remote artifacts through a [`RemoteFetcher`]. Implementations
//! decide how.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An agent known to the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    /// Free-form platform string the agent reports
    #[serde(default)]
    pub platform: String,
    /// Executors the agent advertises, in its order of preference
    #[serde(default)]
    pub executors: Vec<String>,
    #[serde(default)]
    pub host: String,
    /// Liveness counter the agent reports; zero means it is not checking in
    #[serde(default)]
    pub watchdog: u64,
}

impl Agent {
    pub fn is_online(&self) -> bool {
        self.watchdog > 0
    }
}

/// Which agents a fleet lookup should return
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentFilter {
    /// Exact ids; empty means any
    pub ids: Vec<String>,
    /// Case-insensitive substring of host or id
    pub search: Option<String>,
    /// Skip agents that are not checking in
    pub online_only: bool,
}

impl AgentFilter {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
            ..Default::default()
        }
    }

    pub fn search(text: impl Into<String>) -> Self {
        Self {
            search: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn online(mut self, online_only: bool) -> Self {
        self.online_only = online_only;
        self
    }

    pub fn matches(&self, agent: &Agent) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&agent.id) {
            return false;
        }
        if self.online_only && !agent.is_online() {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(text) => {
                let needle = text.to_lowercase();
                agent.host.to_lowercase().contains(&needle)
                    || agent.id.to_lowercase().contains(&needle)
            }
        }
    }
}

/// Receipt for a command handed to an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchHandle {
    /// Scheduler-side id of the queued command
    pub link: String,
}

/// Creates operations and queues commands on agents
#[async_trait]
pub trait OperationScheduler: Send + Sync {
    /// Create an operation limited to `agent_ids` and return its id
    async fn create_scoped_operation(&self, name: &str, agent_ids: &[String]) -> Result<String>;

    /// Queue `command` for `agent_id` inside an existing operation
    async fn send_command(
        &self,
        operation_id: &str,
        agent_id: &str,
        executor: &str,
        command: &str,
    ) -> Result<DispatchHandle>;

    /// Per-agent delivery bound, when the scheduler imposes one
    fn delivery_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Looks agents up
#[async_trait]
pub trait AgentFleet: Send + Sync {
    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>>;
}

/// Persists uploaded artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes under a relative path and return the stored path
    async fn save_artifact(&self, path: &str, bytes: &[u8]) -> Result<String>;

    async fn read_artifact(&self, path: &str) -> Result<Vec<u8>>;
}

/// Fetches artifacts that live behind a download URL
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP fetcher with a bounded request time
#[derive(Debug)]
pub struct HttpFetcher {
    timeout: Duration,
    client: OnceCell<reqwest::Client>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::Client> {
        self.client.get_or_try_init(|| {
            reqwest::Client::builder()
                .user_agent(concat!("payloads/", env!("CARGO_PKG_VERSION")))
                .timeout(self.timeout)
                .build()
                .context("Failed to create HTTP client")
        })
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client()?
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;

        if !response.status().is_success() {
            bail!("HTTP {} from {}", response.status(), url);
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response from {url}"))?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

/// A fixed agent roster, typically read from a YAML file
#[derive(Debug, Clone, Default)]
pub struct StaticFleet {
    agents: Vec<Agent>,
}

#[derive(Deserialize)]
struct Roster {
    #[serde(default)]
    agents: Vec<Agent>,
}

impl StaticFleet {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self { agents }
    }

    /// Read a roster document of the form `agents: [...]`
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read agent roster: {}", path.display()))?;
        let roster: Roster = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse agent roster: {}", path.display()))?;
        Ok(Self::new(roster.agents))
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }
}

#[async_trait]
impl AgentFleet for StaticFleet {
    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        Ok(self
            .agents
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }
}

/// Artifact store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative artifact path below the root
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("Artifact path must be relative and stay below the store: {path}");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn save_artifact(&self, path: &str, bytes: &[u8]) -> Result<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("Failed to write artifact: {}", target.display()))?;
        debug!("Stored {} bytes at {}", bytes.len(), target.display());
        Ok(path.to_string())
    }

    async fn read_artifact(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .with_context(|| format!("Failed to read artifact: {}", target.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn agent(id: &str, host: &str) -> Agent {
        Agent {
            id: id.to_string(),
            platform: "linux".to_string(),
            executors: vec!["sh".to_string()],
            host: host.to_string(),
            watchdog: 60,
        }
    }

    /// Answer one HTTP request with a canned response, returning the URL to hit
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/files/p1.exe")
    }

    #[test]
    fn test_filter_matches_host_or_id() {
        let a = agent("abc123", "WEB-01");
        assert!(AgentFilter::search("web").matches(&a));
        assert!(AgentFilter::search("C12").matches(&a));
        assert!(!AgentFilter::search("db").matches(&a));
        assert!(AgentFilter::default().matches(&a));
        assert!(!AgentFilter::by_id("abc").matches(&a));
    }

    #[test]
    fn test_filter_online_only() {
        let mut quiet = agent("q1", "web-02");
        quiet.watchdog = 0;
        assert!(!AgentFilter::default().online(true).matches(&quiet));
        assert!(AgentFilter::default().matches(&quiet));
        assert!(AgentFilter::search("web").online(true).matches(&agent("a1", "web-01")));
    }

    #[tokio::test]
    async fn test_http_fetcher_returns_body() {
        let url =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nMZ\x00ab")
                .await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5));
        assert_eq!(fetcher.fetch(&url).await.unwrap(), b"MZ\x00ab");
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_error_status() {
        let url =
            serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5));
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(format!("{err:#}").contains("404"));
    }

    #[tokio::test]
    async fn test_static_fleet_filters() {
        let fleet = StaticFleet::new(vec![agent("a1", "web"), agent("a2", "db")]);
        let found = fleet.list_agents(&AgentFilter::by_id("a2")).await.unwrap();
        assert_eq!(found, vec![agent("a2", "db")]);
    }

    #[test]
    fn test_roster_from_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agents.yaml");
        std::fs::write(
            &path,
            "agents:\n  - id: a1\n    platform: windows\n    executors: [psh, cmd]\n    host: ws-7\n    watchdog: 0\n",
        )
        .unwrap();
        let fleet = StaticFleet::from_path(&path).unwrap();
        assert_eq!(fleet.agents()[0].executors, vec!["psh", "cmd"]);
        assert!(!fleet.agents()[0].is_online());
    }

    #[tokio::test]
    async fn test_local_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path());

        let saved = store
            .save_artifact("data/files/stager.ps1", b"Write-Host hi")
            .await
            .unwrap();
        assert_eq!(saved, "data/files/stager.ps1");
        assert_eq!(store.read_artifact(&saved).await.unwrap(), b"Write-Host hi");
    }

    #[tokio::test]
    async fn test_local_store_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        assert!(store.save_artifact("../evil", b"x").await.is_err());
        assert!(store.read_artifact("/etc/passwd").await.is_err());
        assert!(store.read_artifact("").await.is_err());
    }
}
