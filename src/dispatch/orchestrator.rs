//! Dispatch of catalog entries to agents
//!
//! One dispatch creates a scoped operation for the requested agents, then
//! fans out one delivery per agent with bounded concurrency. Every delivery
//! runs under its own timeout and its failure is recorded against that
//! agent only; the whole call fails only when the payload cannot be
//! resolved or the operation cannot be created.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::command::{build_command, select_executor};
use super::fleet::{AgentFilter, AgentFleet, DispatchHandle, OperationScheduler};
use crate::catalog::{CatalogEntry, PayloadIndex, Platform, Source};
use crate::{PayloadError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8888";
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Tunables of the dispatch engine
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Base URL agents use to fetch locally stored artifacts
    pub base_url: String,
    /// Deliveries in flight at once for one dispatch
    pub max_concurrency: usize,
    /// Used when the scheduler does not impose its own bound
    pub delivery_timeout: Duration,
    /// Dispatch records kept in memory
    pub history_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Where an agent fetches a payload from
pub fn delivery_url(entry: &CatalogEntry, base_url: &str) -> Result<String> {
    match &entry.source {
        Source::Url => entry
            .download_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                PayloadError::UnsupportedSource(format!("{} has no download_url", entry.id))
            }),
        Source::Local => Ok(format!(
            "{}/plugin/payloads/{}/download",
            base_url.trim_end_matches('/'),
            entry.id
        )),
        Source::Other(other) => Err(PayloadError::UnsupportedSource(other.clone())),
    }
}

/// Name of the scoped operation created for a payload
pub fn operation_name(payload_id: &str) -> String {
    format!("payload-{payload_id}")
}

/// Why a delivery to one agent failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AgentNotFound,
    DeliveryTimeout,
    DeliveryFailed,
}

/// Outcome of delivering to one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Sent {
        executor: String,
        link: String,
    },
    Failed {
        error: FailureKind,
        reason: String,
    },
}

impl AgentOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, AgentOutcome::Sent { .. })
    }

    fn from_error(err: &PayloadError) -> Self {
        let error = match err {
            PayloadError::AgentNotFound(_) => FailureKind::AgentNotFound,
            PayloadError::DeliveryTimeout { .. } => FailureKind::DeliveryTimeout,
            _ => FailureKind::DeliveryFailed,
        };
        AgentOutcome::Failed {
            error,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentResult {
    pub agent_id: String,
    #[serde(flatten)]
    pub outcome: AgentOutcome,
}

/// Result of one dispatch call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub payload_id: String,
    pub operation_id: String,
    /// One result per distinct target, in request order
    pub results: Vec<AgentResult>,
}

impl DispatchReport {
    pub fn sent(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_sent()).count()
    }
}

/// One payload of a batch dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchDispatchItem {
    pub payload_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DispatchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A scoped operation created by a dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchRecord {
    pub operation_id: String,
    pub name: String,
    pub payload_id: String,
    pub agent_ids: Vec<String>,
    pub args: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Drop repeated ids, keeping the first occurrence
pub(crate) fn dedupe(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(*id))
        .cloned()
        .collect()
}

/// Turns catalog entries into agent commands
pub struct DispatchOrchestrator {
    index: Arc<PayloadIndex>,
    scheduler: Arc<dyn OperationScheduler>,
    fleet: Arc<dyn AgentFleet>,
    config: DispatchConfig,
    history: Mutex<VecDeque<DispatchRecord>>,
}

impl DispatchOrchestrator {
    pub fn new(
        index: Arc<PayloadIndex>,
        scheduler: Arc<dyn OperationScheduler>,
        fleet: Arc<dyn AgentFleet>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            index,
            scheduler,
            fleet,
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn delivery_timeout(&self) -> Duration {
        self.scheduler
            .delivery_timeout()
            .unwrap_or(self.config.delivery_timeout)
    }

    /// Dispatch one payload to a set of agents
    pub async fn dispatch(
        &self,
        payload_id: &str,
        agent_ids: &[String],
        args: &BTreeMap<String, Value>,
    ) -> Result<DispatchReport> {
        let entry = self
            .index
            .get(payload_id)
            .ok_or_else(|| PayloadError::NotFound(payload_id.to_string()))?;
        let url = delivery_url(&entry, &self.config.base_url)?;

        let targets = dedupe(agent_ids);
        if targets.is_empty() {
            return Err(PayloadError::InvalidRequest(
                "at least one target agent is required".to_string(),
            ));
        }

        let name = operation_name(payload_id);
        let operation_id = self
            .scheduler
            .create_scoped_operation(&name, &targets)
            .await
            .map_err(|e| {
                error!(payload = payload_id, "Failed to create operation: {:#}", e);
                PayloadError::OrchestrationFailure(format!("{e:#}"))
            })?;
        info!(
            payload = payload_id,
            operation = %operation_id,
            agents = targets.len(),
            "Dispatching payload"
        );
        self.record(DispatchRecord {
            operation_id: operation_id.clone(),
            name,
            payload_id: payload_id.to_string(),
            agent_ids: targets.clone(),
            args: args.clone(),
            created_at: Utc::now(),
        })
        .await;

        let timeout = self.delivery_timeout();
        let entry = &entry;
        let url = url.as_str();
        let operation = operation_id.as_str();
        let results = stream::iter(targets.into_iter().map(|agent_id| async move {
            let delivery = tokio::time::timeout(
                timeout,
                self.deliver(operation, &agent_id, entry, url),
            )
            .await
            .unwrap_or_else(|_| {
                Err(PayloadError::DeliveryTimeout {
                    agent_id: agent_id.clone(),
                    timeout,
                })
            });

            let outcome = match delivery {
                Ok((executor, handle)) => AgentOutcome::Sent {
                    executor,
                    link: handle.link,
                },
                Err(e) => {
                    warn!(agent = %agent_id, operation, "Delivery failed: {}", e);
                    AgentOutcome::from_error(&e)
                }
            };
            AgentResult { agent_id, outcome }
        }))
        .buffered(self.config.max_concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

        Ok(DispatchReport {
            payload_id: payload_id.to_string(),
            operation_id,
            results,
        })
    }

    async fn deliver(
        &self,
        operation_id: &str,
        agent_id: &str,
        entry: &CatalogEntry,
        url: &str,
    ) -> Result<(String, DispatchHandle)> {
        let agents = self
            .fleet
            .list_agents(&AgentFilter::by_id(agent_id))
            .await
            .map_err(|e| PayloadError::Delivery {
                agent_id: agent_id.to_string(),
                reason: format!("agent lookup failed: {e:#}"),
            })?;
        let agent = agents
            .into_iter()
            .find(|a| a.id == agent_id)
            .ok_or_else(|| PayloadError::AgentNotFound(agent_id.to_string()))?;

        let platform = Platform::from_agent(&agent.platform);
        let command = build_command(platform, &entry.file_type, &entry.id, url);
        let executor = select_executor(platform, &agent.executors);
        debug!(agent = agent_id, %executor, "Sending command");

        let handle = self
            .scheduler
            .send_command(operation_id, agent_id, &executor, &command)
            .await
            .map_err(|e| PayloadError::Delivery {
                agent_id: agent_id.to_string(),
                reason: format!("{e:#}"),
            })?;
        Ok((executor, handle))
    }

    /// Dispatch several payloads to the same agents.
    ///
    /// Each payload is dispatched independently; a failure is reported on
    /// its item and never stops the others.
    pub async fn dispatch_many(
        &self,
        payload_ids: &[String],
        agent_ids: &[String],
        args: &BTreeMap<String, Value>,
    ) -> Vec<BatchDispatchItem> {
        let ids = dedupe(payload_ids);
        let outcomes = join_all(ids.iter().map(|id| self.dispatch(id, agent_ids, args))).await;

        ids.into_iter()
            .zip(outcomes)
            .map(|(payload_id, outcome)| match outcome {
                Ok(report) => BatchDispatchItem {
                    payload_id,
                    report: Some(report),
                    error: None,
                },
                Err(e) => BatchDispatchItem {
                    payload_id,
                    report: None,
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }

    async fn record(&self, record: DispatchRecord) {
        let mut history = self.history.lock().await;
        history.push_front(record);
        history.truncate(self.config.history_limit);
    }

    /// Dispatch records, newest first
    pub async fn history(&self) -> Vec<DispatchRecord> {
        self.history.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::admit_entry;
    use serde_json::json;

    #[test]
    fn test_delivery_url_per_source() {
        let mut raw = json!({
            "id": "p1", "name": "n", "description": "d", "md5": "a".repeat(32),
            "file_type": "exe", "os": ["windows"], "tactics": ["TA0002"],
            "source": "local", "source_path": "files/p1.exe", "executor": "psh"
        });
        let local = admit_entry(&raw).unwrap();
        assert_eq!(
            delivery_url(&local, "http://c2:8888/").unwrap(),
            "http://c2:8888/plugin/payloads/p1/download"
        );

        raw["source"] = json!("url");
        raw["download_url"] = json!("https://cdn/p1.exe");
        let remote = admit_entry(&raw).unwrap();
        assert_eq!(delivery_url(&remote, "http://c2").unwrap(), "https://cdn/p1.exe");

        raw["source"] = json!("s3");
        let other = admit_entry(&raw).unwrap();
        assert!(matches!(
            delivery_url(&other, "http://c2"),
            Err(PayloadError::UnsupportedSource(s)) if s == "s3"
        ));
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let ids: Vec<String> = ["b", "a", "b", "c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedupe(&ids), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_failure_kinds() {
        let timeout = PayloadError::DeliveryTimeout {
            agent_id: "a".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            AgentOutcome::from_error(&timeout),
            AgentOutcome::Failed { error: FailureKind::DeliveryTimeout, .. }
        ));
        assert!(matches!(
            AgentOutcome::from_error(&PayloadError::AgentNotFound("a".into())),
            AgentOutcome::Failed { error: FailureKind::AgentNotFound, .. }
        ));
    }
}
