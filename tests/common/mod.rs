//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use payloads::catalog::{admit_entry, CatalogEntry};
use payloads::dispatch::{Agent, DispatchHandle, OperationScheduler, RemoteFetcher, StaticFleet};
use serde_json::{json, Value};

/// A command the scheduler was asked to queue
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub operation_id: String,
    pub agent_id: String,
    pub executor: String,
    pub command: String,
}

/// Scheduler that records everything and can be told to misbehave
#[derive(Default)]
pub struct RecordingScheduler {
    pub operations: Mutex<Vec<(String, Vec<String>)>>,
    pub sent: Mutex<Vec<SentCommand>>,
    pub fail_create: bool,
    /// Agents whose delivery never completes
    pub stalled: HashSet<String>,
    /// Agents whose delivery errors
    pub rejecting: HashSet<String>,
    pub timeout: Option<Duration>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<(String, Vec<String>)> {
        self.operations.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperationScheduler for RecordingScheduler {
    async fn create_scoped_operation(&self, name: &str, agent_ids: &[String]) -> Result<String> {
        if self.fail_create {
            bail!("scheduler unavailable");
        }
        let mut operations = self.operations.lock().unwrap();
        operations.push((name.to_string(), agent_ids.to_vec()));
        Ok(format!("op-{}", operations.len()))
    }

    async fn send_command(
        &self,
        operation_id: &str,
        agent_id: &str,
        executor: &str,
        command: &str,
    ) -> Result<DispatchHandle> {
        if self.stalled.contains(agent_id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.rejecting.contains(agent_id) {
            bail!("agent {agent_id} refused the link");
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(SentCommand {
            operation_id: operation_id.to_string(),
            agent_id: agent_id.to_string(),
            executor: executor.to_string(),
            command: command.to_string(),
        });
        Ok(DispatchHandle {
            link: format!("link-{}", sent.len()),
        })
    }

    fn delivery_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

pub fn agent(id: &str, platform: &str, executors: &[&str]) -> Agent {
    Agent {
        id: id.to_string(),
        platform: platform.to_string(),
        executors: executors.iter().map(|e| e.to_string()).collect(),
        host: format!("host-{id}"),
        watchdog: 60,
    }
}

/// Fetcher that serves one fixed body, or fails when none is set
#[derive(Default)]
pub struct StubFetcher {
    pub body: Option<Vec<u8>>,
    requested: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn serving(body: &[u8]) -> Self {
        Self {
            body: Some(body.to_vec()),
            ..Default::default()
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.requested.lock().unwrap().push(url.to_string());
        match &self.body {
            Some(body) => Ok(body.clone()),
            None => bail!("HTTP 503 Service Unavailable from {url}"),
        }
    }
}

pub fn fleet(agents: Vec<Agent>) -> Arc<StaticFleet> {
    Arc::new(StaticFleet::new(agents))
}

/// A valid raw manifest record
pub fn raw_entry(id: &str) -> Value {
    json!({
        "id": id,
        "name": format!("{id} stager"),
        "description": "powershell stager",
        "md5": "0123456789abcdef0123456789abcdef",
        "file_type": "ps1",
        "os": ["windows"],
        "tactics": ["TA0002"],
        "tags": ["stager"],
        "severity": "high",
        "source": "url",
        "download_url": format!("https://cdn.example/{id}.ps1"),
        "executor": "psh",
        "updated_at": "2025-01-01T00:00:00Z"
    })
}

pub fn entry(raw: &Value) -> CatalogEntry {
    admit_entry(raw).unwrap()
}
