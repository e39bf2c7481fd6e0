//! Payload dispatch
//!
//! Builds per-platform retrieval commands and delivers them to agents
//! through pluggable collaborators.

mod command;
mod fleet;
mod orchestrator;

pub use command::{build_command, preferred_executor, select_executor};
pub use fleet::{
    Agent, AgentFilter, AgentFleet, ArtifactStore, DispatchHandle, HttpFetcher, LocalArtifactStore,
    OperationScheduler, RemoteFetcher, StaticFleet,
};
pub(crate) use orchestrator::dedupe;
pub use orchestrator::{
    delivery_url, operation_name, AgentOutcome, AgentResult, BatchDispatchItem, DispatchConfig,
    DispatchOrchestrator, DispatchRecord, DispatchReport, FailureKind, DEFAULT_BASE_URL,
    DEFAULT_DELIVERY_TIMEOUT, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_CONCURRENCY,
};
